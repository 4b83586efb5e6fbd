//! Graph model and mutation API.
//!
//! A graph is a named collection of components, the edges between their
//! ports, the initial packets delivered at startup, and the public port maps
//! that make the graph itself usable as a component. Graphs are built with
//! the mutation API below and then consumed by
//! [`run`][crate::runner::run]; because running takes ownership, a graph
//! cannot be mutated once started.

use std::{
    any::{type_name, Any, TypeId},
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
};

use snafu::Snafu;
use tokio::sync::mpsc;

use crate::{
    component::Component,
    factory::{ComponentFactory, FactoryError},
    ids::{try_into_node_id, NodeId, PortRef},
    port::PortError,
};

const DEFAULT_EDGE_CAPACITY: usize = 128;

/// A graph mutation error.
///
/// Every mutation validates its preconditions before touching any state, so
/// a returned error always leaves the graph exactly as it was.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum GraphError {
    /// The node identifier is not valid.
    #[snafu(display("invalid node ID '{}': {}", input, reason))]
    InvalidNodeId {
        /// The rejected identifier.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A node with this identifier already exists.
    #[snafu(display("duplicate node '{}'", id))]
    DuplicateNode {
        /// The offending identifier.
        id: NodeId,
    },

    /// No node with this identifier exists.
    #[snafu(display("nonexistent node '{}'", id))]
    NonexistentNode {
        /// The offending identifier.
        id: NodeId,
    },

    /// The node declares no port with this name.
    #[snafu(display("node '{}' has no port named '{}'", node, port))]
    NonexistentPort {
        /// The node that was addressed.
        node: NodeId,
        /// The missing port name.
        port: String,
    },

    /// The port exists but has the wrong direction for the operation.
    #[snafu(display("port '{}' of node '{}' is not an {} port", port, node, expected))]
    DirectionMismatch {
        /// The node that was addressed.
        node: NodeId,
        /// The port with the wrong direction.
        port: String,
        /// The direction the operation required.
        expected: &'static str,
    },

    /// The port is already bound to a channel.
    #[snafu(display("{} port '{}' of node '{}' is already bound", direction, port, node))]
    AlreadyBound {
        /// The node that was addressed.
        node: NodeId,
        /// The port that is already bound.
        port: String,
        /// The port's direction.
        direction: &'static str,
    },

    /// The input port already has an initial packet pending.
    #[snafu(display("input port '{}' of node '{}' already has an initial packet", port, node))]
    HasInitialPacket {
        /// The node that was addressed.
        node: NodeId,
        /// The port with the pending packet.
        port: String,
    },

    /// The two endpoints of the edge carry different element types.
    #[snafu(display(
        "element type mismatch from '{}' (type {}) to '{}' (type {})",
        from,
        from_ty,
        to,
        to_ty
    ))]
    ElementTypeMismatch {
        /// The source endpoint.
        from: PortRef,
        /// The source element type.
        from_ty: &'static str,
        /// The target endpoint.
        to: PortRef,
        /// The target element type.
        to_ty: &'static str,
    },

    /// The initial packet value is not of the port's element type.
    #[snafu(display(
        "initial packet for '{}' has type {} but the port carries {}",
        target,
        actual,
        expected
    ))]
    InitialTypeMismatch {
        /// The targeted endpoint.
        target: PortRef,
        /// The value's type.
        actual: &'static str,
        /// The port's element type.
        expected: &'static str,
    },

    /// No such edge is recorded.
    #[snafu(display("no edge from '{}' to '{}'", from, to))]
    NonexistentEdge {
        /// The source endpoint.
        from: PortRef,
        /// The target endpoint.
        to: PortRef,
    },

    /// No initial packet is pending for the port.
    #[snafu(display("no initial packet pending for '{}'", target))]
    NonexistentInitial {
        /// The targeted endpoint.
        target: PortRef,
    },

    /// A public port with this name is already declared.
    #[snafu(display("duplicate public {} port '{}'", direction, name))]
    DuplicatePublicPort {
        /// The public port's direction.
        direction: &'static str,
        /// The offending public name.
        name: String,
    },

    /// No public port with this name is declared.
    #[snafu(display("nonexistent public {} port '{}'", direction, name))]
    NonexistentPublicPort {
        /// The public port's direction.
        direction: &'static str,
        /// The offending public name.
        name: String,
    },

    /// The public port has no external channel attached.
    #[snafu(display("no external channel attached to public {} port '{}'", direction, name))]
    NotAttached {
        /// The public port's direction.
        direction: &'static str,
        /// The public name.
        name: String,
    },

    /// The component factory failed to construct the node.
    #[snafu(display("failed to construct node '{}': {}", id, source))]
    Factory {
        /// The node being constructed.
        id: NodeId,
        /// The underlying factory error.
        source: FactoryError,
    },

    /// Binding a channel to a port failed.
    #[snafu(display("failed to bind port '{}': {}", at, source))]
    Bind {
        /// The endpoint being bound.
        at: PortRef,
        /// The underlying port error.
        source: PortError,
    },
}

struct Edge {
    from: PortRef,
    to: PortRef,
}

pub(crate) struct InitialPacket {
    pub(crate) to: PortRef,
    pub(crate) value: Box<dyn Any + Send>,
}

struct ResolvedPort {
    at: PortRef,
    element_ty: TypeId,
    element_ty_name: &'static str,
}

/// A directed graph of components connected by port channels.
pub struct Graph {
    pub(crate) nodes: HashMap<NodeId, Box<dyn Component>>,
    edges: Vec<Edge>,
    pub(crate) iips: Vec<InitialPacket>,
    pub(crate) in_port_map: HashMap<String, PortRef>,
    pub(crate) out_port_map: HashMap<String, PortRef>,
    attached_inputs: HashSet<String>,
    attached_outputs: HashSet<String>,
    edge_capacity: usize,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            iips: Vec::new(),
            in_port_map: HashMap::new(),
            out_port_map: HashMap::new(),
            attached_inputs: HashSet::new(),
            attached_outputs: HashSet::new(),
            edge_capacity: DEFAULT_EDGE_CAPACITY,
        }
    }

    /// Sets the channel capacity used for edges created by subsequent
    /// [`connect`][Self::connect] calls.
    pub fn with_edge_capacity(&mut self, capacity: NonZeroUsize) -> &mut Self {
        self.edge_capacity = capacity.get();
        self
    }

    /// Inserts a component under the given node identifier.
    ///
    /// # Errors
    ///
    /// Fails if the identifier is invalid or already in use.
    pub fn add<I, C>(&mut self, id: I, component: C) -> Result<(), GraphError>
    where
        I: AsRef<str>,
        C: Component + 'static,
    {
        self.add_boxed(id, Box::new(component))
    }

    /// Inserts an already-boxed component under the given node identifier.
    ///
    /// # Errors
    ///
    /// Fails if the identifier is invalid or already in use.
    pub fn add_boxed<I>(&mut self, id: I, component: Box<dyn Component>) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let id = try_into_node_id(id)?;
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }

        self.nodes.insert(id, component);
        Ok(())
    }

    /// Constructs a component of the given registered type and adds it.
    ///
    /// # Errors
    ///
    /// Fails if the identifier is invalid or taken, the type is not
    /// registered, or the constructor fails.
    pub fn add_new<I>(
        &mut self, factory: &ComponentFactory, type_name: &str, id: I,
    ) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let id = try_into_node_id(id)?;
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }

        let component = factory
            .create(type_name)
            .map_err(|source| GraphError::Factory { id: id.clone(), source })?;
        self.nodes.insert(id, component);
        Ok(())
    }

    /// Deletes a node along with every edge and initial packet touching it.
    ///
    /// Surviving endpoints of removed edges are unbound, and public port
    /// mappings that referenced the node are dropped.
    ///
    /// # Errors
    ///
    /// Fails if no such node exists.
    pub fn remove<I>(&mut self, id: I) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let id = try_into_node_id(id)?;
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NonexistentNode { id });
        }

        let edges = std::mem::take(&mut self.edges);
        let (dropped, kept): (Vec<_>, Vec<_>) = edges
            .into_iter()
            .partition(|edge| edge.from.node() == &id || edge.to.node() == &id);
        self.edges = kept;

        for edge in dropped {
            if edge.from.node() != &id {
                self.unbind_output(&edge.from);
            }
            if edge.to.node() != &id {
                self.unbind_input(&edge.to);
            }
        }

        self.iips.retain(|iip| iip.to.node() != &id);

        let attached = &mut self.attached_inputs;
        self.in_port_map.retain(|public, target| {
            if target.node() == &id {
                attached.remove(public);
                false
            } else {
                true
            }
        });
        let attached = &mut self.attached_outputs;
        self.out_port_map.retain(|public, target| {
            if target.node() == &id {
                attached.remove(public);
                false
            } else {
                true
            }
        });

        self.nodes.remove(&id);
        Ok(())
    }

    /// Renames a node, updating every edge, initial packet, and public port
    /// mapping that referenced it.
    ///
    /// # Errors
    ///
    /// Fails if `from` does not exist or `to` is invalid or taken.
    pub fn rename<F, T>(&mut self, from: F, to: T) -> Result<(), GraphError>
    where
        F: AsRef<str>,
        T: AsRef<str>,
    {
        let from = try_into_node_id(from)?;
        let to = try_into_node_id(to)?;
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::NonexistentNode { id: from });
        }
        if self.nodes.contains_key(&to) {
            return Err(GraphError::DuplicateNode { id: to });
        }

        let component = self.nodes.remove(&from).expect("presence checked above");
        self.nodes.insert(to.clone(), component);

        for edge in &mut self.edges {
            edge.from.retarget(&from, &to);
            edge.to.retarget(&from, &to);
        }
        for iip in &mut self.iips {
            iip.to.retarget(&from, &to);
        }
        for target in self.in_port_map.values_mut() {
            target.retarget(&from, &to);
        }
        for target in self.out_port_map.values_mut() {
            target.retarget(&from, &to);
        }

        Ok(())
    }

    /// Creates a channel between an output port and an input port and
    /// records the edge.
    ///
    /// # Errors
    ///
    /// Fails on unknown nodes or ports, direction mismatches, endpoints that
    /// are already bound (or already targeted by an initial packet), and
    /// element type mismatches. Nothing is bound unless every check passes.
    pub fn connect<S, T>(
        &mut self, src_node: S, src_port: &str, tgt_node: T, tgt_port: &str,
    ) -> Result<(), GraphError>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let src_node = try_into_node_id(src_node)?;
        let tgt_node = try_into_node_id(tgt_node)?;

        let from = self.resolve_output(&src_node, src_port)?;
        let to = self.resolve_input(&tgt_node, tgt_port)?;

        if self.iips.iter().any(|iip| iip.to == to.at) {
            return Err(GraphError::HasInitialPacket {
                node: tgt_node,
                port: tgt_port.to_string(),
            });
        }

        if from.element_ty != to.element_ty {
            return Err(GraphError::ElementTypeMismatch {
                from: from.at,
                from_ty: from.element_ty_name,
                to: to.at,
                to_ty: to.element_ty_name,
            });
        }

        let capacity = self.edge_capacity;
        let receiver = {
            let component = self
                .nodes
                .get_mut(from.at.node())
                .expect("source node resolved above");
            let mut ports = component.ports();
            let slot = ports
                .output_mut(from.at.port())
                .expect("source port resolved above");
            slot.open(capacity)
                .map_err(|source| GraphError::Bind { at: from.at.clone(), source })?
        };

        let bind_result = {
            let component = self
                .nodes
                .get_mut(to.at.node())
                .expect("target node resolved above");
            let mut ports = component.ports();
            let slot = ports
                .input_mut(to.at.port())
                .expect("target port resolved above");
            slot.bind(receiver)
        };

        if let Err(source) = bind_result {
            // Roll back the sender created above so the failed call leaves
            // the source port untouched.
            self.unbind_output(&from.at);
            return Err(GraphError::Bind { at: to.at, source });
        }

        self.edges.push(Edge { from: from.at, to: to.at });
        Ok(())
    }

    /// Removes the edge between the given endpoints and unbinds both ports.
    ///
    /// # Errors
    ///
    /// Fails if no such edge is recorded.
    pub fn disconnect<S, T>(
        &mut self, src_node: S, src_port: &str, tgt_node: T, tgt_port: &str,
    ) -> Result<(), GraphError>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let from = PortRef::new(try_into_node_id(src_node)?, src_port);
        let to = PortRef::new(try_into_node_id(tgt_node)?, tgt_port);

        let idx = self
            .edges
            .iter()
            .position(|edge| edge.from == from && edge.to == to)
            .ok_or_else(|| GraphError::NonexistentEdge {
                from: from.clone(),
                to: to.clone(),
            })?;
        self.edges.remove(idx);

        self.unbind_output(&from);
        self.unbind_input(&to);
        Ok(())
    }

    /// Records a constant value to deliver once to the given input port at
    /// startup.
    ///
    /// # Errors
    ///
    /// Fails if the port is unknown, not an input, already bound, already
    /// targeted by another initial packet, or if the value is not of the
    /// port's element type.
    pub fn add_iip<I, V>(&mut self, node: I, port: &str, value: V) -> Result<(), GraphError>
    where
        I: AsRef<str>,
        V: Send + 'static,
    {
        let node = try_into_node_id(node)?;
        let to = self.resolve_input(&node, port)?;

        if self.iips.iter().any(|iip| iip.to == to.at) {
            return Err(GraphError::HasInitialPacket {
                node,
                port: port.to_string(),
            });
        }
        if TypeId::of::<V>() != to.element_ty {
            return Err(GraphError::InitialTypeMismatch {
                target: to.at,
                actual: type_name::<V>(),
                expected: to.element_ty_name,
            });
        }

        self.iips.push(InitialPacket {
            to: to.at,
            value: Box::new(value),
        });
        Ok(())
    }

    /// Drops the pending initial packet for the given input port.
    ///
    /// # Errors
    ///
    /// Fails if no packet is pending there.
    pub fn remove_iip<I>(&mut self, node: I, port: &str) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let target = PortRef::new(try_into_node_id(node)?, port);
        let idx = self
            .iips
            .iter()
            .position(|iip| iip.to == target)
            .ok_or(GraphError::NonexistentInitial { target })?;
        self.iips.remove(idx);
        Ok(())
    }

    /// Exposes an internal input port under a public name.
    ///
    /// # Errors
    ///
    /// Fails if the public name is taken or the internal port is unknown or
    /// not an input.
    pub fn map_in_port<I>(&mut self, public: &str, node: I, port: &str) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let node = try_into_node_id(node)?;
        if self.in_port_map.contains_key(public) {
            return Err(GraphError::DuplicatePublicPort {
                direction: "input",
                name: public.to_string(),
            });
        }

        let component = self
            .nodes
            .get_mut(&node)
            .ok_or_else(|| GraphError::NonexistentNode { id: node.clone() })?;
        let ports = component.ports();
        if !ports.has_input(port) {
            return Err(if ports.has_output(port) {
                GraphError::DirectionMismatch {
                    node,
                    port: port.to_string(),
                    expected: "input",
                }
            } else {
                GraphError::NonexistentPort {
                    node,
                    port: port.to_string(),
                }
            });
        }

        self.in_port_map
            .insert(public.to_string(), PortRef::new(node, port));
        Ok(())
    }

    /// Exposes an internal output port under a public name.
    ///
    /// # Errors
    ///
    /// Fails if the public name is taken or the internal port is unknown or
    /// not an output.
    pub fn map_out_port<I>(&mut self, public: &str, node: I, port: &str) -> Result<(), GraphError>
    where
        I: AsRef<str>,
    {
        let node = try_into_node_id(node)?;
        if self.out_port_map.contains_key(public) {
            return Err(GraphError::DuplicatePublicPort {
                direction: "output",
                name: public.to_string(),
            });
        }

        let component = self
            .nodes
            .get_mut(&node)
            .ok_or_else(|| GraphError::NonexistentNode { id: node.clone() })?;
        let ports = component.ports();
        if !ports.has_output(port) {
            return Err(if ports.has_input(port) {
                GraphError::DirectionMismatch {
                    node,
                    port: port.to_string(),
                    expected: "output",
                }
            } else {
                GraphError::NonexistentPort {
                    node,
                    port: port.to_string(),
                }
            });
        }

        self.out_port_map
            .insert(public.to_string(), PortRef::new(node, port));
        Ok(())
    }

    /// Removes a public input port mapping, detaching any external channel
    /// attached to it.
    ///
    /// # Errors
    ///
    /// Fails if no such public port is declared.
    pub fn unmap_in_port(&mut self, public: &str) -> Result<(), GraphError> {
        let target = self
            .in_port_map
            .remove(public)
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "input",
                name: public.to_string(),
            })?;
        if self.attached_inputs.remove(public) {
            self.unbind_input(&target);
        }
        Ok(())
    }

    /// Removes a public output port mapping, detaching any external channel
    /// attached to it.
    ///
    /// # Errors
    ///
    /// Fails if no such public port is declared.
    pub fn unmap_out_port(&mut self, public: &str) -> Result<(), GraphError> {
        let target = self
            .out_port_map
            .remove(public)
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "output",
                name: public.to_string(),
            })?;
        if self.attached_outputs.remove(public) {
            self.unbind_output(&target);
        }
        Ok(())
    }

    /// Renames a public input port, keeping any attached channel bound.
    ///
    /// # Errors
    ///
    /// Fails if `from` is not declared or `to` is taken.
    pub fn rename_in_port(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if !self.in_port_map.contains_key(from) {
            return Err(GraphError::NonexistentPublicPort {
                direction: "input",
                name: from.to_string(),
            });
        }
        if self.in_port_map.contains_key(to) {
            return Err(GraphError::DuplicatePublicPort {
                direction: "input",
                name: to.to_string(),
            });
        }

        let target = self.in_port_map.remove(from).expect("presence checked above");
        self.in_port_map.insert(to.to_string(), target);
        if self.attached_inputs.remove(from) {
            self.attached_inputs.insert(to.to_string());
        }
        Ok(())
    }

    /// Renames a public output port, keeping any attached channel bound.
    ///
    /// # Errors
    ///
    /// Fails if `from` is not declared or `to` is taken.
    pub fn rename_out_port(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if !self.out_port_map.contains_key(from) {
            return Err(GraphError::NonexistentPublicPort {
                direction: "output",
                name: from.to_string(),
            });
        }
        if self.out_port_map.contains_key(to) {
            return Err(GraphError::DuplicatePublicPort {
                direction: "output",
                name: to.to_string(),
            });
        }

        let target = self
            .out_port_map
            .remove(from)
            .expect("presence checked above");
        self.out_port_map.insert(to.to_string(), target);
        if self.attached_outputs.remove(from) {
            self.attached_outputs.insert(to.to_string());
        }
        Ok(())
    }

    /// Attaches an external channel to a public input port.
    ///
    /// The embedder keeps the sending half; dropping it is how the graph's
    /// input is eventually closed.
    ///
    /// # Errors
    ///
    /// Fails if the public port is not declared, the internal port is
    /// already bound, or the channel's element type does not match.
    pub fn set_in_port<T>(&mut self, public: &str, receiver: mpsc::Receiver<T>) -> Result<(), GraphError>
    where
        T: Send + 'static,
    {
        let target = self
            .in_port_map
            .get(public)
            .cloned()
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "input",
                name: public.to_string(),
            })?;

        let component = self
            .nodes
            .get_mut(target.node())
            .ok_or_else(|| GraphError::NonexistentNode {
                id: target.node().clone(),
            })?;
        let mut ports = component.ports();
        let slot = ports
            .input_mut(target.port())
            .ok_or_else(|| GraphError::NonexistentPort {
                node: target.node().clone(),
                port: target.port().to_string(),
            })?;
        slot.bind(Box::new(receiver))
            .map_err(|source| GraphError::Bind { at: target.clone(), source })?;

        self.attached_inputs.insert(public.to_string());
        Ok(())
    }

    /// Attaches an external channel to a public output port.
    ///
    /// The embedder keeps the receiving half and observes closure on it once
    /// the internal process terminates.
    ///
    /// # Errors
    ///
    /// Fails if the public port is not declared, the internal port is
    /// already bound, or the channel's element type does not match.
    pub fn set_out_port<T>(&mut self, public: &str, sender: mpsc::Sender<T>) -> Result<(), GraphError>
    where
        T: Send + 'static,
    {
        let target = self
            .out_port_map
            .get(public)
            .cloned()
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "output",
                name: public.to_string(),
            })?;

        let component = self
            .nodes
            .get_mut(target.node())
            .ok_or_else(|| GraphError::NonexistentNode {
                id: target.node().clone(),
            })?;
        let mut ports = component.ports();
        let slot = ports
            .output_mut(target.port())
            .ok_or_else(|| GraphError::NonexistentPort {
                node: target.node().clone(),
                port: target.port().to_string(),
            })?;
        slot.bind(Box::new(sender))
            .map_err(|source| GraphError::Bind { at: target.clone(), source })?;

        self.attached_outputs.insert(public.to_string());
        Ok(())
    }

    /// Detaches the external channel from a public input port.
    ///
    /// # Errors
    ///
    /// Fails if the public port is not declared or nothing is attached.
    pub fn unset_in_port(&mut self, public: &str) -> Result<(), GraphError> {
        let target = self
            .in_port_map
            .get(public)
            .cloned()
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "input",
                name: public.to_string(),
            })?;
        if !self.attached_inputs.remove(public) {
            return Err(GraphError::NotAttached {
                direction: "input",
                name: public.to_string(),
            });
        }

        self.unbind_input(&target);
        Ok(())
    }

    /// Detaches the external channel from a public output port.
    ///
    /// # Errors
    ///
    /// Fails if the public port is not declared or nothing is attached.
    pub fn unset_out_port(&mut self, public: &str) -> Result<(), GraphError> {
        let target = self
            .out_port_map
            .get(public)
            .cloned()
            .ok_or_else(|| GraphError::NonexistentPublicPort {
                direction: "output",
                name: public.to_string(),
            })?;
        if !self.attached_outputs.remove(public) {
            return Err(GraphError::NotAttached {
                direction: "output",
                name: public.to_string(),
            });
        }

        self.unbind_output(&target);
        Ok(())
    }

    /// Returns whether a node with the given identifier exists.
    pub fn contains_node(&self, id: &str) -> bool {
        NodeId::try_from(id)
            .map(|id| self.nodes.contains_key(&id))
            .unwrap_or(false)
    }

    /// Iterates over the recorded edges as `(source, target)` endpoints.
    pub fn edges(&self) -> impl Iterator<Item = (&PortRef, &PortRef)> {
        self.edges.iter().map(|edge| (&edge.from, &edge.to))
    }

    /// Iterates over the endpoints with pending initial packets.
    pub fn iip_targets(&self) -> impl Iterator<Item = &PortRef> {
        self.iips.iter().map(|iip| &iip.to)
    }

    /// Iterates over the public input port map as `(public, internal)`.
    pub fn in_ports(&self) -> impl Iterator<Item = (&str, &PortRef)> {
        self.in_port_map.iter().map(|(name, target)| (name.as_str(), target))
    }

    /// Iterates over the public output port map as `(public, internal)`.
    pub fn out_ports(&self) -> impl Iterator<Item = (&str, &PortRef)> {
        self.out_port_map
            .iter()
            .map(|(name, target)| (name.as_str(), target))
    }

    fn resolve_output(&mut self, node: &NodeId, port: &str) -> Result<ResolvedPort, GraphError> {
        let component = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| GraphError::NonexistentNode { id: node.clone() })?;
        let mut ports = component.ports();

        if let Some(slot) = ports.output_mut(port) {
            if slot.is_bound() {
                return Err(GraphError::AlreadyBound {
                    node: node.clone(),
                    port: port.to_string(),
                    direction: "output",
                });
            }
            return Ok(ResolvedPort {
                at: PortRef::new(node.clone(), port),
                element_ty: slot.element_type(),
                element_ty_name: slot.element_type_name(),
            });
        }

        if ports.has_input(port) {
            return Err(GraphError::DirectionMismatch {
                node: node.clone(),
                port: port.to_string(),
                expected: "output",
            });
        }
        Err(GraphError::NonexistentPort {
            node: node.clone(),
            port: port.to_string(),
        })
    }

    fn resolve_input(&mut self, node: &NodeId, port: &str) -> Result<ResolvedPort, GraphError> {
        let component = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| GraphError::NonexistentNode { id: node.clone() })?;
        let mut ports = component.ports();

        if let Some(slot) = ports.input_mut(port) {
            if slot.is_bound() {
                return Err(GraphError::AlreadyBound {
                    node: node.clone(),
                    port: port.to_string(),
                    direction: "input",
                });
            }
            return Ok(ResolvedPort {
                at: PortRef::new(node.clone(), port),
                element_ty: slot.element_type(),
                element_ty_name: slot.element_type_name(),
            });
        }

        if ports.has_output(port) {
            return Err(GraphError::DirectionMismatch {
                node: node.clone(),
                port: port.to_string(),
                expected: "input",
            });
        }
        Err(GraphError::NonexistentPort {
            node: node.clone(),
            port: port.to_string(),
        })
    }

    fn unbind_output(&mut self, at: &PortRef) {
        if let Some(component) = self.nodes.get_mut(at.node()) {
            let mut ports = component.ports();
            if let Some(slot) = ports.output_mut(at.port()) {
                slot.unbind();
            }
        }
    }

    fn unbind_input(&mut self, at: &PortRef) {
        if let Some(component) = self.nodes.get_mut(at.node()) {
            let mut ports = component.ports();
            if let Some(slot) = ports.input_mut(at.port()) {
                slot.unbind();
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::test_util::{Doubler, Repeater};

    impl Graph {
        fn with_node<C>(&mut self, id: &str, component: C) -> &mut Self
        where
            C: Component + 'static,
        {
            self.add(id, component).expect("should not fail to add node");
            self
        }

        fn with_edge(&mut self, src: (&str, &str), tgt: (&str, &str)) -> &mut Self {
            self.connect(src.0, src.1, tgt.0, tgt.1)
                .expect("should not fail to add edge");
            self
        }

        fn with_iip<V>(&mut self, node: &str, port: &str, value: V) -> &mut Self
        where
            V: Send + 'static,
        {
            self.add_iip(node, port, value)
                .expect("should not fail to add initial packet");
            self
        }

        fn edge_strings(&self) -> Vec<(String, String)> {
            self.edges()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect()
        }
    }

    #[test]
    fn add_rejects_duplicates_and_invalid_ids() {
        let mut graph = Graph::new();
        graph.with_node("d", Doubler::default());

        let result = graph.add("d", Doubler::default());
        assert!(matches!(result, Err(GraphError::DuplicateNode { .. })));

        let result = graph.add("not a name", Doubler::default());
        assert!(matches!(result, Err(GraphError::InvalidNodeId { .. })));
    }

    #[test]
    fn connect_validates_endpoints() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default());

        let result = graph.connect("missing", "out", "b", "in");
        assert!(matches!(result, Err(GraphError::NonexistentNode { .. })));

        let result = graph.connect("a", "nope", "b", "in");
        assert!(matches!(result, Err(GraphError::NonexistentPort { .. })));

        // Source must be an output, target an input.
        let result = graph.connect("a", "in", "b", "in");
        assert!(matches!(
            result,
            Err(GraphError::DirectionMismatch { expected: "output", .. })
        ));
        let result = graph.connect("a", "out", "b", "out");
        assert!(matches!(
            result,
            Err(GraphError::DirectionMismatch { expected: "input", .. })
        ));

        assert!(graph.connect("a", "out", "b", "in").is_ok());
        assert_eq!(
            graph.edge_strings(),
            vec![("a.out".to_string(), "b.in".to_string())]
        );
    }

    #[test]
    fn connect_rejects_element_type_mismatch() {
        let mut graph = Graph::new();
        graph
            .with_node("d", Doubler::default())
            .with_node("r", Repeater::default());

        let result = graph.connect("d", "out", "r", "word");
        assert!(matches!(result, Err(GraphError::ElementTypeMismatch { .. })));
        assert_eq!(graph.edges().count(), 0);
    }

    #[test]
    fn double_binding_fails_and_leaves_first_edge_intact() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default())
            .with_node("c", Doubler::default())
            .with_node("d", Doubler::default())
            .with_edge(("a", "out"), ("b", "in"));

        // Output side already bound.
        let result = graph.connect("a", "out", "c", "in");
        assert!(matches!(
            result,
            Err(GraphError::AlreadyBound { direction: "output", .. })
        ));

        // Input side already bound.
        let result = graph.connect("d", "out", "b", "in");
        assert!(matches!(
            result,
            Err(GraphError::AlreadyBound { direction: "input", .. })
        ));

        assert_eq!(
            graph.edge_strings(),
            vec![("a.out".to_string(), "b.in".to_string())]
        );

        // The failed calls must not have left d's output or c's input bound.
        assert!(graph.connect("d", "out", "c", "in").is_ok());
    }

    #[test]
    fn disconnect_unbinds_both_endpoints() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default())
            .with_edge(("a", "out"), ("b", "in"));

        let result = graph.disconnect("a", "out", "b", "nope");
        assert!(matches!(result, Err(GraphError::NonexistentEdge { .. })));

        graph.disconnect("a", "out", "b", "in").unwrap();
        assert_eq!(graph.edges().count(), 0);

        // Both ports are free again.
        assert!(graph.connect("a", "out", "b", "in").is_ok());
    }

    #[test]
    fn iip_conflicts_with_edges_and_other_iips() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default());

        graph.add_iip("b", "in", 7i64).unwrap();

        // An edge cannot target a port with a pending packet.
        let result = graph.connect("a", "out", "b", "in");
        assert!(matches!(result, Err(GraphError::HasInitialPacket { .. })));

        // Neither can a second packet.
        let result = graph.add_iip("b", "in", 8i64);
        assert!(matches!(result, Err(GraphError::HasInitialPacket { .. })));

        // And a packet cannot target a port bound by an edge.
        graph.remove_iip("b", "in").unwrap();
        graph.with_edge(("a", "out"), ("b", "in"));
        let result = graph.add_iip("b", "in", 7i64);
        assert!(matches!(
            result,
            Err(GraphError::AlreadyBound { direction: "input", .. })
        ));
    }

    #[test]
    fn iip_value_type_is_checked() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());

        let result = graph.add_iip("r", "times", "five");
        assert!(matches!(result, Err(GraphError::InitialTypeMismatch { .. })));
        assert_eq!(graph.iip_targets().count(), 0);

        assert!(graph.add_iip("r", "times", 5i64).is_ok());
    }

    #[test]
    fn remove_iip_requires_pending_packet() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());

        let result = graph.remove_iip("r", "times");
        assert!(matches!(result, Err(GraphError::NonexistentInitial { .. })));
    }

    #[test]
    fn rename_propagates_to_edges_iips_and_port_maps() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("r", Repeater::default())
            .with_edge(("a", "out"), ("r", "times"))
            .with_iip("r", "word", "hello".to_string());
        graph.map_in_port("Word", "r", "word").unwrap();
        graph.map_out_port("Words", "r", "words").unwrap();

        graph.rename("r", "r2").unwrap();

        assert!(!graph.contains_node("r"));
        assert!(graph.contains_node("r2"));
        assert_eq!(
            graph.edge_strings(),
            vec![("a.out".to_string(), "r2.times".to_string())]
        );
        assert_eq!(graph.iip_targets().next().unwrap().to_string(), "r2.word");
        assert_eq!(graph.in_ports().next().unwrap().1.to_string(), "r2.word");
        assert_eq!(graph.out_ports().next().unwrap().1.to_string(), "r2.words");

        // The old name is gone, the new one fully works.
        assert!(matches!(
            graph.remove_iip("r", "word"),
            Err(GraphError::NonexistentInitial { .. })
        ));
        assert!(graph.remove_iip("r2", "word").is_ok());
    }

    #[test]
    fn rename_validates_both_names() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default());

        assert!(matches!(
            graph.rename("missing", "c"),
            Err(GraphError::NonexistentNode { .. })
        ));
        assert!(matches!(
            graph.rename("a", "b"),
            Err(GraphError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn remove_cleans_up_edges_iips_and_mappings() {
        let mut graph = Graph::new();
        graph
            .with_node("a", Doubler::default())
            .with_node("b", Doubler::default())
            .with_node("c", Doubler::default())
            .with_edge(("a", "out"), ("b", "in"))
            .with_edge(("b", "out"), ("c", "in"));
        graph.map_in_port("In", "b", "in").unwrap();
        graph.map_out_port("Out", "b", "out").unwrap();

        graph.remove("b").unwrap();

        assert!(!graph.contains_node("b"));
        assert_eq!(graph.edges().count(), 0);
        assert_eq!(graph.out_ports().count(), 0);

        // The surviving endpoints were unbound along the way.
        assert!(graph.connect("a", "out", "c", "in").is_ok());
    }

    #[test]
    fn public_port_mapping_is_validated() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());

        graph.map_in_port("Word", "r", "word").unwrap();

        let result = graph.map_in_port("Word", "r", "times");
        assert!(matches!(result, Err(GraphError::DuplicatePublicPort { .. })));

        let result = graph.map_in_port("Nope", "r", "nope");
        assert!(matches!(result, Err(GraphError::NonexistentPort { .. })));

        let result = graph.map_in_port("Out", "r", "words");
        assert!(matches!(
            result,
            Err(GraphError::DirectionMismatch { expected: "input", .. })
        ));

        let result = graph.map_out_port("Words", "r", "word");
        assert!(matches!(
            result,
            Err(GraphError::DirectionMismatch { expected: "output", .. })
        ));
    }

    #[tokio::test]
    async fn set_in_port_checks_element_type() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());
        graph.map_in_port("Word", "r", "word").unwrap();

        let (_tx, rx) = tokio::sync::mpsc::channel::<i64>(1);
        let result = graph.set_in_port("Word", rx);
        assert!(matches!(result, Err(GraphError::Bind { .. })));

        let (_tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        assert!(graph.set_in_port("Word", rx).is_ok());
    }

    #[tokio::test]
    async fn unset_and_unmap_detach_external_channels() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());
        graph.map_in_port("Word", "r", "word").unwrap();

        assert!(matches!(
            graph.unset_in_port("Word"),
            Err(GraphError::NotAttached { .. })
        ));

        let (_tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        graph.set_in_port("Word", rx).unwrap();
        graph.unset_in_port("Word").unwrap();

        // The internal port is free again.
        let (_tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        graph.set_in_port("Word", rx).unwrap();

        // Unmapping with a channel attached detaches it too.
        graph.unmap_in_port("Word").unwrap();
        graph.map_in_port("Word", "r", "word").unwrap();
        let (_tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        assert!(graph.set_in_port("Word", rx).is_ok());
    }

    #[test]
    fn rename_public_port_keeps_attachment() {
        let mut graph = Graph::new();
        graph.with_node("r", Repeater::default());
        graph.map_in_port("Word", "r", "word").unwrap();

        let (_tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        graph.set_in_port("Word", rx).unwrap();

        graph.rename_in_port("Word", "Text").unwrap();

        assert!(matches!(
            graph.unset_in_port("Word"),
            Err(GraphError::NonexistentPublicPort { .. })
        ));
        assert!(graph.unset_in_port("Text").is_ok());
    }
}
