//! Control-plane message types.
//!
//! Messages arrive as JSON envelopes carrying a `protocol` group, a
//! `command` name, and a command-specific `payload`. An envelope is parsed
//! exactly once into the [`Command`] sum type; everything downstream
//! dispatches on the typed variants rather than on strings. Commands the
//! runtime does not implement parse to [`Command::Unsupported`] so sessions
//! can answer them explicitly instead of failing.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use snafu::Snafu;

use weft_core::graph::GraphError;

/// A control-plane error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ProtocolError {
    /// The message is not a valid envelope.
    #[snafu(display("malformed message envelope: {}", source))]
    MalformedEnvelope {
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// The payload does not match the command's expected shape.
    #[snafu(display("malformed payload for '{}.{}': {}", protocol, command, source))]
    MalformedPayload {
        /// Protocol group of the offending message.
        protocol: String,
        /// Command name of the offending message.
        command: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// The command addressed a graph the runtime does not know.
    #[snafu(display("unknown graph '{}'", id))]
    UnknownGraph {
        /// The graph identifier the command carried.
        id: String,
    },

    /// The graph mutation the command mapped to was rejected.
    #[snafu(display("graph mutation failed: {}", source))]
    Mutation {
        /// The underlying graph error.
        source: GraphError,
    },
}

/// A raw message envelope, as read off the wire.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Protocol group (`graph`, `runtime`, ...).
    pub protocol: String,
    /// Command name within the group.
    pub command: String,
    /// Command payload; shape depends on the command.
    #[serde(default)]
    pub payload: Value,
}

/// One endpoint of an edge: a node and one of its ports.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Endpoint {
    /// Node identifier.
    pub node: String,
    /// Port name on that node.
    pub port: String,
}

/// Payload of `graph.clear`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ClearGraph {
    /// Identifier of the graph to create or replace.
    pub id: String,
    /// Whether this graph becomes the runtime's main graph.
    #[serde(default)]
    pub main: bool,
}

/// Payload of `graph.addnode`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct AddNode {
    /// Graph to mutate.
    pub graph: String,
    /// Registered component type to instantiate.
    pub component: String,
    /// Identifier for the new node.
    pub id: String,
}

/// Payload of `graph.removenode`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RemoveNode {
    /// Graph to mutate.
    pub graph: String,
    /// Node to remove.
    pub id: String,
}

/// Payload of `graph.renamenode`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RenameNode {
    /// Graph to mutate.
    pub graph: String,
    /// Current node identifier.
    pub from: String,
    /// New node identifier.
    pub to: String,
}

/// Payload of `graph.addedge` and `graph.removedge`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct EdgeSpec {
    /// Graph to mutate.
    pub graph: String,
    /// Source endpoint (an output port).
    pub src: Endpoint,
    /// Target endpoint (an input port).
    pub tgt: Endpoint,
}

/// Source half of `graph.addinitial`: the constant to deliver.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct InitialSource {
    /// The packet value.
    pub data: Value,
}

/// Payload of `graph.addinitial`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct AddInitial {
    /// Graph to mutate.
    pub graph: String,
    /// The constant to deliver at startup.
    pub src: InitialSource,
    /// The input port receiving it.
    pub tgt: Endpoint,
}

/// Payload of `graph.removeinitial`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RemoveInitial {
    /// Graph to mutate.
    pub graph: String,
    /// The input port whose pending packet is dropped.
    pub tgt: Endpoint,
}

/// Payload of `graph.addinport` and `graph.addoutport`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct AddPort {
    /// Graph to mutate.
    pub graph: String,
    /// Public name to expose the port under.
    pub public: String,
    /// Internal node.
    pub node: String,
    /// Internal port on that node.
    pub port: String,
}

/// Payload of `graph.removeinport` and `graph.removeoutport`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RemovePort {
    /// Graph to mutate.
    pub graph: String,
    /// Public port name to remove.
    pub public: String,
}

/// Payload of `graph.renameinport` and `graph.renameoutport`.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RenamePort {
    /// Graph to mutate.
    pub graph: String,
    /// Current public name.
    pub from: String,
    /// New public name.
    pub to: String,
}

/// A fully parsed control-plane command.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `graph.clear`: create or replace a graph.
    ClearGraph(ClearGraph),
    /// `graph.addnode`: instantiate a component and add it.
    AddNode(AddNode),
    /// `graph.removenode`: remove a node.
    RemoveNode(RemoveNode),
    /// `graph.renamenode`: rename a node.
    RenameNode(RenameNode),
    /// `graph.addedge`: connect two ports.
    AddEdge(EdgeSpec),
    /// `graph.removedge`: disconnect two ports.
    RemoveEdge(EdgeSpec),
    /// `graph.addinitial`: record an initial packet.
    AddInitial(AddInitial),
    /// `graph.removeinitial`: drop a pending initial packet.
    RemoveInitial(RemoveInitial),
    /// `graph.addinport`: expose an internal input port.
    AddInPort(AddPort),
    /// `graph.addoutport`: expose an internal output port.
    AddOutPort(AddPort),
    /// `graph.removeinport`: detach and unmap a public input port.
    RemoveInPort(RemovePort),
    /// `graph.removeoutport`: detach and unmap a public output port.
    RemoveOutPort(RemovePort),
    /// `graph.renameinport`: rename a public input port.
    RenameInPort(RenamePort),
    /// `graph.renameoutport`: rename a public output port.
    RenameOutPort(RenamePort),
    /// `runtime.getruntime`: ask for the runtime's identity.
    GetRuntime,
    /// Any command the runtime does not implement.
    Unsupported {
        /// Protocol group of the message.
        protocol: String,
        /// Command name of the message.
        command: String,
    },
}

impl Command {
    /// Parses a raw JSON message into a typed command.
    ///
    /// # Errors
    ///
    /// Fails if the message is not a valid envelope or a known command's
    /// payload does not match its expected shape. Unknown commands are not
    /// an error; they parse to [`Command::Unsupported`].
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let envelope =
            serde_json::from_str(raw).map_err(|source| ProtocolError::MalformedEnvelope { source })?;
        Self::from_envelope(envelope)
    }

    /// Parses an already-deserialized envelope into a typed command.
    ///
    /// # Errors
    ///
    /// Fails if a known command's payload does not match its expected shape.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        fn payload<T>(protocol: &str, command: &str, value: Value) -> Result<T, ProtocolError>
        where
            T: DeserializeOwned,
        {
            serde_json::from_value(value).map_err(|source| ProtocolError::MalformedPayload {
                protocol: protocol.to_string(),
                command: command.to_string(),
                source,
            })
        }

        let Envelope {
            protocol,
            command,
            payload: value,
        } = envelope;

        let parsed = match (protocol.as_str(), command.as_str()) {
            ("graph", "clear") => Command::ClearGraph(payload(&protocol, &command, value)?),
            ("graph", "addnode") => Command::AddNode(payload(&protocol, &command, value)?),
            ("graph", "removenode") => Command::RemoveNode(payload(&protocol, &command, value)?),
            ("graph", "renamenode") => Command::RenameNode(payload(&protocol, &command, value)?),
            ("graph", "addedge") => Command::AddEdge(payload(&protocol, &command, value)?),
            ("graph", "removedge") => Command::RemoveEdge(payload(&protocol, &command, value)?),
            ("graph", "addinitial") => Command::AddInitial(payload(&protocol, &command, value)?),
            ("graph", "removeinitial") => {
                Command::RemoveInitial(payload(&protocol, &command, value)?)
            }
            ("graph", "addinport") => Command::AddInPort(payload(&protocol, &command, value)?),
            ("graph", "addoutport") => Command::AddOutPort(payload(&protocol, &command, value)?),
            ("graph", "removeinport") => Command::RemoveInPort(payload(&protocol, &command, value)?),
            ("graph", "removeoutport") => {
                Command::RemoveOutPort(payload(&protocol, &command, value)?)
            }
            ("graph", "renameinport") => Command::RenameInPort(payload(&protocol, &command, value)?),
            ("graph", "renameoutport") => {
                Command::RenameOutPort(payload(&protocol, &command, value)?)
            }
            ("runtime", "getruntime") => Command::GetRuntime,
            _ => Command::Unsupported {
                protocol: protocol.clone(),
                command: command.clone(),
            },
        };

        Ok(parsed)
    }
}
