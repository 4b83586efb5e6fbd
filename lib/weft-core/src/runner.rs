//! Starting components and waiting for them to finish.
//!
//! [`run`] starts a component (or a whole graph) concurrently and hands back
//! a [`Completion`], a one-shot future that resolves once everything started
//! on the component's behalf has terminated.
//!
//! Termination propagates purely through input closure: the embedder drops
//! the senders it attached to a graph's public inputs, each process drains
//! its inputs and exits, its output ports drop, and the processes downstream
//! observe closure in turn. The runtime performs no deadlock detection; a
//! cyclic graph with no termination source simply hangs until its remaining
//! inputs are closed.

use std::{
    borrow::Cow,
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use async_trait::async_trait;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::{
    component::{Component, Ports},
    error::GenericError,
    generic_error,
    graph::Graph,
    ids::{NodeId, PortRef},
};

/// A one-shot completion signal for a running component.
///
/// Resolves once the process (and, for a graph, every process it spawned)
/// has returned and its task has been reclaimed. A panic inside the process
/// resolves the completion with an error rather than being swallowed.
pub struct Completion {
    inner: JoinHandle<Result<(), GenericError>>,
}

impl Future for Completion {
    type Output = Result<(), GenericError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match ready!(Pin::new(&mut self.inner).poll(cx)) {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(generic_error!("process panicked: {}", e)),
            Err(e) => Err(generic_error!("process task failed: {}", e)),
        };
        Poll::Ready(result)
    }
}

/// Starts the component concurrently.
///
/// Must be called from within a tokio runtime. Running consumes the
/// component, which is what freezes a graph against further mutation.
pub fn run<C>(component: C) -> Completion
where
    C: Component + 'static,
{
    run_boxed(Box::new(component))
}

/// Starts an already-boxed component concurrently.
pub fn run_boxed(component: Box<dyn Component>) -> Completion {
    Completion {
        inner: tokio::spawn(component.process()),
    }
}

#[async_trait]
impl Component for Graph {
    /// Exposes the graph's public port maps as its own manifest, which is
    /// what lets a graph be wired as a node inside another graph.
    fn ports(&mut self) -> Ports<'_> {
        let in_lookup: HashMap<PortRef, String> = self
            .in_port_map
            .iter()
            .map(|(public, target)| (target.clone(), public.clone()))
            .collect();
        let out_lookup: HashMap<PortRef, String> = self
            .out_port_map
            .iter()
            .map(|(public, target)| (target.clone(), public.clone()))
            .collect();

        let mut manifest = Ports::new();
        for (node_id, component) in self.nodes.iter_mut() {
            let (inputs, outputs) = component.ports().into_parts();
            for (name, slot) in inputs {
                let at = PortRef::new(node_id.clone(), name.as_ref());
                if let Some(public) = in_lookup.get(&at) {
                    manifest.push_input(Cow::Owned(public.clone()), slot);
                }
            }
            for (name, slot) in outputs {
                let at = PortRef::new(node_id.clone(), name.as_ref());
                if let Some(public) = out_lookup.get(&at) {
                    manifest.push_output(Cow::Owned(public.clone()), slot);
                }
            }
        }
        manifest
    }

    async fn process(mut self: Box<Self>) -> Result<(), GenericError> {
        // Deliver initial packets first, so every targeted port is bound
        // before the node reading it starts.
        let iips = std::mem::take(&mut self.iips);
        for iip in iips {
            let target = iip.to;
            let component = self
                .nodes
                .get_mut(target.node())
                .ok_or_else(|| generic_error!("initial packet targets unknown node '{}'", target.node()))?;
            let mut ports = component.ports();
            let slot = ports
                .input_mut(target.port())
                .ok_or_else(|| generic_error!("initial packet targets unknown port '{}'", target))?;
            slot.deliver(iip.value)
                .map_err(|e| generic_error!("failed to deliver initial packet to '{}': {}", target, e))?;
        }

        // Launch every node. Inputs that ended up with no edge, no external
        // channel, and no initial packet stay unbound and read as closed.
        let mut tasks: JoinSet<Result<(), GenericError>> = JoinSet::new();
        let mut task_map: HashMap<Id, NodeId> = HashMap::new();
        for (id, component) in self.nodes.drain() {
            let handle = tasks.spawn(component.process());
            task_map.insert(handle.id(), id);
        }

        let mut stopped_cleanly = true;
        while let Some(task_result) = tasks.join_next_with_id().await {
            if !handle_task_result(&mut task_map, task_result) {
                stopped_cleanly = false;
            }
        }

        if stopped_cleanly {
            Ok(())
        } else {
            Err(generic_error!("one or more processes failed"))
        }
    }
}

/// Handles the result of a process task finishing, logging the outcome and
/// removing the task from the map of running nodes.
///
/// Returns `true` if the process stopped cleanly.
fn handle_task_result(
    task_map: &mut HashMap<Id, NodeId>,
    task_result: Result<(Id, Result<(), GenericError>), JoinError>,
) -> bool {
    let (task_id, stopped_cleanly) = match task_result {
        Ok((id, process_result)) => {
            let node_id = task_map.get(&id).expect("node ID not found");
            match process_result {
                Ok(()) => {
                    debug!(%node_id, "Process finished.");
                    (id, true)
                }
                Err(e) => {
                    error!(%node_id, error = %e, "Process finished with error.");
                    (id, false)
                }
            }
        }
        Err(e) => {
            let id = e.id();
            let node_id = task_map.get(&id).expect("node ID not found");
            error!(%node_id, error = %e, "Process task failed unexpectedly.");
            (id, false)
        }
    };

    task_map.remove(&task_id);
    stopped_cleanly
}
