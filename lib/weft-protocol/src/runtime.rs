//! Runtime identity and command dispatch.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use weft_core::{
    factory::ComponentFactory,
    graph::{Graph, GraphError},
};

use crate::commands::{Command, ProtocolError};

const RUNTIME_TYPE: &str = "weft";
const PROTOCOL_VERSION: &str = "0.4";
const CAPABILITIES: &[&str] = &["protocol:runtime", "protocol:graph"];

/// Reply payload for `runtime.getruntime`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RuntimeInfo {
    /// Runtime type identifier.
    #[serde(rename = "type")]
    pub runtime_type: String,
    /// Protocol version the runtime speaks.
    pub version: String,
    /// Capability strings the runtime advertises.
    pub capabilities: Vec<String>,
    /// Stable runtime instance identifier.
    pub id: String,
}

/// Reply to a handled command, for commands that warrant one.
#[derive(Debug, Eq, PartialEq)]
pub enum Response {
    /// Answer to `runtime.getruntime`.
    RuntimeInfo(RuntimeInfo),
    /// The command is not implemented; the session continues.
    Unsupported {
        /// Protocol group of the offending message.
        protocol: String,
        /// Command name of the offending message.
        command: String,
    },
}

/// One runtime instance: a stable identity, a component factory, and the
/// graphs the control plane has created.
///
/// The transport in front of it (a websocket server, a test harness) parses
/// messages into [`Command`]s and feeds them to [`handle`][Self::handle];
/// each command maps one-to-one onto a graph mutation. Lifecycle is
/// explicit: the embedder calls [`mark_ready`][Self::mark_ready] once the
/// transport is accepting traffic and [`stop`][Self::stop] to shut the
/// session down, and anyone holding a reference can wait on either signal.
pub struct Runtime {
    id: Uuid,
    factory: ComponentFactory,
    graphs: HashMap<String, Graph>,
    main: Option<String>,
    ready_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

impl Runtime {
    /// Creates a runtime with a fresh identity around the given factory.
    pub fn new(factory: ComponentFactory) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            factory,
            graphs: HashMap::new(),
            main: None,
            ready_tx,
            done_tx,
        }
    }

    /// Returns the runtime's stable identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the identifier of the main graph, if one was marked.
    pub fn main_graph_id(&self) -> Option<&str> {
        self.main.as_deref()
    }

    /// Looks up a graph by identifier.
    pub fn graph(&self, id: &str) -> Option<&Graph> {
        self.graphs.get(id)
    }

    /// Removes a graph from the runtime and hands it to the caller,
    /// typically to run it.
    pub fn take_graph(&mut self, id: &str) -> Option<Graph> {
        self.graphs.remove(id)
    }

    /// Signals that the runtime is ready to serve.
    pub fn mark_ready(&self) {
        let _ = self.ready_tx.send(true);
    }

    /// Waits until the runtime has been marked ready.
    pub async fn ready(&self) {
        Self::signalled(&self.ready_tx).await;
    }

    /// Signals the runtime to shut down.
    pub fn stop(&self) {
        let _ = self.done_tx.send(true);
    }

    /// Waits until the runtime has been told to stop.
    pub async fn stopped(&self) {
        Self::signalled(&self.done_tx).await;
    }

    async fn signalled(tx: &watch::Sender<bool>) {
        let mut rx = tx.subscribe();
        let _ = rx.wait_for(|signalled| *signalled).await;
    }

    /// Applies a command to the runtime's state.
    ///
    /// Returns a [`Response`] for commands that produce one
    /// (`runtime.getruntime` and anything unsupported), `None` for plain
    /// mutations.
    ///
    /// # Errors
    ///
    /// Fails if the command addresses an unknown graph or the mutation it
    /// maps to is rejected. The runtime's state is unchanged in that case.
    pub fn handle(&mut self, command: Command) -> Result<Option<Response>, ProtocolError> {
        match command {
            Command::ClearGraph(payload) => {
                debug!(graph = %payload.id, main = payload.main, "Creating graph.");
                self.graphs.insert(payload.id.clone(), Graph::new());
                if payload.main {
                    self.main = Some(payload.id);
                }
                Ok(None)
            }
            Command::AddNode(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .add_new(&self.factory, &payload.component, &payload.id)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::RemoveNode(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph.remove(&payload.id).map_err(mutation)?;
                Ok(None)
            }
            Command::RenameNode(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph.rename(&payload.from, &payload.to).map_err(mutation)?;
                Ok(None)
            }
            Command::AddEdge(spec) => {
                let graph = Self::graph_entry(&mut self.graphs, &spec.graph)?;
                graph
                    .connect(&spec.src.node, &spec.src.port, &spec.tgt.node, &spec.tgt.port)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::RemoveEdge(spec) => {
                let graph = Self::graph_entry(&mut self.graphs, &spec.graph)?;
                graph
                    .disconnect(&spec.src.node, &spec.src.port, &spec.tgt.node, &spec.tgt.port)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::AddInitial(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .add_iip(&payload.tgt.node, &payload.tgt.port, payload.src.data)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::RemoveInitial(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .remove_iip(&payload.tgt.node, &payload.tgt.port)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::AddInPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .map_in_port(&payload.public, &payload.node, &payload.port)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::AddOutPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .map_out_port(&payload.public, &payload.node, &payload.port)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::RemoveInPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                match graph.unset_in_port(&payload.public) {
                    // Nothing attached is fine; the mapping still goes away.
                    Ok(()) | Err(GraphError::NotAttached { .. }) => {}
                    Err(source) => return Err(mutation(source)),
                }
                graph.unmap_in_port(&payload.public).map_err(mutation)?;
                Ok(None)
            }
            Command::RemoveOutPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                match graph.unset_out_port(&payload.public) {
                    Ok(()) | Err(GraphError::NotAttached { .. }) => {}
                    Err(source) => return Err(mutation(source)),
                }
                graph.unmap_out_port(&payload.public).map_err(mutation)?;
                Ok(None)
            }
            Command::RenameInPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .rename_in_port(&payload.from, &payload.to)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::RenameOutPort(payload) => {
                let graph = Self::graph_entry(&mut self.graphs, &payload.graph)?;
                graph
                    .rename_out_port(&payload.from, &payload.to)
                    .map_err(mutation)?;
                Ok(None)
            }
            Command::GetRuntime => Ok(Some(Response::RuntimeInfo(self.info()))),
            Command::Unsupported { protocol, command } => {
                warn!(%protocol, %command, "Ignoring unsupported command.");
                Ok(Some(Response::Unsupported { protocol, command }))
            }
        }
    }

    fn graph_entry<'a>(
        graphs: &'a mut HashMap<String, Graph>, id: &str,
    ) -> Result<&'a mut Graph, ProtocolError> {
        graphs
            .get_mut(id)
            .ok_or_else(|| ProtocolError::UnknownGraph { id: id.to_string() })
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            runtime_type: RUNTIME_TYPE.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            id: self.id.to_string(),
        }
    }
}

fn mutation(source: GraphError) -> ProtocolError {
    ProtocolError::Mutation { source }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use similar_asserts::assert_eq;
    use tokio::sync::mpsc;

    use weft_core::{
        component::{Component, Ports},
        error::GenericError,
        port::{InputPort, OutputPort},
        runner::run,
    };

    use super::*;
    use crate::commands::Command;

    /// Emits each incoming packet a fixed number of times; the count arrives
    /// on `times`, usually as an initial packet from the control plane.
    #[derive(Default)]
    struct Repeat {
        word: InputPort<Value>,
        times: InputPort<Value>,
        words: OutputPort<Value>,
    }

    #[async_trait]
    impl Component for Repeat {
        fn ports(&mut self) -> Ports<'_> {
            Ports::new()
                .input("word", &mut self.word)
                .input("times", &mut self.times)
                .output("words", &mut self.words)
        }

        async fn process(self: Box<Self>) -> Result<(), GenericError> {
            let Repeat {
                mut word,
                mut times,
                words,
            } = *self;

            let times = times.recv().await.and_then(|v| v.as_i64()).unwrap_or(0);
            while let Some(value) = word.recv().await {
                for _ in 0..times {
                    words.send(value.clone()).await?;
                }
            }
            Ok(())
        }
    }

    fn test_runtime() -> Runtime {
        let mut factory = ComponentFactory::new();
        factory
            .register("core/Repeat", || {
                Ok(Box::new(Repeat::default()) as Box<dyn Component>)
            })
            .unwrap();
        Runtime::new(factory)
    }

    fn command(raw: &str) -> Command {
        Command::from_json(raw).unwrap()
    }

    #[test]
    fn getruntime_reports_identity() {
        let mut runtime = test_runtime();
        let expected_id = runtime.id().to_string();

        let response = runtime.handle(Command::GetRuntime).unwrap();
        match response {
            Some(Response::RuntimeInfo(info)) => {
                assert_eq!(info.runtime_type, "weft");
                assert_eq!(info.id, expected_id);
                assert!(info.capabilities.contains(&"protocol:graph".to_string()));
            }
            other => panic!("expected runtime info, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_commands_are_answered_not_fatal() {
        let mut runtime = test_runtime();

        let response = runtime
            .handle(command(
                r#"{ "protocol": "graph", "command": "changenode", "payload": {} }"#,
            ))
            .unwrap();
        assert_eq!(
            response,
            Some(Response::Unsupported {
                protocol: "graph".to_string(),
                command: "changenode".to_string(),
            })
        );

        // The session keeps working afterwards.
        assert!(runtime.handle(Command::GetRuntime).unwrap().is_some());
    }

    #[test]
    fn commands_addressing_unknown_graphs_fail() {
        let mut runtime = test_runtime();

        let result = runtime.handle(command(
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "nope", "component": "core/Repeat", "id": "r" } }"#,
        ));
        assert!(matches!(result, Err(ProtocolError::UnknownGraph { .. })));
    }

    #[test]
    fn rejected_mutations_surface_as_protocol_errors() {
        let mut runtime = test_runtime();
        runtime
            .handle(command(
                r#"{ "protocol": "graph", "command": "clear", "payload": { "id": "main" } }"#,
            ))
            .unwrap();

        let result = runtime.handle(command(
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "main", "component": "core/Nope", "id": "r" } }"#,
        ));
        assert!(matches!(result, Err(ProtocolError::Mutation { .. })));
    }

    #[test]
    fn graph_commands_drive_mutations() {
        let mut runtime = test_runtime();

        for raw in [
            r#"{ "protocol": "graph", "command": "clear", "payload": { "id": "main", "main": true } }"#,
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "main", "component": "core/Repeat", "id": "a" } }"#,
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "main", "component": "core/Repeat", "id": "b" } }"#,
            r#"{ "protocol": "graph", "command": "addedge",
                 "payload": { "graph": "main",
                              "src": { "node": "a", "port": "words" },
                              "tgt": { "node": "b", "port": "word" } } }"#,
            r#"{ "protocol": "graph", "command": "renamenode",
                 "payload": { "graph": "main", "from": "b", "to": "sink" } }"#,
        ] {
            runtime.handle(command(raw)).unwrap();
        }

        assert_eq!(runtime.main_graph_id(), Some("main"));
        let graph = runtime.graph("main").unwrap();
        assert!(graph.contains_node("a"));
        assert!(graph.contains_node("sink"));
        assert!(!graph.contains_node("b"));
        let edges: Vec<_> = graph
            .edges()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        assert_eq!(edges, vec![("a.words".to_string(), "sink.word".to_string())]);

        // And back out again.
        for raw in [
            r#"{ "protocol": "graph", "command": "removedge",
                 "payload": { "graph": "main",
                              "src": { "node": "a", "port": "words" },
                              "tgt": { "node": "sink", "port": "word" } } }"#,
            r#"{ "protocol": "graph", "command": "removenode",
                 "payload": { "graph": "main", "id": "sink" } }"#,
        ] {
            runtime.handle(command(raw)).unwrap();
        }

        let graph = runtime.graph("main").unwrap();
        assert_eq!(graph.edges().count(), 0);
        assert!(!graph.contains_node("sink"));
    }

    #[test]
    fn public_port_commands_manage_mappings() {
        let mut runtime = test_runtime();

        for raw in [
            r#"{ "protocol": "graph", "command": "clear", "payload": { "id": "main" } }"#,
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "main", "component": "core/Repeat", "id": "r" } }"#,
            r#"{ "protocol": "graph", "command": "addinport",
                 "payload": { "graph": "main", "public": "Word", "node": "r", "port": "word" } }"#,
            r#"{ "protocol": "graph", "command": "addoutport",
                 "payload": { "graph": "main", "public": "Words", "node": "r", "port": "words" } }"#,
            r#"{ "protocol": "graph", "command": "renameinport",
                 "payload": { "graph": "main", "from": "Word", "to": "Text" } }"#,
            r#"{ "protocol": "graph", "command": "addinitial",
                 "payload": { "graph": "main", "src": { "data": 5 },
                              "tgt": { "node": "r", "port": "times" } } }"#,
        ] {
            runtime.handle(command(raw)).unwrap();
        }

        let graph = runtime.graph("main").unwrap();
        let publics: Vec<_> = graph.in_ports().map(|(name, _)| name.to_string()).collect();
        assert_eq!(publics, vec!["Text".to_string()]);
        assert_eq!(graph.iip_targets().count(), 1);

        for raw in [
            r#"{ "protocol": "graph", "command": "removeinitial",
                 "payload": { "graph": "main", "tgt": { "node": "r", "port": "times" } } }"#,
            r#"{ "protocol": "graph", "command": "removeinport",
                 "payload": { "graph": "main", "public": "Text" } }"#,
            r#"{ "protocol": "graph", "command": "removeoutport",
                 "payload": { "graph": "main", "public": "Words" } }"#,
        ] {
            runtime.handle(command(raw)).unwrap();
        }

        let graph = runtime.graph("main").unwrap();
        assert_eq!(graph.in_ports().count(), 0);
        assert_eq!(graph.out_ports().count(), 0);
        assert_eq!(graph.iip_targets().count(), 0);
    }

    #[tokio::test]
    async fn control_plane_built_graph_runs() {
        let mut runtime = test_runtime();

        for raw in [
            r#"{ "protocol": "graph", "command": "clear", "payload": { "id": "main", "main": true } }"#,
            r#"{ "protocol": "graph", "command": "addnode",
                 "payload": { "graph": "main", "component": "core/Repeat", "id": "r" } }"#,
            r#"{ "protocol": "graph", "command": "addinport",
                 "payload": { "graph": "main", "public": "Word", "node": "r", "port": "word" } }"#,
            r#"{ "protocol": "graph", "command": "addoutport",
                 "payload": { "graph": "main", "public": "Words", "node": "r", "port": "words" } }"#,
            r#"{ "protocol": "graph", "command": "addinitial",
                 "payload": { "graph": "main", "src": { "data": 5 },
                              "tgt": { "node": "r", "port": "times" } } }"#,
        ] {
            runtime.handle(command(raw)).unwrap();
        }

        let mut graph = runtime.take_graph("main").unwrap();

        let (in_tx, in_rx) = mpsc::channel::<Value>(1);
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(8);
        graph.set_in_port("Word", in_rx).unwrap();
        graph.set_out_port("Words", out_tx).unwrap();

        let completion = run(graph);

        in_tx.send(json!("hello")).await.unwrap();
        drop(in_tx);

        let mut words = Vec::new();
        while let Some(word) = out_rx.recv().await {
            words.push(word);
        }
        assert_eq!(words, vec![json!("hello"); 5]);

        completion.await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_signals_fire() {
        let runtime = test_runtime();

        runtime.mark_ready();
        runtime.ready().await;

        runtime.stop();
        runtime.stopped().await;
    }
}
