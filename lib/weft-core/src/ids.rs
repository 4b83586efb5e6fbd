//! Identifier types for graph nodes.

use core::fmt;
use std::{borrow::Cow, ops::Deref};

use crate::graph::GraphError;

const INVALID_NODE_ID: &str =
    "node IDs may only contain alphanumeric characters (a-z, A-Z, or 0-9), underscores, and hyphens";

/// A node identifier within a graph.
#[derive(Clone, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct NodeId(Cow<'static, str>);

impl NodeId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl TryFrom<&str> for NodeId {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty()
            || !value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            Err(INVALID_NODE_ID)
        } else {
            Ok(Self(value.to_string().into()))
        }
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub(crate) fn try_into_node_id<I>(id: I) -> Result<NodeId, GraphError>
where
    I: AsRef<str>,
{
    NodeId::try_from(id.as_ref()).map_err(|reason| GraphError::InvalidNodeId {
        input: id.as_ref().to_string(),
        reason,
    })
}

/// A single port endpoint: a node and the name of one of its ports.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct PortRef {
    node: NodeId,
    port: String,
}

impl PortRef {
    /// Creates a new `PortRef` for the given node and port name.
    pub fn new<P>(node: NodeId, port: P) -> Self
    where
        P: Into<String>,
    {
        Self {
            node,
            port: port.into(),
        }
    }

    /// Returns the node identifier.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Returns the port name.
    pub fn port(&self) -> &str {
        &self.port
    }

    pub(crate) fn retarget(&mut self, from: &NodeId, to: &NodeId) {
        if &self.node == from {
            self.node = to.clone();
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_validation() {
        assert!(NodeId::try_from("doubler_1").is_ok());
        assert!(NodeId::try_from("a-b-c").is_ok());
        assert!(NodeId::try_from("").is_err());
        assert!(NodeId::try_from("has space").is_err());
        assert!(NodeId::try_from("dotted.name").is_err());
    }

    #[test]
    fn port_ref_display() {
        let node = NodeId::try_from("r").unwrap();
        assert_eq!(PortRef::new(node, "word").to_string(), "r.word");
    }
}
