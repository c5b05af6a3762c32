//! Data models for the star protocol.
//!
//! This module contains the core data structures exchanged between the
//! aggregator and the analyzer nodes: roles, node identities, message
//! categories and the messages themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Role of a node in the star. Fixed for the lifetime of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The single coordinating node that combines partial results.
    Aggregator,
    /// A node holding local data.
    Analyzer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Aggregator => write!(f, "aggregator"),
            Role::Analyzer => write!(f, "analyzer"),
        }
    }
}

/// Opaque node identifier, unique per process in the computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Category a message is sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// Reachability probe exchanged before the first round.
    ReadyCheck,
    /// Analyzer -> aggregator partial result.
    IntermediateResults,
    /// Aggregator -> analyzers feedback for the next round.
    AggregatedResults,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::ReadyCheck => "ready_check",
            MessageCategory::IntermediateResults => "intermediate_results",
            MessageCategory::AggregatedResults => "aggregated_results",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body: a JSON mapping carrying at least a `result` field for
/// result categories. Ready checks carry an empty body.
pub type MessageBody = Map<String, Value>;

/// Build a body of the form `{"result": <value>}`.
pub fn result_body(result: Value) -> MessageBody {
    let mut body = Map::new();
    body.insert("result".to_string(), result);
    body
}

/// A single message as recorded by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub category: MessageCategory,
    pub sender: NodeId,
    pub receivers: BTreeSet<NodeId>,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        category: MessageCategory,
        sender: NodeId,
        receivers: BTreeSet<NodeId>,
        body: MessageBody,
    ) -> Self {
        Self {
            category,
            sender,
            receivers,
            body,
            timestamp: Utc::now(),
        }
    }

    /// The `result` field of the body, if any.
    pub fn result(&self) -> Option<&Value> {
        self.body.get("result")
    }
}

/// Outcome of a send: which receivers acknowledged within the timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub responded: BTreeSet<NodeId>,
}

/// Messages returned by an await, per requested node. `None` means the
/// node produced nothing new before the wait ended.
pub type Responses = BTreeMap<NodeId, Option<Vec<Message>>>;

/// Latest message per node from a set of responses, skipping absent nodes.
pub fn latest_per_node(responses: &Responses) -> BTreeMap<&NodeId, &Message> {
    responses
        .iter()
        .filter_map(|(id, msgs)| {
            msgs.as_ref()
                .and_then(|m| m.last())
                .map(|latest| (id, latest))
        })
        .collect()
}

/// Acknowledgment returned by the storage collaborator for a final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    /// Identifier assigned to the stored artifact.
    pub artifact_id: String,
    /// Size of the stored artifact in bytes.
    pub size: usize,
}

/// Build a receiver set from any iterator of ids.
pub fn node_set<I, T>(ids: I) -> BTreeSet<NodeId>
where
    I: IntoIterator<Item = T>,
    T: Into<NodeId>,
{
    ids.into_iter().map(Into::into).collect()
}
