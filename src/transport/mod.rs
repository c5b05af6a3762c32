//! Transport façade consumed by the coordinators.
//!
//! The message transport, node-identity resolution and final-result
//! storage are owned by an external collaborator. This module declares the
//! contract the protocol relies on; [`local`] provides an in-process
//! implementation used for simulation and tests.

pub mod local;

use crate::error::Result;
use crate::models::{MessageBody, MessageCategory, NodeId, Responses, Role, SendReceipt, SubmitAck};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

pub use local::{LocalHub, LocalTransport};

/// Operations a node performs against the coordination service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the calling node.
    fn node_id(&self) -> &NodeId;

    /// Role assigned to this node.
    async fn role(&self) -> Result<Role>;

    /// The aggregator's identity (meaningful on analyzers).
    async fn aggregator_id(&self) -> Result<NodeId>;

    /// The analyzer identities (the aggregator's partners).
    async fn participant_ids(&self) -> Result<BTreeSet<NodeId>>;

    /// Send `body` to `receivers`. With a timeout, waits up to that long for
    /// receivers to acknowledge and reports who did.
    async fn send_message(
        &self,
        receivers: &BTreeSet<NodeId>,
        category: MessageCategory,
        body: MessageBody,
        timeout: Option<Duration>,
    ) -> Result<SendReceipt>;

    /// Block until every node in `node_ids` has produced a message in
    /// `category` that this node has not consumed yet, or until the timeout
    /// passes. Nodes with nothing new map to `None`.
    async fn await_responses(
        &self,
        node_ids: &BTreeSet<NodeId>,
        category: MessageCategory,
        timeout: Option<Duration>,
    ) -> Result<Responses>;

    /// Hand the final artifact to the storage collaborator.
    async fn submit_final_result(&self, bytes: Vec<u8>) -> Result<SubmitAck>;

    /// Set the global converged flag. Idempotent.
    async fn signal_analysis_finished(&self) -> Result<()>;

    /// Read the global converged flag.
    async fn is_converged(&self) -> Result<bool>;

    /// Block until the global converged flag is observed.
    ///
    /// The default implementation polls [`Transport::is_converged`] every
    /// `poll` interval.
    async fn wait_until_converged(&self, poll: Duration) -> Result<()> {
        while !self.is_converged().await? {
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }
}
