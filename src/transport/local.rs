//! In-process transport.
//!
//! A [`LocalHub`] plays the coordination service for a whole star inside
//! one process: it resolves roles, keeps an append-only message history per
//! (receiver, sender, category), stores submitted artifacts and owns the
//! global converged flag. Each node talks to it through its own
//! [`LocalTransport`] handle.

use super::Transport;
use crate::error::{Result, StarError};
use crate::models::{
    Message, MessageBody, MessageCategory, NodeId, Responses, Role, SendReceipt, SubmitAck,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

type MailboxKey = (NodeId, NodeId, MessageCategory);

#[derive(Debug, Default)]
struct Mailbox {
    history: Vec<Message>,
    consumed: usize,
}

impl Mailbox {
    fn has_unread(&self) -> bool {
        self.history.len() > self.consumed
    }

    fn take_unread(&mut self) -> Option<Vec<Message>> {
        if !self.has_unread() {
            return None;
        }
        let unread = self.history[self.consumed..].to_vec();
        self.consumed = self.history.len();
        Some(unread)
    }
}

#[derive(Debug, Default)]
struct HubState {
    online: BTreeSet<NodeId>,
    mailboxes: HashMap<MailboxKey, Mailbox>,
    log: Vec<Message>,
    submissions: Vec<Vec<u8>>,
    reject_submissions: bool,
}

impl HubState {
    fn all_unread(
        &self,
        receiver: &NodeId,
        senders: &BTreeSet<NodeId>,
        category: MessageCategory,
    ) -> bool {
        senders.iter().all(|sender| {
            self.mailboxes
                .get(&(receiver.clone(), sender.clone(), category))
                .is_some_and(Mailbox::has_unread)
        })
    }

    fn take(
        &mut self,
        receiver: &NodeId,
        senders: &BTreeSet<NodeId>,
        category: MessageCategory,
    ) -> Responses {
        senders
            .iter()
            .map(|sender| {
                let unread = self
                    .mailboxes
                    .get_mut(&(receiver.clone(), sender.clone(), category))
                    .and_then(Mailbox::take_unread);
                (sender.clone(), unread)
            })
            .collect()
    }
}

struct HubInner {
    aggregator: NodeId,
    analyzers: BTreeSet<NodeId>,
    state: Mutex<HubState>,
    changes: watch::Sender<u64>,
    finished: watch::Sender<bool>,
}

/// Shared in-process coordination service for one star.
///
/// Message history, the sent-message log and submissions are kept for the
/// lifetime of the hub and never pruned, so a hub serves a single run and is
/// not meant for long-lived services.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    /// Create a hub for one aggregator and a fixed set of analyzers.
    pub fn new(aggregator: NodeId, analyzers: BTreeSet<NodeId>) -> Self {
        let (changes, _) = watch::channel(0);
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                aggregator,
                analyzers,
                state: Mutex::new(HubState::default()),
                changes,
                finished,
            }),
        }
    }

    /// Bring `id` online and return its transport handle.
    pub fn connect(&self, id: impl Into<NodeId>) -> LocalTransport {
        let id = id.into();
        self.inner.state.lock().online.insert(id.clone());
        self.bump();
        debug!("Node {} connected to local hub", id);
        LocalTransport {
            id,
            hub: self.clone(),
        }
    }

    /// A handle for `id` that does not mark the node online.
    pub fn handle(&self, id: impl Into<NodeId>) -> LocalTransport {
        LocalTransport {
            id: id.into(),
            hub: self.clone(),
        }
    }

    /// Take `id` offline; it stops acknowledging sends.
    pub fn disconnect(&self, id: &NodeId) {
        self.inner.state.lock().online.remove(id);
        self.bump();
    }

    pub fn aggregator(&self) -> &NodeId {
        &self.inner.aggregator
    }

    pub fn analyzers(&self) -> &BTreeSet<NodeId> {
        &self.inner.analyzers
    }

    /// Every message sent through the hub in `category`, in send order.
    pub fn sent(&self, category: MessageCategory) -> Vec<Message> {
        self.inner
            .state
            .lock()
            .log
            .iter()
            .filter(|m| m.category == category)
            .cloned()
            .collect()
    }

    /// Total number of messages sent through the hub.
    pub fn message_count(&self) -> usize {
        self.inner.state.lock().log.len()
    }

    /// Artifacts accepted by the storage side, in submission order.
    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.inner.state.lock().submissions.clone()
    }

    /// Make the storage side refuse (or accept again) final results.
    pub fn reject_submissions(&self, reject: bool) {
        self.inner.state.lock().reject_submissions = reject;
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    fn bump(&self) {
        self.inner.changes.send_modify(|generation| *generation += 1);
    }

    /// Re-evaluate `check` on every hub change until it yields a value or
    /// the timeout passes.
    async fn wait_for<T>(
        &self,
        timeout: Option<Duration>,
        mut check: impl FnMut(&mut HubState) -> Option<T>,
    ) -> Option<T> {
        let mut rx = self.inner.changes.subscribe();
        let wait = async {
            loop {
                rx.borrow_and_update();
                let ready = {
                    let mut state = self.inner.state.lock();
                    check(&mut *state)
                };
                if ready.is_some() {
                    return ready;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }
}

/// One node's view of a [`LocalHub`].
#[derive(Clone)]
pub struct LocalTransport {
    id: NodeId,
    hub: LocalHub,
}

impl LocalTransport {
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn role(&self) -> Result<Role> {
        if self.id == self.hub.inner.aggregator {
            Ok(Role::Aggregator)
        } else if self.hub.inner.analyzers.contains(&self.id) {
            Ok(Role::Analyzer)
        } else {
            Err(StarError::Transport(format!(
                "node {} is not part of this analysis",
                self.id
            )))
        }
    }

    async fn aggregator_id(&self) -> Result<NodeId> {
        Ok(self.hub.inner.aggregator.clone())
    }

    async fn participant_ids(&self) -> Result<BTreeSet<NodeId>> {
        Ok(self.hub.inner.analyzers.clone())
    }

    async fn send_message(
        &self,
        receivers: &BTreeSet<NodeId>,
        category: MessageCategory,
        body: MessageBody,
        timeout: Option<Duration>,
    ) -> Result<SendReceipt> {
        let message = Message::new(category, self.id.clone(), receivers.clone(), body);
        {
            let mut state = self.hub.inner.state.lock();
            for receiver in receivers {
                state
                    .mailboxes
                    .entry((receiver.clone(), self.id.clone(), category))
                    .or_default()
                    .history
                    .push(message.clone());
            }
            state.log.push(message);
        }
        self.hub.bump();
        debug!("{} -> {:?}: {}", self.id, receivers, category);

        if timeout.is_some() {
            self.hub
                .wait_for(timeout, |state| receivers.is_subset(&state.online).then_some(()))
                .await;
        }

        let state = self.hub.inner.state.lock();
        Ok(SendReceipt {
            responded: receivers.intersection(&state.online).cloned().collect(),
        })
    }

    async fn await_responses(
        &self,
        node_ids: &BTreeSet<NodeId>,
        category: MessageCategory,
        timeout: Option<Duration>,
    ) -> Result<Responses> {
        let complete = self
            .hub
            .wait_for(timeout, |state| {
                state
                    .all_unread(&self.id, node_ids, category)
                    .then(|| state.take(&self.id, node_ids, category))
            })
            .await;

        Ok(match complete {
            Some(responses) => responses,
            // Timed out: hand back whatever did arrive.
            None => self.hub.inner.state.lock().take(&self.id, node_ids, category),
        })
    }

    async fn submit_final_result(&self, bytes: Vec<u8>) -> Result<SubmitAck> {
        let mut state = self.hub.inner.state.lock();
        if state.reject_submissions {
            return Err(StarError::Submission("storage rejected the artifact".to_string()));
        }
        let size = bytes.len();
        state.submissions.push(bytes);
        Ok(SubmitAck {
            artifact_id: format!("local-{}", state.submissions.len()),
            size,
        })
    }

    async fn signal_analysis_finished(&self) -> Result<()> {
        let flipped = self.hub.inner.finished.send_if_modified(|finished| {
            let was = *finished;
            *finished = true;
            !was
        });
        if flipped {
            debug!("Global converged flag set by {}", self.id);
            self.hub.bump();
        }
        Ok(())
    }

    async fn is_converged(&self) -> Result<bool> {
        Ok(self.hub.is_finished())
    }

    async fn wait_until_converged(&self, _poll: Duration) -> Result<()> {
        let mut rx = self.hub.inner.finished.subscribe();
        rx.wait_for(|finished| *finished)
            .await
            .map(|_| ())
            .map_err(|e| StarError::Transport(e.to_string()))
    }
}
