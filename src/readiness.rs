//! Readiness handshake.
//!
//! Before the first round every node confirms it can reach its
//! counterpart(s) by sending `ready_check` messages once per interval.
//! Analyzers wait for the aggregator; the aggregator waits until every
//! analyzer has answered at least once, across attempts.

use crate::config::ProtocolConfig;
use crate::error::{Result, StarError};
use crate::models::{MessageBody, MessageCategory, NodeId, Role};
use crate::transport::Transport;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Block until the calling node's partners are reachable.
pub async fn wait_until_partners_ready(
    transport: &dyn Transport,
    role: Role,
    config: &ProtocolConfig,
) -> Result<()> {
    match role {
        Role::Analyzer => await_aggregator(transport, config).await,
        Role::Aggregator => await_analyzers(transport, config).await.map(|_| ()),
    }
}

fn exhausted(attempts: u32, config: &ProtocolConfig) -> bool {
    config
        .readiness_max_attempts
        .is_some_and(|max| attempts >= max)
}

/// Analyzer side: succeed once the aggregator acknowledges a ready check.
pub async fn await_aggregator(transport: &dyn Transport, config: &ProtocolConfig) -> Result<()> {
    let aggregator = transport.aggregator_id().await?;
    let target = BTreeSet::from([aggregator.clone()]);
    info!("Awaiting contact with aggregator node...");

    let mut attempts = 0;
    loop {
        if exhausted(attempts, config) {
            return Err(StarError::UnreachablePartner {
                missing: vec![aggregator],
                attempts,
            });
        }

        tokio::time::sleep(config.readiness_interval).await;
        attempts += 1;

        let receipt = transport
            .send_message(
                &target,
                MessageCategory::ReadyCheck,
                MessageBody::new(),
                Some(config.readiness_timeout),
            )
            .await?;

        if receipt.responded.contains(&aggregator) {
            info!("Awaiting contact with aggregator node...success");
            return Ok(());
        }
        debug!("Ready check #{} to {} unanswered", attempts, aggregator);
    }
}

/// Aggregator side: succeed once every analyzer has answered. Returns the
/// responder set.
pub async fn await_analyzers(
    transport: &dyn Transport,
    config: &ProtocolConfig,
) -> Result<BTreeSet<NodeId>> {
    let partners = transport.participant_ids().await?;
    let mut responded: BTreeSet<NodeId> = BTreeSet::new();
    info!("Awaiting contact with analyzer nodes...(0/{})", partners.len());

    let mut attempts = 0;
    while responded.len() < partners.len() {
        if exhausted(attempts, config) {
            return Err(StarError::UnreachablePartner {
                missing: partners.difference(&responded).cloned().collect(),
                attempts,
            });
        }

        tokio::time::sleep(config.readiness_interval).await;
        attempts += 1;

        // Counted partners are not contacted again.
        let pending: BTreeSet<NodeId> = partners.difference(&responded).cloned().collect();
        let receipt = transport
            .send_message(
                &pending,
                MessageCategory::ReadyCheck,
                MessageBody::new(),
                Some(config.readiness_timeout),
            )
            .await?;

        let before = responded.len();
        responded.extend(receipt.responded.intersection(&pending).cloned());
        if responded.len() > before {
            info!(
                "Awaiting contact with analyzer nodes...({}/{})",
                responded.len(),
                partners.len()
            );
        }
    }

    info!("Awaiting contact with analyzer nodes...success");
    Ok(responded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node_set;
    use crate::transport::LocalHub;
    use std::time::Duration;

    fn config(max_attempts: Option<u32>) -> ProtocolConfig {
        ProtocolConfig {
            readiness_max_attempts: max_attempts,
            ..ProtocolConfig::fast()
        }
    }

    #[tokio::test]
    async fn test_analyzer_ready_when_aggregator_online() {
        let hub = LocalHub::new("agg".into(), node_set(["a1"]));
        hub.connect("agg");
        let a1 = hub.connect("a1");

        await_aggregator(&a1, &config(Some(3))).await.unwrap();
        assert_eq!(hub.sent(MessageCategory::ReadyCheck).len(), 1);
    }

    #[tokio::test]
    async fn test_analyzer_unreachable_after_bounded_attempts() {
        let hub = LocalHub::new("agg".into(), node_set(["a1"]));
        let a1 = hub.connect("a1");

        let err = await_aggregator(&a1, &config(Some(2))).await.unwrap_err();
        match err {
            StarError::UnreachablePartner { missing, attempts } => {
                assert_eq!(missing, vec![NodeId::from("agg")]);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_aggregator_accumulates_responders() {
        let hub = LocalHub::new("agg".into(), node_set(["a1", "a2"]));
        let agg = hub.connect("agg");
        hub.connect("a1");

        // a2 comes online after the first attempts have timed out.
        let late = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            late.connect("a2");
        });

        let responded = await_analyzers(&agg, &config(None)).await.unwrap();
        assert_eq!(responded, node_set(["a1", "a2"]));

        // a1 answered the first check and was never probed again.
        let probes_to_a1 = hub
            .sent(MessageCategory::ReadyCheck)
            .iter()
            .filter(|m| m.receivers.contains(&NodeId::from("a1")))
            .count();
        assert_eq!(probes_to_a1, 1);
    }

    #[tokio::test]
    async fn test_aggregator_reports_missing_partners() {
        let hub = LocalHub::new("agg".into(), node_set(["a1", "a2", "a3"]));
        let agg = hub.connect("agg");
        hub.connect("a2");

        let err = await_analyzers(&agg, &config(Some(2))).await.unwrap_err();
        match err {
            StarError::UnreachablePartner { missing, .. } => {
                assert_eq!(missing, vec![NodeId::from("a1"), NodeId::from("a3")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_role_dispatch() {
        let hub = LocalHub::new("agg".into(), node_set(["a1"]));
        let agg = hub.connect("agg");
        let a1 = hub.connect("a1");
        let cfg = config(Some(3));

        let (left, right) = tokio::join!(
            wait_until_partners_ready(&agg, Role::Aggregator, &cfg),
            wait_until_partners_ready(&a1, Role::Analyzer, &cfg),
        );
        left.unwrap();
        right.unwrap();
    }
}
