//! Aggregator round loop.
//!
//! Collecting -> Aggregating -> (Broadcasting -> Collecting | Submitting -> Done).
//! A round only proceeds once every partner has delivered an
//! `intermediate_results` message for it.

use crate::config::ProtocolConfig;
use crate::error::{Result, StarError};
use crate::models::{latest_per_node, result_body, MessageCategory, NodeId, SubmitAck};
use crate::strategy::AggregationStrategy;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// What the aggregator did before reaching Done.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatorOutcome {
    /// Rounds aggregated.
    pub rounds: usize,
    /// Result handed to storage. `None` if the run was already finished on entry.
    pub final_result: Option<Value>,
    /// Storage acknowledgment for `final_result`.
    pub ack: Option<SubmitAck>,
}

/// Block until every partner has a result for this round. Returns one
/// result per partner, in partner order.
async fn collect_round(
    transport: &dyn Transport,
    partners: &BTreeSet<NodeId>,
    config: &ProtocolConfig,
) -> Result<Vec<Value>> {
    let mut latest: BTreeMap<NodeId, Value> = BTreeMap::new();

    loop {
        let waiting: BTreeSet<NodeId> = partners
            .iter()
            .filter(|p| !latest.contains_key(*p))
            .cloned()
            .collect();

        let responses = transport
            .await_responses(
                &waiting,
                MessageCategory::IntermediateResults,
                config.collect_timeout,
            )
            .await?;

        for (node, message) in latest_per_node(&responses) {
            match message.result() {
                Some(result) => {
                    latest.insert(node.clone(), result.clone());
                }
                None => warn!("Intermediate message from {} has no result field", node),
            }
        }

        if latest.len() == partners.len() {
            return Ok(partners
                .iter()
                .filter_map(|p| latest.remove(p))
                .collect());
        }
        debug!(
            "Round incomplete ({}/{} partners), waiting again",
            latest.len(),
            partners.len()
        );
    }
}

/// Drive the aggregator until the strategy converges.
pub(crate) async fn run_rounds<A>(
    transport: &dyn Transport,
    config: &ProtocolConfig,
    strategy: &mut A,
    simple_analysis: bool,
) -> Result<AggregatorOutcome>
where
    A: AggregationStrategy + ?Sized,
{
    let partners = transport.participant_ids().await?;
    let mut outcome = AggregatorOutcome {
        rounds: 0,
        final_result: None,
        ack: None,
    };

    while !transport.is_converged().await? {
        let node_results = collect_round(transport, &partners, config).await?;
        outcome.rounds += 1;
        debug!("Node results received: {:?}", node_results);

        let output = strategy
            .aggregate(&node_results, simple_analysis)
            .map_err(|e| StarError::Strategy(format!("{:#}", e)))?;
        info!("Round {}: aggregated results: {}", outcome.rounds, output.result);

        if output.converged {
            info!("Submitting final results...");
            let bytes = serde_json::to_vec(&output.result)?;
            let ack = transport.submit_final_result(bytes).await?;
            info!(
                "Submitting final results...success (artifact={}, {} bytes)",
                ack.artifact_id, ack.size
            );

            transport.signal_analysis_finished().await?;
            outcome.final_result = Some(output.result);
            outcome.ack = Some(ack);
            break;
        }

        transport
            .send_message(
                &partners,
                MessageCategory::AggregatedResults,
                result_body(output.result),
                None,
            )
            .await?;
    }

    Ok(outcome)
}
