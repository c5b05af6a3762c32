//! Analyzer round loop.
//!
//! Each iteration analyzes and sends while the node has not converged
//! locally, then either waits for the aggregator's feedback or, once
//! locally converged, for the global converged flag. Every wait ends as
//! soon as the flag is observed.

use crate::config::ProtocolConfig;
use crate::data::FetchedData;
use crate::error::{Result, StarError};
use crate::models::{latest_per_node, result_body, MessageCategory, NodeId};
use crate::strategy::AnalysisStrategy;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Per-run loop state. Lives only for the duration of the loop.
#[derive(Debug, Default)]
struct RoundState {
    local_converged: bool,
    last_self_result: Option<Value>,
    last_peer_result: Option<Value>,
}

/// What the analyzer did before the global flag was observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerOutcome {
    /// Rounds analyzed (and sent).
    pub rounds: usize,
    /// Whether the local strategy reported convergence.
    pub locally_converged: bool,
    /// Last result sent to the aggregator.
    pub last_result: Option<Value>,
    /// Last aggregated feedback received.
    pub last_aggregated: Option<Value>,
}

/// Wait for the aggregator's feedback. `None` means the global flag was
/// observed first.
async fn wait_for_aggregated(
    transport: &dyn Transport,
    aggregator: &NodeId,
    config: &ProtocolConfig,
) -> Result<Option<Value>> {
    let from = BTreeSet::from([aggregator.clone()]);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let responses = tokio::select! {
            responses = transport.await_responses(
                &from,
                MessageCategory::AggregatedResults,
                Some(config.aggregated_timeout),
            ) => responses?,
            converged = transport.wait_until_converged(config.convergence_poll) => {
                converged?;
                return Ok(None);
            }
        };

        match latest_per_node(&responses)
            .get(aggregator)
            .map(|message| message.result())
        {
            Some(Some(result)) => return Ok(Some(result.clone())),
            Some(None) => warn!("Aggregated message from {} has no result field", aggregator),
            None => warn!(
                "No aggregated results from {} within {:?} (attempt {}/{})",
                aggregator,
                config.aggregated_timeout,
                attempts,
                config.max_wait_retries + 1
            ),
        }

        if attempts > config.max_wait_retries {
            return Err(StarError::TransportTimeout {
                node: aggregator.clone(),
                category: MessageCategory::AggregatedResults,
                attempts,
            });
        }
    }
}

/// Drive the analyzer until the global converged flag is set.
pub(crate) async fn run_rounds<S>(
    transport: &dyn Transport,
    config: &ProtocolConfig,
    strategy: &mut S,
    data: &FetchedData,
    simple_analysis: bool,
) -> Result<AnalyzerOutcome>
where
    S: AnalysisStrategy + ?Sized,
{
    let aggregator = transport.aggregator_id().await?;
    let to_aggregator = BTreeSet::from([aggregator.clone()]);
    let mut state = RoundState::default();
    let mut rounds = 0;

    while !transport.is_converged().await? {
        if !state.local_converged {
            let output = strategy
                .analyze(data, state.last_peer_result.as_ref(), simple_analysis)
                .map_err(|e| StarError::Strategy(format!("{:#}", e)))?;
            rounds += 1;
            debug!("Round {}: local result {}", rounds, output.result);

            transport
                .send_message(
                    &to_aggregator,
                    MessageCategory::IntermediateResults,
                    result_body(output.result.clone()),
                    None,
                )
                .await?;
            state.local_converged = output.converged;
            state.last_self_result = Some(output.result);
        }

        if transport.is_converged().await? {
            break;
        }

        if state.local_converged {
            debug!("Locally converged, waiting for the aggregator to finish");
            transport
                .wait_until_converged(config.convergence_poll)
                .await?;
        } else {
            match wait_for_aggregated(transport, &aggregator, config).await? {
                Some(result) => {
                    info!("Round {}: aggregated results received", rounds);
                    state.last_peer_result = Some(result);
                }
                None => break,
            }
        }
    }

    Ok(AnalyzerOutcome {
        rounds,
        locally_converged: state.local_converged,
        last_result: state.last_self_result,
        last_aggregated: state.last_peer_result,
    })
}
