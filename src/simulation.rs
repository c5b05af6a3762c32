//! In-process star simulation.
//!
//! Builds a [`LocalHub`] with one aggregator and the configured analyzers,
//! runs every node's entrypoint concurrently with the built-in counting
//! strategies and collects the outcomes into a [`SimulationReport`].

use crate::config::{Config, ProtocolConfig, SimulatedAnalyzer};
use crate::coordinator::{AggregatorOutcome, AnalyzerOutcome, StarNode};
use crate::data::{DataSource, HttpDataSource, Query, StaticDataSource};
use crate::models::{node_set, NodeId};
use crate::strategy::{CountingAnalyzer, StrategySource, SummingAggregator};
use crate::transport::LocalHub;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything one simulated run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub simple_analysis: bool,
    pub aggregator_id: NodeId,
    pub aggregator: AggregatorOutcome,
    pub analyzers: BTreeMap<NodeId, AnalyzerOutcome>,
    /// Messages recorded by the hub across all categories.
    pub messages_exchanged: usize,
    /// Whether the global converged flag was set when the run ended.
    pub converged: bool,
    /// Bytes handed to final-result storage.
    #[serde(skip)]
    pub artifact: Option<Vec<u8>>,
}

impl SimulationReport {
    /// The submitted result, if any.
    pub fn final_result(&self) -> Option<&serde_json::Value> {
        self.aggregator.final_result.as_ref()
    }
}

struct SimulatedNode {
    id: NodeId,
    node: StarNode,
    source: Box<dyn DataSource>,
    query: Query,
}

/// Queries an analyzer issues: the configured ones, or every key of its
/// own dataset when none are configured.
fn query_for(queries: &[String], analyzer: &SimulatedAnalyzer) -> Query {
    match queries {
        [single] => Query::Single(single.clone()),
        [] => Query::Many(analyzer.data.keys().cloned().collect()),
        many => Query::Many(many.to_vec()),
    }
}

fn check_topology(config: &Config) -> Result<()> {
    let simulation = &config.simulation;
    if simulation.analyzers.is_empty() {
        bail!("At least one analyzer is required");
    }

    let ids = node_set(simulation.analyzers.iter().map(|a| a.id.as_str()));
    if ids.len() != simulation.analyzers.len() {
        bail!("Analyzer ids must be unique");
    }
    if ids.contains(&NodeId::new(simulation.aggregator_id.as_str())) {
        bail!(
            "Node '{}' cannot be both aggregator and analyzer",
            simulation.aggregator_id
        );
    }
    Ok(())
}

/// Run a full star with timings taken from `config`.
pub async fn run_simulation(config: &Config) -> Result<SimulationReport> {
    run_star(config, ProtocolConfig::from(config)).await
}

/// Run a full star with explicit protocol timings.
pub async fn run_star(config: &Config, protocol: ProtocolConfig) -> Result<SimulationReport> {
    check_topology(config)?;
    let simulation = &config.simulation;
    let simple_analysis = config.node.simple_analysis;

    let aggregator_id = NodeId::new(simulation.aggregator_id.as_str());
    let hub = LocalHub::new(
        aggregator_id.clone(),
        node_set(simulation.analyzers.iter().map(|a| a.id.as_str())),
    );

    let http = match config.data.base_url {
        Some(ref url) => Some(
            HttpDataSource::new(
                url.as_str(),
                config.data.project_id.as_str(),
                Duration::from_secs(config.data.timeout_secs),
            )
            .context("Failed to create HTTP data source")?,
        ),
        None => None,
    };

    let analyzers: Vec<SimulatedNode> = simulation
        .analyzers
        .iter()
        .map(|analyzer| {
            let id = NodeId::new(analyzer.id.as_str());
            let source: Box<dyn DataSource> = match http {
                Some(ref http) => Box::new(http.clone()),
                None => Box::new(StaticDataSource::new(analyzer.data.clone())),
            };
            let node = StarNode::new(Arc::new(hub.connect(id.clone())), protocol.clone())
                .with_concurrent_fetch(config.data.concurrent);
            SimulatedNode {
                id,
                node,
                source,
                query: query_for(&config.data.queries, analyzer),
            }
        })
        .collect();
    let aggregator = StarNode::new(Arc::new(hub.connect(aggregator_id.clone())), protocol);

    info!(
        "Starting star: aggregator={}, analyzers={}, simple_analysis={}",
        aggregator_id,
        analyzers.len(),
        simple_analysis
    );
    let started_at = Utc::now();
    let start = Instant::now();

    let aggregator_run = async {
        aggregator
            .start_aggregator(
                StrategySource::Instance(SummingAggregator::new(simulation.rounds)),
                simple_analysis,
            )
            .await
            .with_context(|| format!("Aggregator {} failed", aggregator_id))
    };
    let analyzer_runs = try_join_all(analyzers.iter().map(|analyzer| async move {
        debug!("Analyzer {} querying {:?}", analyzer.id, analyzer.query);
        let outcome = analyzer
            .node
            .start_analyzer(
                StrategySource::Instance(CountingAnalyzer::new()),
                analyzer.source.as_ref(),
                &analyzer.query,
                simple_analysis,
            )
            .await
            .with_context(|| format!("Analyzer {} failed", analyzer.id))?;
        Ok::<_, anyhow::Error>((analyzer.id.clone(), outcome))
    }));

    let (aggregator_outcome, analyzer_outcomes) = tokio::try_join!(aggregator_run, analyzer_runs)?;
    let duration_seconds = start.elapsed().as_secs_f64();
    info!("Star finished in {:.2}s", duration_seconds);

    Ok(SimulationReport {
        started_at,
        duration_seconds,
        simple_analysis,
        aggregator_id,
        aggregator: aggregator_outcome,
        analyzers: analyzer_outcomes.into_iter().collect(),
        messages_exchanged: hub.message_count(),
        converged: hub.is_finished(),
        artifact: hub.submissions().pop(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn config(simple_analysis: bool) -> Config {
        let mut config = Config::default();
        config.node.simple_analysis = simple_analysis;
        config
    }

    #[tokio::test]
    async fn test_simple_star_sums_counts() {
        let report = run_star(&config(true), ProtocolConfig::fast()).await.unwrap();

        assert!(report.converged);
        assert_eq!(report.aggregator.rounds, 1);
        assert_eq!(report.final_result(), Some(&json!({"A": 10, "B": 14})));
        assert_eq!(report.analyzers.len(), 2);
        for outcome in report.analyzers.values() {
            assert_eq!(outcome.rounds, 1);
            assert_eq!(outcome.last_result, Some(json!({"A": 5, "B": 7})));
            assert_eq!(outcome.last_aggregated, None);
        }

        let artifact: Value = serde_json::from_slice(report.artifact.as_ref().unwrap()).unwrap();
        assert_eq!(artifact, json!({"A": 10, "B": 14}));
    }

    #[tokio::test]
    async fn test_iterative_star_runs_configured_rounds() {
        let report = run_star(&config(false), ProtocolConfig::fast()).await.unwrap();

        assert_eq!(report.aggregator.rounds, 2);
        assert_eq!(report.final_result(), Some(&json!({"A": 10, "B": 14})));
        for outcome in report.analyzers.values() {
            assert_eq!(outcome.rounds, 2);
            assert!(!outcome.locally_converged);
            assert_eq!(outcome.last_aggregated, Some(json!({"A": 10, "B": 14})));
        }
    }

    #[tokio::test]
    async fn test_iterative_star_three_rounds_completes() {
        let mut config = config(false);
        config.simulation.rounds = 3;
        config.simulation.resize(5);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_star(&config, ProtocolConfig::fast()),
        )
        .await
        .expect("three-round star did not finish")
        .unwrap();

        assert!(report.converged);
        assert_eq!(report.aggregator.rounds, 3);
        assert_eq!(report.final_result(), Some(&json!({"A": 25, "B": 35})));
        for outcome in report.analyzers.values() {
            assert_eq!(outcome.rounds, 3);
        }
    }

    #[tokio::test]
    async fn test_single_configured_query() {
        let mut config = config(true);
        config.data.queries = vec!["A".to_string()];
        config.simulation.resize(3);

        let report = run_star(&config, ProtocolConfig::fast()).await.unwrap();
        assert_eq!(report.final_result(), Some(&json!({"total": 15})));
        assert_eq!(report.analyzers.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_query_is_skipped() {
        let mut config = config(true);
        config.data.queries = vec!["A".to_string(), "Missing".to_string()];

        let report = run_star(&config, ProtocolConfig::fast()).await.unwrap();
        assert_eq!(report.final_result(), Some(&json!({"A": 10})));
    }

    #[tokio::test]
    async fn test_rejects_bad_topology() {
        let mut config = config(true);
        config.simulation.analyzers[1].id = config.simulation.analyzers[0].id.clone();
        assert!(run_star(&config, ProtocolConfig::fast()).await.is_err());

        let mut config = self::config(true);
        config.simulation.aggregator_id = "analyzer-1".to_string();
        assert!(run_star(&config, ProtocolConfig::fast()).await.is_err());

        let mut config = self::config(true);
        config.simulation.resize(0);
        assert!(run_star(&config, ProtocolConfig::fast()).await.is_err());
    }

    #[test]
    fn test_query_for() {
        let analyzer = SimulatedAnalyzer {
            id: "a".to_string(),
            data: BTreeMap::from([("X".to_string(), json!(1))]),
        };
        assert_eq!(query_for(&[], &analyzer), Query::Many(vec!["X".to_string()]));
        assert_eq!(
            query_for(&["P".to_string()], &analyzer),
            Query::Single("P".to_string())
        );
    }
}
