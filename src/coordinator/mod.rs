//! Role-gated entrypoints for a star node.
//!
//! A [`StarNode`] wraps one node's transport handle. The aggregator calls
//! [`StarNode::start_aggregator`], every analyzer calls
//! [`StarNode::start_analyzer`]. Both check the node's role first, build
//! the strategy, run the readiness handshake and then drive their round
//! loop until the global converged flag is set.

pub mod aggregator;
pub mod analyzer;

use crate::config::ProtocolConfig;
use crate::data::{fetch_data, DataSource, Query};
use crate::error::{Result, StarError};
use crate::models::Role;
use crate::readiness::wait_until_partners_ready;
use crate::strategy::{AggregationStrategy, AnalysisStrategy, StrategySource};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, info};

pub use aggregator::AggregatorOutcome;
pub use analyzer::AnalyzerOutcome;

/// One node of the star.
pub struct StarNode {
    transport: Arc<dyn Transport>,
    config: ProtocolConfig,
    concurrent_fetch: bool,
}

impl StarNode {
    pub fn new(transport: Arc<dyn Transport>, config: ProtocolConfig) -> Self {
        Self {
            transport,
            config,
            concurrent_fetch: false,
        }
    }

    /// Issue list queries concurrently during the data fetch.
    pub fn with_concurrent_fetch(mut self, concurrent: bool) -> Self {
        self.concurrent_fetch = concurrent;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn role(&self) -> Result<Role> {
        self.transport.role().await
    }

    pub async fn is_aggregator(&self) -> Result<bool> {
        Ok(self.role().await? == Role::Aggregator)
    }

    pub async fn is_analyzer(&self) -> Result<bool> {
        Ok(self.role().await? == Role::Analyzer)
    }

    /// Whether the global converged flag is set.
    pub async fn converged(&self) -> Result<bool> {
        self.transport.is_converged().await
    }

    async fn require_role(&self, expected: Role) -> Result<()> {
        let actual = self.role().await?;
        if actual != expected {
            return Err(StarError::RoleMismatch { expected, actual });
        }
        Ok(())
    }

    /// Run the aggregator side of the protocol to completion.
    pub async fn start_aggregator<A>(
        &self,
        aggregator: StrategySource<A>,
        simple_analysis: bool,
    ) -> Result<AggregatorOutcome>
    where
        A: AggregationStrategy,
    {
        self.require_role(Role::Aggregator).await?;
        let mut strategy = aggregator.instantiate(self.transport.clone())?;

        wait_until_partners_ready(self.transport.as_ref(), Role::Aggregator, &self.config).await?;

        let outcome = aggregator::run_rounds(
            self.transport.as_ref(),
            &self.config,
            &mut strategy,
            simple_analysis,
        )
        .await;
        strategy.node_finished();

        let outcome = outcome?;
        info!("Aggregator done after {} round(s)", outcome.rounds);
        Ok(outcome)
    }

    /// Run the analyzer side of the protocol to completion.
    pub async fn start_analyzer<S, D>(
        &self,
        analyzer: StrategySource<S>,
        data_source: &D,
        query: &Query,
        simple_analysis: bool,
    ) -> Result<AnalyzerOutcome>
    where
        S: AnalysisStrategy,
        D: DataSource + ?Sized,
    {
        self.require_role(Role::Analyzer).await?;
        let mut strategy = analyzer.instantiate(self.transport.clone())?;

        wait_until_partners_ready(self.transport.as_ref(), Role::Analyzer, &self.config).await?;

        let data = fetch_data(data_source, query, self.concurrent_fetch).await;
        debug!("Data extracted: {:?}", data);

        let outcome = analyzer::run_rounds(
            self.transport.as_ref(),
            &self.config,
            &mut strategy,
            &data,
            simple_analysis,
        )
        .await;
        strategy.node_finished();

        let outcome = outcome?;
        info!("Analyzer done after {} round(s)", outcome.rounds);
        Ok(outcome)
    }
}
