//! Pluggable aggregation and analysis strategies.
//!
//! The protocol drives two user-supplied roles to convergence:
//! [`AggregationStrategy`] on the aggregator and [`AnalysisStrategy`] on each
//! analyzer. Both are invoked once per round and report whether they
//! consider the computation converged.

pub mod builtin;

use crate::data::FetchedData;
use crate::error::{Result, StarError};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;

pub use builtin::{CountingAnalyzer, SummingAggregator};

/// Value produced by a strategy for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutput {
    pub result: Value,
    pub converged: bool,
}

impl RoundOutput {
    pub fn new(result: Value, converged: bool) -> Self {
        Self { result, converged }
    }

    /// A result that ends the computation.
    pub fn converged(result: Value) -> Self {
        Self::new(result, true)
    }

    /// A result that asks for another round.
    pub fn pending(result: Value) -> Self {
        Self::new(result, false)
    }
}

/// Combines the partial results of all analyzers.
pub trait AggregationStrategy: Send {
    /// Aggregate one round. `node_results` holds exactly one result per
    /// analyzer, taken from its latest intermediate message.
    fn aggregate(&mut self, node_results: &[Value], simple_analysis: bool)
        -> anyhow::Result<RoundOutput>;

    /// Called once after the round loop ends.
    fn node_finished(&mut self) {}
}

/// Derives a partial result from local data.
pub trait AnalysisStrategy: Send {
    /// Analyze one round. `aggregator_result` is the previous round's
    /// aggregated feedback, `None` on the first round.
    fn analyze(
        &mut self,
        data: &FetchedData,
        aggregator_result: Option<&Value>,
        simple_analysis: bool,
    ) -> anyhow::Result<RoundOutput>;

    /// Called once after the round loop ends.
    fn node_finished(&mut self) {}
}

impl<T: AggregationStrategy + ?Sized> AggregationStrategy for Box<T> {
    fn aggregate(
        &mut self,
        node_results: &[Value],
        simple_analysis: bool,
    ) -> anyhow::Result<RoundOutput> {
        (**self).aggregate(node_results, simple_analysis)
    }

    fn node_finished(&mut self) {
        (**self).node_finished()
    }
}

impl<T: AnalysisStrategy + ?Sized> AnalysisStrategy for Box<T> {
    fn analyze(
        &mut self,
        data: &FetchedData,
        aggregator_result: Option<&Value>,
        simple_analysis: bool,
    ) -> anyhow::Result<RoundOutput> {
        (**self).analyze(data, aggregator_result, simple_analysis)
    }

    fn node_finished(&mut self) {
        (**self).node_finished()
    }
}

type Factory<S> = Box<dyn FnOnce(Arc<dyn Transport>) -> anyhow::Result<S> + Send>;

/// A ready strategy instance, or a constructor that receives the node's
/// transport handle.
pub enum StrategySource<S> {
    Instance(S),
    Factory(Factory<S>),
}

impl<S> StrategySource<S> {
    /// Wrap a constructor taking the transport handle.
    pub fn factory<F>(build: F) -> Self
    where
        F: FnOnce(Arc<dyn Transport>) -> anyhow::Result<S> + Send + 'static,
    {
        StrategySource::Factory(Box::new(build))
    }

    /// Produce the instance, running the constructor at most once.
    pub fn instantiate(self, transport: Arc<dyn Transport>) -> Result<S> {
        match self {
            StrategySource::Instance(strategy) => Ok(strategy),
            StrategySource::Factory(build) => {
                build(transport).map_err(|e| StarError::InvalidStrategy(format!("{:#}", e)))
            }
        }
    }
}

impl<S> From<S> for StrategySource<S> {
    fn from(strategy: S) -> Self {
        StrategySource::Instance(strategy)
    }
}
