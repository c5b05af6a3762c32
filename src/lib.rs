//! Starfed - star-topology federated computation.
//!
//! One aggregator node and N analyzer nodes run an iterative computation
//! over a message transport: a readiness handshake, then rounds of
//! local analysis and central aggregation until the aggregator's strategy
//! converges and the final result is submitted.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod models;
pub mod readiness;
pub mod report;
pub mod simulation;
pub mod strategy;
pub mod transport;

pub use coordinator::{AggregatorOutcome, AnalyzerOutcome, StarNode};
pub use error::{Result, StarError};
pub use models::{MessageCategory, NodeId, Role};
pub use strategy::{AggregationStrategy, AnalysisStrategy, RoundOutput, StrategySource};
pub use transport::Transport;
