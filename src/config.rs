//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `starfed.toml` files, and projects it into the [`ProtocolConfig`] the
//! coordinators run with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "starfed.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node settings.
    #[serde(default)]
    pub node: NodeConfig,

    /// Readiness handshake settings.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Round loop settings.
    #[serde(default)]
    pub rounds: RoundsConfig,

    /// Data source settings.
    #[serde(default)]
    pub data: DataConfig,

    /// In-process simulation settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// General node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Passed to every strategy invocation.
    #[serde(default = "default_true")]
    pub simple_analysis: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            simple_analysis: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Readiness handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Pause before each ready check, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How long each ready check waits for acknowledgments, in seconds.
    #[serde(default = "default_ready_timeout")]
    pub timeout_secs: u64,

    /// Attempts before giving up. 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_secs: default_ready_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_ready_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    10
}

/// Round loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundsConfig {
    /// Analyzer wait for aggregated results, in seconds.
    #[serde(default = "default_aggregated_timeout")]
    pub aggregated_timeout_secs: u64,

    /// Timed-out waits for aggregated results tolerated before failing.
    #[serde(default = "default_wait_retries")]
    pub max_wait_retries: u32,

    /// Poll interval while waiting for global convergence, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub convergence_poll_ms: u64,

    /// Bound on each collecting wait on the aggregator, in seconds.
    /// Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_timeout_secs: Option<u64>,
}

impl Default for RoundsConfig {
    fn default() -> Self {
        Self {
            aggregated_timeout_secs: default_aggregated_timeout(),
            max_wait_retries: default_wait_retries(),
            convergence_poll_ms: default_poll_ms(),
            collect_timeout_secs: None,
        }
    }
}

fn default_aggregated_timeout() -> u64 {
    300
}

fn default_wait_retries() -> u32 {
    3
}

fn default_poll_ms() -> u64 {
    1000
}

/// External data source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base URL of the data service. Simulated analyzers use their static
    /// datasets when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Project the queries are scoped to.
    #[serde(default = "default_project")]
    pub project_id: String,

    /// Queries issued by each analyzer.
    #[serde(default)]
    pub queries: Vec<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_data_timeout")]
    pub timeout_secs: u64,

    /// Issue list queries concurrently.
    #[serde(default)]
    pub concurrent: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            project_id: default_project(),
            queries: Vec::new(),
            timeout_secs: default_data_timeout(),
            concurrent: false,
        }
    }
}

fn default_project() -> String {
    "local".to_string()
}

fn default_data_timeout() -> u64 {
    30
}

/// One simulated analyzer and its local dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedAnalyzer {
    pub id: String,
    /// Response body per query.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

/// In-process simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Aggregator node id.
    #[serde(default = "default_aggregator_id")]
    pub aggregator_id: String,

    /// Rounds the built-in aggregator runs in non-simple mode.
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Analyzer nodes.
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<SimulatedAnalyzer>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            aggregator_id: default_aggregator_id(),
            rounds: default_rounds(),
            analyzers: default_analyzers(),
        }
    }
}

fn default_aggregator_id() -> String {
    "aggregator".to_string()
}

fn default_rounds() -> usize {
    2
}

fn default_dataset() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("A".to_string(), Value::from(5)),
        ("B".to_string(), Value::from(7)),
    ])
}

fn default_analyzers() -> Vec<SimulatedAnalyzer> {
    (1..=2)
        .map(|i| SimulatedAnalyzer {
            id: format!("analyzer-{}", i),
            data: default_dataset(),
        })
        .collect()
}

impl SimulationConfig {
    /// Grow or shrink the analyzer list to `count` nodes. New nodes get
    /// the default dataset.
    pub fn resize(&mut self, count: usize) {
        self.analyzers.truncate(count);
        while self.analyzers.len() < count {
            let id = format!("analyzer-{}", self.analyzers.len() + 1);
            self.analyzers.push(SimulatedAnalyzer {
                id,
                data: default_dataset(),
            });
        }
    }
}

/// Timing and retry parameters used by the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub readiness_interval: Duration,
    pub readiness_timeout: Duration,
    /// `None` retries forever.
    pub readiness_max_attempts: Option<u32>,
    pub aggregated_timeout: Duration,
    pub max_wait_retries: u32,
    pub convergence_poll: Duration,
    /// `None` waits without bound.
    pub collect_timeout: Option<Duration>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl ProtocolConfig {
    /// Short timings for in-process runs and tests.
    pub fn fast() -> Self {
        Self {
            readiness_interval: Duration::from_millis(5),
            readiness_timeout: Duration::from_millis(20),
            readiness_max_attempts: Some(50),
            aggregated_timeout: Duration::from_millis(500),
            max_wait_retries: 3,
            convergence_poll: Duration::from_millis(5),
            collect_timeout: None,
        }
    }
}

impl From<&Config> for ProtocolConfig {
    fn from(config: &Config) -> Self {
        Self {
            readiness_interval: Duration::from_millis(config.readiness.interval_ms),
            readiness_timeout: Duration::from_secs(config.readiness.timeout_secs),
            readiness_max_attempts: match config.readiness.max_attempts {
                0 => None,
                n => Some(n),
            },
            aggregated_timeout: Duration::from_secs(config.rounds.aggregated_timeout_secs),
            max_wait_retries: config.rounds.max_wait_retries,
            convergence_poll: Duration::from_millis(config.rounds.convergence_poll_ms),
            collect_timeout: config.rounds.collect_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if args.simple {
            self.node.simple_analysis = true;
        } else if args.no_simple {
            self.node.simple_analysis = false;
        }

        if let Some(count) = args.analyzers {
            self.simulation.resize(count);
        }
        if let Some(rounds) = args.rounds {
            self.simulation.rounds = rounds;
        }

        if let Some(ref url) = args.data_url {
            self.data.base_url = Some(url.clone());
        }
        if let Some(ref project) = args.project {
            self.data.project_id = project.clone();
        }
        if !args.query.is_empty() {
            self.data.queries = args.query.clone();
        }
        if args.concurrent_fetch {
            self.data.concurrent = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
