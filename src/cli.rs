//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Starfed - star-topology federated analysis
///
/// Runs one aggregator and N analyzer nodes in-process over a local hub,
/// drives them through the readiness handshake and the round protocol,
/// and writes the final aggregated result.
///
/// Examples:
///   starfed
///   starfed --analyzers 5 --no-simple --rounds 3
///   starfed --data-url http://fhir.local --project proj-1 --query Patient --query Observation
///   starfed --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for starfed.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the run report
    #[arg(short, long, default_value = "starfed_report.md", value_name = "FILE")]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the raw final artifact to this file as well
    #[arg(long, value_name = "FILE")]
    pub artifact: Option<PathBuf>,

    /// Number of simulated analyzer nodes
    #[arg(short, long, value_name = "COUNT")]
    pub analyzers: Option<usize>,

    /// Rounds the built-in aggregator runs before converging (non-simple mode)
    #[arg(long, value_name = "COUNT")]
    pub rounds: Option<usize>,

    /// Run in simple analysis mode
    #[arg(long, conflicts_with = "no_simple")]
    pub simple: bool,

    /// Run in iterative (non-simple) analysis mode
    #[arg(long, conflicts_with = "simple")]
    pub no_simple: bool,

    /// Data service base URL queried by every analyzer
    #[arg(long, value_name = "URL", env = "STARFED_DATA_URL")]
    pub data_url: Option<String>,

    /// Project the data queries are scoped to
    #[arg(long, value_name = "ID", env = "STARFED_PROJECT")]
    pub project: Option<String>,

    /// Data query (repeatable)
    #[arg(long, value_name = "QUERY")]
    pub query: Vec<String>,

    /// Issue list queries concurrently
    #[arg(long)]
    pub concurrent_fetch: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default starfed.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.analyzers == Some(0) {
            return Err("At least one analyzer is required".to_string());
        }

        if self.rounds == Some(0) {
            return Err("Rounds must be at least 1".to_string());
        }

        if let Some(ref url) = self.data_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Data URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            config: None,
            output: PathBuf::from("report.md"),
            format: OutputFormat::Markdown,
            artifact: None,
            analyzers: None,
            rounds: None,
            simple: false,
            no_simple: false,
            data_url: None,
            project: None,
            query: Vec::new(),
            concurrent_fetch: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "starfed",
            "--analyzers",
            "3",
            "--no-simple",
            "--query",
            "Patient",
            "--query",
            "Observation",
        ])
        .unwrap();
        assert_eq!(args.analyzers, Some(3));
        assert!(args.no_simple);
        assert_eq!(args.query, vec!["Patient", "Observation"]);
        assert_eq!(args.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_simple_flags_conflict() {
        assert!(Args::try_parse_from(["starfed", "--simple", "--no-simple"]).is_err());
    }

    #[test]
    fn test_validation() {
        let mut args = make_args();
        assert!(args.validate().is_ok());

        args.analyzers = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.data_url = Some("fhir.local".to_string());
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
