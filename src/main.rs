//! Starfed - star-topology federated analysis
//!
//! Runs one aggregator and N analyzer nodes in-process, drives them through
//! the readiness handshake and the round protocol, and writes a run report.
//!
//! Exit codes:
//!   0 - Success (final result submitted)
//!   1 - Runtime error (configuration, unreachable partner, strategy failure, etc.)

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use starfed::cli::Args;
use starfed::config::{Config, DEFAULT_CONFIG_FILE};
use starfed::report;
use starfed::simulation::{run_simulation, SimulationReport};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("Starfed v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default starfed.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize analyzers, timeouts, and the data source.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the simulated star and write the report.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let mode = if config.node.simple_analysis {
        "Simple (single round)"
    } else {
        "Iterative"
    };

    println!("🌟 Starting star...");
    println!("   Aggregator: {}", config.simulation.aggregator_id);
    println!("   Analyzers: {}", config.simulation.analyzers.len());
    println!("   Mode: {}", mode);
    match config.data.base_url {
        Some(ref url) => println!("   Data: {} (project {})", url, config.data.project_id),
        None => println!("   Data: static datasets"),
    }

    let spinner = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message("Running rounds...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let outcome = run_simulation(&config).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = outcome?;

    println!("\n📝 Generating report...");
    report::write_report(&report, args.format, &args.output)?;

    if let Some(ref path) = args.artifact {
        write_artifact(&report, path)?;
    }

    print_summary(&report);
    println!(
        "\n✅ Run complete! Report saved to: {}",
        args.output.display()
    );

    Ok(())
}

/// Write the submitted artifact bytes to `path`.
fn write_artifact(report: &SimulationReport, path: &Path) -> Result<()> {
    match report.artifact {
        Some(ref bytes) => {
            std::fs::write(path, bytes)
                .with_context(|| format!("Failed to write artifact to {}", path.display()))?;
            info!("Artifact written to {}", path.display());
        }
        None => warn!("No artifact was submitted; skipping {}", path.display()),
    }
    Ok(())
}

fn print_summary(report: &SimulationReport) {
    println!("\n📊 Run Summary:");
    println!("   Rounds: {}", report.aggregator.rounds);
    println!("   Messages exchanged: {}", report.messages_exchanged);
    if let Some(result) = report.final_result() {
        println!("   Final result: {}", result);
    }
    if let Some(ref ack) = report.aggregator.ack {
        println!("   Stored as: {} ({} bytes)", ack.artifact_id, ack.size);
    }
    println!("   Duration: {:.2}s", report.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
