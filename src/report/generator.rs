//! Markdown run report generation.
//!
//! This module renders a [`SimulationReport`] as Markdown or JSON.

use crate::cli::OutputFormat;
use crate::coordinator::{AggregatorOutcome, AnalyzerOutcome};
use crate::models::NodeId;
use crate::simulation::SimulationReport;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SimulationReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Starfed Run Report\n\n");

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_result_section(&report.aggregator));
    output.push_str(&generate_analyzers_section(&report.analyzers));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &SimulationReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Aggregator:** `{}`\n", report.aggregator_id));
    section.push_str(&format!("- **Analyzers:** {}\n", report.analyzers.len()));
    section.push_str(&format!(
        "- **Mode:** {}\n",
        if report.simple_analysis {
            "simple"
        } else {
            "iterative"
        }
    ));
    section.push_str(&format!("- **Rounds:** {}\n", report.aggregator.rounds));
    section.push_str(&format!(
        "- **Messages Exchanged:** {}\n",
        report.messages_exchanged
    ));
    if !report.converged {
        section.push_str("- **Converged:** no\n");
    }
    section.push_str(&format!(
        "- **Run Duration:** {:.2}s\n",
        report.duration_seconds
    ));
    section.push('\n');

    section
}

fn json_block(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("```json\n{}\n```\n\n", pretty)
}

/// Generate the final result section.
fn generate_result_section(outcome: &AggregatorOutcome) -> String {
    let mut section = String::new();

    section.push_str("## Final Result\n\n");

    match outcome.final_result {
        Some(ref result) => {
            section.push_str(&json_block(result));
            if let Some(ref ack) = outcome.ack {
                section.push_str(&format!(
                    "Stored as `{}` ({} bytes).\n\n",
                    ack.artifact_id, ack.size
                ));
            }
        }
        None => section.push_str("No result was submitted.\n\n"),
    }

    section
}

/// Generate the per-analyzer section.
fn generate_analyzers_section(analyzers: &BTreeMap<NodeId, AnalyzerOutcome>) -> String {
    let mut section = String::new();

    section.push_str("## Analyzers\n\n");
    section.push_str("| Node | Rounds | Locally Converged | Last Result |\n");
    section.push_str("|:---|:---:|:---:|:---|\n");

    for (id, outcome) in analyzers {
        let last = outcome
            .last_result
            .as_ref()
            .map(|v| format!("`{}`", v))
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            id,
            outcome.rounds,
            if outcome.locally_converged { "yes" } else { "no" },
            last
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by starfed v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SimulationReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render `report` in `format` and write it to `path`.
pub fn write_report(report: &SimulationReport, format: OutputFormat, path: &Path) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report),
    };

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmitAck;
    use chrono::Utc;
    use serde_json::json;

    fn create_test_report() -> SimulationReport {
        let analyzer = AnalyzerOutcome {
            rounds: 2,
            locally_converged: true,
            last_result: Some(json!({"A": 5})),
            last_aggregated: Some(json!({"A": 10})),
        };

        SimulationReport {
            started_at: Utc::now(),
            duration_seconds: 0.25,
            simple_analysis: false,
            aggregator_id: NodeId::new("agg"),
            aggregator: AggregatorOutcome {
                rounds: 2,
                final_result: Some(json!({"A": 10})),
                ack: Some(SubmitAck {
                    artifact_id: "local-1".to_string(),
                    size: 8,
                }),
            },
            analyzers: BTreeMap::from([
                (NodeId::new("site-a"), analyzer.clone()),
                (NodeId::new("site-b"), analyzer),
            ]),
            messages_exchanged: 12,
            converged: true,
            artifact: Some(b"{\"A\":10}".to_vec()),
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Starfed Run Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Final Result"));
        assert!(markdown.contains("## Analyzers"));
        assert!(markdown.contains("`site-b`"));
        assert!(markdown.contains("local-1"));
    }

    #[test]
    fn test_generate_metadata_section() {
        let mut report = create_test_report();
        let section = generate_metadata_section(&report);

        assert!(section.contains("`agg`"));
        assert!(section.contains("iterative"));
        assert!(section.contains("**Messages Exchanged:** 12"));
        assert!(!section.contains("Converged"));

        report.converged = false;
        assert!(generate_metadata_section(&report).contains("**Converged:** no"));
    }

    #[test]
    fn test_result_section_without_submission() {
        let outcome = AggregatorOutcome {
            rounds: 0,
            final_result: None,
            ack: None,
        };
        assert!(generate_result_section(&outcome).contains("No result was submitted"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"aggregator\""));
        assert!(json.contains("\"analyzers\""));
        assert!(json.contains("\"site-a\""));
        assert!(!json.contains("\"artifact\""));
    }

    #[test]
    fn test_write_report() {
        let report = create_test_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_report(&report, OutputFormat::Json, &path).unwrap();
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["aggregator"]["final_result"], json!({"A": 10}));
    }
}
