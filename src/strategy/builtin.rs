//! Built-in counting strategies.
//!
//! Analyzers count the records returned for each query; the aggregator sums
//! the counts across analyzers. In simple mode both sides converge after
//! the first round. Otherwise analyzers resend their counts every round
//! and the aggregator converges after a configured number of rounds.

use super::{AggregationStrategy, AnalysisStrategy, RoundOutput};
use crate::data::FetchedData;
use anyhow::{bail, Result};
use serde_json::{Map, Number, Value};
use tracing::{debug, info};

/// Number of records in a data-source response.
///
/// Understands FHIR-style bundles (`total`, then `entry`), plain arrays
/// and bare numbers; any other non-null value counts as one record.
pub fn record_count(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Array(items) => items.len() as u64,
        Value::Object(obj) => {
            if let Some(total) = obj.get("total").and_then(Value::as_u64) {
                total
            } else if let Some(entries) = obj.get("entry").and_then(Value::as_array) {
                entries.len() as u64
            } else {
                1
            }
        }
        _ => 1,
    }
}

/// Counts records per query in the analyzer's local data.
#[derive(Debug, Default)]
pub struct CountingAnalyzer {
    rounds: usize,
}

impl CountingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    fn counts(data: &FetchedData) -> Value {
        let mut counts = Map::new();
        match data {
            FetchedData::NoData => {}
            FetchedData::Single(value) => {
                counts.insert("total".to_string(), record_count(value).into());
            }
            FetchedData::Keyed(entries) => {
                for (query, value) in entries {
                    counts.insert(query.clone(), record_count(value).into());
                }
            }
        }
        Value::Object(counts)
    }
}

impl AnalysisStrategy for CountingAnalyzer {
    fn analyze(
        &mut self,
        data: &FetchedData,
        aggregator_result: Option<&Value>,
        simple_analysis: bool,
    ) -> Result<RoundOutput> {
        self.rounds += 1;
        let counts = Self::counts(data);
        if let Some(totals) = aggregator_result {
            debug!("Aggregated totals from previous round: {}", totals);
        }

        // Non-simple runs resend every round; the aggregator decides when to stop.
        Ok(RoundOutput::new(counts, simple_analysis))
    }

    fn node_finished(&mut self) {
        info!("Counting analyzer finished after {} round(s)", self.rounds);
    }
}

/// Sums per-key counts across all analyzers.
#[derive(Debug)]
pub struct SummingAggregator {
    required_rounds: usize,
    rounds: usize,
    finished: bool,
}

impl SummingAggregator {
    /// `required_rounds` applies to non-simple runs only.
    pub fn new(required_rounds: usize) -> Self {
        Self {
            required_rounds: required_rounds.max(1),
            rounds: 0,
            finished: false,
        }
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn sum(node_results: &[Value]) -> Result<Value> {
        let mut totals: Map<String, Value> = Map::new();
        for (index, result) in node_results.iter().enumerate() {
            let Value::Object(counts) = result else {
                bail!("node result #{} is not a count mapping: {}", index, result);
            };
            for (key, count) in counts {
                let Some(count) = count.as_u64() else {
                    bail!("count for '{}' is not a non-negative integer: {}", key, count);
                };
                let current = totals.get(key).and_then(Value::as_u64).unwrap_or(0);
                let Some(sum) = current.checked_add(count) else {
                    bail!("total for '{}' overflows: {} + {}", key, current, count);
                };
                totals.insert(key.clone(), Value::Number(Number::from(sum)));
            }
        }
        Ok(Value::Object(totals))
    }
}

impl Default for SummingAggregator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl AggregationStrategy for SummingAggregator {
    fn aggregate(&mut self, node_results: &[Value], simple_analysis: bool) -> Result<RoundOutput> {
        self.rounds += 1;
        let totals = Self::sum(node_results)?;
        let converged = simple_analysis || self.rounds >= self.required_rounds;
        Ok(RoundOutput::new(totals, converged))
    }

    fn node_finished(&mut self) {
        self.finished = true;
        info!("Summing aggregator finished after {} round(s)", self.rounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_record_count_shapes() {
        assert_eq!(record_count(&json!({"resourceType": "Bundle", "total": 42})), 42);
        assert_eq!(record_count(&json!({"entry": [{}, {}, {}]})), 3);
        assert_eq!(record_count(&json!([1, 2])), 2);
        assert_eq!(record_count(&json!(7)), 7);
        assert_eq!(record_count(&json!(null)), 0);
        assert_eq!(record_count(&json!({"id": "p1"})), 1);
    }

    #[test]
    fn test_counting_analyzer_simple_converges_immediately() {
        let mut analyzer = CountingAnalyzer::new();
        let data = FetchedData::Keyed(BTreeMap::from([
            ("A".to_string(), json!(5)),
            ("B".to_string(), json!({"total": 7})),
        ]));

        let out = analyzer.analyze(&data, None, true).unwrap();
        assert_eq!(out.result, json!({"A": 5, "B": 7}));
        assert!(out.converged);
    }

    #[test]
    fn test_counting_analyzer_keeps_resending_when_iterative() {
        let mut analyzer = CountingAnalyzer::new();
        let data = FetchedData::Single(json!({"total": 3}));

        let first = analyzer.analyze(&data, None, false).unwrap();
        assert_eq!(first, RoundOutput::pending(json!({"total": 3})));

        let totals = json!({"total": 9});
        for _ in 0..3 {
            let next = analyzer.analyze(&data, Some(&totals), false).unwrap();
            assert_eq!(next, RoundOutput::pending(json!({"total": 3})));
        }
        assert_eq!(analyzer.rounds(), 4);
    }

    #[test]
    fn test_summing_aggregator() {
        let mut aggregator = SummingAggregator::new(2);
        let results = vec![json!({"A": 5, "B": 7}), json!({"A": 5, "B": 7, "C": 1})];

        let first = aggregator.aggregate(&results, false).unwrap();
        assert_eq!(first.result, json!({"A": 10, "B": 14, "C": 1}));
        assert!(!first.converged);

        let second = aggregator.aggregate(&results, false).unwrap();
        assert!(second.converged);

        aggregator.node_finished();
        assert!(aggregator.is_finished());
    }

    #[test]
    fn test_summing_aggregator_rejects_non_counts() {
        let mut aggregator = SummingAggregator::default();
        assert!(aggregator.aggregate(&[json!("oops")], true).is_err());
        assert!(aggregator.aggregate(&[json!({"A": -1})], true).is_err());
    }

    #[test]
    fn test_summing_aggregator_rejects_overflow() {
        let mut aggregator = SummingAggregator::default();
        let err = aggregator
            .aggregate(&[json!({"A": u64::MAX}), json!({"A": 1})], true)
            .unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let out = aggregator
            .aggregate(&[json!({"A": u64::MAX - 1}), json!({"A": 1})], true)
            .unwrap();
        assert_eq!(out.result, json!({"A": u64::MAX}));
    }
}
