//! Data fetch adapter for analyzer nodes.
//!
//! Analyzers query an external data source once, before the first round.
//! A single query yields its parsed body or [`FetchedData::NoData`]; a list
//! of queries yields a mapping keyed by query in which failed queries are
//! skipped.

pub mod http;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

pub use http::HttpDataSource;

/// Errors from a single data-source query.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("data source returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to parse response for {query}: {reason}")]
    Parse { query: String, reason: String },
}

/// External data source scoped to the active project.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Value, FetchError>;
}

/// One query or a list of queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Single(String),
    Many(Vec<String>),
}

impl From<&str> for Query {
    fn from(query: &str) -> Self {
        Query::Single(query.to_string())
    }
}

impl From<String> for Query {
    fn from(query: String) -> Self {
        Query::Single(query)
    }
}

impl From<Vec<String>> for Query {
    fn from(queries: Vec<String>) -> Self {
        Query::Many(queries)
    }
}

impl From<&[&str]> for Query {
    fn from(queries: &[&str]) -> Self {
        Query::Many(queries.iter().map(|q| q.to_string()).collect())
    }
}

/// Data handed to every `analyze` call. Immutable once fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedData {
    /// Nothing could be fetched.
    NoData,
    /// Parsed body of a single query.
    Single(Value),
    /// Parsed bodies keyed by the query that produced them.
    Keyed(BTreeMap<String, Value>),
}

impl FetchedData {
    pub fn is_empty(&self) -> bool {
        matches!(self, FetchedData::NoData)
    }

    /// Body for `query` in a keyed result set.
    pub fn get(&self, query: &str) -> Option<&Value> {
        match self {
            FetchedData::Keyed(entries) => entries.get(query),
            _ => None,
        }
    }

    /// JSON view: `false` for no data, the body, or an object keyed by query.
    pub fn to_value(&self) -> Value {
        match self {
            FetchedData::NoData => Value::Bool(false),
            FetchedData::Single(value) => value.clone(),
            FetchedData::Keyed(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

/// Run `query` against `source`.
///
/// With `concurrent` set, list queries are issued together; the result is
/// keyed by query either way.
pub async fn fetch_data<S>(source: &S, query: &Query, concurrent: bool) -> FetchedData
where
    S: DataSource + ?Sized,
{
    match query {
        Query::Single(q) => match source.fetch(q).await {
            Ok(body) => FetchedData::Single(body),
            Err(e) => {
                warn!("Failed to extract data with query={}: {}", q, e);
                FetchedData::NoData
            }
        },
        Query::Many(queries) => {
            let outcomes = if concurrent {
                join_all(
                    queries
                        .iter()
                        .map(|q| async move { (q, source.fetch(q).await) }),
                )
                .await
            } else {
                let mut outcomes = Vec::with_capacity(queries.len());
                for q in queries {
                    outcomes.push((q, source.fetch(q).await));
                }
                outcomes
            };

            let mut entries = BTreeMap::new();
            for (q, outcome) in outcomes {
                match outcome {
                    Ok(body) => {
                        entries.insert(q.clone(), body);
                    }
                    Err(e) => warn!("Failed to extract data with query={}: {}", q, e),
                }
            }
            debug!("Fetched {}/{} queries", entries.len(), queries.len());

            if entries.is_empty() {
                FetchedData::NoData
            } else {
                FetchedData::Keyed(entries)
            }
        }
    }
}

/// Data source backed by an in-memory table, keyed by query.
#[derive(Debug, Clone, Default)]
pub struct StaticDataSource {
    entries: BTreeMap<String, Value>,
}

impl StaticDataSource {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    /// Queries this source can answer.
    pub fn queries(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn fetch(&self, query: &str) -> Result<Value, FetchError> {
        self.entries
            .get(query)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                status: 404,
                url: query.to_string(),
            })
    }
}
