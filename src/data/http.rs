//! HTTP data source.
//!
//! Issues `GET {base_url}/{project_id}/fhir/{query}` with `Connection: close`
//! per request.

use super::{DataSource, FetchError};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONNECTION};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Data source reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl HttpDataSource {
    /// Create a source for `project_id` under `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        })
    }

    /// URL queried for `query`.
    pub fn url_for(&self, query: &str) -> String {
        format!("{}/{}/fhir/{}", self.base_url, self.project_id, query)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(&self, query: &str) -> Result<Value, FetchError> {
        let url = self.url_for(query);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(CONNECTION, HeaderValue::from_static("close"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        response.json::<Value>().await.map_err(|e| FetchError::Parse {
            query: query.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{fetch_data, FetchedData, Query};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned responses by path; records every raw request.
    async fn serve(requests: Arc<Mutex<Vec<String>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let requests = requests.clone();
                tokio::spawn(async move {
                    let mut raw = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = socket.read(&mut buf).await.unwrap();
                        if n == 0 {
                            break;
                        }
                        raw.extend_from_slice(&buf[..n]);
                    }
                    let request = String::from_utf8_lossy(&raw).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                    requests.lock().push(request);

                    let (status, body) = match path.as_str() {
                        "/proj-1/fhir/Patient" => ("200 OK", r#"{"total": 12}"#),
                        "/proj-1/fhir/Observation" => ("200 OK", r#"{"entry": [{}, {}]}"#),
                        "/proj-1/fhir/Garbage" => ("200 OK", "not json"),
                        _ => ("500 Internal Server Error", "{}"),
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.ok();
                });
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_url_for() {
        let source =
            HttpDataSource::new("http://data.local/", "proj-1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url_for("Patient?_summary=count"),
            "http://data.local/proj-1/fhir/Patient?_summary=count"
        );
    }

    #[tokio::test]
    async fn test_fetch_success_and_connection_close() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = serve(requests.clone()).await;
        let source = HttpDataSource::new(base, "proj-1", Duration::from_secs(5)).unwrap();

        let body = source.fetch("Patient").await.unwrap();
        assert_eq!(body, json!({"total": 12}));

        let recorded = requests.lock().clone();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].to_lowercase().contains("connection: close"));
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = serve(requests).await;
        let source = HttpDataSource::new(base, "proj-1", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            source.fetch("Missing").await,
            Err(FetchError::Status { status: 500, .. })
        ));
        assert!(matches!(
            source.fetch("Garbage").await,
            Err(FetchError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_three_queries_one_failing() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = serve(requests).await;
        let source = HttpDataSource::new(base, "proj-1", Duration::from_secs(5)).unwrap();
        let query = Query::from(&["Patient", "Missing", "Observation"][..]);

        let data = fetch_data(&source, &query, true).await;

        let FetchedData::Keyed(entries) = data else {
            panic!("expected keyed data");
        };
        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec!["Observation".to_string(), "Patient".to_string()]
        );
    }
}
