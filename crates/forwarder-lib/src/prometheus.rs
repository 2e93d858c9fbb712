//! Range-query client for the metrics backend
//!
//! Issues Prometheus-style `query_range` requests and decodes the
//! label-keyed matrix responses into the [`Matrix`] result model that the
//! binder and aggregator consume. The [`RangeQuerier`] trait is the seam
//! the collection orchestrators depend on, so tests can substitute a
//! scripted backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// A single (timestamp, value) observation within a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub value: f64,
}

/// One time series from a range query: a label set plus its ordered samples.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

impl Series {
    /// Look up a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// The value of the chronologically last sample, truncated toward zero,
    /// or `default` when the series carries no samples in the window.
    pub fn last_value(&self, default: i64) -> i64 {
        self.samples.last().map(|s| s.value as i64).unwrap_or(default)
    }
}

/// The result matrix of a range query.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    pub series: Vec<Series>,
}

impl Matrix {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }
}

/// Time bounds and resolution for one range query.
#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

/// Errors surfaced by the range-query client.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("backend error ({error_type}): {message}")]
    Backend { error_type: String, message: String },

    #[error("unexpected result type {0:?}, expected \"matrix\"")]
    ResultType(String),

    #[error("unparseable sample value {value:?}")]
    Value { value: String },
}

/// Interface the collection orchestrators use to reach the metrics backend.
///
/// One best-effort attempt per query; retry policy is the caller's concern
/// (and deliberately absent here).
#[async_trait]
pub trait RangeQuerier: Send + Sync {
    async fn range_query(
        &self,
        expression: &str,
        range: &QueryRange,
    ) -> std::result::Result<Matrix, QueryError>;
}

// Wire format of the Prometheus HTTP API response envelope.

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RawSeries>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl RawSeries {
    fn into_series(self) -> std::result::Result<Series, QueryError> {
        let mut samples = Vec::with_capacity(self.values.len());
        for (ts, raw) in self.values {
            let value: f64 = raw
                .parse()
                .map_err(|_| QueryError::Value { value: raw.clone() })?;
            samples.push(Sample {
                timestamp: ts as i64,
                value,
            });
        }
        Ok(Series {
            labels: self.metric,
            samples,
        })
    }
}

/// HTTP client for a Prometheus-compatible backend.
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    /// Create a client for the given base address, e.g. `http://prom:9090`.
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid backend URL")?;

        Ok(Self { client, base_url })
    }

    fn decode(body: ApiResponse) -> std::result::Result<Matrix, QueryError> {
        if body.status != "success" {
            return Err(QueryError::Backend {
                error_type: body.error_type.unwrap_or_else(|| "unknown".into()),
                message: body.error.unwrap_or_default(),
            });
        }

        let data = match body.data {
            Some(data) => data,
            None => return Ok(Matrix::default()),
        };
        if data.result_type != "matrix" {
            return Err(QueryError::ResultType(data.result_type));
        }

        let series = data
            .result
            .into_iter()
            .map(RawSeries::into_series)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Matrix { series })
    }
}

#[async_trait]
impl RangeQuerier for PrometheusClient {
    async fn range_query(
        &self,
        expression: &str,
        range: &QueryRange,
    ) -> std::result::Result<Matrix, QueryError> {
        let mut url = self
            .base_url
            .join("api/v1/query_range")
            .map_err(|_| QueryError::Backend {
                error_type: "url".into(),
                message: "could not build query_range URL".into(),
            })?;

        url.query_pairs_mut()
            .append_pair("query", expression)
            .append_pair("start", &range.start.timestamp().to_string())
            .append_pair("end", &range.end.timestamp().to_string())
            .append_pair("step", &range.step.num_seconds().to_string());

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status { status, body });
        }

        let body: ApiResponse = response.json().await?;
        Self::decode(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decode_str(json: &str) -> std::result::Result<Matrix, QueryError> {
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        PrometheusClient::decode(body)
    }

    #[test]
    fn decodes_matrix_response() {
        let matrix = decode_str(
            r#"{
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [{
                        "metric": {"namespace": "ns1", "pod": "p1", "container": "c1"},
                        "values": [[1704103200, "100"], [1704103500, "250.7"]]
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(matrix.len(), 1);
        let series = &matrix.series[0];
        assert_eq!(series.label("namespace"), Some("ns1"));
        assert_eq!(series.samples.len(), 2);
        assert_eq!(series.samples[1].timestamp, 1704103500);
        assert_eq!(series.last_value(0), 250);
    }

    #[test]
    fn decodes_backend_error() {
        let err = decode_str(
            r#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#,
        )
        .unwrap_err();

        match err {
            QueryError::Backend { error_type, message } => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(message, "parse error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_matrix_result() {
        let err = decode_str(
            r#"{"status": "success", "data": {"resultType": "vector", "result": []}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::ResultType(t) if t == "vector"));
    }

    #[test]
    fn last_value_defaults_on_empty_series() {
        let series = Series::default();
        assert_eq!(series.last_value(0), 0);
        assert_eq!(series.last_value(-1), -1);
    }

    #[test]
    fn last_value_truncates_toward_zero() {
        let series = Series {
            labels: BTreeMap::new(),
            samples: vec![
                Sample { timestamp: 1, value: 99.0 },
                Sample { timestamp: 2, value: 250.9 },
            ],
        };
        assert_eq!(series.last_value(0), 250);

        let negative = Series {
            labels: BTreeMap::new(),
            samples: vec![Sample { timestamp: 1, value: -3.7 }],
        };
        assert_eq!(negative.last_value(0), -3);
    }

    #[tokio::test]
    async fn range_query_hits_query_range_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("query".into(), "up".into()),
                mockito::Matcher::UrlEncoded("step".into(), "300".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix","result":[
                    {"metric":{"node":"n1"},"values":[[1704103200,"1"]]}
                ]}}"#,
            )
            .create_async()
            .await;

        let client =
            PrometheusClient::new(&server.url(), std::time::Duration::from_secs(5)).unwrap();
        let range = QueryRange {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            step: Duration::minutes(5),
        };

        let matrix = client.range_query("up", &range).await.unwrap();
        mock.assert_async().await;
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.series[0].label("node"), Some("n1"));
    }

    #[tokio::test]
    async fn range_query_surfaces_http_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client =
            PrometheusClient::new(&server.url(), std::time::Duration::from_secs(5)).unwrap();
        let range = QueryRange {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            step: Duration::minutes(5),
        };

        let err = client.range_query("up", &range).await.unwrap_err();
        assert!(matches!(err, QueryError::Status { status, .. } if status.as_u16() == 503));
    }
}
