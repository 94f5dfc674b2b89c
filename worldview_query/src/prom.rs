//! The metrics backend seam and its implementations.

use crate::config::PrometheusConfig;
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use worldview_core::model::Labels;
use worldview_core::timeseries::{from_values, NAN};
use worldview_core::{Context, Duration, MetricValues, Time, TimeSeries};

/// Evaluates a PromQL expression over `[from, to]` at `step`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromClient: Send + Sync {
    async fn query_range(&self, query: &str, from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>>;
}

pub type DynPromClient = Arc<dyn PromClient>;

/// Client for the Prometheus HTTP API.
pub struct HttpPromClient {
    url: String,
    config: PrometheusConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    result: Vec<ApiSeries>,
}

#[derive(Debug, Deserialize)]
struct ApiSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl HttpPromClient {
    pub fn new(config: &PrometheusConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .build()?;
        Ok(Self {
            url: format!("{}/api/v1/query_range", config.url.trim_end_matches('/')),
            config: config.clone(),
            http,
        })
    }
}

/// Converts a `query_range` response body into grid-aligned series.
///
/// A sample lands at index `(t - from) / step`; samples outside the grid are
/// dropped.
pub(crate) fn parse_response(body: &[u8], from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>> {
    let resp: ApiResponse = serde_json::from_slice(body)?;
    if resp.status != "success" {
        return Err(QueryError::Backend(resp.error));
    }
    let from = from.truncate(step);
    let to = to.truncate(step);
    let ctx = Context::new(from, to, step);
    let points = ctx.points_count();
    let mut res = Vec::new();
    for s in resp.data.map(|d| d.result).unwrap_or_default() {
        let mut data = vec![NAN; points];
        for (ts, v) in &s.values {
            let t = Time(*ts as i64);
            if t < from || t > to {
                continue;
            }
            let idx = ((t - from) / step) as usize;
            if idx < points {
                data[idx] = v.parse::<f32>().unwrap_or(NAN);
            }
        }
        res.push(MetricValues::new(s.metric, TimeSeries::from_data(from, step, data)));
    }
    Ok(res)
}

#[async_trait]
impl PromClient for HttpPromClient {
    async fn query_range(&self, query: &str, from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>> {
        let from = from.truncate(step);
        let to = to.truncate(step);
        let form = [
            ("query", query.to_string()),
            ("start", from.0.to_string()),
            ("end", to.0.to_string()),
            ("step", step.as_secs().to_string()),
        ];
        let mut req = self.http.post(&self.url).form(&form);
        for (k, v) in &self.config.custom_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(auth) = &self.config.basic_auth {
            req = req.basic_auth(&auth.user, Some(&auth.password));
        }
        debug!("query_range {} [{}, {}] step {}", query, from, to, step);
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() && !status.is_client_error() {
            return Err(QueryError::Backend(format!(
                "{}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        parse_response(&body, from, to, step)
    }
}

/// A fixture series: labels plus raw `(timestamp, value)` samples.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSeries {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub values: Vec<(i64, f32)>,
}

/// Serves fixture series from memory, keyed by the exact query text.
///
/// Samples are aligned to the requested grid; unknown queries return no
/// series.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticPromClient {
    series: BTreeMap<String, Vec<FixtureSeries>>,
}

impl StaticPromClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QueryError::Other(e.into()))?;
        Self::from_json(&content)
    }

    pub fn add(&mut self, query: &str, labels: &[(&str, &str)], values: Vec<(i64, f32)>) -> &mut Self {
        let labels = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.series
            .entry(query.to_string())
            .or_default()
            .push(FixtureSeries { labels, values });
        self
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

#[async_trait]
impl PromClient for StaticPromClient {
    async fn query_range(&self, query: &str, from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>> {
        let ctx = Context::new(from, to, step);
        let Some(series) = self.series.get(query) else {
            return Ok(Vec::new());
        };
        Ok(series
            .iter()
            .map(|s| {
                let raw: Vec<(Time, f32)> = s.values.iter().map(|(t, v)| (Time(*t), *v)).collect();
                MetricValues::new(s.labels.clone(), from_values(&ctx, &raw))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = br#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"job": "node", "instance": "a"}, "values": [[60, "1"], [120, "2.5"], [999, "7"]]},
                    {"metric": {"job": "node", "instance": "b"}, "values": [[90, "NaN"], [150, "+Inf"]]}
                ]
            }
        }"#;
        let res = parse_response(body, Time(60), Time(180), Duration(30)).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].label("instance"), "a");
        assert_eq!(res[0].values.len(), 5);
        assert_eq!(res[0].values.get(Time(60)), 1.0);
        assert_eq!(res[0].values.get(Time(120)), 2.5);
        assert!(res[0].values.get(Time(180)).is_nan());
        assert!(res[1].values.get(Time(90)).is_nan());
        assert!(res[1].values.get(Time(150)).is_infinite());
    }

    #[test]
    fn test_parse_error_response() {
        let body = br#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#;
        let err = parse_response(body, Time(0), Time(60), Duration(30)).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_static_client() {
        let client = StaticPromClient::from_json(
            r#"{"up": [{"labels": {"job": "pg"}, "values": [[0, 1.0], [30, 1.0], [60, 0.0]]}]}"#,
        )
        .unwrap();
        let res = client.query_range("up", Time(0), Time(60), Duration(30)).await.unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].values.data(), &[1.0, 1.0, 0.0]);
        assert!(client.query_range("down", Time(0), Time(60), Duration(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_client() {
        let mut mock = MockPromClient::new();
        mock.expect_query_range()
            .returning(|_, _, _, _| Err(QueryError::Backend("unavailable".into())));
        let res = mock.query_range("up", Time(0), Time(60), Duration(30)).await;
        assert!(matches!(res, Err(QueryError::Backend(_))));
    }
}
