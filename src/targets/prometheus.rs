//! Prometheus 实时查询后端：`GET /api/v1/query?query=pg_up`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::PrometheusSection;
use crate::targets::resolver::{PresenceSample, ResolveError, TelemetryBackend};

pub struct PrometheusBackend {
    base_url: String,
    query: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: std::collections::HashMap<String, String>,
}

impl PrometheusBackend {
    pub fn new(base_url: &str, query: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            query: query.to_string(),
            http,
        }
    }

    pub fn from_config(cfg: &PrometheusSection) -> Self {
        Self::new(&cfg.url, &cfg.presence_query, Duration::from_secs(cfg.timeout_secs.max(1)))
    }
}

fn samples_from(body: QueryResponse) -> Result<Vec<PresenceSample>, ResolveError> {
    if body.status != "success" {
        return Err(ResolveError::Status(body.status));
    }
    Ok(body
        .data
        .map(|d| d.result)
        .unwrap_or_default()
        .into_iter()
        .map(|mut s| PresenceSample {
            job: s.metric.remove("job"),
            instance: s.metric.remove("instance"),
        })
        .collect())
}

#[async_trait]
impl TelemetryBackend for PrometheusBackend {
    async fn presence(&self) -> Result<Vec<PresenceSample>, ResolveError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let body: QueryResponse = self
            .http
            .get(&url)
            .query(&[("query", self.query.as_str())])
            .send()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| ResolveError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?;
        samples_from(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector_response() {
        let body: QueryResponse = serde_json::from_str(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"__name__":"pg_up","instance":"db-07:9187","job":"pg"},"value":[1700000000,"1"]},
                {"metric":{"__name__":"pg_up","instance":"db-09:9187"},"value":[1700000000,"1"]}
            ]}}"#,
        )
        .unwrap();
        let samples = samples_from(body).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].job.as_deref(), Some("pg"));
        assert_eq!(samples[1].job, None);
    }

    #[test]
    fn test_error_status() {
        let body: QueryResponse =
            serde_json::from_str(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#).unwrap();
        assert!(matches!(samples_from(body), Err(ResolveError::Status(_))));
    }
}
