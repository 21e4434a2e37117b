//! Prometheus-backed Capacity Oracle
//!
//! Reads the `lvm_vgs_total_free` gauge published by each node agent through
//! the Prometheus HTTP API (instant query).

use crate::domain::ports::{CapacityOracle, CapacityResult, NodeId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default query; `{node}` is replaced by the escaped node name
pub const DEFAULT_FREE_QUERY: &str = r#"lvm_vgs_total_free{node="{node}"}"#;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Prometheus oracle
#[derive(Debug, Clone)]
pub struct PrometheusOracleConfig {
    /// Base URL of the Prometheus server
    pub base_url: String,
    /// PromQL template with a `{node}` placeholder
    pub query_template: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for PrometheusOracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            query_template: DEFAULT_FREE_QUERY.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// API Response
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// `[unix_time, "value"]`
    value: (f64, String),
}

// =============================================================================
// Prometheus Oracle
// =============================================================================

/// Capacity oracle querying Prometheus
#[derive(Debug)]
pub struct PrometheusOracle {
    config: PrometheusOracleConfig,
    client: reqwest::Client,
}

impl PrometheusOracle {
    /// Create a new Prometheus oracle
    pub fn new(config: PrometheusOracleConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::Configuration("prometheus URL can not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    /// Render the PromQL expression for a node
    fn render_query(&self, node: &NodeId) -> String {
        let escaped = node.as_str().replace('\\', "\\\\").replace('"', "\\\"");
        self.config.query_template.replace("{node}", &escaped)
    }

    fn query_url(&self, query: &str) -> String {
        format!(
            "{}/api/v1/query?query={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        )
    }
}

/// Extract the free capacity from an instant-query response body
fn parse_free_capacity(node: &NodeId, body: &str) -> Result<CapacityResult> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| Error::PrometheusResponseParse(format!("invalid response body: {}", e)))?;

    if response.status != "success" {
        return Err(Error::Query(format!(
            "{}: {}",
            response.error_type.unwrap_or_else(|| "error".into()),
            response.error.unwrap_or_default()
        )));
    }

    let data = response
        .data
        .ok_or_else(|| Error::PrometheusResponseParse("response has no data".into()))?;
    if data.result_type != "vector" {
        return Err(Error::PrometheusResponseParse(format!(
            "invalid result type: {}",
            data.result_type
        )));
    }

    let samples: Vec<VectorSample> = serde_json::from_value(data.result)
        .map_err(|e| Error::PrometheusResponseParse(format!("invalid vector: {}", e)))?;
    let first = samples.first().ok_or_else(|| Error::NoCapacityData {
        node: node.to_string(),
    })?;

    let free: f64 = first.value.1.parse().map_err(|_| {
        Error::PrometheusResponseParse(format!("invalid sample value {:?}", first.value.1))
    })?;
    if !free.is_finite() || free < 0.0 {
        return Err(Error::PrometheusResponseParse(format!(
            "sample value {} is not a valid free capacity",
            free
        )));
    }

    debug!(
        node = %node,
        free_bytes = free,
        labels = ?first.metric,
        "Prometheus free capacity sample"
    );

    Ok(CapacityResult {
        node: node.clone(),
        free_bytes: free as i64,
    })
}

#[async_trait]
impl CapacityOracle for PrometheusOracle {
    async fn free_capacity(&self, node: &NodeId) -> Result<CapacityResult> {
        if node.is_empty() {
            return Err(Error::Query("node can not be empty".into()));
        }

        let query = self.render_query(node);
        let response = self.client.get(self.query_url(&query)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Prometheus reports query errors as JSON with a 4xx/5xx status
        if !status.is_success() && !body.trim_start().starts_with('{') {
            return Err(Error::Query(format!("prometheus returned HTTP {}", status)));
        }

        parse_free_capacity(node, &body)
    }

    fn mode(&self) -> &str {
        "prometheus"
    }
}
