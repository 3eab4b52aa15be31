use super::types::{Allocation, AllocationResponse, ConfigsResponse};
use crate::config::{ExportConfig, KubecostConfig};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KubecostError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode Kubecost response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Kubecost returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Kubecost API returned code {code}: {message}")]
    Api { code: i64, message: String },
}

pub type Result<T> = std::result::Result<T, KubecostError>;

const WINDOW_FORMAT: &str = "%Y-%m-%dT00:00:00Z";

/// Source of paged allocation data for one day.
#[async_trait]
pub trait AllocationSource: Send + Sync {
    /// Fetches the allocations of `day` starting at `offset`, at most `limit`
    /// records, flattened into `(key, allocation)` pairs.
    async fn allocation_page(
        &self,
        day: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, Allocation)>>;
}

/// Query flags sent with every allocation request.
#[derive(Debug, Clone)]
struct AllocationQuery {
    aggregate: &'static str,
    idle: bool,
    idle_by_node: bool,
    share_idle: bool,
    share_namespaces: String,
    share_tenancy_costs: bool,
}

/// HTTP client for the Kubecost model API
#[derive(Debug)]
pub struct KubecostClient {
    base_url: String,
    config_base_url: String,
    client: reqwest::Client,
    query: AllocationQuery,
}

impl KubecostClient {
    pub fn new(kubecost: &KubecostConfig, export: &ExportConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: with_trailing_slash(&kubecost.base_url),
            config_base_url: with_trailing_slash(kubecost.config_base_url()),
            client,
            query: AllocationQuery {
                aggregate: export.aggregation.query_value(),
                idle: export.idle,
                idle_by_node: export.idle_by_node,
                share_idle: export.share_idle,
                share_namespaces: export.share_namespaces.clone(),
                share_tenancy_costs: export.share_tenancy_costs,
            },
        })
    }

    /// Fetches one page of the allocation query for a calendar day.
    pub async fn allocation(&self, day: NaiveDate, offset: usize, limit: usize) -> Result<AllocationResponse> {
        let url = format!("{}allocation", self.base_url);
        let next_day = day.checked_add_days(Days::new(1)).unwrap_or(day);
        let window = format!(
            "{},{}",
            day.format(WINDOW_FORMAT),
            next_day.format(WINDOW_FORMAT)
        );

        let q = &self.query;
        let params: [(&str, String); 12] = [
            ("window", window),
            ("aggregate", q.aggregate.to_string()),
            ("idle", q.idle.to_string()),
            ("idleByNode", q.idle_by_node.to_string()),
            ("shareIdle", q.share_idle.to_string()),
            ("shareNamespaces", q.share_namespaces.clone()),
            ("shareSplit", "weighted".to_string()),
            ("shareTenancyCosts", q.share_tenancy_costs.to_string()),
            ("step", "1d".to_string()),
            ("accumulate", "true".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];

        debug!(url = %url, day = %day, offset, limit, "Requesting allocation page");
        let response = self.client.get(&url).query(&params).send().await?;

        if !response.status().is_success() {
            return Err(KubecostError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.bytes().await?;
        let allocation: AllocationResponse = serde_json::from_slice(&body)?;

        if allocation.code != 200 {
            return Err(KubecostError::Api {
                code: allocation.code,
                message: allocation.message,
            });
        }

        Ok(allocation)
    }

    /// Currency configured in Kubecost, `None` when it reports none.
    pub async fn currency(&self) -> Result<Option<String>> {
        let url = format!("{}getConfigs", self.config_base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(KubecostError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.bytes().await?;
        let configs: ConfigsResponse = serde_json::from_slice(&body)?;

        Ok(configs
            .data
            .map(|d| d.currency_code)
            .filter(|c| !c.is_empty()))
    }
}

#[async_trait]
impl AllocationSource for KubecostClient {
    async fn allocation_page(
        &self,
        day: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, Allocation)>> {
        Ok(self.allocation(day, offset, limit).await?.into_records())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/model", addr)
    }

    fn kubecost_client(base_url: String) -> KubecostClient {
        let kubecost = KubecostConfig {
            base_url,
            config_base_url: None,
        };
        KubecostClient::new(&kubecost, &ExportConfig::default(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_allocation_sends_query() {
        let app = Router::new().route(
            "/model/allocation",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "code": 200,
                    "data": [{ "echo": { "name": "echo", "properties": { "labels": params } } }]
                }))
            }),
        );
        let client = kubecost_client(serve(app).await);
        let day = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();

        let records = client.allocation_page(day, 500, 250).await.unwrap();
        assert_eq!(records.len(), 1);

        let params = records[0].1.properties.labels.clone().unwrap();
        assert_eq!(params["window"], "2024-01-31T00:00:00Z,2024-02-01T00:00:00Z");
        assert_eq!(params["aggregate"], "cluster,namespace,controllerKind,controller,pod");
        assert_eq!(params["shareNamespaces"], "kube-system,cadvisor");
        assert_eq!(params["shareSplit"], "weighted");
        assert_eq!(params["idle"], "true");
        assert_eq!(params["step"], "1d");
        assert_eq!(params["accumulate"], "true");
        assert_eq!(params["offset"], "500");
        assert_eq!(params["limit"], "250");
    }

    #[tokio::test]
    async fn test_allocation_non_200_code_is_error() {
        let app = Router::new().route(
            "/model/allocation",
            get(|| async { Json(json!({"code": 500, "message": "boom"})) }),
        );
        let client = kubecost_client(serve(app).await);
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let err = client.allocation_page(day, 0, 10).await.unwrap_err();
        assert!(matches!(err, KubecostError::Api { code: 500, .. }));
    }

    #[tokio::test]
    async fn test_currency_and_fallback() {
        let app = Router::new().route(
            "/model/getConfigs",
            get(|| async { Json(json!({"data": {"currencyCode": "EUR"}})) }),
        );
        let client = kubecost_client(serve(app).await);
        assert_eq!(client.currency().await.unwrap().as_deref(), Some("EUR"));

        let app = Router::new().route(
            "/model/getConfigs",
            get(|| async { Json::<Value>(json!({"data": {"currencyCode": ""}})) }),
        );
        let client = kubecost_client(serve(app).await);
        assert_eq!(client.currency().await.unwrap(), None);
    }
}
