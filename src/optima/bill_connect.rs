use super::client::OptimaClient;
use super::{OptimaError, Result};
use serde::Serialize;
use tracing::info;

/// Integration every Optima bill connect of this exporter belongs to.
pub const INTEGRATION_ID: &str = "cbi-oi-optima";

const BILL_CONNECT_PREFIX: &str = "cbi-oi-optima-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillConnectStatus {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBillConnect<'a> {
    bill_identifier: &'a str,
    integration_id: &'a str,
    name: &'a str,
    params: BillConnectParams<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BillConnectParams<'a> {
    display_name: &'a str,
    vendor_name: &'a str,
}

/// The bill identifier is the bill connect id without the integration prefix.
pub fn bill_identifier(bill_connect_id: &str) -> &str {
    bill_connect_id
        .strip_prefix(BILL_CONNECT_PREFIX)
        .unwrap_or(bill_connect_id)
}

impl OptimaClient {
    /// Creates the configured bill connect. An existing one (HTTP 409) is not
    /// an error.
    pub async fn ensure_bill_connect(&self, vendor_name: &str) -> Result<BillConnectStatus> {
        let url = format!(
            "{}/finops-onboarding/v1/orgs/{}/bill-connects/cbi",
            self.api_base_url, self.org_id
        );
        let request = CreateBillConnect {
            bill_identifier: bill_identifier(self.bill_connect_id()),
            integration_id: INTEGRATION_ID,
            name: vendor_name,
            params: BillConnectParams {
                display_name: vendor_name,
                vendor_name,
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::CONFLICT {
            info!(bill_connect_id = %self.bill_connect_id(), "Bill connect already exists");
            return Ok(BillConnectStatus::AlreadyExists);
        }
        if !status.is_success() {
            return Err(OptimaError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        info!(bill_connect_id = %self.bill_connect_id(), "Created bill connect");
        Ok(BillConnectStatus::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_bill_identifier_strips_prefix() {
        assert_eq!(bill_identifier("cbi-oi-optima-kubecost"), "kubecost");
        assert_eq!(bill_identifier("custom-id"), "custom-id");
    }

    async fn serve(status: StatusCode, seen: Arc<Mutex<Option<Value>>>) -> String {
        let app = Router::new().route(
            "/finops-onboarding/v1/orgs/:org/bill-connects/cbi",
            post(move |Path(org): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(org, "42");
                *seen.lock().unwrap() = Some(body);
                status
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> OptimaClient {
        OptimaClient::new(base, "42", "cbi-oi-optima-kubecost", "tok".into(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_bill_connect() {
        let seen = Arc::new(Mutex::new(None));
        let base = serve(StatusCode::CREATED, seen.clone()).await;

        let status = client(&base).ensure_bill_connect("Kubecost").await.unwrap();
        assert_eq!(status, BillConnectStatus::Created);

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["billIdentifier"], "kubecost");
        assert_eq!(body["integrationId"], "cbi-oi-optima");
        assert_eq!(body["params"]["vendorName"], "Kubecost");
        assert_eq!(body["params"]["displayName"], "Kubecost");
    }

    #[tokio::test]
    async fn test_existing_bill_connect_is_ok() {
        let base = serve(StatusCode::CONFLICT, Arc::default()).await;
        let status = client(&base).ensure_bill_connect("Kubecost").await.unwrap();
        assert_eq!(status, BillConnectStatus::AlreadyExists);
    }

    #[tokio::test]
    async fn test_bill_connect_failure() {
        let base = serve(StatusCode::FORBIDDEN, Arc::default()).await;
        let err = client(&base).ensure_bill_connect("Kubecost").await.unwrap_err();
        assert!(matches!(err, OptimaError::Status { status: 403, .. }));
    }
}
