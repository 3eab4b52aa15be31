use super::{OptimaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Terminal operations of a bill upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Commit,
    Abort,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Commit => "commit",
            Operation::Abort => "abort",
        }
    }
}

/// Response to a bill upload start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(String),
    /// HTTP 429
    RateLimited,
    /// HTTP 409 with the raw error body naming the open bill upload
    Conflict(String),
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileUploadResponse {
    pub id: String,
    pub status: String,
    pub bill_upload_id: String,
    pub md5: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    bill_connect_id: &'a str,
    billing_period: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct OperationRequest {
    operation: Operation,
}

/// The bill upload endpoints of the Optima API.
#[async_trait]
pub trait BillUploadApi: Send + Sync {
    async fn start(&self, billing_period: &str) -> Result<StartOutcome>;

    async fn upload_file(&self, upload_id: &str, file_name: &str, body: Vec<u8>) -> Result<FileUploadResponse>;

    async fn operation(&self, upload_id: &str, operation: Operation) -> Result<()>;
}

/// Authenticated HTTP client for one organization and bill connect.
#[derive(Debug)]
pub struct OptimaClient {
    pub(super) client: reqwest::Client,
    pub(super) api_base_url: String,
    pub(super) org_id: String,
    bill_connect_id: String,
    pub(super) access_token: String,
}

impl OptimaClient {
    pub fn new(
        api_base_url: &str,
        org_id: &str,
        bill_connect_id: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            org_id: org_id.to_string(),
            bill_connect_id: bill_connect_id.to_string(),
            access_token,
        })
    }

    pub fn bill_connect_id(&self) -> &str {
        &self.bill_connect_id
    }

    fn bill_uploads_url(&self) -> String {
        format!("{}/optima/orgs/{}/billUploads", self.api_base_url, self.org_id)
    }

    async fn error_from(response: reqwest::Response) -> OptimaError {
        OptimaError::Status {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl BillUploadApi for OptimaClient {
    async fn start(&self, billing_period: &str) -> Result<StartOutcome> {
        let url = self.bill_uploads_url();
        let request = StartRequest {
            bill_connect_id: &self.bill_connect_id,
            billing_period,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Start bill upload");

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(StartOutcome::RateLimited);
        }
        if status == reqwest::StatusCode::CONFLICT {
            return Ok(StartOutcome::Conflict(response.text().await?));
        }
        if !status.is_success() {
            return Ok(StartOutcome::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.bytes().await?;
        let started: StartResponse = serde_json::from_slice(&body)?;
        Ok(StartOutcome::Started(started.id))
    }

    async fn upload_file(&self, upload_id: &str, file_name: &str, body: Vec<u8>) -> Result<FileUploadResponse> {
        let url = format!("{}/{}/files/{}", self.bill_uploads_url(), upload_id, file_name);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .body(body)
            .send()
            .await?;
        debug!(url = %url, status = response.status().as_u16(), "Upload file");

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn operation(&self, upload_id: &str, operation: Operation) -> Result<()> {
        let url = format!("{}/{}/operations", self.bill_uploads_url(), upload_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&OperationRequest { operation })
            .send()
            .await?;
        debug!(url = %url, operation = operation.as_str(), status = response.status().as_u16(), "Bill upload operation");

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}
