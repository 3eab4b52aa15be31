pub mod auth;
pub mod bill_connect;
pub mod client;
pub mod upload;

use thiserror::Error;

pub use auth::{access_token, Credentials};
pub use client::{BillUploadApi, FileUploadResponse, Operation, OptimaClient, StartOutcome};
pub use upload::{MonthOutcome, UploadError, UploadManager, UploadReport};

#[derive(Debug, Error)]
pub enum OptimaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode Optima response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Optima returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("token response did not contain an access token")]
    MissingAccessToken,

    #[error("no Optima credentials configured")]
    MissingCredentials,
}

pub type Result<T> = std::result::Result<T, OptimaError>;
