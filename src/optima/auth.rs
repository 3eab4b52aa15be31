use super::{OptimaError, Result};
use crate::config::OptimaConfig;
use serde::Deserialize;
use tracing::info;

/// How the access token is obtained.
#[derive(Clone)]
pub enum Credentials {
    RefreshToken(String),
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::RefreshToken(_) => f.write_str("RefreshToken(..)"),
            Credentials::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// A refresh token takes precedence over a service account.
    pub fn from_config(config: &OptimaConfig) -> Option<Self> {
        if let Some(token) = config.refresh_token() {
            return Some(Credentials::RefreshToken(token.to_string()));
        }

        match (config.client_id.as_deref(), config.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(Credentials::ClientCredentials {
                    client_id: id.to_string(),
                    client_secret: secret.to_string(),
                })
            }
            _ => None,
        }
    }

    fn grant_type(&self) -> &'static str {
        match self {
            Credentials::RefreshToken(_) => "refresh_token",
            Credentials::ClientCredentials { .. } => "client_credentials",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Exchanges the credentials for a bearer token at the OIDC token endpoint.
pub async fn access_token(client: &reqwest::Client, token_url: &str, credentials: &Credentials) -> Result<String> {
    let form: Vec<(&str, &str)> = match credentials {
        Credentials::RefreshToken(token) => vec![
            ("grant_type", credentials.grant_type()),
            ("refresh_token", token.as_str()),
        ],
        Credentials::ClientCredentials {
            client_id,
            client_secret,
        } => vec![
            ("grant_type", credentials.grant_type()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ],
    };

    let response = client.post(token_url).form(&form).send().await?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(OptimaError::Status {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }

    let body = response.bytes().await?;
    let token: TokenResponse = serde_json::from_slice(&body)?;
    if token.access_token.is_empty() {
        return Err(OptimaError::MissingAccessToken);
    }

    info!(grant_type = credentials.grant_type(), "Obtained Optima access token");
    Ok(token.access_token)
}
