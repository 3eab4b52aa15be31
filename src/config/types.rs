use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kubecost: KubecostConfig,
    pub optima: OptimaConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubecostConfig {
    /// Base URL of the Kubecost model API, e.g. `http://localhost:9090/model/`
    #[serde(default = "default_kubecost_base_url")]
    pub base_url: String,
    /// Base URL for `getConfigs`; falls back to `base_url` when unset
    #[serde(default)]
    pub config_base_url: Option<String>,
}

impl Default for KubecostConfig {
    fn default() -> Self {
        Self {
            base_url: default_kubecost_base_url(),
            config_base_url: None,
        }
    }
}

impl KubecostConfig {
    pub fn config_base_url(&self) -> &str {
        self.config_base_url.as_deref().unwrap_or(&self.base_url)
    }
}

fn default_kubecost_base_url() -> String {
    "http://localhost:9090/model/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimaConfig {
    pub org_id: String,
    pub bill_connect_id: String,
    #[serde(default)]
    pub shard: Shard,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Overrides the shard-derived OIDC token endpoint
    #[serde(default)]
    pub token_url: Option<String>,
    /// Overrides the shard-derived API host, e.g. `https://api.optima.flexeraeng.com`
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub create_bill_connect_if_not_exist: bool,
    #[serde(default = "default_vendor_name")]
    pub vendor_name: String,
    #[serde(default = "default_rate_limit_backoff", with = "humantime_serde")]
    pub rate_limit_backoff: Duration,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_vendor_name() -> String {
    "Kubecost".to_string()
}

fn default_rate_limit_backoff() -> Duration {
    Duration::from_secs(120)
}

fn default_max_conflict_retries() -> u32 {
    5
}

impl OptimaConfig {
    pub fn token_url(&self) -> String {
        match &self.token_url {
            Some(url) => url.clone(),
            None => format!("https://login.{}/oidc/token", self.shard.login_domain()),
        }
    }

    pub fn api_base_url(&self) -> String {
        match &self.api_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.shard.api_host()),
        }
    }

    /// Returns the refresh token if one is configured and non-empty
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Shard {
    #[default]
    Nam,
    Eu,
    Au,
}

impl Shard {
    pub fn login_domain(&self) -> &'static str {
        match self {
            Shard::Nam => "flexera.com",
            Shard::Eu => "flexera.eu",
            Shard::Au => "flexera.au",
        }
    }

    pub fn api_host(&self) -> &'static str {
        match self {
            Shard::Nam => "api.optima.flexeraeng.com",
            Shard::Eu => "api.optima-eu.flexeraeng.com",
            Shard::Au => "api.optima-apac.flexeraeng.com",
        }
    }
}

impl FromStr for Shard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NAM" => Ok(Shard::Nam),
            "EU" => Ok(Shard::Eu),
            "AU" => Ok(Shard::Au),
            _ => Err(format!("invalid shard '{}': expected one of NAM, EU, AU", s.trim())),
        }
    }
}

impl TryFrom<String> for Shard {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_share_namespaces")]
    pub share_namespaces: String,
    #[serde(default = "default_true")]
    pub idle: bool,
    #[serde(default)]
    pub idle_by_node: bool,
    #[serde(default)]
    pub share_idle: bool,
    #[serde(default = "default_true")]
    pub share_tenancy_costs: bool,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Delete files older than the mandatory saving period on startup
    #[serde(default = "default_true")]
    pub file_rotation: bool,
    #[serde(default)]
    pub include_previous_month: bool,
    #[serde(default = "default_max_file_rows")]
    pub max_file_rows: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Namespace labels take precedence over pod labels when merged
    #[serde(default)]
    pub override_pod_labels: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            aggregation: Aggregation::default(),
            share_namespaces: default_share_namespaces(),
            idle: true,
            idle_by_node: false,
            share_idle: false,
            share_tenancy_costs: true,
            multiplier: default_multiplier(),
            file_rotation: true,
            include_previous_month: false,
            max_file_rows: default_max_file_rows(),
            page_size: default_page_size(),
            default_currency: default_currency(),
            override_pod_labels: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/var/kubecost")
}

fn default_share_namespaces() -> String {
    "kube-system,cadvisor".to_string()
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_max_file_rows() -> usize {
    1_000_000
}

fn default_page_size() -> usize {
    500
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Kubecost aggregation level. Parsed case-insensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Aggregation {
    Namespace,
    Controller,
    #[default]
    Pod,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Namespace => "namespace",
            Aggregation::Controller => "controller",
            Aggregation::Pod => "pod",
        }
    }

    /// The `aggregate` query parameter sent to Kubecost
    pub fn query_value(&self) -> &'static str {
        match self {
            Aggregation::Namespace => "cluster,namespace",
            Aggregation::Controller => "cluster,namespace,controllerKind,controller",
            Aggregation::Pod => "cluster,namespace,controllerKind,controller,pod",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "namespace" => Ok(Aggregation::Namespace),
            "controller" => Ok(Aggregation::Controller),
            "pod" => Ok(Aggregation::Pod),
            other => Err(format!(
                "invalid aggregation '{}': expected one of namespace, controller, pod",
                other
            )),
        }
    }
}

impl TryFrom<String> for Aggregation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}
