use crate::config::{load_config, Config, ConfigError};
use crate::export::{DayExporter, ExportSummary};
use crate::inventory::{FileInventory, InventoryError};
use crate::kubecost::{KubecostClient, KubecostError};
use crate::lock::{cleanup_temp_files, DirLock, LockError};
use crate::optima::{access_token, Credentials, MonthOutcome, OptimaClient, OptimaError, UploadManager, UploadReport};
use crate::window::InvoiceWindow;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "config not found; searched ~/.config/kubecost-optima/config.yml and /etc/kubecost-optima/config.yml. \
         Use --config <path> or run 'kubecost-optima config init'"
    )]
    ConfigNotFound,

    #[error("output directory {path} is not usable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("kubecost client error: {0}")]
    Kubecost(#[from] KubecostError),

    #[error("optima error: {0}")]
    Optima(#[from] OptimaError),

    #[error("bill upload failed for {}", .months.join(", "))]
    UploadFailed { months: Vec<String> },
}

/// What a run did.
#[derive(Debug)]
pub struct RunSummary {
    pub export: ExportSummary,
    pub upload: UploadReport,
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;

    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(&config_path)?;

    let today = chrono::Local::now().date_naive();
    let summary = run_with_config(&config, today).await?;

    if summary.upload.failed() {
        let months = summary
            .upload
            .months
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(m, _)| m.clone())
            .collect();
        return Err(RunError::UploadFailed { months });
    }

    Ok(())
}

/// Runs one export and upload cycle for the invoice window around `today`.
///
/// Fatal problems (output directory, lock, token, bill connect) return an
/// error before any file is written or removed. Failing days and months are
/// logged and reported in the summary.
pub async fn run_with_config(config: &Config, today: NaiveDate) -> Result<RunSummary, RunError> {
    let output_dir = &config.export.output_dir;
    std::fs::create_dir_all(output_dir).map_err(|source| RunError::OutputDir {
        path: output_dir.clone(),
        source,
    })?;

    let _lock = DirLock::acquire(output_dir)?;

    // The directory stays untouched when authentication fails
    let optima = connect_optima(config).await?;

    cleanup_temp_files(output_dir).map_err(|source| RunError::OutputDir {
        path: output_dir.clone(),
        source,
    })?;

    let window = InvoiceWindow::new(today, config.export.include_previous_month);
    info!(
        today = %today,
        months = ?window.invoice_months(),
        retention_floor = %window.retention_floor(),
        "Invoice window"
    );

    let mut inventory = FileInventory::new();
    inventory.reconcile(output_dir, &window, config.export.file_rotation)?;

    let kubecost = KubecostClient::new(&config.kubecost, &config.export, config.http.request_timeout)?;
    let currency = currency(&kubecost, &config.export.default_currency).await;

    let exporter = DayExporter::new(&kubecost, &config.export, currency);
    let export = exporter.export_window(&window, &mut inventory).await;

    let manager = UploadManager::new(
        &optima,
        config.optima.rate_limit_backoff,
        config.optima.max_conflict_retries,
    );
    let upload = manager.upload_all(&inventory, &window).await;

    log_summary(&export, &upload, output_dir);
    Ok(RunSummary { export, upload })
}

/// Obtains an access token and, when configured, makes sure the bill connect
/// exists.
async fn connect_optima(config: &Config) -> Result<OptimaClient, RunError> {
    let optima = &config.optima;
    let credentials = Credentials::from_config(optima).ok_or(OptimaError::MissingCredentials)?;

    let http = reqwest::Client::builder()
        .timeout(config.http.request_timeout)
        .build()
        .map_err(OptimaError::from)?;
    let token = access_token(&http, &optima.token_url(), &credentials).await?;

    let client = OptimaClient::new(
        &optima.api_base_url(),
        &optima.org_id,
        &optima.bill_connect_id,
        token,
        config.http.request_timeout,
    )?;

    if optima.create_bill_connect_if_not_exist {
        client.ensure_bill_connect(&optima.vendor_name).await?;
    }

    Ok(client)
}

async fn currency(kubecost: &KubecostClient, default: &str) -> String {
    match kubecost.currency().await {
        Ok(Some(currency)) => {
            info!(currency = %currency, "Using Kubecost currency");
            currency
        }
        Ok(None) => {
            info!(currency = %default, "Kubecost reports no currency, using default");
            default.to_string()
        }
        Err(e) => {
            warn!(error = %e, currency = %default, "Failed to read Kubecost currency, using default");
            default.to_string()
        }
    }
}

fn log_summary(export: &ExportSummary, upload: &UploadReport, output_dir: &Path) {
    let count = |f: fn(&MonthOutcome) -> bool| upload.months.iter().filter(|(_, o)| f(o)).count();

    info!(
        output_dir = %output_dir.display(),
        days_exported = export.exported,
        days_empty = export.empty,
        days_failed = export.failed,
        months_committed = count(|o| matches!(o, MonthOutcome::Committed { .. })),
        months_skipped = count(|o| matches!(o, MonthOutcome::Skipped { .. })),
        months_aborted = count(|o| matches!(o, MonthOutcome::Aborted { .. })),
        months_failed = count(|o| matches!(o, MonthOutcome::Failed { .. })),
        "Run finished"
    );
}
