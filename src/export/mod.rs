use crate::config::ExportConfig;
use crate::inventory::FileInventory;
use crate::kubecost::{allocation_rows, Allocation, AllocationSource, KubecostError, RowContext};
use crate::output::{FileWriter, WriterError, CSV_HEADERS};
use crate::window::{month_key, InvoiceWindow};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("allocation request failed: {0}")]
    Kubecost(#[from] KubecostError),

    #[error("file writer error: {0}")]
    Writer(#[from] WriterError),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Smallest page that can still tell a full page from a short one.
pub const MIN_PAGE_SIZE: usize = 2;

/// Result of exporting one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOutcome {
    /// Records were written into these finalized files
    Written { records: usize, files: Vec<PathBuf> },
    /// Kubecost had no data; files from earlier runs are left untouched
    Empty,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub empty: usize,
    pub failed: usize,
}

/// Pages through the allocation data of single days and streams the rows
/// into [`FileWriter`]s.
pub struct DayExporter<'a, S: AllocationSource> {
    source: &'a S,
    output_dir: PathBuf,
    page_size: usize,
    max_file_rows: usize,
    currency: String,
    config: &'a ExportConfig,
}

impl<'a, S: AllocationSource> DayExporter<'a, S> {
    pub fn new(source: &'a S, config: &'a ExportConfig, currency: impl Into<String>) -> Self {
        Self {
            source,
            output_dir: config.output_dir.clone(),
            page_size: config.page_size.max(MIN_PAGE_SIZE),
            max_file_rows: config.max_file_rows,
            currency: currency.into(),
            config,
        }
    }

    fn row_context(&self, day: NaiveDate) -> RowContext {
        RowContext {
            currency: self.currency.clone(),
            aggregation: self.config.aggregation,
            multiplier: self.config.multiplier,
            override_pod_labels: self.config.override_pod_labels,
            invoice_year_month: day.format("%Y%m").to_string(),
        }
    }

    /// Exports every day of the window in ascending order. A failing day is
    /// logged and skipped.
    pub async fn export_window(&self, window: &InvoiceWindow, inventory: &mut FileInventory) -> ExportSummary {
        let mut summary = ExportSummary::default();

        for day in window.days() {
            match self.export_day(day, inventory).await {
                Ok(DayOutcome::Written { records, files }) => {
                    info!(day = %day, records, files = files.len(), "Exported day");
                    summary.exported += 1;
                }
                Ok(DayOutcome::Empty) => {
                    info!(day = %day, "Kubecost has no data for day, skipping");
                    summary.empty += 1;
                }
                Err(e) => {
                    warn!(day = %day, error = %e, "Failed to export day, skipping");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Fetches all pages of `day`.
    ///
    /// Regular allocations are written as they arrive. Idle allocations are
    /// collected by key across pages, the last one seen winning, and written
    /// once the day is complete. The first record of the day removes rotated
    /// files left by an earlier fetch before anything new is written.
    pub async fn export_day(&self, day: NaiveDate, inventory: &mut FileInventory) -> Result<DayOutcome> {
        let month = month_key(day);
        let ctx = self.row_context(day);

        let mut writer: Option<FileWriter> = None;
        let mut idle: BTreeMap<String, Allocation> = BTreeMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut records = 0usize;
        let mut offset = 0usize;

        loop {
            let page = self
                .source
                .allocation_page(day, offset, self.page_size)
                .await?;
            let page_len = page.len();
            debug!(day = %day, offset, records = page_len, "Received allocation page");
            let mut new_keys = 0usize;

            for (key, allocation) in page {
                if !seen.insert(key.clone()) {
                    if allocation.is_idle(&key) {
                        idle.insert(key, allocation);
                    } else {
                        debug!(day = %day, key = %key, "Skipping repeated allocation");
                    }
                    continue;
                }
                new_keys += 1;

                if records == 0 {
                    let removed = inventory.cleanup_old_files(&month, day);
                    if removed > 0 {
                        info!(day = %day, removed, "Removed rotated files from an earlier fetch");
                    }
                }
                records += 1;

                if allocation.is_idle(&key) {
                    idle.insert(key, allocation);
                    continue;
                }

                let w = self.writer(&mut writer, day)?;
                for row in allocation_rows(&key, &allocation, &ctx) {
                    w.write_row(&row, inventory)?;
                }
            }

            // Idle sharing can add or remove one record from a full page
            if page_len == 0 || page_len + 1 < self.page_size {
                break;
            }
            if new_keys == 0 {
                warn!(day = %day, offset, "Allocation page repeated earlier records, stopping");
                break;
            }
            offset += self.page_size;
        }

        for (key, allocation) in &idle {
            let w = self.writer(&mut writer, day)?;
            for row in allocation_rows(key, allocation, &ctx) {
                w.write_row(&row, inventory)?;
            }
        }

        match writer {
            Some(w) => {
                let files = w.finish(inventory)?;
                Ok(DayOutcome::Written { records, files })
            }
            None => Ok(DayOutcome::Empty),
        }
    }

    fn writer<'w>(&self, slot: &'w mut Option<FileWriter>, day: NaiveDate) -> Result<&'w mut FileWriter> {
        if slot.is_none() {
            *slot = Some(FileWriter::create(
                &self.output_dir,
                day,
                &CSV_HEADERS,
                self.max_file_rows,
            )?);
        }
        match slot {
            Some(w) => Ok(w),
            None => Err(ExportError::Writer(WriterError::Closed)),
        }
    }
}
