use crate::output::naming::{is_day_variant, parse_path};
use crate::window::{month_key, InvoiceWindow};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read output directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, InventoryError>;

/// What a startup reconciliation found on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub registered: usize,
    pub removed: usize,
}

/// Finalized files pending upload, grouped by invoice month (`YYYY-MM`).
///
/// Files stay recorded for the whole run; upload outcomes are tracked by the
/// upload manager, not by removing entries here.
#[derive(Debug, Default)]
pub struct FileInventory {
    months: BTreeMap<String, BTreeSet<PathBuf>>,
}

impl FileInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every output file in `dir` whose date is inside the invoice
    /// window. With `file_rotation` enabled, files outside the window that
    /// predate the retention floor are deleted.
    pub fn reconcile(
        &mut self,
        dir: &Path,
        window: &InvoiceWindow,
        file_rotation: bool,
    ) -> Result<ReconcileSummary> {
        for month in window.invoice_months() {
            self.months.entry(month.clone()).or_default();
        }

        let entries = fs::read_dir(dir).map_err(|source| InventoryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut summary = ReconcileSummary::default();

        for entry in entries {
            let entry = entry.map_err(|source| InventoryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;

            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }

            let path = entry.path();
            let Some(parsed) = parse_path(&path) else {
                continue;
            };

            if window.contains(parsed.date) {
                self.register(&month_key(parsed.date), path);
                summary.registered += 1;
            } else if file_rotation && !window.in_retention_period(parsed.date) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed file outside retention period");
                        summary.removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old file"),
                }
            }
        }

        info!(
            dir = %dir.display(),
            registered = summary.registered,
            removed = summary.removed,
            "Reconciled output directory"
        );

        Ok(summary)
    }

    pub fn register(&mut self, month: &str, path: PathBuf) {
        self.months.entry(month.to_string()).or_default().insert(path);
    }

    /// Removes every file registered for `day` except its base file.
    ///
    /// Called before a day is rewritten so that indexed files left by an
    /// earlier fetch of the same day cannot outlive fresher data. Returns the
    /// number of files dropped from the inventory.
    pub fn cleanup_old_files(&mut self, month: &str, day: NaiveDate) -> usize {
        let Some(files) = self.months.get_mut(month) else {
            return 0;
        };

        let stale: Vec<PathBuf> = files
            .iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| is_day_variant(n, day))
            })
            .cloned()
            .collect();

        for path in &stale {
            files.remove(path);
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale rotated file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale rotated file"),
            }
        }

        stale.len()
    }

    pub fn files(&self, month: &str) -> Option<&BTreeSet<PathBuf>> {
        self.months.get(month)
    }

    /// Months in ascending order with their files in sorted path order.
    pub fn months(&self) -> impl Iterator<Item = (&str, &BTreeSet<PathBuf>)> {
        self.months.iter().map(|(m, f)| (m.as_str(), f))
    }

    /// Number of distinct calendar days covered by the month's files.
    pub fn distinct_days(&self, month: &str) -> usize {
        self.months.get(month).map_or(0, |files| {
            files
                .iter()
                .filter_map(|p| parse_path(p))
                .map(|n| n.date)
                .collect::<BTreeSet<_>>()
                .len()
        })
    }

    pub fn total_files(&self) -> usize {
        self.months.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_reconcile_registers_removes_and_keeps() {
        let dir = TempDir::new().unwrap();
        // Invoice month 2024-03, retention floor 2024-02-01
        let window = InvoiceWindow::new(date("2024-03-10"), false);

        let in_window = touch(dir.path(), "kubecost-2024-03-01.csv.gz");
        let rotated = touch(dir.path(), "kubecost-2024-03-01-2.csv.gz");
        let retained = touch(dir.path(), "kubecost-2024-02-15.csv.gz");
        let expired = touch(dir.path(), "kubecost-2024-01-31.csv.gz");
        let temp = touch(dir.path(), "kubecost-2024-03-02.csv.gz.tmp");
        let foreign = touch(dir.path(), "notes.txt");

        let mut inventory = FileInventory::new();
        let summary = inventory.reconcile(dir.path(), &window, true).unwrap();

        assert_eq!(summary, ReconcileSummary { registered: 2, removed: 1 });
        let files = inventory.files("2024-03").unwrap();
        assert!(files.contains(&in_window));
        assert!(files.contains(&rotated));
        assert!(inventory.files("2024-02").is_none());

        assert!(retained.exists());
        assert!(!expired.exists());
        assert!(temp.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_reconcile_without_rotation_keeps_old_files() {
        let dir = TempDir::new().unwrap();
        let window = InvoiceWindow::new(date("2024-03-10"), false);
        let expired = touch(dir.path(), "kubecost-2023-06-01.csv.gz");

        let mut inventory = FileInventory::new();
        let summary = inventory.reconcile(dir.path(), &window, false).unwrap();

        assert_eq!(summary.removed, 0);
        assert!(expired.exists());
        // Invoice months are present even when empty
        assert_eq!(inventory.files("2024-03").map(BTreeSet::len), Some(0));
    }

    #[test]
    fn test_reconcile_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let window = InvoiceWindow::new(date("2024-03-10"), false);
        let mut inventory = FileInventory::new();
        let err = inventory
            .reconcile(&dir.path().join("missing"), &window, true)
            .unwrap_err();
        assert!(matches!(err, InventoryError::ReadDir { .. }));
    }

    #[test]
    fn test_cleanup_old_files_keeps_base_and_other_days() {
        let dir = TempDir::new().unwrap();
        let base = touch(dir.path(), "kubecost-2024-03-01.csv.gz");
        let second = touch(dir.path(), "kubecost-2024-03-01-2.csv.gz");
        let third = touch(dir.path(), "kubecost-2024-03-01-3.csv.gz");
        let other_day = touch(dir.path(), "kubecost-2024-03-02-2.csv.gz");

        let mut inventory = FileInventory::new();
        for path in [&base, &second, &third, &other_day] {
            inventory.register("2024-03", path.clone());
        }

        let removed = inventory.cleanup_old_files("2024-03", date("2024-03-01"));
        assert_eq!(removed, 2);

        let files = inventory.files("2024-03").unwrap();
        assert!(files.contains(&base));
        assert!(files.contains(&other_day));
        assert!(!files.contains(&second));
        assert!(base.exists());
        assert!(!second.exists());
        assert!(!third.exists());
        assert!(other_day.exists());
    }

    #[test]
    fn test_cleanup_removes_any_suffixed_variant_of_day() {
        let dir = TempDir::new().unwrap();
        let base = touch(dir.path(), "kubecost-2023-10-15.csv.gz");
        let rotated = touch(dir.path(), "kubecost-2023-10-15-2.csv.gz");
        let renamed = touch(dir.path(), "kubecost-2023-10-15-old.csv.gz");
        let previous = touch(dir.path(), "kubecost-2023-10-14.csv.gz");

        let mut inventory = FileInventory::new();
        for path in [&base, &rotated, &renamed, &previous] {
            inventory.register("2023-10", path.clone());
        }

        let removed = inventory.cleanup_old_files("2023-10", date("2023-10-15"));

        assert_eq!(removed, 2);
        let files: Vec<_> = inventory.files("2023-10").unwrap().iter().cloned().collect();
        assert_eq!(files, vec![previous, base]);
        assert!(!rotated.exists());
        assert!(!renamed.exists());
    }

    #[test]
    fn test_distinct_days_counts_rotated_files_once() {
        let mut inventory = FileInventory::new();
        inventory.register("2024-02", PathBuf::from("/d/kubecost-2024-02-01.csv.gz"));
        inventory.register("2024-02", PathBuf::from("/d/kubecost-2024-02-01-2.csv.gz"));
        inventory.register("2024-02", PathBuf::from("/d/kubecost-2024-02-02-2.csv.gz"));

        assert_eq!(inventory.distinct_days("2024-02"), 2);
        assert_eq!(inventory.distinct_days("2024-01"), 0);
        assert_eq!(inventory.total_files(), 3);
    }
}
