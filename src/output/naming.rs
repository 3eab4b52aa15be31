//! Output file naming.
//!
//! Files follow the grammar `kubecost-<YYYY-MM-DD>[-<index>].csv.gz`. The
//! first file written for a day is the base file and carries no index;
//! rotated files are numbered from 2 upwards. While a file is being written
//! it lives under the same name with a `.tmp` suffix.

use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const FILE_PREFIX: &str = "kubecost-";
pub const FILE_EXTENSION: &str = ".csv.gz";
pub const TEMP_SUFFIX: &str = ".tmp";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Index of the base file of a day.
pub const BASE_INDEX: u32 = 1;

fn file_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^kubecost-(\d{4}-\d{2}-\d{2})(?:-(\d+))?\.csv\.gz$").expect("static regex")
    })
}

/// A file name successfully parsed against the output grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputName {
    pub date: NaiveDate,
    pub index: u32,
}

impl OutputName {
    pub fn is_base(&self) -> bool {
        self.index == BASE_INDEX
    }
}

/// Builds the file name for a day and rotation index.
pub fn file_name(date: NaiveDate, index: u32) -> String {
    if index <= BASE_INDEX {
        format!("{}{}{}", FILE_PREFIX, date.format(DATE_FORMAT), FILE_EXTENSION)
    } else {
        format!(
            "{}{}-{}{}",
            FILE_PREFIX,
            date.format(DATE_FORMAT),
            index,
            FILE_EXTENSION
        )
    }
}

/// Parses a finalized output file name.
///
/// Returns `None` for temp files, foreign files and names whose date is not
/// a real calendar day. A missing index means the base file (index 1).
pub fn parse_file_name(name: &str) -> Option<OutputName> {
    let caps = file_name_regex().captures(name)?;
    let date = NaiveDate::parse_from_str(&caps[1], DATE_FORMAT).ok()?;
    let index = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => BASE_INDEX,
    };
    Some(OutputName { date, index })
}

/// Parses the file name component of a path.
pub fn parse_path(path: &Path) -> Option<OutputName> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_file_name)
}

/// True for any finalized file of `date` other than its base file, whatever
/// follows the date (`kubecost-2024-01-02-3.csv.gz`, `kubecost-2024-01-02-old.csv.gz`).
pub fn is_day_variant(name: &str, date: NaiveDate) -> bool {
    let prefix = format!("{}{}-", FILE_PREFIX, date.format(DATE_FORMAT));
    name.len() > prefix.len() + FILE_EXTENSION.len()
        && name.starts_with(&prefix)
        && name.ends_with(FILE_EXTENSION)
}

/// True for leftover in-progress files (`kubecost-*.csv.gz.tmp`).
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(FILE_PREFIX) && name.ends_with(&format!("{}{}", FILE_EXTENSION, TEMP_SUFFIX))
}
