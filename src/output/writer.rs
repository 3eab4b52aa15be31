use super::naming::{file_name, BASE_INDEX, TEMP_SUFFIX};
use crate::inventory::FileInventory;
use crate::window::month_key;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const BUFFER_CAPACITY: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("failed to create temp file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("row has {actual} fields, expected {expected}")]
    RowShape { expected: usize, actual: usize },

    #[error("failed to close {path}: {}", close_summary(.errors))]
    Close { path: PathBuf, errors: Vec<String> },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file writer is already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WriterError>;

type CsvSink = csv::Writer<GzEncoder<BufWriter<File>>>;

/// Writes one day of rows as gzip-compressed CSV, rotating to a new file
/// whenever the current one holds `max_rows` data rows.
///
/// Each physical file is written under a `.tmp` name and only renamed to its
/// final name after every layer has been flushed and the file synced to disk.
/// Finalized files are registered in the inventory under the day's month. A
/// writer dropped before [`FileWriter::finish`] removes its temp file.
pub struct FileWriter {
    dir: PathBuf,
    date: NaiveDate,
    month: String,
    headers: Vec<String>,
    max_rows: usize,
    index: u32,
    path: PathBuf,
    temp_path: PathBuf,
    sink: Option<CsvSink>,
    rows: usize,
    finalized: Vec<PathBuf>,
}

impl FileWriter {
    /// Opens the base file for `date` in `dir` and writes the header row.
    pub fn create(dir: &Path, date: NaiveDate, headers: &[&str], max_rows: usize) -> Result<Self> {
        let mut writer = Self {
            dir: dir.to_path_buf(),
            date,
            month: month_key(date),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            max_rows: max_rows.max(1),
            index: BASE_INDEX,
            path: PathBuf::new(),
            temp_path: PathBuf::new(),
            sink: None,
            rows: 0,
            finalized: Vec::new(),
        };
        writer.open()?;
        Ok(writer)
    }

    fn open(&mut self) -> Result<()> {
        self.path = self.dir.join(file_name(self.date, self.index));
        self.temp_path = temp_path_for(&self.path);

        let file = File::create(&self.temp_path).map_err(|source| WriterError::Create {
            path: self.temp_path.clone(),
            source,
        })?;

        let buffered = BufWriter::with_capacity(BUFFER_CAPACITY, file);
        let encoder = GzEncoder::new(buffered, Compression::default());
        self.sink = Some(csv::Writer::from_writer(encoder));
        self.rows = 0;

        self.write_headers()
    }

    fn write_headers(&mut self) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(WriterError::Closed)?;
        sink.write_record(&self.headers)
            .map_err(|source| WriterError::Encode {
                path: self.temp_path.clone(),
                source,
            })
    }

    /// Writes one data row, rotating first if the current file is full.
    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S], inventory: &mut FileInventory) -> Result<()> {
        if row.len() != self.headers.len() {
            return Err(WriterError::RowShape {
                expected: self.headers.len(),
                actual: row.len(),
            });
        }

        if self.rows >= self.max_rows {
            self.rotate(inventory)?;
        }

        let sink = self.sink.as_mut().ok_or(WriterError::Closed)?;
        sink.write_record(row.iter().map(|f| f.as_ref()))
            .map_err(|source| WriterError::Encode {
                path: self.temp_path.clone(),
                source,
            })?;

        self.rows += 1;
        Ok(())
    }

    fn rotate(&mut self, inventory: &mut FileInventory) -> Result<()> {
        self.finalize(inventory)?;
        self.index += 1;
        self.open()
    }

    /// Finalizes the current file and returns every file this writer produced.
    pub fn finish(mut self, inventory: &mut FileInventory) -> Result<Vec<PathBuf>> {
        self.finalize(inventory)?;
        Ok(std::mem::take(&mut self.finalized))
    }

    fn finalize(&mut self, inventory: &mut FileInventory) -> Result<()> {
        let sink = self.sink.take().ok_or(WriterError::Closed)?;

        if let Err(errors) = close_sink(sink) {
            self.remove_temp();
            return Err(WriterError::Close {
                path: self.temp_path.clone(),
                errors,
            });
        }

        if self.rows == 0 {
            self.remove_temp();
            return Ok(());
        }

        if let Err(source) = fs::rename(&self.temp_path, &self.path) {
            self.remove_temp();
            return Err(WriterError::Rename {
                from: self.temp_path.clone(),
                to: self.path.clone(),
                source,
            });
        }

        info!(path = %self.path.display(), rows = self.rows, "Generated file");
        inventory.register(&self.month, self.path.clone());
        self.finalized.push(self.path.clone());
        Ok(())
    }

    fn remove_temp(&self) {
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.temp_path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            drop(sink);
            self.remove_temp();
        }
    }
}

/// Flushes and closes every layer in order, then syncs the file to disk.
/// The layers beneath a failing one are still flushed and synced, and every
/// error seen is returned.
fn close_sink(sink: CsvSink) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();

    match sink.into_inner() {
        Ok(mut encoder) => {
            if let Err(e) = encoder.try_finish() {
                errors.push(format!("gzip finish: {}", e));
            }
            close_file(encoder.get_mut(), &mut errors);
        }
        Err(e) => {
            errors.push(format!("csv flush: {}", e.error()));
            // The gzip stream is incomplete; only the file layers can be closed
            let mut sink = e.into_inner();
            close_file(sink.get_mut().get_mut(), &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn close_file(buffered: &mut BufWriter<File>, errors: &mut Vec<String>) {
    if let Err(e) = buffered.flush() {
        errors.push(format!("buffer flush: {}", e));
    }
    if let Err(e) = buffered.get_ref().sync_all() {
        errors.push(format!("fsync: {}", e));
    }
}

/// First close error, with a count of the others.
fn close_summary(errors: &[String]) -> String {
    match errors {
        [] => "unknown error".to_string(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(TEMP_SUFFIX);
    PathBuf::from(os)
}

/// Checks that a file is a complete, readable gzip stream.
pub fn validate_gzip(path: &Path) -> io::Result<()> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink())?;
    Ok(())
}
