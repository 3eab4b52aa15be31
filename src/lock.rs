use crate::output::naming::is_temp_file;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LOCK_FILE_NAME: &str = ".kubecost-optima.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("another instance is running (lock held on {path})")]
    Held { path: PathBuf },

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Exclusive advisory lock over the output directory, held for the whole run.
///
/// Released on drop: the marker file is removed, then unlocked and closed.
#[derive(Debug)]
pub struct DirLock {
    file: Option<File>,
    path: PathBuf,
}

impl DirLock {
    /// Takes the lock without blocking. Fails if another process holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);

        for _ in 0..LOCK_ATTEMPTS {
            let mut file = open_marker(&path)?;
            try_flock(&file, &path)?;

            // The marker may have been unlinked between open and flock
            match locked_file_is_current(&file, &path) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(path = %path.display(), "Lock file replaced while locking, retrying");
                    continue;
                }
                Err(source) => return Err(LockError::Lock { path, source }),
            }

            if let Err(e) = write_pid(&mut file) {
                warn!(path = %path.display(), error = %e, "Failed to write pid to lock file");
            }

            info!(path = %path.display(), "Acquired directory lock");
            return Ok(Self {
                file: Some(file),
                path,
            });
        }

        Err(LockError::Held { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

const LOCK_ATTEMPTS: usize = 3;

fn open_marker(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn try_flock(file: &File, path: &Path) -> Result<()> {
    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }

    let source = io::Error::last_os_error();
    Err(if source.kind() == io::ErrorKind::WouldBlock {
        LockError::Held {
            path: path.to_path_buf(),
        }
    } else {
        LockError::Lock {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// True when `path` still names the inode `file` has open.
fn locked_file_is_current(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        // Unlink before unlocking
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }

        // SAFETY: the descriptor is still owned by `file`
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(
                path = %self.path.display(),
                error = %io::Error::last_os_error(),
                "Failed to release directory lock"
            );
        }
        drop(file);

        debug!(path = %self.path.display(), "Released directory lock");
    }
}

/// Deletes `kubecost-*.csv.gz.tmp` files left behind by an interrupted run.
/// Must only be called while holding the [`DirLock`].
pub fn cleanup_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_temp_file(name) {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed leftover temp file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove leftover temp file"),
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "Cleaned up leftover temp files");
    }

    Ok(removed)
}
