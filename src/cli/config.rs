use crate::config::generate::generate_starter_config;
use crate::config::{system_config_path, user_config_path};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("config file already exists at {0}; remove it first or use --stdout to print the config")]
    AlreadyExists(PathBuf),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes the starter config to stdout, or to the user config location
/// (falling back to the system location when its directory cannot be
/// created). Returns the path written, if any.
pub fn init(stdout: bool) -> Result<Option<PathBuf>, InitError> {
    let content = generate_starter_config();

    if stdout {
        print!("{}", content);
        return Ok(None);
    }

    let path = user_config_path()
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(e) => {
                    warn!(dir = %parent.display(), error = %e, "Could not create user config directory");
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(system_config_path);

    write_new(&path, &content)?;
    Ok(Some(path))
}

fn write_new(path: &Path, content: &str) -> Result<(), InitError> {
    if path.exists() {
        return Err(InitError::AlreadyExists(path.to_path_buf()));
    }

    let write_err = |source| InitError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, content).map_err(write_err)
}
