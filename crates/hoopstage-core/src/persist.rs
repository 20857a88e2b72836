// Durable writes: every artifact goes to a sibling `.tmp` file which is
// flushed, synced and renamed over the target, so readers of the current file
// never observe a partial write.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Temporary sibling used while `path` is being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `path` atomically. `write` fills a buffered handle on the temporary
/// file; on any failure the temporary file is removed and the target is left
/// untouched.
pub fn write_atomic<F, E>(path: &Path, write: F) -> Result<(), PersistError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
    E: fmt::Display,
{
    let io_err = |source: io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    let result = (|| {
        let file = File::create(&tmp).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        write(&mut out).map_err(|e| PersistError::Encode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        out.flush().map_err(io_err)?;
        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Atomically replace `path` with `bytes`.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    write_atomic(path, |out| out.write_all(bytes))
}
