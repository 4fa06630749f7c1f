//! Durable archive writes.
//!
//! Every persist writes the whole snapshot to a temp file in the target
//! directory and renames it over the archive. A reader therefore sees either
//! the previous complete archive or the new one, never a truncated file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::record::{archive_filename, MessageRecord};

/// Destination for archive snapshots.
pub trait ArchiveSink: Send + Sync {
    /// Replace the archive with `records` (already in archive order).
    fn persist(&self, records: &[MessageRecord]) -> Result<PathBuf>;

    /// Records currently in the archive. A missing archive is empty.
    fn load(&self) -> Result<Vec<MessageRecord>>;

    /// Where the archive lives.
    fn path(&self) -> &Path;
}

/// Pretty-printed JSON array on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sink for `label` inside `dir`, using the sanitized archive filename.
    pub fn for_label(dir: impl AsRef<Path>, label: &str) -> Self {
        Self::new(dir.as_ref().join(archive_filename(label)))
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.json".to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }

    fn persistence_error(&self, source: std::io::Error) -> ArchiveError {
        ArchiveError::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}

impl ArchiveSink for JsonFileSink {
    fn persist(&self, records: &[MessageRecord]) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.persistence_error(e))?;
        }

        let bytes = to_pretty_json(records)?;
        let tmp_path = self.temp_path();

        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.persistence_error(e));
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.persistence_error(e)
        })?;

        debug!(path = %self.path.display(), records = records.len(), "archive persisted");
        Ok(self.path.clone())
    }

    fn load(&self) -> Result<Vec<MessageRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Serialize with four-space indentation and a trailing newline.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}
