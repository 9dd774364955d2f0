use std::fs::{self, File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::core::timestamp::unix_millis_now;
use crate::core::{StorageSink, StoredArtifact};
use crate::recorder::PARTIAL_SUFFIX;
use crate::ring::Snapshot;

/// Writes each snapshot as one file: the segment payloads concatenated in
/// order. The file is written under a hidden partial name, synced, then
/// renamed, so the final name only ever points at a complete artifact.
pub struct FsSink {
    base_dir: PathBuf,
    prefix: String,
    extension: String,
}

impl FsSink {
    pub fn new(base_dir: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // rec_<millis>.webm, with -N appended if that name is already taken.
    fn next_path(&self, millis: i64) -> PathBuf {
        let mut path = self
            .base_dir
            .join(format!("{}{}.{}", self.prefix, millis, self.extension));
        let mut suffix = 1;
        while path.exists() {
            path = self.base_dir.join(format!(
                "{}{}-{}.{}",
                self.prefix, millis, suffix, self.extension
            ));
            suffix += 1;
        }
        path
    }

    fn write_partial(partial: &Path, snapshot: &Snapshot) -> anyhow::Result<u64> {
        let file = File::create(partial)
            .with_context(|| format!("create {}", partial.display()))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for segment in snapshot {
            writer
                .write_all(segment.payload())
                .with_context(|| format!("write {}", partial.display()))?;
            written += segment.len() as u64;
        }
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("flush {}", partial.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", partial.display()))?;
        Ok(written)
    }
}

impl StorageSink for FsSink {
    fn name(&self) -> &str {
        "fs"
    }

    fn store(&mut self, snapshot: &Snapshot) -> anyhow::Result<StoredArtifact> {
        create_dir_all(&self.base_dir)
            .with_context(|| format!("create recordings dir {}", self.base_dir.display()))?;

        let path = self.next_path(unix_millis_now());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = self
            .base_dir
            .join(format!(".{}{}", file_name, PARTIAL_SUFFIX));

        let bytes = match Self::write_partial(&partial, snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(e).with_context(|| format!("rename into {}", path.display()));
        }

        log::info!("[fs_sink] new file {:?} ({} bytes)", path, bytes);
        Ok(StoredArtifact {
            location: path,
            segments: snapshot.len(),
            bytes,
        })
    }
}
