use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::recorder::PARTIAL_SUFFIX;

#[derive(Debug, Clone, Serialize)]
pub struct RecordingEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub modified: SystemTime,
    pub modified_local: String,
    pub bytes: u64,
}

/// Enumerates saved replays in the recordings directory, newest first.
pub struct Catalog {
    base_dir: PathBuf,
    extension: String,
}

impl Catalog {
    pub fn new(base_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            base_dir: base_dir.into(),
            extension: extension.to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn list(&self) -> anyhow::Result<Vec<RecordingEntry>> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("create recordings dir {}", self.base_dir.display()))?;

        let entries = fs::read_dir(&self.base_dir)
            .with_context(|| format!("read recordings dir {}", self.base_dir.display()))?;

        let mut recordings = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }

            // Files can vanish between read_dir and stat (retention, user).
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            recordings.push(RecordingEntry {
                name,
                path,
                modified,
                modified_local: DateTime::<Local>::from(modified)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                bytes: meta.len(),
            });
        }

        recordings.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(recordings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age: Duration) {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_list_newest_first_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rec_1.webm", Duration::from_secs(300));
        touch(dir.path(), "rec_2.webm", Duration::from_secs(10));
        touch(dir.path(), "rec_3.webm", Duration::from_secs(100));
        touch(dir.path(), "notes.txt", Duration::from_secs(1));
        touch(dir.path(), ".rec_4.webm.partial", Duration::from_secs(1));

        let catalog = Catalog::new(dir.path(), "webm");
        let names: Vec<_> = catalog.list().unwrap().into_iter().map(|r| r.name).collect();

        assert_eq!(names, vec!["rec_2.webm", "rec_3.webm", "rec_1.webm"]);
    }

    #[test]
    fn test_list_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ScreenRecorder");

        let catalog = Catalog::new(&missing, "webm");
        assert!(catalog.list().unwrap().is_empty());
        assert!(missing.is_dir());
    }
}
