use std::fs;
use std::time::{Duration, SystemTime};

use crate::recorder::{Catalog, RetentionPolicy};

const SECS_PER_DAY: u64 = 24 * 3600;

/// Prunes saved replays by count and/or age.
pub struct FsRetention {
    catalog: Catalog,
    keep_last: Option<usize>,
    max_age: Option<Duration>,
}

impl FsRetention {
    pub fn new(catalog: Catalog, keep_last: Option<usize>, max_age_days: Option<u64>) -> Self {
        Self {
            catalog,
            keep_last,
            max_age: max_age_days.map(|d| Duration::from_secs(d.saturating_mul(SECS_PER_DAY))),
        }
    }
}

impl RetentionPolicy for FsRetention {
    fn run(&mut self, now: SystemTime) -> anyhow::Result<usize> {
        let recordings = self.catalog.list()?;
        let mut removed = 0;

        for (index, entry) in recordings.iter().enumerate() {
            let over_count = self.keep_last.is_some_and(|keep| index >= keep);
            let too_old = self.max_age.is_some_and(|max_age| {
                now.duration_since(entry.modified)
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            });
            if !over_count && !too_old {
                continue;
            }

            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    removed += 1;
                    log::info!("[retention] removed {:?}", entry.path);
                }
                Err(err) => log::warn!("[retention] failed {:?}: {}", entry.path, err),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn touch(dir: &Path, name: &str, age: Duration) {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_keep_last_removes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        for (i, age) in [50u64, 40, 30, 20, 10].iter().enumerate() {
            touch(dir.path(), &format!("rec_{}.webm", i), Duration::from_secs(*age));
        }

        let mut retention = FsRetention::new(Catalog::new(dir.path(), "webm"), Some(2), None);
        assert_eq!(retention.run(SystemTime::now()).unwrap(), 3);

        let left: Vec<_> = Catalog::new(dir.path(), "webm")
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(left, vec!["rec_4.webm", "rec_3.webm"]);
    }

    #[test]
    fn test_max_age_removes_stale() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rec_old.webm", Duration::from_secs(3 * 24 * 3600));
        touch(dir.path(), "rec_new.webm", Duration::from_secs(60));

        let mut retention = FsRetention::new(Catalog::new(dir.path(), "webm"), None, Some(2));
        assert_eq!(retention.run(SystemTime::now()).unwrap(), 1);
        assert!(dir.path().join("rec_new.webm").exists());
        assert!(!dir.path().join("rec_old.webm").exists());
    }

    #[test]
    fn test_huge_max_age_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rec_a.webm", Duration::from_secs(10 * 365 * 24 * 3600));

        let mut retention =
            FsRetention::new(Catalog::new(dir.path(), "webm"), None, Some(u64::MAX / 1000));
        assert_eq!(retention.run(SystemTime::now()).unwrap(), 0);
        assert!(dir.path().join("rec_a.webm").exists());
    }

    #[test]
    fn test_no_limits_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rec_a.webm", Duration::from_secs(1));

        let mut retention = FsRetention::new(Catalog::new(dir.path(), "webm"), None, None);
        assert_eq!(retention.run(SystemTime::now()).unwrap(), 0);
    }
}
