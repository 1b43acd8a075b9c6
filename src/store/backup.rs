// src/store/backup.rs
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Destination for maintenance artifacts (backups, reports).
pub trait BackupSink: Send + Sync {
    /// Store `content` under `name`; returns where it ended up.
    fn store(&self, name: &str, content: &str) -> Result<PathBuf>;
}

/// `<prefix>_<unix-millis>.json`
pub fn timestamped_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{prefix}_{}.json", now.timestamp_millis())
}

/// Writes artifacts next to the data files.
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BackupSink for DirSink {
    fn store(&self, name: &str, content: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming to {}", path.display()))?;
        Ok(path)
    }
}

// --- Test helper ---
#[derive(Default)]
pub struct MockSink {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }
}

impl BackupSink for MockSink {
    fn store(&self, name: &str, content: &str) -> Result<PathBuf> {
        if let Ok(mut c) = self.calls.lock() {
            c.push((name.to_string(), content.to_string()));
        }
        Ok(PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_carry_millis() {
        let t = Utc.timestamp_millis_opt(1_760_000_000_123).unwrap();
        assert_eq!(timestamped_name("news_fix_backup", t), "news_fix_backup_1760000000123.json");
    }

    #[test]
    fn dir_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path());
        let p = sink.store("report_1.json", "{}").unwrap();
        assert_eq!(std::fs::read_to_string(p).unwrap(), "{}");
    }
}
