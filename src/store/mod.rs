//! Durable JSON collections.
//!
//! Every store is a single JSON array rewritten as a whole. Writes go to a
//! sibling `*.tmp` file first and are renamed over the target, so a crash
//! mid-write leaves either the old or the new collection on disk.

pub mod backup;
pub mod queue;
pub mod results;

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub use queue::{QueueItem, WorkQueue};
pub use results::{ClassifiedItem, CompanyNewsStats, ResultStore};

/// Read a JSON array. A missing file is an empty collection; a corrupt file is an error.
pub fn read_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Write-to-temp-then-rename.
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("serializing collection")?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let v: Vec<u32> = read_collection(&dir.path().join("nope.json")).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested/items.json");
        write_atomic(&p, &vec![1u32, 2, 3]).unwrap();
        let back: Vec<u32> = read_collection(&p).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(!p.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.json");
        fs::write(&p, "[{oops").unwrap();
        assert!(read_collection::<u32>(&p).is_err());
    }
}
