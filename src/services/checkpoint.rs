use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::AppResult;

/// Append-only log of objects that were migrated successfully, one entry per line.
///
/// Only an optimisation for reruns: removing the file falls back to a full
/// re-list, which is still correct because every `put` is an upsert.
pub struct Checkpoint {
    path: PathBuf,
    done: HashSet<String>,
    file: File,
}

impl Checkpoint {
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        let done = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        tracing::info!("Checkpoint opened: path={}, completed={}", path.display(), done.len());
        Ok(Self { path, done, file })
    }

    /// `{transform}\t{source_bucket}\t{dest_bucket}\t{key}`, so one file can serve
    /// several sweeps without one skipping the other.
    pub fn entry(transform: &str, source_bucket: &str, dest_bucket: &str, key: &str) -> String {
        format!("{}\t{}\t{}\t{}", transform, source_bucket, dest_bucket, key)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.done.contains(entry)
    }

    pub async fn record(&mut self, entry: &str) -> AppResult<()> {
        // a newline inside a key would corrupt the log; such keys are just re-migrated
        if entry.contains('\n') || !self.done.insert(entry.to_string()) {
            return Ok(());
        }
        self.file.write_all(format!("{}\n", entry).as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
