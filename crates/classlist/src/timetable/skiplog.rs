use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::types::CoursePair;

/// Tab-separated `<subject> <number>\t<reason>` lines, one per pair that was not saved.
#[derive(Debug)]
pub struct SkipLog {
    path: PathBuf,
    file: File,
}

impl SkipLog {
    /// Starts a fresh log, discarding entries from a previous run.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, pair: &CoursePair, reason: &str) {
        let line = format!("{}\t{}\n", pair, reason);
        if let Err(e) = self.file.write_all(line.as_bytes()).await {
            log::warn!("Could not write to {}: {e}", self.path.display());
            return;
        }
        if let Err(e) = self.file.flush().await {
            log::warn!("Could not flush {}: {e}", self.path.display());
        }
    }
}
