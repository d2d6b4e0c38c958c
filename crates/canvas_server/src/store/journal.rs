//! Append-only JSON-lines journal backing [`MemoryStore`](super::MemoryStore).

use crate::error::{StoreError, StoreResult};
use crate::types::{Balance, Identity, Placement};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self as tokio_fs, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{error, info, instrument, warn};

/// One durable state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum JournalEntry {
    Account { identity: Identity, balance: Balance },
    Credit { keys: Vec<String>, delta: Balance },
    Placement { placement: Placement },
}

#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    /// Length of the well-formed prefix on disk.
    len: u64,
    /// Set when a failed write could not be truncated away.
    poisoned: bool,
    #[cfg(test)]
    pub(super) faults: Faults,
}

/// Write failures injected by tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(super) struct Faults {
    /// Write only this many bytes of the next entry, then fail.
    pub(super) tear_next: Option<usize>,
    /// Sleep before every write.
    pub(super) stall: Option<std::time::Duration>,
}

impl Journal {
    /// Opens (or creates) the journal and returns every entry already in it,
    /// paired with its 1-based line number.
    ///
    /// A trailing line without a newline is a write torn by a crash; it is
    /// discarded and truncated away. Any other unreadable line is an error.
    #[instrument]
    pub(crate) async fn open(path: &Path) -> StoreResult<(Self, Vec<(usize, JournalEntry)>)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio_fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Journal(parent.to_path_buf(), e))?;
        }

        let content = match tokio_fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StoreError::Journal(path.to_path_buf(), e)),
        };

        let valid_len = content.rfind('\n').map_or(0, |i| i + 1);
        let mut entries = Vec::new();
        for (index, line) in content[..valid_len].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                line: index + 1,
                reason: e.to_string(),
            })?;
            entries.push((index + 1, entry));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StoreError::Journal(path.to_path_buf(), e))?;

        if valid_len < content.len() {
            warn!(
                "Discarding torn tail of journal {} ({} bytes)",
                path.display(),
                content.len() - valid_len
            );
            file.set_len(valid_len as u64)
                .await
                .map_err(|e| StoreError::Journal(path.to_path_buf(), e))?;
        }

        info!("Opened journal {} with {} entries", path.display(), entries.len());
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                len: valid_len as u64,
                poisoned: false,
                #[cfg(test)]
                faults: Faults::default(),
            },
            entries,
        ))
    }

    /// Appends one entry and syncs it to disk. Returns the length of the
    /// journal before the entry, to [`rewind`](Self::rewind) to.
    ///
    /// A failed append is truncated away. If that fails as well the journal
    /// is poisoned and refuses every later write.
    pub(crate) async fn append(&mut self, entry: &JournalEntry) -> StoreResult<u64> {
        if self.poisoned {
            return Err(StoreError::Poisoned(self.path.clone()));
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mark = self.len;
        match self.write_line(line.as_bytes()).await {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(mark)
            }
            Err(e) => {
                warn!("Journal write to {} failed: {}", self.path.display(), e);
                self.rewind(mark).await?;
                Err(StoreError::Journal(self.path.clone(), e))
            }
        }
    }

    /// Truncates the journal back to `mark`, dropping every entry after it.
    pub(crate) async fn rewind(&mut self, mark: u64) -> StoreResult<()> {
        match self.truncate(mark).await {
            Ok(()) => {
                self.len = mark;
                Ok(())
            }
            Err(e) => {
                error!("Failed to truncate journal {}: {}", self.path.display(), e);
                self.poisoned = true;
                Err(StoreError::Poisoned(self.path.clone()))
            }
        }
    }

    async fn truncate(&self, len: u64) -> std::io::Result<()> {
        self.file.set_len(len).await?;
        self.file.sync_data().await
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        {
            if let Some(stall) = self.faults.stall {
                tokio::time::sleep(stall).await;
            }
            if let Some(written) = self.faults.tear_next.take() {
                self.file.write_all(&line[..written.min(line.len())]).await?;
                self.file.flush().await?;
                return Err(std::io::Error::other("no space left on device"));
            }
        }
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}
