//! Semaphore-gated file handoff.
//!
//! A pair is `<base>.<message_ext>` plus an empty `<base>.<semaphore_ext>`. Writers
//! finish the message file before the semaphore exists; readers only trust a
//! message file once its semaphore is present.

use crate::config::FileCommsConfig;
use crate::error::RelayError;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub base_name: String,
    pub message: PathBuf,
    pub semaphore: PathBuf,
}

/// Result of listing an inbound directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Complete pairs, sorted by base name.
    pub ready: Vec<FilePair>,
    /// Semaphores whose message file already sits in the archive: an archive move
    /// that was cut short. These pairs only need the move finished.
    pub interrupted: Vec<FilePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreProtocol {
    message_ext: String,
    semaphore_ext: String,
}

impl SemaphoreProtocol {
    pub fn new(message_ext: &str, semaphore_ext: &str) -> Self {
        Self {
            message_ext: message_ext.trim_start_matches('.').to_string(),
            semaphore_ext: semaphore_ext.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(cfg: &FileCommsConfig) -> Self {
        Self::new(&cfg.message_extension, &cfg.semaphore_extension)
    }

    pub fn pair(&self, dir: &Path, base_name: &str) -> FilePair {
        FilePair {
            base_name: base_name.to_string(),
            message: dir.join(format!("{base_name}.{}", self.message_ext)),
            semaphore: dir.join(format!("{base_name}.{}", self.semaphore_ext)),
        }
    }

    fn base_of_semaphore<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(&self.semaphore_ext)
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|base| !base.is_empty())
    }

    /// List complete pairs in `dir`.
    ///
    /// The whole directory is checked before anything is returned: a semaphore with
    /// no message file (and no archived message file) fails the scan with
    /// [`RelayError::OrphanedSemaphoreFile`].
    pub fn scan(&self, dir: &Path, archive: &Path) -> Result<ScanResult> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("list directory {}", dir.display()))?;

        let mut bases = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("list directory {}", dir.display()))?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if let Some(base) = self.base_of_semaphore(name) {
                bases.push(base.to_string());
            }
        }
        bases.sort();

        let mut result = ScanResult::default();
        for base in bases {
            let pair = self.pair(dir, &base);
            if pair.message.exists() {
                result.ready.push(pair);
                continue;
            }
            // archive_pair moves the message first, so a cut-short move leaves the
            // archived message without its archived semaphore.
            let archived = self.pair(archive, &base);
            if archived.message.exists() && !archived.semaphore.exists() {
                result.interrupted.push(pair);
                continue;
            }
            return Err(RelayError::OrphanedSemaphoreFile {
                semaphore: pair.semaphore,
                message: pair.message,
            }
            .into());
        }
        Ok(result)
    }

    /// Write a pair: the full message file first, then the semaphore.
    ///
    /// A ready pair with the same base name that the reader has not collected yet is
    /// never replaced; that is a [`RelayError::PairPending`]. A message file without a
    /// semaphore is an unfinished earlier write and is overwritten.
    pub fn write_pair(&self, dir: &Path, base_name: &str, contents: &[u8]) -> Result<FilePair> {
        validate_base_name(base_name)?;
        let pair = self.pair(dir, base_name);
        if pair.semaphore.exists() {
            return Err(RelayError::PairPending {
                semaphore: pair.semaphore,
            }
            .into());
        }

        let mut message = File::create(&pair.message)
            .with_context(|| format!("create message file {}", pair.message.display()))?;
        message
            .write_all(contents)
            .with_context(|| format!("write message file {}", pair.message.display()))?;
        message
            .sync_all()
            .with_context(|| format!("sync message file {}", pair.message.display()))?;
        drop(message);

        let semaphore = File::create(&pair.semaphore)
            .with_context(|| format!("create semaphore file {}", pair.semaphore.display()))?;
        semaphore
            .sync_all()
            .with_context(|| format!("sync semaphore file {}", pair.semaphore.display()))?;

        Ok(pair)
    }

    /// Move a pair into `archive_dir`, keeping its base name. Safe to repeat: parts
    /// that already moved are left alone.
    pub fn archive_pair(&self, pair: &FilePair, archive_dir: &Path) -> Result<FilePair> {
        let dest = self.pair(archive_dir, &pair.base_name);
        move_idempotent(&pair.message, &dest.message)?;
        move_idempotent(&pair.semaphore, &dest.semaphore)?;
        Ok(dest)
    }
}

fn move_idempotent(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() && to.exists() {
        return Ok(());
    }
    fs::rename(from, to)
        .with_context(|| format!("move {} -> {}", from.display(), to.display()))
}

/// Base names become file names, so they must stay inside their directory.
pub fn validate_base_name(name: &str) -> Result<(), RelayError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(RelayError::InvalidBaseName(name.to_string()));
    }
    Ok(())
}
