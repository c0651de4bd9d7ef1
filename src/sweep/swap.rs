//! Scoped replacement of the active configuration file.

use crate::error::{BatchError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Swaps an experiment's configuration into the active location for as
/// long as the guard lives.
///
/// On drop the previous state is restored: the backup is copied back if
/// one was taken, otherwise the swapped-in file is removed.
#[derive(Debug)]
pub struct ConfigSwap {
    active: PathBuf,
    backup: PathBuf,
    backed_up: bool,
    restored: bool,
}

impl ConfigSwap {
    /// Back up `active` (if present) to `backup` and copy `replacement` over it.
    pub fn apply(active: &Path, backup: &Path, replacement: &Path) -> Result<Self> {
        if !replacement.is_file() {
            return Err(BatchError::Precondition(format!(
                "experiment configuration '{}' does not exist",
                replacement.display()
            )));
        }

        let backed_up = if active.is_file() {
            info!(
                "Backing up {} to {}",
                active.display(),
                backup.display()
            );
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(active, backup)?;
            true
        } else {
            false
        };

        let mut swap = Self {
            active: active.to_path_buf(),
            backup: backup.to_path_buf(),
            backed_up,
            restored: false,
        };

        info!(
            "Copying {} to {}",
            replacement.display(),
            active.display()
        );
        if let Some(parent) = active.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::copy(replacement, active) {
            swap.restore_inner()?;
            return Err(e.into());
        }

        Ok(swap)
    }

    pub fn backed_up(&self) -> bool {
        self.backed_up
    }

    /// Restore now, reporting any failure. Dropping restores silently.
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        if self.backed_up {
            info!(
                "Restoring original configuration from {} to {}",
                self.backup.display(),
                self.active.display()
            );
            fs::copy(&self.backup, &self.active)?;
            fs::remove_file(&self.backup)?;
        } else if self.active.exists() {
            fs::remove_file(&self.active)?;
        }
        Ok(())
    }
}

impl Drop for ConfigSwap {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            error!(
                "Could not restore configuration {}: {}",
                self.active.display(),
                e
            );
        }
    }
}
