//! Size-based rotation for transport output files.
//!
//! When the active file exceeds the configured size it is renamed with a
//! numeric suffix (`metrics.json` → `metrics.json.1`, shifting existing
//! backups up) and a fresh file is opened. [`RotatingFile`] implements
//! `Write` so it drops straight into [`super::WriterTransport`] or
//! [`super::SplitWriterTransport`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Rotation behaviour.
#[derive(Debug, Clone)]
pub struct RotateConfig {
    /// Active file path (required).
    pub file_path: PathBuf,
    /// Rotate once the active file would exceed this size. Zero disables
    /// rotation and the file grows without bound.
    pub max_bytes: u64,
    /// Rotated files to keep. Zero keeps all of them.
    pub max_backups: usize,
}

/// A `Write` implementation that performs size-based rotation.
pub struct RotatingFile {
    cfg: RotateConfig,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    /// Opens (or creates) the active file.
    pub fn open(cfg: RotateConfig) -> Result<Self> {
        if cfg.file_path.as_os_str().is_empty() {
            return Err(Error::Config("rotate: file_path is required".into()));
        }
        if let Some(dir) = cfg.file_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut rf = Self {
            cfg,
            file: None,
            size: 0,
        };
        rf.open_active()?;
        Ok(rf)
    }

    fn open_active(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.file_path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Shifts backups up one number, renames the active file to `.1`, and
    /// opens a fresh one.
    fn rotate(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            drop(file);
        }

        let base = &self.cfg.file_path;
        let numbered = |n: usize| -> PathBuf {
            let mut name = base.as_os_str().to_owned();
            name.push(format!(".{n}"));
            PathBuf::from(name)
        };

        let limit = if self.cfg.max_backups > 0 {
            // The oldest slot is about to be shifted out.
            let _ = std::fs::remove_file(numbered(self.cfg.max_backups));
            self.cfg.max_backups
        } else {
            highest_backup(base)
        };

        for i in (1..=limit).rev() {
            let _ = std::fs::rename(numbered(i), numbered(i + 1));
        }
        if let Err(e) = std::fs::rename(base, numbered(1)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %base.display(), error = %e, "rotate: rename failed");
            }
        }

        if self.cfg.max_backups > 0 {
            self.prune();
        }

        info!(file = %base.display(), "rotated output file");
        self.size = 0;
        self.open_active()
    }

    fn prune(&self) {
        let base = &self.cfg.file_path;
        let mut i = self.cfg.max_backups + 1;
        loop {
            let mut name = base.as_os_str().to_owned();
            name.push(format!(".{i}"));
            let path = PathBuf::from(name);
            if std::fs::remove_file(&path).is_err() {
                break;
            }
            debug!(file = %path.display(), "pruned old backup");
            i += 1;
        }
    }
}

/// Highest numbered backup that currently exists.
fn highest_backup(base: &std::path::Path) -> usize {
    let mut max = 0;
    for i in 1.. {
        let mut name = base.as_os_str().to_owned();
        name.push(format!(".{i}"));
        if !PathBuf::from(name).exists() {
            break;
        }
        max = i;
    }
    max
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.cfg.max_bytes > 0 && self.size + buf.len() as u64 > self.cfg.max_bytes {
            if let Err(e) = self.rotate() {
                // Keep writing to the oversized file rather than lose data.
                warn!(error = %e, "rotate failed");
            }
        }

        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other("rotating file is closed"));
        };
        let n = file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
