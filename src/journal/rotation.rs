//! Daily journal files with age and count pruning.
//!
//! Files are named `backups-YYYY-MM-DD.log` (local date). Opening a writer
//! removes journal files older than [`MAX_JOURNAL_AGE_DAYS`] days or beyond
//! the newest [`MAX_JOURNAL_FILES`].

use chrono::Local;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum age (in days) of journal files to keep.
pub const MAX_JOURNAL_AGE_DAYS: u64 = 30;

/// Maximum number of journal files to keep.
pub const MAX_JOURNAL_FILES: usize = 5;

const PREFIX: &str = "backups-";
const SUFFIX: &str = ".log";

/// Appends to the journal file of the day it was opened.
///
/// [`RotatingFileWriter::roll_if_needed`] switches to a new file when the
/// local date changes.
pub struct RotatingFileWriter {
    dir: PathBuf,
    path: PathBuf,
    file: File,
}

impl RotatingFileWriter {
    /// Open (or create) today's journal in `dir`, pruning old files.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory cannot be created or the file
    /// cannot be opened.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        prune_old_journals(dir);

        let path = dir.join(today_filename());
        let file = open_append(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopen on today's file if the date changed since the last write.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the new file cannot be opened.
    pub fn roll_if_needed(&mut self) -> io::Result<()> {
        let path = self.dir.join(today_filename());
        if path != self.path {
            prune_old_journals(&self.dir);
            self.file = open_append(&path)?;
            self.path = path;
        }
        Ok(())
    }

    /// Append `text` followed by a newline and flush.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the write or flush fails.
    pub fn append_line(&mut self, text: &str) -> io::Result<()> {
        self.roll_if_needed()?;
        writeln!(self.file, "{text}")?;
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}

fn today_filename() -> String {
    format!("{PREFIX}{}{SUFFIX}", Local::now().format("%Y-%m-%d"))
}

fn prune_old_journals(dir: &Path) {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(MAX_JOURNAL_AGE_DAYS * 86_400))
        .unwrap_or(UNIX_EPOCH);
    prune_with_cutoff(dir, cutoff, MAX_JOURNAL_FILES);
}

fn prune_with_cutoff(dir: &Path, cutoff: SystemTime, max_files: usize) {
    let mut entries: Vec<(PathBuf, SystemTime)> = match fs::read_dir(dir) {
        Ok(listing) => listing
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?;
                if !(name.starts_with(PREFIX) && name.ends_with(SUFFIX)) {
                    return None;
                }
                let mtime = path.metadata().ok()?.modified().ok()?;
                Some((path, mtime))
            })
            .collect(),
        Err(_) => return,
    };

    // newest first
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    for (i, (path, mtime)) in entries.iter().enumerate() {
        if *mtime < cutoff || i >= max_files {
            if let Err(e) = fs::remove_file(path) {
                tracing::debug!("cannot prune journal {}: {e}", path.display());
            }
        }
    }
}
