//! JSONL routing journal writer with daily file rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use super::{JournalEntry, RoutingJournal};
use crate::{AppError, Result};

/// The file currently being appended to.
struct OpenJournal {
    path: PathBuf,
    out: BufWriter<File>,
}

impl OpenJournal {
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open journal {}: {e}", path.display())))?;
        debug!(journal = %path.display(), "journal file opened");
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

/// Appends one JSON object per line to `<dir>/routing-YYYY-MM-DD.jsonl`.
///
/// The target file is derived from the current UTC date on every write, so
/// the first entry after midnight lands in a new file.
pub struct JsonlJournalWriter {
    dir: PathBuf,
    current: Mutex<Option<OpenJournal>>,
}

impl JsonlJournalWriter {
    /// Construct a writer that stores journals in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Io(format!(
                "failed to create journal directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// Path of the journal file for `date`.
    #[must_use]
    pub fn path_for(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("routing-{date}.jsonl"))
    }
}

impl RoutingJournal for JsonlJournalWriter {
    fn record(&self, entry: JournalEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize journal entry: {e}")))?;
        let target = Self::path_for(&self.dir, Utc::now().date_naive());

        let mut current = self
            .current
            .lock()
            .map_err(|_| AppError::Io("journal writer mutex poisoned".to_owned()))?;

        let journal = match current.take() {
            Some(open) if open.path == target => open,
            _ => OpenJournal::open(target)?,
        };
        let journal = current.insert(journal);

        journal.append(&line).map_err(|e| {
            warn!(journal = %journal.path.display(), "journal append failed: {e}");
            AppError::Io(format!("journal append failed: {e}"))
        })
    }
}
