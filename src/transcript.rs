//! Per-day conversation log

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDate};

use crate::{Error, Result};

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Roomey,
    Tool,
}

impl Speaker {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Roomey => "Roomey",
            Self::Tool => "Tool",
        }
    }
}

struct OpenLog {
    date: NaiveDate,
    writer: BufWriter<File>,
}

/// Appends `Speaker: text` lines to `<dir>/<YYYY-MM-DD>.txt`
///
/// The file rolls over when the local date changes.
pub struct TranscriptLog {
    dir: PathBuf,
    current: Mutex<Option<OpenLog>>,
}

impl TranscriptLog {
    /// Create a log under `dir`; the directory is created on first write
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `date`
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.txt", date.format("%Y-%m-%d")))
    }

    /// Append one line dated today
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub fn append(&self, speaker: Speaker, text: &str) -> Result<()> {
        self.append_on(Local::now().date_naive(), speaker, text)
    }

    /// Append one line to the file for `date`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub fn append_on(&self, date: NaiveDate, speaker: Speaker, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Config("transcript log poisoned".to_string()))?;

        if current.as_ref().is_none_or(|log| log.date != date) {
            if let Some(mut old) = current.take() {
                old.writer.flush()?;
            }
            std::fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(date))?;
            *current = Some(OpenLog {
                date,
                writer: BufWriter::new(file),
            });
        }

        if let Some(log) = current.as_mut() {
            writeln!(log.writer, "{}: {text}", speaker.label())?;
        }
        Ok(())
    }

    /// Flush buffered lines to disk
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn flush(&self) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Config("transcript log poisoned".to_string()))?;
        if let Some(log) = current.as_mut() {
            log.writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_land_in_per_day_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path().join("logs"));
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();

        log.append_on(day, Speaker::User, "turn on the lights").unwrap();
        log.append_on(day, Speaker::Roomey, "Done.").unwrap();
        log.append_on(day, Speaker::Tool, "   ").unwrap();
        log.flush().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("logs/2025-03-14.txt")).unwrap();
        assert_eq!(contents, "User: turn on the lights\nRoomey: Done.\n");
    }

    #[test]
    fn rolls_over_on_new_date() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        let first = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let second = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();

        log.append_on(first, Speaker::User, "one").unwrap();
        log.append_on(second, Speaker::User, "two").unwrap();
        log.flush().unwrap();

        assert_eq!(std::fs::read_to_string(log.path_for(first)).unwrap(), "User: one\n");
        assert_eq!(std::fs::read_to_string(log.path_for(second)).unwrap(), "User: two\n");
    }
}
