//! File sink that rotates by size.
//!
//! When a write would grow the active file past `max_size`, the file is
//! renamed to `<stem>-<timestamp>.<ext>` next to it and a fresh one is
//! started. Only `max_backups` newest backups are retained, and the ones
//! older than `max_age` are removed regardless of the count.

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const MB: u64 = 1024 * 1024;

const DEFAULT_MAX_SIZE: u64 = 10 * MB;
const DEFAULT_MAX_BACKUPS: usize = 3;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(28 * 24 * 60 * 60);

/// Format of the timestamp in the names of rotated files
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

pub(crate) struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    max_age: Duration,

    /// Opened lazily on the first write
    active: Option<ActiveFile>,
}

struct ActiveFile {
    file: fs_err::File,
    size: u64,
}

struct Backup {
    path: PathBuf,
    rotated_at: NaiveDateTime,
    modified: SystemTime,
}

impl RotatingFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size: DEFAULT_MAX_SIZE,
            max_backups: DEFAULT_MAX_BACKUPS,
            max_age: DEFAULT_MAX_AGE,
            active: None,
        }
    }

    #[cfg(test)]
    fn with_limits(mut self, max_size: u64, max_backups: usize) -> Self {
        self.max_size = max_size;
        self.max_backups = max_backups;
        self
    }

    /// Flushes and releases the file handle
    pub(crate) fn close(&mut self) -> io::Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        active.file.flush()?;
        active.file.sync_all()
    }

    fn open(&self) -> io::Result<ActiveFile> {
        if let Some(dir) = self.dir() {
            fs_err::create_dir_all(dir)?;
        }

        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let size = file.metadata()?.len();

        Ok(ActiveFile { file, size })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.close()?;

        if self.path.exists() {
            fs_err::rename(&self.path, self.free_backup_path(Utc::now()))?;
        }

        self.remove_stale_backups()
    }

    /// Several rotations may happen within the same millisecond. The time is
    /// shifted forward until the name is free, so the backup stays parseable.
    fn free_backup_path(&self, mut time: DateTime<Utc>) -> PathBuf {
        loop {
            let path = self.backup_path(time);
            if !path.exists() {
                return path;
            }
            time += chrono::Duration::milliseconds(1);
        }
    }

    /// A backup that can't be removed doesn't prevent removing the rest of them
    fn remove_stale_backups(&self) -> io::Result<()> {
        let mut backups = self.backups()?;

        // Newest first
        backups.sort_by(|a, b| b.rotated_at.cmp(&a.rotated_at));

        let now = SystemTime::now();

        for (i, backup) in backups.into_iter().enumerate() {
            let expired = now
                .duration_since(backup.modified)
                .map_or(false, |age| age > self.max_age);

            if i < self.max_backups && !expired {
                continue;
            }

            // This is the sink of the logger itself, so stderr is the only
            // place left to report to
            if let Err(err) = fs_err::remove_file(&backup.path) {
                eprintln!("Failed to remove a stale log backup: {err}");
            }
        }

        Ok(())
    }

    fn backups(&self) -> io::Result<Vec<Backup>> {
        let (stem, ext) = self.name_parts();
        let prefix = format!("{stem}-");

        let mut backups = vec![];

        for entry in fs_err::read_dir(self.dir().unwrap_or(Path::new(".")))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            let Some(time) = name.strip_prefix(&prefix) else {
                continue;
            };
            let time = match &ext {
                Some(ext) => time.strip_suffix(ext.as_str()).and_then(|t| t.strip_suffix('.')),
                None => Some(time),
            };
            let Some(rotated_at) =
                time.and_then(|time| NaiveDateTime::parse_from_str(time, BACKUP_TIME_FORMAT).ok())
            else {
                continue;
            };

            backups.push(Backup {
                path: entry.path(),
                rotated_at,
                modified: entry.metadata()?.modified()?,
            });
        }

        Ok(backups)
    }

    fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let (stem, ext) = self.name_parts();
        let time = now.format(BACKUP_TIME_FORMAT);

        let name = match ext {
            Some(ext) => format!("{stem}-{time}.{ext}"),
            None => format!("{stem}-{time}"),
        };

        self.path.with_file_name(name)
    }

    fn name_parts(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let ext = self
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());

        (stem, ext)
    }

    fn dir(&self) -> Option<&Path> {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;

        let mut active = match self.active.take() {
            Some(active) => active,
            None => self.open()?,
        };

        if active.size > 0 && active.size + incoming > self.max_size {
            self.active = Some(active);
            self.rotate()?;
            active = self.open()?;
        }

        let result = active.file.write_all(buf);
        if result.is_ok() {
            active.size += incoming;
        }

        self.active = Some(active);

        result.map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.active {
            Some(active) => active.file.flush(),
            None => Ok(()),
        }
    }
}

/// Shared handle to a [`RotatingFile`]. Every write locks the file, so
/// lines written from different threads never interleave.
#[derive(Clone)]
pub(crate) struct FileSink(Arc<Mutex<RotatingFile>>);

impl FileSink {
    pub(crate) fn new(file: RotatingFile) -> Self {
        Self(Arc::new(Mutex::new(file)))
    }

    pub(crate) fn close(&self) -> io::Result<()> {
        self.0.lock().close()
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}
