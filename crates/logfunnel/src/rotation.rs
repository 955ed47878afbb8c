//! Rotating file handler combining size and time triggers.
//!
//! This module provides:
//! - [`RotatingFileHandler`] — A single-file sink that rolls over when the
//!   file would grow past `max_bytes` or when the schedule boundary passes
//! - Numbered backups (`name.log.1` newest) trimmed to `backup_count`
//! - A process-wide claim table so one path has at most one open handler

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{FileMode, HandlerPolicy, RolloverWhen};
use crate::error::{FunnelError, Result};
use crate::traits::RecordHandler;
use crate::types::{LogLevel, LogRecord};

/// Permission mode for created log directories.
pub const LOG_DIR_MODE: u32 = 0o755;

static CLAIMED_PATHS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a log file path, released on drop.
#[derive(Debug)]
struct PathClaim(PathBuf);

impl PathClaim {
    fn acquire(path: &Path) -> Result<Self> {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut claimed = CLAIMED_PATHS.lock();
        if !claimed.insert(key.clone()) {
            return Err(FunnelError::PathInUse(path.to_path_buf()));
        }
        Ok(Self(key))
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        CLAIMED_PATHS.lock().remove(&self.0);
    }
}

/// Creates a log directory and its parents with [`LOG_DIR_MODE`].
///
/// Succeeds if the directory already exists.
pub fn create_log_dir(dir: &Path) -> io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(LOG_DIR_MODE);
    }
    builder.create(dir)
}

/// Computes the first rollover boundary strictly after `now`.
#[must_use]
pub fn next_rollover(
    when: RolloverWhen,
    interval: u32,
    at_time: Option<NaiveTime>,
    utc: bool,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let interval = i64::from(interval.max(1));
    if let Some(unit) = when.unit() {
        let seconds = i64::try_from(unit.as_secs()).unwrap_or(i64::MAX / interval);
        return now + Duration::seconds(seconds * interval);
    }

    let at = at_time.unwrap_or_default();
    let local_now: NaiveDateTime = if utc {
        now.naive_utc()
    } else {
        now.with_timezone(&Local).naive_local()
    };

    let mut candidate = local_now.date().and_time(at);
    match when {
        RolloverWhen::Weekday(day) => {
            let today = i64::from(local_now.weekday().num_days_from_monday());
            let days_ahead = (i64::from(day) - today).rem_euclid(7);
            candidate += Duration::days(days_ahead);
            if candidate <= local_now {
                candidate += Duration::days(7);
            }
            candidate += Duration::days(7 * (interval - 1));
        }
        _ => {
            if candidate <= local_now {
                candidate += Duration::days(1);
            }
            candidate += Duration::days(interval - 1);
        }
    }

    if utc {
        Utc.from_utc_datetime(&candidate)
    } else {
        Local
            .from_local_datetime(&candidate)
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&candidate), |dt| dt.with_timezone(&Utc))
    }
}

/// Mutable state of an open handler.
struct FileState {
    /// Open file, or `None` until the first write when delayed.
    file: Option<File>,
    /// Current size of the active file in bytes.
    size: u64,
    /// Next time-based rollover boundary.
    rollover_at: DateTime<Utc>,
    /// Number of rollovers performed.
    rotations: u64,
}

/// A file sink that rotates on size OR time, whichever fires first.
pub struct RotatingFileHandler {
    path: PathBuf,
    policy: HandlerPolicy,
    at_time: Option<NaiveTime>,
    min_level: LogLevel,
    clock: Arc<dyn Clock>,
    state: Mutex<FileState>,
    _claim: PathClaim,
}

impl std::fmt::Debug for RotatingFileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileHandler")
            .field("path", &self.path)
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl RotatingFileHandler {
    /// Creates a handler for `path`.
    ///
    /// Creates the parent directory, removes an existing file when the file
    /// mode is `w`, and opens the file unless the policy delays opening.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::PathInUse`] if another handler in this process
    /// holds the path, a configuration error for an invalid policy, or an
    /// I/O error if the directory or file cannot be created.
    pub fn open(
        path: impl Into<PathBuf>,
        policy: &HandlerPolicy,
        min_level: LogLevel,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.into();
        policy.validate()?;
        let at_time = policy.parsed_at_time()?;
        let claim = PathClaim::acquire(&path)?;

        if let Some(parent) = path.parent() {
            create_log_dir(parent)?;
        }
        if policy.file_mode == FileMode::Write {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed existing log file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let now = clock.now();
        let handler = Self {
            at_time,
            min_level,
            state: Mutex::new(FileState {
                file: None,
                size: file_len(&path),
                rollover_at: next_rollover(policy.when, policy.interval, at_time, policy.utc, now),
                rotations: 0,
            }),
            policy: policy.clone(),
            path,
            clock,
            _claim: claim,
        };

        if !handler.policy.delay {
            let mut state = handler.state.lock();
            handler.ensure_open(&mut state)?;
        }
        Ok(handler)
    }

    /// Returns the path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the `n`th backup (1 is newest).
    #[must_use]
    pub fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Returns the size of the active file in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.state.lock().size
    }

    /// Returns the next time-based rollover boundary.
    #[must_use]
    pub fn next_rollover(&self) -> DateTime<Utc> {
        self.state.lock().rollover_at
    }

    /// Returns the number of rollovers performed so far.
    #[must_use]
    pub fn rotation_count(&self) -> u64 {
        self.state.lock().rotations
    }

    /// Returns true if the active file is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Appends `formatted` and a newline, rotating first if needed.
    ///
    /// A line is never split between the old and the new file.
    ///
    /// # Errors
    ///
    /// Returns an error if the active file cannot be opened or written.
    pub fn write(&self, formatted: &str) -> Result<()> {
        let mut line = String::with_capacity(formatted.len() + 1);
        line.push_str(formatted);
        line.push('\n');
        let bytes = self.policy.encoding.encode(&line);
        let len = bytes.len() as u64;

        let now = self.clock.now();
        let mut state = self.state.lock();
        if self.should_rotate(&state, len, now) {
            self.rotate(&mut state, now);
        }

        self.ensure_open(&mut state)?;
        if let Some(file) = state.file.as_mut() {
            file.write_all(&bytes)?;
            file.flush()?;
        }
        state.size += len;
        Ok(())
    }

    fn should_rotate(&self, state: &FileState, len: u64, now: DateTime<Utc>) -> bool {
        let timed = now >= state.rollover_at;
        let sized = self.policy.max_bytes > 0
            && state.size > 0
            && state.size + len > self.policy.max_bytes;
        timed || sized
    }

    fn ensure_open(&self, state: &mut FileState) -> Result<()> {
        if state.file.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            state.size = file.metadata().map(|m| m.len()).unwrap_or(state.size);
            state.file = Some(file);
        }
        Ok(())
    }

    fn rotate(&self, state: &mut FileState, now: DateTime<Utc>) {
        if let Some(mut file) = state.file.take() {
            if let Err(e) = file.flush() {
                warn!(path = %self.path.display(), error = %e, "failed to flush before rollover");
            }
        }

        // With no backups the rollover only reopens the same file.
        if self.policy.backup_count > 0 {
            self.archive(self.policy.backup_count);
        }

        state.size = file_len(&self.path);
        if now >= state.rollover_at {
            state.rollover_at = next_rollover(
                self.policy.when,
                self.policy.interval,
                self.at_time,
                self.policy.utc,
                now,
            );
        }
        state.rotations += 1;
        debug!(path = %self.path.display(), rotations = state.rotations, "rolled over log file");
    }

    fn archive(&self, keep: usize) {
        let mut highest = 0;
        while self.backup_path(highest + 1).exists() {
            highest += 1;
        }

        // Backups at index >= keep would be pushed past the cap by the shift.
        while highest >= keep {
            let oldest = self.backup_path(highest);
            if let Err(e) = fs::remove_file(&oldest) {
                warn!(path = %oldest.display(), error = %e, "failed to delete old backup");
            }
            highest -= 1;
        }

        for n in (1..=highest).rev() {
            let from = self.backup_path(n);
            let to = self.backup_path(n + 1);
            if let Err(e) = fs::rename(&from, &to) {
                warn!(from = %from.display(), to = %to.display(), error = %e, "failed to shift backup");
            }
        }

        if self.path.exists() {
            let first = self.backup_path(1);
            if let Err(e) = fs::rename(&self.path, &first) {
                warn!(path = %self.path.display(), error = %e, "failed to archive log file");
            }
        }
    }
}

impl RecordHandler for RotatingFileHandler {
    fn handle(&self, _record: &LogRecord, formatted: &str) -> Result<()> {
        self.write(formatted)
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn flush(&self) -> Result<()> {
        if let Some(file) = self.state.lock().file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
