//! Logger configuration snapshots.
//!
//! [`LoggerInfo`] is created once by the collecting side, serialized and
//! handed to every producer so that both ends agree on levels, formats,
//! rotation policy and transport endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{FunnelError, Result};
use crate::format::LevelFormatter;
use crate::types::{LogLevel, RoutingField};

/// Default time to wait for the aggregation worker to become ready.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// How an existing log file is treated when its handler is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    /// Append to an existing file.
    #[default]
    #[serde(rename = "a")]
    Append,
    /// Remove an existing file and start fresh.
    #[serde(rename = "w")]
    Write,
}

/// Text encoding applied to formatted records before they hit disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// ASCII only; other characters are replaced with `?`.
    #[default]
    #[serde(rename = "ascii")]
    Ascii,
    /// UTF-8, written as is.
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
}

impl Encoding {
    /// Encodes formatted text for writing.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// Time unit of the rollover schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RolloverWhen {
    /// Every `interval` seconds.
    Seconds,
    /// Every `interval` minutes.
    Minutes,
    /// Every `interval` hours.
    Hours,
    /// Every `interval` days.
    Days,
    /// At midnight (or `atTime`), every `interval` days.
    Midnight,
    /// On a weekday (0 = Monday), every `interval` weeks.
    Weekday(u8),
}

impl RolloverWhen {
    /// Returns the fixed period of one unit, if the schedule is not calendar based.
    #[must_use]
    pub const fn unit(&self) -> Option<Duration> {
        match self {
            Self::Seconds => Some(Duration::from_secs(1)),
            Self::Minutes => Some(Duration::from_secs(60)),
            Self::Hours => Some(Duration::from_secs(60 * 60)),
            Self::Days => Some(Duration::from_secs(24 * 60 * 60)),
            Self::Midnight | Self::Weekday(_) => None,
        }
    }
}

impl FromStr for RolloverWhen {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "S" => Ok(Self::Seconds),
            "M" => Ok(Self::Minutes),
            "H" => Ok(Self::Hours),
            "D" => Ok(Self::Days),
            "MIDNIGHT" => Ok(Self::Midnight),
            _ => {
                let day = upper
                    .strip_prefix('W')
                    .and_then(|d| d.parse::<u8>().ok())
                    .filter(|d| *d <= 6);
                day.map(Self::Weekday).ok_or_else(|| {
                    FunnelError::Config(format!(
                        "invalid rollover 'when' value '{s}': expected S, M, H, D, MIDNIGHT or W0-W6"
                    ))
                })
            }
        }
    }
}

impl TryFrom<String> for RolloverWhen {
    type Error = FunnelError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RolloverWhen> for String {
    fn from(when: RolloverWhen) -> Self {
        when.to_string()
    }
}

impl fmt::Display for RolloverWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds => f.write_str("S"),
            Self::Minutes => f.write_str("M"),
            Self::Hours => f.write_str("H"),
            Self::Days => f.write_str("D"),
            Self::Midnight => f.write_str("MIDNIGHT"),
            Self::Weekday(day) => write!(f, "W{day}"),
        }
    }
}

/// Rotation and file policy shared by every file handler of a router.
///
/// Field names on the wire follow the `handler_kwargs` mapping that
/// producers already understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerPolicy {
    /// Append to or replace existing files.
    pub file_mode: FileMode,
    /// Optional prefix joined before the routing key.
    pub file_prefix: String,
    /// Optional suffix joined after the routing key.
    pub file_suffix: String,
    /// Size threshold in bytes; 0 disables size rotation.
    #[serde(rename = "maxBytes")]
    pub max_bytes: u64,
    /// Number of backups kept; 0 keeps every backup.
    #[serde(rename = "backupCount")]
    pub backup_count: usize,
    /// Encoding of formatted records.
    pub encoding: Encoding,
    /// Open files on first write instead of at creation.
    pub delay: bool,
    /// Unit of the rollover schedule.
    pub when: RolloverWhen,
    /// Multiplier of the rollover unit.
    pub interval: u32,
    /// Compute calendar boundaries in UTC instead of local time.
    pub utc: bool,
    /// Time of day for calendar rollovers, `HH:MM[:SS]`.
    #[serde(rename = "atTime")]
    pub at_time: Option<String>,
}

impl Default for HandlerPolicy {
    fn default() -> Self {
        Self {
            file_mode: FileMode::Append,
            file_prefix: String::new(),
            file_suffix: String::new(),
            max_bytes: 0,
            backup_count: 0,
            encoding: Encoding::Ascii,
            delay: false,
            when: RolloverWhen::Hours,
            interval: 1,
            utc: false,
            at_time: None,
        }
    }
}

impl HandlerPolicy {
    /// Sets the size threshold.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the number of kept backups.
    #[must_use]
    pub const fn with_backup_count(mut self, count: usize) -> Self {
        self.backup_count = count;
        self
    }

    /// Sets the rollover schedule.
    #[must_use]
    pub const fn with_rollover(mut self, when: RolloverWhen, interval: u32) -> Self {
        self.when = when;
        self.interval = interval;
        self
    }

    /// Sets the file prefix and suffix.
    #[must_use]
    pub fn with_affixes(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self.file_suffix = suffix.into();
        self
    }

    /// Sets the encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the file mode.
    #[must_use]
    pub const fn with_file_mode(mut self, mode: FileMode) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets whether files are opened lazily.
    #[must_use]
    pub const fn with_delay(mut self, delay: bool) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the calendar rollover time of day.
    #[must_use]
    pub fn with_at_time(mut self, at_time: impl Into<String>) -> Self {
        self.at_time = Some(at_time.into());
        self
    }

    /// Sets whether calendar boundaries use UTC.
    #[must_use]
    pub const fn with_utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Parses the configured rollover time of day.
    pub fn parsed_at_time(&self) -> Result<Option<NaiveTime>> {
        let Some(raw) = self.at_time.as_deref() else {
            return Ok(None);
        };
        ["%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(raw.trim(), fmt).ok())
            .map(Some)
            .ok_or_else(|| FunnelError::Config(format!("invalid atTime '{raw}': expected HH:MM[:SS]")))
    }

    /// Builds the file name for a routing key: `[<prefix>.]<key>[.<suffix>].log`.
    #[must_use]
    pub fn file_name(&self, key: &str) -> String {
        let mut name = String::new();
        if !self.file_prefix.is_empty() {
            name.push_str(&self.file_prefix);
            name.push('.');
        }
        name.push_str(key);
        if !self.file_suffix.is_empty() {
            name.push('.');
            name.push_str(&self.file_suffix);
        }
        name.push_str(".log");
        name
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(FunnelError::Config("interval must be at least 1".to_string()));
        }
        for (label, affix) in [("file_prefix", &self.file_prefix), ("file_suffix", &self.file_suffix)] {
            if affix.contains(['/', '\\']) {
                return Err(FunnelError::Config(format!(
                    "{label} must not contain path separators: '{affix}'"
                )));
            }
        }
        self.parsed_at_time()?;
        Ok(())
    }
}

/// Transport endpoint producers use to reach the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportEndpoint {
    /// In-process queue owned by the aggregator.
    #[default]
    Queue,
    /// TCP listener; port 0 picks a free port at startup.
    Tcp {
        /// Host to bind and connect to.
        host: String,
        /// Port to bind and connect to.
        port: u16,
    },
    /// Subprocess whose stdout carries newline-delimited records.
    Pipe {
        /// Program and arguments.
        command: Vec<String>,
    },
}

impl TransportEndpoint {
    /// Creates a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the `host:port` address of a TCP endpoint.
    #[must_use]
    pub fn tcp_address(&self) -> Option<String> {
        match self {
            Self::Tcp { host, port } => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

fn default_name() -> String {
    "logger".to_string()
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_server_host() -> String {
    "localhost".to_string()
}

fn default_logdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_separator() -> String {
    ".".to_string()
}

const fn default_startup_timeout_ms() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_MS
}

/// Serializable configuration snapshot shared by the collector and producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerInfo {
    /// Top-level logger name of the collector.
    #[serde(default = "default_name")]
    pub name: String,
    /// Minimum level accepted by the collector and producers.
    #[serde(default = "default_level")]
    pub logging_level: LogLevel,
    /// Templates keyed by level name, or `default`.
    #[serde(default)]
    pub level_formats: BTreeMap<String, String>,
    /// strftime pattern for `asctime`; millisecond default when absent.
    #[serde(default)]
    pub datefmt: Option<String>,
    /// File handler policy.
    #[serde(default)]
    pub handler_kwargs: HandlerPolicy,
    /// Host the collector runs on.
    #[serde(default = "default_server_host")]
    pub server_host: String,
    /// Endpoint producers deliver to.
    #[serde(default)]
    pub transport: TransportEndpoint,
    /// Directory log files are written to.
    #[serde(default = "default_logdir")]
    pub logdir: PathBuf,
    /// Record field routing keys are derived from.
    #[serde(default)]
    pub key: RoutingField,
    /// Separator of hierarchical keys.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Also route records to every ancestor key.
    #[serde(default)]
    pub consolidate: bool,
    /// Also print every record to stdout.
    #[serde(default)]
    pub console: bool,
    /// Bounded wait for worker readiness.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for LoggerInfo {
    fn default() -> Self {
        Self::new(default_name())
    }
}

impl LoggerInfo {
    /// Creates a configuration with the given top-level name and defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logging_level: default_level(),
            level_formats: BTreeMap::new(),
            datefmt: None,
            handler_kwargs: HandlerPolicy::default(),
            server_host: default_server_host(),
            transport: TransportEndpoint::Queue,
            logdir: default_logdir(),
            key: RoutingField::Name,
            separator: default_separator(),
            consolidate: false,
            console: false,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FunnelError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON.
    pub fn from_json(content: &str) -> Result<Self> {
        let info: Self = serde_json::from_str(content)
            .map_err(|e| FunnelError::Config(format!("invalid JSON: {e}")))?;
        info.validate()?;
        Ok(info)
    }

    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Sets the logging level.
    #[must_use]
    pub const fn with_level(mut self, level: LogLevel) -> Self {
        self.logging_level = level;
        self
    }

    /// Overrides the template of one level (or `default`).
    #[must_use]
    pub fn with_level_format(mut self, level: impl Into<String>, template: impl Into<String>) -> Self {
        self.level_formats.insert(level.into(), template.into());
        self
    }

    /// Sets the date format.
    #[must_use]
    pub fn with_datefmt(mut self, datefmt: impl Into<String>) -> Self {
        self.datefmt = Some(datefmt.into());
        self
    }

    /// Sets the handler policy.
    #[must_use]
    pub fn with_handler_policy(mut self, policy: HandlerPolicy) -> Self {
        self.handler_kwargs = policy;
        self
    }

    /// Sets the transport endpoint.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportEndpoint) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_logdir(mut self, logdir: impl Into<PathBuf>) -> Self {
        self.logdir = logdir.into();
        self
    }

    /// Sets the routing field.
    #[must_use]
    pub const fn with_key(mut self, key: RoutingField) -> Self {
        self.key = key;
        self
    }

    /// Sets the hierarchy separator.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Enables or disables consolidation.
    #[must_use]
    pub const fn with_consolidate(mut self, consolidate: bool) -> Self {
        self.consolidate = consolidate;
        self
    }

    /// Enables or disables the console handler.
    #[must_use]
    pub const fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Sets the readiness timeout.
    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Returns the readiness timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Builds the record formatter described by this configuration.
    pub fn formatter(&self) -> Result<LevelFormatter> {
        LevelFormatter::from_config(&self.level_formats, self.datefmt.clone())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FunnelError::Config("name cannot be empty".to_string()));
        }
        if self.separator.is_empty() {
            return Err(FunnelError::Config("separator cannot be empty".to_string()));
        }
        if self.startup_timeout_ms == 0 {
            return Err(FunnelError::Config(
                "startup_timeout_ms must be greater than 0".to_string(),
            ));
        }
        match &self.transport {
            TransportEndpoint::Tcp { host, .. } if host.is_empty() => {
                return Err(FunnelError::Config("tcp host cannot be empty".to_string()));
            }
            TransportEndpoint::Pipe { command } if command.is_empty() => {
                return Err(FunnelError::Config("pipe command cannot be empty".to_string()));
            }
            _ => {}
        }
        self.handler_kwargs.validate()?;
        self.formatter()?;
        Ok(())
    }
}
