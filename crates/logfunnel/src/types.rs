//! Core types for log aggregation.
//!
//! This module provides:
//! - [`LogLevel`] — Severity levels, ordered DEBUG < INFO < WARNING < ERROR < CRITICAL
//! - [`LogRecord`] — The unit of transport between producers and the collector
//! - [`RoutingField`] — Which record field a router splits into routing keys
//! - [`split_hierarchy`] — Right-to-left prefixes of a hierarchical key

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FunnelError, Result};
use crate::provenance;

/// Log severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "LevelRepr", into = "&'static str")]
pub enum LogLevel {
    /// Debugging information
    Debug = 10,
    /// General information
    Info = 20,
    /// Warning conditions
    Warning = 30,
    /// Error conditions
    Error = 40,
    /// Critical conditions
    Critical = 50,
}

/// Wire representation accepted for levels: a name or a numeric value.
#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Name(String),
    Number(u8),
}

impl TryFrom<LevelRepr> for LogLevel {
    type Error = FunnelError;

    fn try_from(repr: LevelRepr) -> Result<Self> {
        match repr {
            LevelRepr::Name(name) => name.parse(),
            LevelRepr::Number(value) => Self::from_number(value),
        }
    }
}

impl From<LogLevel> for &'static str {
    fn from(level: LogLevel) -> Self {
        level.as_str()
    }
}

impl LogLevel {
    /// All levels in ascending severity.
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// Returns true if this level is at least as severe as the given level.
    #[must_use]
    pub fn is_at_least(&self, level: Self) -> bool {
        *self >= level
    }

    /// Returns the canonical upper-case name of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Returns the numeric value of this level.
    #[must_use]
    pub const fn as_number(&self) -> u8 {
        *self as u8
    }

    /// Maps a numeric level to the closest level at or below it.
    ///
    /// Values below DEBUG are treated as DEBUG.
    pub fn from_number(value: u8) -> Result<Self> {
        match value {
            0..=19 => Ok(Self::Debug),
            20..=29 => Ok(Self::Info),
            30..=39 => Ok(Self::Warning),
            40..=49 => Ok(Self::Error),
            50..=59 => Ok(Self::Critical),
            _ => Err(FunnelError::Config(format!("unknown log level number: {value}"))),
        }
    }
}

impl FromStr for LogLevel {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" | "NOTSET" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" | "FATAL" => Ok(Self::Critical),
            other => other
                .parse::<u8>()
                .map_err(|_| FunnelError::Config(format!("unknown log level: {s}")))
                .and_then(Self::from_number),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record field used by a router to derive routing keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingField {
    /// The hierarchical logger name.
    #[default]
    #[serde(rename = "name")]
    Name,
    /// The emitting process name.
    #[serde(rename = "processName")]
    ProcessName,
    /// The emitting host.
    #[serde(rename = "host")]
    Host,
}

/// A structured log record.
///
/// Provenance and diagnostic fields are always present; empty strings and
/// zero mean "not provided by the producer".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was created by the producer
    pub timestamp: DateTime<Utc>,
    /// Severity level
    pub level: LogLevel,
    /// Dot-separated hierarchical logger name, never empty
    #[serde(alias = "name")]
    pub logger_name: String,
    /// Fully formatted message
    pub message: String,
    /// Name of the emitting process
    #[serde(default)]
    pub process_name: String,
    /// Id of the emitting process
    #[serde(default)]
    pub process_id: u32,
    /// Host the record was emitted on
    #[serde(default)]
    pub host: String,
    /// IP address of the emitting host
    #[serde(default)]
    pub ip: String,
    /// Module that emitted the record
    #[serde(default)]
    pub module: String,
    /// Function that emitted the record
    #[serde(default)]
    pub function: String,
    /// Source line that emitted the record
    #[serde(default)]
    pub line: u32,
}

impl LogRecord {
    /// Creates a new log record builder.
    #[must_use]
    pub fn builder() -> LogRecordBuilder {
        LogRecordBuilder::default()
    }

    /// Returns the value of the given routing field.
    #[must_use]
    pub fn routing_value(&self, field: RoutingField) -> &str {
        match field {
            RoutingField::Name => &self.logger_name,
            RoutingField::ProcessName => &self.process_name,
            RoutingField::Host => &self.host,
        }
    }

    /// Fills in host and IP when the producer did not.
    pub fn stamp_host(&mut self) {
        if self.host.is_empty() {
            self.host = provenance::hostname().to_string();
        }
        if self.ip.is_empty() {
            self.ip = provenance::ip_address().to_string();
        }
    }

    /// Encodes this record as a JSON payload.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a record from a JSON payload.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let record: Self = serde_json::from_slice(bytes)?;
        if record.logger_name.is_empty() {
            return Err(FunnelError::MissingField("logger_name"));
        }
        Ok(record)
    }
}

/// Builder for constructing log records.
///
/// Timestamp and process fields default to "now" and the current process.
#[derive(Debug, Default)]
pub struct LogRecordBuilder {
    timestamp: Option<DateTime<Utc>>,
    level: Option<LogLevel>,
    logger_name: Option<String>,
    message: Option<String>,
    process_name: Option<String>,
    process_id: Option<u32>,
    host: Option<String>,
    ip: Option<String>,
    module: String,
    function: String,
    line: u32,
}

impl LogRecordBuilder {
    /// Sets the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the level.
    #[must_use]
    pub const fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the logger name.
    #[must_use]
    pub fn logger_name(mut self, name: impl Into<String>) -> Self {
        self.logger_name = Some(name.into());
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the process name.
    #[must_use]
    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = Some(name.into());
        self
    }

    /// Sets the process id.
    #[must_use]
    pub const fn process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    /// Sets the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the IP address.
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Sets the emitting source location.
    #[must_use]
    pub fn location(mut self, module: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        self.module = module.into();
        self.function = function.into();
        self.line = line;
        self
    }

    /// Builds the record, returning an error if required fields are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the logger name, level or message is not set, or
    /// if the logger name is empty.
    pub fn build(self) -> Result<LogRecord> {
        let logger_name = self
            .logger_name
            .filter(|name| !name.is_empty())
            .ok_or(FunnelError::MissingField("logger_name"))?;
        let level = self.level.ok_or(FunnelError::MissingField("level"))?;
        let message = self.message.ok_or(FunnelError::MissingField("message"))?;

        Ok(LogRecord {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            level,
            logger_name,
            message,
            process_name: self
                .process_name
                .unwrap_or_else(|| provenance::process_name().to_string()),
            process_id: self.process_id.unwrap_or_else(std::process::id),
            host: self.host.unwrap_or_default(),
            ip: self.ip.unwrap_or_default(),
            module: self.module,
            function: self.function,
            line: self.line,
        })
    }
}

/// Splits a hierarchical key into its right-to-left prefixes.
///
/// `"A.B.C"` yields `["A.B.C", "A.B", "A"]`. A key without separators yields
/// itself. Splitting is purely textual, so `"svc."` yields `["svc.", "svc"]`.
#[must_use]
pub fn split_hierarchy<'a>(key: &'a str, separator: &str) -> Vec<&'a str> {
    let mut keys = Vec::new();
    let mut left = key;
    while !left.is_empty() {
        keys.push(left);
        left = match left.rfind(separator) {
            Some(pos) if !separator.is_empty() => &left[..pos],
            _ => "",
        };
    }
    if keys.is_empty() {
        keys.push(key);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn sample_record() -> LogRecord {
        LogRecord::builder()
            .logger_name("svc.worker.3")
            .level(LogLevel::Info)
            .message("started")
            .build()
            .expect("build record")
    }

    // ===========================================
    // LogLevel Tests
    // ===========================================

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn level_is_at_least() {
        assert!(LogLevel::Error.is_at_least(LogLevel::Warning));
        assert!(LogLevel::Warning.is_at_least(LogLevel::Warning));
        assert!(!LogLevel::Info.is_at_least(LogLevel::Warning));
    }

    #[test_case("debug", LogLevel::Debug ; "lowercase debug")]
    #[test_case("INFO", LogLevel::Info ; "uppercase info")]
    #[test_case("warn", LogLevel::Warning ; "warn alias")]
    #[test_case("Warning", LogLevel::Warning ; "mixed case warning")]
    #[test_case("FATAL", LogLevel::Critical ; "fatal alias")]
    #[test_case("40", LogLevel::Error ; "numeric error")]
    #[test_case("15", LogLevel::Debug ; "numeric between levels")]
    fn level_parses(input: &str, expected: LogLevel) {
        assert_eq!(input.parse::<LogLevel>().expect("parse level"), expected);
    }

    #[test]
    fn level_rejects_unknown() {
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::from_number(99).is_err());
    }

    #[test]
    fn level_serde_accepts_names_and_numbers() {
        let by_name: LogLevel = serde_json::from_str("\"WARNING\"").expect("name");
        let by_number: LogLevel = serde_json::from_str("30").expect("number");
        assert_eq!(by_name, LogLevel::Warning);
        assert_eq!(by_number, LogLevel::Warning);
        assert_eq!(
            serde_json::to_string(&LogLevel::Critical).expect("serialize"),
            "\"CRITICAL\""
        );
    }

    #[test]
    fn level_numbers_match_names() {
        for level in LogLevel::ALL {
            assert_eq!(
                LogLevel::from_number(level.as_number()).expect("roundtrip"),
                level
            );
        }
    }

    // ===========================================
    // LogRecord Tests
    // ===========================================

    #[test]
    fn builder_requires_logger_name() {
        let result = LogRecord::builder()
            .level(LogLevel::Info)
            .message("hello")
            .build();
        assert!(matches!(result, Err(FunnelError::MissingField("logger_name"))));

        let result = LogRecord::builder()
            .logger_name("")
            .level(LogLevel::Info)
            .message("hello")
            .build();
        assert!(matches!(result, Err(FunnelError::MissingField("logger_name"))));
    }

    #[test]
    fn builder_defaults_process_fields() {
        let record = sample_record();
        assert_eq!(record.process_id, std::process::id());
        assert!(!record.process_name.is_empty());
        assert!(record.host.is_empty());
    }

    #[test]
    fn routing_value_selects_field() {
        let record = LogRecord::builder()
            .logger_name("svc.a")
            .level(LogLevel::Info)
            .message("m")
            .process_name("worker-1")
            .host("build-7")
            .build()
            .expect("build record");

        assert_eq!(record.routing_value(RoutingField::Name), "svc.a");
        assert_eq!(record.routing_value(RoutingField::ProcessName), "worker-1");
        assert_eq!(record.routing_value(RoutingField::Host), "build-7");
    }

    #[test]
    fn stamp_host_keeps_producer_values() {
        let mut record = LogRecord::builder()
            .logger_name("svc")
            .level(LogLevel::Info)
            .message("m")
            .host("remote-host")
            .ip("10.0.0.9")
            .build()
            .expect("build record");
        record.stamp_host();
        assert_eq!(record.host, "remote-host");
        assert_eq!(record.ip, "10.0.0.9");
    }

    #[test]
    fn stamp_host_fills_missing_values() {
        let mut record = sample_record();
        record.stamp_host();
        assert!(!record.host.is_empty());
        assert!(!record.ip.is_empty());
    }

    #[test]
    fn json_payload_accepts_minimal_record() {
        let payload = br#"{"timestamp":"2026-01-02T03:04:05.678Z","level":"ERROR","name":"svc.db","message":"lost connection"}"#;
        let record = LogRecord::from_json_bytes(payload).expect("decode");
        assert_eq!(record.logger_name, "svc.db");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.line, 0);
    }

    #[test]
    fn json_payload_rejects_empty_name() {
        let payload = br#"{"timestamp":"2026-01-02T03:04:05Z","level":"INFO","logger_name":"","message":"x"}"#;
        assert!(LogRecord::from_json_bytes(payload).is_err());
    }

    // ===========================================
    // Hierarchy Tests
    // ===========================================

    #[test_case("A.B.C", &["A.B.C", "A.B", "A"] ; "three levels")]
    #[test_case("A", &["A"] ; "single level")]
    #[test_case("svc.a", &["svc.a", "svc"] ; "two levels")]
    #[test_case("svc.", &["svc.", "svc"] ; "trailing separator")]
    #[test_case(".svc", &[".svc"] ; "leading separator")]
    fn split_hierarchy_prefixes(key: &str, expected: &[&str]) {
        assert_eq!(split_hierarchy(key, "."), expected);
    }

    #[test]
    fn split_hierarchy_custom_separator() {
        assert_eq!(split_hierarchy("a/b/c", "/"), vec!["a/b/c", "a/b", "a"]);
        assert_eq!(split_hierarchy("a.b", "/"), vec!["a.b"]);
    }

    proptest! {
        #[test]
        fn prop_split_hierarchy_is_total(key in "[a-z0-9]{1,8}(\\.[a-z0-9]{1,8}){0,5}") {
            let keys = split_hierarchy(&key, ".");
            prop_assert_eq!(keys[0], key.as_str());
            prop_assert_eq!(keys.len(), key.split('.').count());
        }

        #[test]
        fn prop_split_hierarchy_yields_prefixes(key in "[a-z]{1,5}(\\.[a-z]{1,5}){0,5}") {
            let keys = split_hierarchy(&key, ".");
            for pair in keys.windows(2) {
                prop_assert!(pair[0].starts_with(pair[1]));
                prop_assert!(pair[0].len() > pair[1].len());
            }
        }
    }
}
