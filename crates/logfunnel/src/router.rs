//! Hierarchical record routing.
//!
//! This module provides:
//! - [`Router`] — Maps a record's routing key to lazily created file handlers
//! - [`Routed`] — The outcome of routing one record
//!
//! With consolidation on, a record for `A.B.C` is also written to the `A.B`
//! and `A` files. Global and console handlers receive every record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{HandlerPolicy, LoggerInfo};
use crate::error::{FunnelError, Result};
use crate::format::LevelFormatter;
use crate::rotation::RotatingFileHandler;
use crate::traits::{RecordHandler, RecordSink, StreamHandler};
use crate::types::{LogLevel, LogRecord, RoutingField, split_hierarchy};

/// Outcome of routing one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Routed {
    /// Handlers that wrote the record.
    pub delivered: usize,
    /// Keys or handlers that could not take the record.
    pub failed: usize,
}

impl Routed {
    /// Returns true if no handler wrote the record.
    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        self.delivered == 0
    }
}

type SharedHandler = Arc<dyn RecordHandler>;

/// Routes records to per-key rotating files plus global handlers.
///
/// `route` may be called concurrently. The registry is locked only while
/// resolving handlers; each file handler serializes its own writes.
pub struct Router {
    name: String,
    key: RoutingField,
    separator: String,
    consolidate: bool,
    level: LogLevel,
    logdir: PathBuf,
    policy: HandlerPolicy,
    formatter: LevelFormatter,
    clock: Arc<dyn Clock>,
    registry: Mutex<HashMap<String, Vec<SharedHandler>>>,
    global_handlers: RwLock<Vec<SharedHandler>>,
    console_handlers: RwLock<Vec<SharedHandler>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("consolidate", &self.consolidate)
            .field("logdir", &self.logdir)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router from a configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(info: &LoggerInfo) -> Result<Self> {
        Self::with_clock(info, Arc::new(SystemClock))
    }

    /// Creates a router whose file handlers read time from `clock`.
    pub fn with_clock(info: &LoggerInfo, clock: Arc<dyn Clock>) -> Result<Self> {
        info.validate()?;
        let formatter = info.formatter()?.with_utc(info.handler_kwargs.utc);

        let router = Self {
            name: info.name.clone(),
            key: info.key,
            separator: info.separator.clone(),
            consolidate: info.consolidate,
            level: info.logging_level,
            logdir: info.logdir.clone(),
            policy: info.handler_kwargs.clone(),
            formatter,
            clock,
            registry: Mutex::new(HashMap::new()),
            global_handlers: RwLock::new(Vec::new()),
            console_handlers: RwLock::new(Vec::new()),
        };
        if info.console {
            router.add_console_handler(Arc::new(StreamHandler::stdout(info.logging_level)));
        }
        Ok(router)
    }

    /// Returns the router's top-level name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory log files are written to.
    #[must_use]
    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    /// Returns the path of the file a routing key is written to.
    #[must_use]
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.logdir.join(self.policy.file_name(key))
    }

    /// Registers a handler that receives every record.
    pub fn add_handler(&self, handler: SharedHandler) {
        self.global_handlers.write().push(handler);
    }

    /// Registers a console handler that receives every record.
    pub fn add_console_handler(&self, handler: SharedHandler) {
        self.console_handlers.write().push(handler);
    }

    /// Returns the routing keys that have a dedicated handler, sorted.
    #[must_use]
    pub fn handler_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Derives the routing keys of a record.
    ///
    /// An empty routing value falls back to the router name.
    #[must_use]
    pub fn routing_keys<'a>(&'a self, record: &'a LogRecord) -> Vec<&'a str> {
        let value = match record.routing_value(self.key) {
            "" => self.name.as_str(),
            value => value,
        };
        if self.consolidate {
            split_hierarchy(value, &self.separator)
        } else {
            vec![value]
        }
    }

    /// Routes one record to every matching handler.
    ///
    /// Records below the router level are dropped. A key whose handler
    /// cannot be created is skipped for this record and retried on the next;
    /// keys containing path separators are never given a file.
    pub fn route(&self, record: &LogRecord) -> Routed {
        let mut outcome = Routed::default();
        if !record.level.is_at_least(self.level) {
            return outcome;
        }

        let globals = self.global_handlers.read().clone();
        let mut handlers: Vec<SharedHandler> = Vec::new();
        {
            let mut registry = self.registry.lock();
            for key in self.routing_keys(record) {
                if let Some(existing) = registry.get(key) {
                    handlers.extend(existing.iter().cloned());
                    continue;
                }
                if key == self.name && !globals.is_empty() {
                    // Root records fall through to the global handlers.
                    continue;
                }
                match self.open_file_handler(key) {
                    Ok(handler) => {
                        debug!(key = %key, path = %self.path_for_key(key).display(), "created file handler");
                        handlers.push(Arc::clone(&handler));
                        registry.insert(key.to_string(), vec![handler]);
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "failed to create file handler; dropping record for key");
                        outcome.failed += 1;
                    }
                }
            }
        }
        handlers.extend(globals);
        handlers.extend(self.console_handlers.read().iter().cloned());

        let mut unique: Vec<SharedHandler> = Vec::with_capacity(handlers.len());
        for handler in handlers {
            if !unique.iter().any(|seen| same_handler(seen, &handler)) {
                unique.push(handler);
            }
        }

        let formatted = self.formatter.format(record);
        for handler in unique.iter().filter(|h| h.accepts(record.level)) {
            match handler.handle(record, &formatted) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(logger = %record.logger_name, error = %e, "handler failed to write record");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Flushes every handler.
    pub fn flush(&self) {
        for handler in self.all_handlers() {
            if let Err(e) = handler.flush() {
                warn!(error = %e, "failed to flush handler");
            }
        }
    }

    /// Flushes and releases every handler.
    ///
    /// File handlers are dropped from the registry, releasing their paths.
    pub fn close(&self) {
        let handlers = self.all_handlers();
        self.registry.lock().clear();
        for handler in handlers {
            if let Err(e) = handler.close() {
                warn!(error = %e, "failed to close handler");
            }
        }
    }

    fn all_handlers(&self) -> Vec<SharedHandler> {
        let mut all: Vec<SharedHandler> = self.registry.lock().values().flatten().cloned().collect();
        all.extend(self.global_handlers.read().iter().cloned());
        all.extend(self.console_handlers.read().iter().cloned());
        all
    }

    fn open_file_handler(&self, key: &str) -> Result<SharedHandler> {
        check_key(key)?;
        let handler = RotatingFileHandler::open(
            self.path_for_key(key),
            &self.policy,
            self.level,
            Arc::clone(&self.clock),
        )?;
        Ok(Arc::new(handler))
    }
}

impl RecordSink for Router {
    async fn submit(&self, mut record: LogRecord) -> Result<()> {
        record.stamp_host();
        self.route(&record);
        Ok(())
    }
}

/// Keys become file names inside the log directory and must stay there.
fn check_key(key: &str) -> Result<()> {
    if key.contains(['/', '\\', '\0']) {
        return Err(FunnelError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn same_handler(a: &SharedHandler, b: &SharedHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MemoryHandler;
    use std::fs;
    use tempfile::TempDir;

    fn info(dir: &TempDir) -> LoggerInfo {
        LoggerInfo::new("svc")
            .with_level(LogLevel::Debug)
            .with_logdir(dir.path())
            .with_level_format("default", "%(name)s %(message)s")
            .with_level_format("DEBUG", "%(name)s %(message)s")
    }

    fn record(name: &str, level: LogLevel, message: &str) -> LogRecord {
        LogRecord::builder()
            .logger_name(name)
            .level(level)
            .message(message)
            .process_name("worker-1")
            .host("build-7")
            .build()
            .expect("build record")
    }

    fn read(dir: &TempDir, file: &str) -> Vec<String> {
        fs::read_to_string(dir.path().join(file))
            .expect("read log file")
            .lines()
            .map(str::to_string)
            .collect()
    }

    // ===========================================
    // Routing Tests
    // ===========================================

    #[test]
    fn routes_by_logger_name() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");

        router.route(&record("svc.a", LogLevel::Info, "one"));
        router.route(&record("svc.b", LogLevel::Info, "two"));
        router.route(&record("svc.a", LogLevel::Info, "three"));

        assert_eq!(read(&dir, "svc.a.log"), vec!["svc.a one", "svc.a three"]);
        assert_eq!(read(&dir, "svc.b.log"), vec!["svc.b two"]);
        assert_eq!(router.handler_keys(), vec!["svc.a", "svc.b"]);
    }

    #[test]
    fn repeated_routing_writes_once_per_call() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");
        let rec = record("svc.a", LogLevel::Info, "same");

        assert_eq!(router.route(&rec).delivered, 1);
        assert_eq!(router.route(&rec).delivered, 1);
        assert_eq!(read(&dir, "svc.a.log").len(), 2);
    }

    #[test]
    fn consolidation_fans_out_to_ancestors() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir).with_consolidate(true)).expect("router");

        let routed = router.route(&record("svc.a.x", LogLevel::Info, "deep"));
        assert_eq!(routed, Routed { delivered: 3, failed: 0 });
        for file in ["svc.a.x.log", "svc.a.log", "svc.log"] {
            assert_eq!(read(&dir, file), vec!["svc.a.x deep"], "{file}");
        }
    }

    #[test]
    fn global_handler_receives_each_record_once() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir).with_consolidate(true)).expect("router");
        let global = Arc::new(MemoryHandler::new());
        router.add_handler(global.clone());
        router.add_handler(global.clone());

        router.route(&record("svc.a.x", LogLevel::Info, "deep"));
        assert_eq!(global.lines(), vec!["svc.a.x deep"]);
    }

    #[test]
    fn root_key_with_global_handler_skips_dedicated_file() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir).with_consolidate(true)).expect("router");
        let global = Arc::new(MemoryHandler::new());
        router.add_handler(global.clone());

        router.route(&record("svc", LogLevel::Info, "root"));
        router.route(&record("svc.a", LogLevel::Info, "leaf"));

        assert!(!dir.path().join("svc.log").exists());
        assert_eq!(read(&dir, "svc.a.log"), vec!["svc.a leaf"]);
        assert_eq!(global.len(), 2);
        assert_eq!(router.handler_keys(), vec!["svc.a"]);
    }

    #[test]
    fn root_key_without_global_handler_gets_file() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");
        router.route(&record("svc", LogLevel::Info, "root"));
        assert_eq!(read(&dir, "svc.log"), vec!["svc root"]);
    }

    #[test]
    fn routes_by_process_name() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir).with_key(RoutingField::ProcessName)).expect("router");
        router.route(&record("svc.a", LogLevel::Info, "hi"));
        assert_eq!(read(&dir, "worker-1.log"), vec!["svc.a hi"]);
    }

    #[test]
    fn file_names_use_prefix_and_suffix() {
        let dir = TempDir::new().expect("temp dir");
        let policy = HandlerPolicy::default().with_affixes("node1", "err");
        let router = Router::new(&info(&dir).with_handler_policy(policy)).expect("router");
        router.route(&record("svc.a", LogLevel::Info, "hi"));
        assert!(dir.path().join("node1.svc.a.err.log").exists());
        assert_eq!(router.path_for_key("svc.a"), dir.path().join("node1.svc.a.err.log"));
    }

    // ===========================================
    // Level Filtering Tests
    // ===========================================

    #[test]
    fn handler_threshold_filters_levels() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");
        let warnings = Arc::new(MemoryHandler::with_min_level(LogLevel::Warning));
        router.add_handler(warnings.clone());

        for level in LogLevel::ALL {
            router.route(&record("svc.a", level, level.as_str()));
        }
        assert_eq!(
            warnings.lines(),
            vec!["svc.a WARNING", "svc.a ERROR", "svc.a CRITICAL"]
        );
        assert_eq!(read(&dir, "svc.a.log").len(), 5);
    }

    #[test]
    fn router_threshold_drops_records() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir).with_level(LogLevel::Warning)).expect("router");

        let routed = router.route(&record("svc.a", LogLevel::Info, "quiet"));
        assert!(routed.is_dropped());
        assert!(!dir.path().join("svc.a.log").exists());
    }

    // ===========================================
    // Failure Isolation Tests
    // ===========================================

    #[test]
    fn unopenable_key_does_not_block_other_keys() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join("svc.bad.log")).expect("blocker");
        let router = Router::new(&info(&dir).with_consolidate(true)).expect("router");

        let routed = router.route(&record("svc.bad", LogLevel::Error, "boom"));
        assert_eq!(routed, Routed { delivered: 1, failed: 1 });
        assert_eq!(read(&dir, "svc.log"), vec!["svc.bad boom"]);
        assert_eq!(router.handler_keys(), vec!["svc"]);
    }

    #[test]
    fn keys_with_path_separators_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let logdir = dir.path().join("logs");
        let router = Router::new(&info(&dir).with_logdir(&logdir)).expect("router");

        for name in ["../escaped", "a/b", "..\\win", "abs/../../x"] {
            let routed = router.route(&record(name, LogLevel::Info, "nope"));
            assert_eq!(routed, Routed { delivered: 0, failed: 1 }, "key {name}");
        }
        assert!(!dir.path().join("escaped.log").exists());
        assert!(!logdir.join("a").exists());
        assert!(router.handler_keys().is_empty());

        let routed = router.route(&record("svc.ok", LogLevel::Info, "fine"));
        assert_eq!(routed, Routed { delivered: 1, failed: 0 });
        assert!(logdir.join("svc.ok.log").exists());
    }

    #[test]
    fn rejected_key_still_reaches_global_handlers() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");
        let global = Arc::new(MemoryHandler::new());
        router.add_handler(global.clone());

        let routed = router.route(&record("../up", LogLevel::Info, "kept"));
        assert_eq!(routed, Routed { delivered: 1, failed: 1 });
        assert_eq!(global.lines(), vec!["../up kept"]);
    }

    #[test]
    fn concurrent_routing_keeps_every_line() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");

        std::thread::scope(|scope| {
            for t in 0..4 {
                let router = &router;
                scope.spawn(move || {
                    for i in 0..50 {
                        router.route(&record("svc.shared", LogLevel::Info, &format!("{t}-{i}")));
                    }
                });
            }
        });
        assert_eq!(read(&dir, "svc.shared.log").len(), 200);
    }

    #[test]
    fn close_releases_file_paths() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(&info(&dir)).expect("router");
        router.route(&record("svc.a", LogLevel::Info, "one"));
        router.close();
        assert!(router.handler_keys().is_empty());

        let reopened = RotatingFileHandler::open(
            router.path_for_key("svc.a"),
            &HandlerPolicy::default(),
            LogLevel::Debug,
            Arc::new(SystemClock),
        );
        assert!(reopened.is_ok());
    }

    #[tokio::test]
    async fn submit_stamps_missing_host() {
        let dir = TempDir::new().expect("temp dir");
        let router = Router::new(
            &info(&dir).with_level_format("default", "%(host)s|%(message)s"),
        )
        .expect("router");
        let rec = LogRecord::builder()
            .logger_name("svc.a")
            .level(LogLevel::Info)
            .message("m")
            .build()
            .expect("build record");

        router.submit(rec).await.expect("submit");
        let lines = read(&dir, "svc.a.log");
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].starts_with('|'));
    }
}
