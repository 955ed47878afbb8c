//! Rotation behavior observed through the router.
//!
//! These tests verify:
//! 1. Size rotation keeps at most `backupCount` backups, newest first
//! 2. Time rotation fires on the clock boundary, not on record timestamps
//! 3. Whichever rule fires first rotates, and lines are never split

use std::fs;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use logfunnel::{
    HandlerPolicy, LogLevel, LogRecord, LoggerInfo, ManualClock, RolloverWhen, Router,
};
use tempfile::TempDir;

fn record(name: &str, message: &str) -> LogRecord {
    LogRecord::builder()
        .logger_name(name)
        .level(LogLevel::Info)
        .message(message)
        .build()
        .expect("build record")
}

fn info(dir: &TempDir, policy: HandlerPolicy) -> LoggerInfo {
    LoggerInfo::new("svc")
        .with_logdir(dir.path())
        .with_level_format("default", "%(message)s")
        .with_handler_policy(policy)
}

fn lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn backup(dir: &TempDir, base: &str, n: usize) -> std::path::PathBuf {
    dir.path().join(format!("{base}.{n}"))
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid instant"))
}

// ============================================================================
// Size Rotation
// ============================================================================

#[test]
fn test_size_rotation_caps_backups() {
    let dir = TempDir::new().expect("temp dir");
    let policy = HandlerPolicy::default()
        .with_max_bytes(100)
        .with_backup_count(2)
        .with_rollover(RolloverWhen::Days, 1);
    let router = Router::with_clock(&info(&dir, policy), Arc::new(clock())).expect("router");

    // 30 characters plus newline: three lines fit under 100 bytes.
    for i in 0..12 {
        let message = format!("{i:02}{}", "x".repeat(28));
        assert_eq!(router.route(&record("svc.size", &message)).delivered, 1);
    }
    router.close();

    let prefix = |path: &std::path::Path| -> Vec<String> {
        lines(path).iter().map(|l| l[..2].to_string()).collect()
    };
    let base = dir.path().join("svc.size.log");
    assert_eq!(prefix(&base), vec!["09", "10", "11"]);
    assert_eq!(prefix(&backup(&dir, "svc.size.log", 1)), vec!["06", "07", "08"]);
    assert_eq!(prefix(&backup(&dir, "svc.size.log", 2)), vec!["03", "04", "05"]);
    assert!(!backup(&dir, "svc.size.log", 3).exists());

    for path in [base, backup(&dir, "svc.size.log", 1), backup(&dir, "svc.size.log", 2)] {
        let len = fs::metadata(&path).expect("metadata").len();
        assert!(len <= 100, "{} is {len} bytes", path.display());
    }
}

#[test]
fn test_oversized_line_is_written_whole() {
    let dir = TempDir::new().expect("temp dir");
    let policy = HandlerPolicy::default()
        .with_max_bytes(10)
        .with_backup_count(1)
        .with_rollover(RolloverWhen::Days, 1);
    let router = Router::with_clock(&info(&dir, policy), Arc::new(clock())).expect("router");

    let long = "y".repeat(40);
    router.route(&record("svc.big", &long));
    router.route(&record("svc.big", "short"));
    router.close();

    assert_eq!(lines(&dir.path().join("svc.big.log")), vec!["short"]);
    assert_eq!(lines(&backup(&dir, "svc.big.log", 1)), vec![long]);
}

// ============================================================================
// Time Rotation
// ============================================================================

#[test]
fn test_time_rotation_follows_clock() {
    let dir = TempDir::new().expect("temp dir");
    let clock = clock();
    let policy = HandlerPolicy::default()
        .with_backup_count(5)
        .with_rollover(RolloverWhen::Minutes, 10);
    let router = Router::with_clock(&info(&dir, policy), Arc::new(clock.clone())).expect("router");

    router.route(&record("svc.time", "first"));
    clock.advance(Duration::minutes(9));
    router.route(&record("svc.time", "second"));
    clock.advance(Duration::minutes(2));
    router.route(&record("svc.time", "third"));
    clock.advance(Duration::minutes(10));
    router.route(&record("svc.time", "fourth"));
    router.close();

    assert_eq!(lines(&dir.path().join("svc.time.log")), vec!["fourth"]);
    assert_eq!(lines(&backup(&dir, "svc.time.log", 1)), vec!["third"]);
    assert_eq!(lines(&backup(&dir, "svc.time.log", 2)), vec!["first", "second"]);
}

#[test]
fn test_record_timestamp_does_not_drive_rotation() {
    let dir = TempDir::new().expect("temp dir");
    let policy = HandlerPolicy::default().with_rollover(RolloverWhen::Seconds, 1);
    let router = Router::with_clock(&info(&dir, policy), Arc::new(clock())).expect("router");

    let mut late = record("svc.ts", "from the future");
    late.timestamp = Utc::now() + Duration::days(365);
    router.route(&record("svc.ts", "now"));
    router.route(&late);
    router.close();

    assert_eq!(lines(&dir.path().join("svc.ts.log")), vec!["now", "from the future"]);
    assert!(!backup(&dir, "svc.ts.log", 1).exists());
}

#[test]
fn test_size_and_time_rules_combine() {
    let dir = TempDir::new().expect("temp dir");
    let clock = clock();
    let policy = HandlerPolicy::default()
        .with_max_bytes(12)
        .with_backup_count(3)
        .with_rollover(RolloverWhen::Hours, 1);
    let router = Router::with_clock(&info(&dir, policy), Arc::new(clock.clone())).expect("router");

    router.route(&record("svc.mix", "aaaa"));
    router.route(&record("svc.mix", "bbbb"));
    // Size rule: 10 + 5 > 12.
    router.route(&record("svc.mix", "cccc"));
    clock.advance(Duration::hours(2));
    // Time rule.
    router.route(&record("svc.mix", "dd"));
    router.close();

    assert_eq!(lines(&dir.path().join("svc.mix.log")), vec!["dd"]);
    assert_eq!(lines(&backup(&dir, "svc.mix.log", 1)), vec!["cccc"]);
    assert_eq!(lines(&backup(&dir, "svc.mix.log", 2)), vec!["aaaa", "bbbb"]);
}
