//! Host and process identity used to stamp records.
//!
//! Values are resolved once per process. Resolution failures fall back to
//! fixed placeholders instead of failing the record.

use once_cell::sync::Lazy;

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
});

static IP_ADDRESS: Lazy<String> = Lazy::new(|| {
    local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
});

static PROCESS_NAME: Lazy<String> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "main".to_string())
});

/// Returns the hostname of this machine.
#[must_use]
pub fn hostname() -> &'static str {
    &HOSTNAME
}

/// Returns the primary local IP address of this machine.
#[must_use]
pub fn ip_address() -> &'static str {
    &IP_ADDRESS
}

/// Returns the name of the current process.
#[must_use]
pub fn process_name() -> &'static str {
    &PROCESS_NAME
}
