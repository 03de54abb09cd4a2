//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RoadwatchSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `ROADWATCH_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogFormat, RoadwatchSettings};

/// Resolve the default settings path (`~/.roadwatch/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roadwatch").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoadwatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RoadwatchSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<RoadwatchSettings> {
    let defaults = serde_json::to_value(RoadwatchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROADWATCH_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut RoadwatchSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are ignored with a
/// warning, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut RoadwatchSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("ROADWATCH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = string("ROADWATCH_PORT") {
        if let Some(port) = checked("ROADWATCH_PORT", &v, parse_u16_range(&v, 0, 65535)) {
            settings.server.port = port;
        }
    }
    if let Some(v) = string("ROADWATCH_UPLOAD_DIR") {
        settings.server.upload_dir = PathBuf::from(v);
    }
    if let Some(v) = string("ROADWATCH_MAX_UPLOAD_BYTES") {
        if let Some(n) = checked(
            "ROADWATCH_MAX_UPLOAD_BYTES",
            &v,
            parse_usize_range(&v, 1, usize::MAX),
        ) {
            settings.server.max_upload_bytes = Some(n);
        }
    }
    if let Some(v) = string("ROADWATCH_PACING_MS") {
        if let Some(n) = checked("ROADWATCH_PACING_MS", &v, parse_u64_range(&v, 0, 60_000)) {
            settings.session.pacing_ms = n;
        }
    }
    if let Some(v) = string("ROADWATCH_UPLOAD_TTL_SECS") {
        if let Some(n) = checked(
            "ROADWATCH_UPLOAD_TTL_SECS",
            &v,
            parse_u64_range(&v, 1, 7 * 24 * 3600),
        ) {
            settings.session.upload_ttl_secs = n;
        }
    }
    if let Some(v) = string("ROADWATCH_MODEL") {
        settings.detector.model_path = PathBuf::from(v);
    }
    if let Some(v) = string("ROADWATCH_FFMPEG") {
        settings.detector.ffmpeg_path = Some(PathBuf::from(v));
    }
    if let Some(v) = string("ROADWATCH_LOG_FORMAT") {
        if let Some(format) = checked("ROADWATCH_LOG_FORMAT", &v, parse_log_format(&v)) {
            settings.logging.format = format;
        }
    }
}

fn checked<T>(name: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" | "text" => Some(LogFormat::Pretty),
        _ => None,
    }
}
