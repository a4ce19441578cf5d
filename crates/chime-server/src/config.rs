//! Server configuration with layered sources.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If the settings file exists (`~/.chime/relay.json` unless overridden),
//!    deep-merge its values over the defaults
//! 3. Apply `CHIME_*` environment overrides (strict-parsed; invalid values
//!    are ignored with a warning)
//!
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use chime_relay::RelayConfig;

/// Errors raised while loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON for this schema.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `9600`; `0` auto-assigns).
    pub port: u16,
    /// Connections beyond this are refused with close code `1013`.
    pub max_connections: usize,
    /// Interval between heartbeat sweeps, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Delay before a `voice_command_response` goes out, in milliseconds.
    pub command_response_delay_ms: u64,
    /// Per-session cap on queued offline messages.
    pub offline_queue_limit: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,
    /// Text carried in the `welcome` frame.
    pub welcome_message: String,
    /// Handshake gate settings.
    pub auth: AuthSettings,
}

/// Handshake gate settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared HS256 secret. Present = gate required, absent = gate disabled.
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9600,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            command_response_delay_ms: 500,
            offline_queue_limit: 256,
            max_message_bytes: 1024 * 1024, // 1 MiB
            welcome_message: "Connected to notification relay".into(),
            auth: AuthSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Relay engine tunables derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            command_response_delay: Duration::from_millis(self.command_response_delay_ms),
            offline_queue_limit: self.offline_queue_limit,
            welcome_message: self.welcome_message.clone(),
        }
    }
}

/// Resolve the default settings file path (`~/.chime/relay.json`).
pub fn default_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chime").join("relay.json")
}

/// Load configuration, from the given path or the default one.
pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(&default_path()),
    }
}

/// Load configuration from a specific settings file path.
///
/// A missing file is not an error; the compiled defaults are used. Invalid
/// JSON in an existing file is.
pub fn load_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `CHIME_*` environment variable overrides.
///
/// Parsing is strict: integers must be valid and in range, and anything
/// invalid is ignored with a warning so a typo'd env var can never take a
/// running relay down.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(v) = read_env_string("CHIME_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u16("CHIME_PORT", 1, 65535) {
        config.port = v;
    }
    if let Some(v) = read_env_usize("CHIME_MAX_CONNECTIONS", 1, 1_000_000) {
        config.max_connections = v;
    }
    if let Some(v) = read_env_u64("CHIME_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        config.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("CHIME_COMMAND_RESPONSE_DELAY_MS", 0, 60_000) {
        config.command_response_delay_ms = v;
    }
    if let Some(v) = read_env_usize("CHIME_OFFLINE_QUEUE_LIMIT", 1, 1_000_000) {
        config.offline_queue_limit = v;
    }
    if let Some(v) = read_env_usize("CHIME_MAX_MESSAGE_BYTES", 1024, 1_073_741_824) {
        config.max_message_bytes = v;
    }
    if let Some(v) = read_env_string("CHIME_WELCOME_MESSAGE") {
        config.welcome_message = v;
    }
    if let Some(v) = read_env_string("CHIME_AUTH_SECRET") {
        config.auth.secret = Some(v);
    }
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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────

    #[test]
    fn default_bind() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9600);
    }

    #[test]
    fn default_limits() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.offline_queue_limit, 256);
        assert_eq!(cfg.max_message_bytes, 1024 * 1024);
    }

    #[test]
    fn default_timings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval_ms, 30_000);
        assert_eq!(cfg.command_response_delay_ms, 500);
    }

    #[test]
    fn default_gate_is_disabled() {
        let cfg = ServerConfig::default();
        assert!(cfg.auth.secret.is_none());
    }

    #[test]
    fn relay_config_mapping() {
        let cfg = ServerConfig {
            heartbeat_interval_ms: 1_500,
            command_response_delay_ms: 250,
            offline_queue_limit: 7,
            welcome_message: "hi".into(),
            ..ServerConfig::default()
        };
        let relay = cfg.relay_config();
        assert_eq!(relay.heartbeat_interval, Duration::from_millis(1_500));
        assert_eq!(relay.command_response_delay, Duration::from_millis(250));
        assert_eq!(relay.offline_queue_limit, 7);
        assert_eq!(relay.welcome_message, "hi");
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.max_connections, cfg.max_connections);
        assert_eq!(back.welcome_message, cfg.welcome_message);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 7777}"#).unwrap();
        assert_eq!(cfg.port, 7777);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.offline_queue_limit, 256);
    }

    #[test]
    fn default_path_under_chime_dir() {
        let path = default_path();
        assert!(path.to_string_lossy().contains(".chime"));
        assert!(path.to_string_lossy().ends_with("relay.json"));
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"port": 9600, "host": "127.0.0.1"});
        let source = serde_json::json!({"port": 8080});
        let merged = deep_merge(target, source);
        assert_eq!(merged["port"], 8080);
        assert_eq!(merged["host"], "127.0.0.1");
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"auth": {"secret": null}, "port": 9600});
        let source = serde_json::json!({"auth": {"secret": "s3cret"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["auth"]["secret"], "s3cret");
        assert_eq!(merged["port"], 9600);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"welcome_message": "hello", "port": 1});
        let source = serde_json::json!({"welcome_message": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["welcome_message"], "hello");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_from_path ──────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = load_from_path(Path::new("/nonexistent/relay.json")).unwrap();
        assert_eq!(cfg.port, ServerConfig::default().port);
        assert_eq!(cfg.host, ServerConfig::default().host);
    }

    #[test]
    fn load_empty_json_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "{}").unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.port, 9600);
        assert_eq!(cfg.max_connections, 1024);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{"port": 7001, "welcome_message": "Welcome to the marketplace"}"#,
        )
        .unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.welcome_message, "Welcome to the marketplace");
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn load_nested_auth_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"auth": {"secret": "hunter2"}}"#).unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.auth.secret.as_deref(), Some("hunter2"));
        assert_eq!(cfg.port, 9600);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_from_path(&path);
        assert!(matches!(result.unwrap_err(), ConfigError::Json(_)));
    }

    // ── strict parsing ──────────────────────────────────────────────

    #[test]
    fn parse_u16_valid() {
        assert_eq!(parse_u16_range("9600", 1, 65535), Some(9600));
        assert_eq!(parse_u16_range("1", 1, 65535), Some(1));
        assert_eq!(parse_u16_range("65535", 1, 65535), Some(65535));
    }

    #[test]
    fn parse_u16_rejects_out_of_range() {
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
    }

    #[test]
    fn parse_u16_rejects_garbage() {
        assert_eq!(parse_u16_range("not_a_port", 1, 65535), None);
        assert_eq!(parse_u16_range("", 1, 65535), None);
        assert_eq!(parse_u16_range("-1", 1, 65535), None);
    }

    #[test]
    fn parse_u64_valid_and_bounds() {
        assert_eq!(parse_u64_range("30000", 100, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("99", 100, 600_000), None);
        assert_eq!(parse_u64_range("700000", 100, 600_000), None);
        assert_eq!(parse_u64_range("abc", 100, 600_000), None);
    }

    #[test]
    fn parse_usize_valid_and_bounds() {
        assert_eq!(parse_usize_range("256", 1, 1_000_000), Some(256));
        assert_eq!(parse_usize_range("0", 1, 1_000_000), None);
        assert_eq!(parse_usize_range("1000001", 1, 1_000_000), None);
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        assert!(err.to_string().contains("no such file"));

        let json_err = serde_json::from_str::<Value>("{bad}").unwrap_err();
        let err = ConfigError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }
}
