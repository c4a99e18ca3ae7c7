//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`virtual_time()`)
//! 2. **Environment variables**: values from `STRAND_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STRAND_TIME_SOURCE` | `wall` / `virtual` | `time_source` |
//! | `STRAND_START_TIME_MS` | `u64` | `start_time` (unix millis) |
//! | `STRAND_INTERRUPTIBLE` | `bool` | `interruptible` |
//! | `STRAND_TRACE` | `bool` | `trace` |

use crate::runtime::config::{RuntimeConfig, TimeSourceKind};
use crate::types::Time;

/// Environment variable name for the time source.
pub const ENV_TIME_SOURCE: &str = "STRAND_TIME_SOURCE";
/// Environment variable name for the clock's unix start time, in milliseconds.
pub const ENV_START_TIME_MS: &str = "STRAND_START_TIME_MS";
/// Environment variable name for the root fibers' interrupt status.
pub const ENV_INTERRUPTIBLE: &str = "STRAND_INTERRUPTIBLE";
/// Environment variable name for trace frame recording.
pub const ENV_TRACE: &str = "STRAND_TRACE";

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable or key held an unparseable value.
    #[error("invalid value for {name}: {reason}, got {value:?}")]
    InvalidValue {
        /// Variable or key name.
        name: String,
        /// The raw value.
        value: String,
        /// What was expected.
        reason: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_TIME_SOURCE) {
        config.time_source = parse_time_source(ENV_TIME_SOURCE, &val)?;
    }
    if let Some(val) = read_env(ENV_START_TIME_MS) {
        config.start_time = Some(Time::from_millis(parse_u64(ENV_START_TIME_MS, &val)?));
    }
    if let Some(val) = read_env(ENV_INTERRUPTIBLE) {
        config.interruptible = parse_bool(ENV_INTERRUPTIBLE, &val)?;
    }
    if let Some(val) = read_env(ENV_TRACE) {
        config.trace = parse_bool(ENV_TRACE, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_time_source(var_name: &str, val: &str) -> Result<TimeSourceKind, ConfigError> {
    val.parse::<TimeSourceKind>()
        .map_err(|reason| ConfigError::invalid(var_name, val, reason))
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(var_name, val, format!("expected unsigned integer ({e})")))
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            var_name,
            val,
            "expected bool (true/false/1/0/yes/no)",
        )),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [clock]
/// time_source = "virtual"
/// start_time_ms = 1700000000000
///
/// [fibers]
/// interruptible = true
/// trace = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RuntimeTomlConfig {
    /// Clock settings.
    #[serde(default)]
    pub clock: ClockToml,
    /// Root fiber settings.
    #[serde(default)]
    pub fibers: FibersToml,
}

/// Clock section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ClockToml {
    /// `wall` or `virtual`.
    pub time_source: Option<TimeSourceKind>,
    /// Unix start time in milliseconds.
    pub start_time_ms: Option<u64>,
}

/// Fibers section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FibersToml {
    /// Whether root fibers start interruptible.
    pub interruptible: Option<bool>,
    /// Whether root fibers record trace frames.
    pub trace: Option<bool>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.clock.time_source {
        config.time_source = v;
    }
    if let Some(v) = toml.clock.start_time_ms {
        config.start_time = Some(Time::from_millis(v));
    }
    if let Some(v) = toml.fibers.interruptible {
        config.interruptible = v;
    }
    if let Some(v) = toml.fibers.trace {
        config.trace = v;
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    const ALL_VARS: [&str; 4] = [ENV_TIME_SOURCE, ENV_START_TIME_MS, ENV_INTERRUPTIBLE, ENV_TRACE];

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        for (k, _) in vars {
            std::env::remove_var(k);
        }
        result
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        init_test("parse_bool_accepts_common_spellings");
        for val in ["true", "1", "YES", " on "] {
            let parsed = parse_bool("TEST", val).ok();
            crate::assert_with_log!(parsed == Some(true), val, Some(true), parsed);
        }
        for val in ["false", "0", "no", "Off"] {
            let parsed = parse_bool("TEST", val).ok();
            crate::assert_with_log!(parsed == Some(false), val, Some(false), parsed);
        }
        let bad = parse_bool("TEST", "maybe");
        crate::assert_with_log!(bad.is_err(), "maybe", "error", bad.is_err());
        crate::test_complete!("parse_bool_accepts_common_spellings");
    }

    #[test]
    fn env_overrides_apply_set_vars_only() {
        init_test("env_overrides_apply_set_vars_only");
        let config = with_envs(
            &[(ENV_TIME_SOURCE, "virtual"), (ENV_START_TIME_MS, "1500")],
            || {
                let mut config = RuntimeConfig::default();
                apply_env_overrides(&mut config).map(|()| config)
            },
        )
        .expect("valid env");
        crate::assert_with_log!(config.time_source == TimeSourceKind::Virtual, "time source", TimeSourceKind::Virtual, config.time_source);
        crate::assert_with_log!(config.start_time == Some(Time::from_millis(1500)), "start", Some(Time::from_millis(1500)), config.start_time);
        crate::assert_with_log!(config.interruptible, "default kept", true, config.interruptible);
        crate::test_complete!("env_overrides_apply_set_vars_only");
    }

    #[test]
    fn env_overrides_bools() {
        init_test("env_overrides_bools");
        let config = with_envs(&[(ENV_INTERRUPTIBLE, "no"), (ENV_TRACE, "0")], || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).map(|()| config)
        })
        .expect("valid env");
        crate::assert_with_log!(!config.interruptible, "interruptible", false, config.interruptible);
        crate::assert_with_log!(!config.trace, "trace", false, config.trace);
        crate::test_complete!("env_overrides_bools");
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        init_test("env_overrides_invalid_value_returns_error");
        let result = with_envs(&[(ENV_START_TIME_MS, "soon")], || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config)
        });
        let msg = result.err().map(|e| e.to_string()).unwrap_or_default();
        crate::assert_with_log!(msg.contains(ENV_START_TIME_MS), "names the variable", ENV_START_TIME_MS, msg);
        crate::test_complete!("env_overrides_invalid_value_returns_error");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_toml_full_config() {
        init_test("parse_toml_full_config");
        let parsed = parse_toml_str(
            r#"
[clock]
time_source = "virtual"
start_time_ms = 42

[fibers]
interruptible = false
trace = false
"#,
        )
        .expect("valid toml");
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        let want = RuntimeConfig {
            time_source: TimeSourceKind::Virtual,
            start_time: Some(Time::from_millis(42)),
            interruptible: false,
            trace: false,
        };
        crate::assert_with_log!(config == want, "all fields", want, config);
        crate::test_complete!("parse_toml_full_config");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_toml_rejects_unknown_time_source() {
        init_test("parse_toml_rejects_unknown_time_source");
        let result = parse_toml_str("[clock]\ntime_source = \"lunar\"\n");
        crate::assert_with_log!(result.is_err(), "rejected", "error", result.is_err());
        crate::test_complete!("parse_toml_rejects_unknown_time_source");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_file_roundtrip() {
        init_test("toml_file_roundtrip");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strand.toml");
        std::fs::write(&path, "[fibers]\ntrace = false\n").expect("write");
        let parsed = parse_toml_file(&path).expect("parse");
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        crate::assert_with_log!(!config.trace, "trace off", false, config.trace);

        let missing = parse_toml_file(std::path::Path::new("/nonexistent/strand.toml"));
        let msg = missing.err().map(|e| e.to_string()).unwrap_or_default();
        crate::assert_with_log!(msg.contains("failed to read"), "missing file", "failed to read", msg);
        crate::test_complete!("toml_file_roundtrip");
    }
}
