//! The global configuration document (`queue_config.json`).
//!
//! A flat JSON object read once per command invocation and once per worker
//! start. Unknown keys are ignored; a missing file means built-in
//! defaults. Hot reload is deliberately absent: `config set` takes effect
//! on the next worker launch.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> f64 {
    2.0
}

fn default_idle_timeout() -> f64 {
    60.0
}

fn default_poll_interval() -> f64 {
    0.5
}

/// Queue-wide defaults and worker tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Default retries permitted after a job's first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default exponent base for retry backoff, in seconds.
    #[serde(default = "default_base_backoff")]
    pub base_backoff: f64,

    /// Seconds without a successful claim before a worker exits.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: f64,

    /// Seconds a worker sleeps between empty claim attempts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    /// Default per-execution wall-clock limit; `null` means unlimited.
    #[serde(default)]
    pub default_timeout_seconds: Option<f64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff: default_base_backoff(),
            idle_timeout: default_idle_timeout(),
            poll_interval: default_poll_interval(),
            default_timeout_seconds: None,
        }
    }
}

impl QueueConfig {
    /// Load the config file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidSpec`] when the file exists but does not parse
    /// or carries out-of-range values.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(QueueError::Store(anyhow::anyhow!(
                    "cannot read config {}: {e}",
                    path.display()
                )))
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            QueueError::InvalidSpec(format!("invalid config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Persist the config. The write goes through a sibling temp file and
    /// a rename so readers never observe a torn document.
    pub fn save(&self, path: &Path) -> Result<(), QueueError> {
        let rendered = serde_json::to_string_pretty(self)
            .map_err(|e| QueueError::Store(anyhow::anyhow!("serialize config: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, rendered.as_bytes()).map_err(|e| {
            QueueError::Store(anyhow::anyhow!("write config {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            QueueError::Store(anyhow::anyhow!("rename config into place: {e}"))
        })?;
        Ok(())
    }

    /// Apply a `config set <key> <value>` update.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidSpec`] for unknown keys or values that do not
    /// parse / fall out of range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), QueueError> {
        match key {
            "max_retries" => {
                self.max_retries = value.parse().map_err(|_| {
                    QueueError::InvalidSpec(format!("max_retries must be a non-negative integer, got '{value}'"))
                })?;
            }
            "base_backoff" => self.base_backoff = parse_positive(key, value)?,
            "idle_timeout" => self.idle_timeout = parse_positive(key, value)?,
            "poll_interval" => self.poll_interval = parse_positive(key, value)?,
            "default_timeout_seconds" => {
                self.default_timeout_seconds = match value {
                    "null" | "none" => None,
                    _ => Some(parse_positive(key, value)?),
                };
            }
            other => {
                return Err(QueueError::InvalidSpec(format!(
                    "unknown config key '{other}' (known: max_retries, base_backoff, \
                     idle_timeout, poll_interval, default_timeout_seconds)"
                )))
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), QueueError> {
        for (name, value) in [
            ("base_backoff", self.base_backoff),
            ("idle_timeout", self.idle_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(QueueError::InvalidSpec(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        if let Some(t) = self.default_timeout_seconds {
            if !(t.is_finite() && t > 0.0) {
                return Err(QueueError::InvalidSpec(format!(
                    "default_timeout_seconds must be a positive number, got {t}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<f64, QueueError> {
    let parsed: f64 = value.parse().map_err(|_| {
        QueueError::InvalidSpec(format!("{key} must be a number, got '{value}'"))
    })?;
    if !(parsed.is_finite() && parsed > 0.0) {
        return Err(QueueError::InvalidSpec(format!(
            "{key} must be a positive number, got '{value}'"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = QueueConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_backoff, 2.0);
        assert_eq!(c.idle_timeout, 60.0);
        assert_eq!(c.poll_interval, 0.5);
        assert_eq!(c.default_timeout_seconds, None);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = QueueConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded, QueueConfig::default());
    }

    #[test]
    fn load_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_config.json");
        fs::write(&path, r#"{"max_retries": 5, "theme": "dark"}"#).unwrap();

        let loaded = QueueConfig::load(&path).unwrap();
        assert_eq!(loaded.max_retries, 5);
        assert_eq!(loaded.base_backoff, 2.0);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(QueueConfig::load(&path), Err(QueueError::InvalidSpec(_))));
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_config.json");

        let mut config = QueueConfig::default();
        config.set("max_retries", "7").unwrap();
        config.set("default_timeout_seconds", "12.5").unwrap();
        config.save(&path).unwrap();

        assert_eq!(QueueConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn set_validates_keys_and_values() {
        let mut config = QueueConfig::default();
        assert!(config.set("poll_interval", "0.25").is_ok());
        assert!(matches!(config.set("poll_interval", "-1"), Err(QueueError::InvalidSpec(_))));
        assert!(matches!(config.set("max_retries", "-2"), Err(QueueError::InvalidSpec(_))));
        assert!(matches!(config.set("max_retries", "many"), Err(QueueError::InvalidSpec(_))));
        assert!(matches!(config.set("nope", "1"), Err(QueueError::InvalidSpec(_))));
    }

    #[test]
    fn set_timeout_null_clears_it() {
        let mut config = QueueConfig::default();
        config.set("default_timeout_seconds", "30").unwrap();
        assert_eq!(config.default_timeout_seconds, Some(30.0));
        config.set("default_timeout_seconds", "null").unwrap();
        assert_eq!(config.default_timeout_seconds, None);
    }
}
