//! Engine configuration.
//!
//! Loaded from a TOML file with serde defaults for every field, so a
//! missing file or a partial file is fine. Validation runs once at
//! startup; a bad timezone or tick interval is fatal and must prevent
//! the scheduler from starting.

use crate::clock::OrgTimezone;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration for the reminder engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed org timezone as a UTC offset string (e.g. `"+07:00"`).
    ///
    /// All recurrence computation uses this offset, never the host's
    /// or a client's local timezone.
    pub timezone: String,
    /// Seconds between scheduler ticks. Must stay within the minute
    /// matching granularity (1..=60) so no due minute is skipped.
    pub tick_secs: u64,
    /// Fire ledger JSONL path.
    pub ledger_path: PathBuf,
    /// SQLite database path (reminder source + notification store).
    pub db_path: PathBuf,
    /// Ledger retention window in days. The ledger floors this at its
    /// recurrence-horizon minimum.
    pub retention_days: u32,
    /// Per-subscriber bus buffer capacity.
    pub buffer_capacity: usize,
    /// Client reconnect backoff in seconds.
    pub reconnect_secs: u64,
    /// Live delivery gateway settings.
    pub gateway: GatewayConfig,
    /// WhatsApp delivery sink. `None` disables external delivery.
    pub whatsapp: Option<WhatsAppSinkConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "+07:00".to_owned(),
            tick_secs: 60,
            ledger_path: PathBuf::from("data/fires.jsonl"),
            db_path: PathBuf::from("data/ingat.db"),
            retention_days: 400,
            buffer_capacity: 8,
            reconnect_secs: 5,
            gateway: GatewayConfig::default(),
            whatsapp: None,
        }
    }
}

/// Live delivery gateway (SSE endpoint) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Optional bearer token required on stream requests.
    pub bearer_token: Option<String>,
    /// Keepalive comment-frame interval in seconds.
    pub keepalive_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 4090,
            bearer_token: None,
            keepalive_secs: 25,
        }
    }
}

/// WhatsApp Business Cloud API sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSinkConfig {
    /// API bearer token.
    pub access_token: String,
    /// Sending phone number id.
    pub phone_number_id: String,
    /// API base URL; overridable for tests.
    pub base_url: String,
    /// Owner id (as a string key) to E.164 recipient number.
    pub recipients: HashMap<String, String>,
}

impl Default for WhatsAppSinkConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            base_url: "https://graph.facebook.com/v18.0".to_owned(),
            recipients: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Load configuration, falling back to defaults when the file does
    /// not exist. Parse errors are still fatal.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(EngineError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Validate startup invariants. Returns the parsed org timezone.
    pub fn validate(&self) -> Result<OrgTimezone> {
        let timezone = OrgTimezone::parse(&self.timezone)?;
        if self.tick_secs == 0 || self.tick_secs > 60 {
            return Err(EngineError::Config(format!(
                "tick_secs must be within 1..=60, got {}",
                self.tick_secs
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(EngineError::Config(
                "buffer_capacity must be at least 1".to_owned(),
            ));
        }
        if self.gateway.keepalive_secs == 0 {
            return Err(EngineError::Config(
                "gateway.keepalive_secs must be at least 1".to_owned(),
            ));
        }
        Ok(timezone)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            timezone = "+08:00"
            tick_secs = 30

            [gateway]
            port = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.timezone, "+08:00");
        assert_eq!(config.tick_secs, 30);
        assert_eq!(config.gateway.port, 5000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.retention_days, 400);
    }

    #[test]
    fn whatsapp_section_parses() {
        let config: EngineConfig = toml::from_str(
            r#"
            [whatsapp]
            access_token = "tok"
            phone_number_id = "123"

            [whatsapp.recipients]
            42 = "+6281234567890"
            "#,
        )
        .unwrap();
        let whatsapp = config.whatsapp.unwrap();
        assert_eq!(whatsapp.phone_number_id, "123");
        assert_eq!(
            whatsapp.recipients.get("42").map(String::as_str),
            Some("+6281234567890")
        );
        assert!(whatsapp.base_url.starts_with("https://graph.facebook.com"));
    }

    #[test]
    fn invalid_timezone_is_fatal() {
        let config = EngineConfig {
            timezone: "WIB".to_owned(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn tick_interval_must_stay_within_the_minute() {
        for bad in [0, 61, 3600] {
            let config = EngineConfig {
                tick_secs: bad,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err(), "tick_secs {bad} should fail");
        }
    }

    #[test]
    fn load_or_default_handles_missing_file() {
        let config =
            EngineConfig::load_or_default(Path::new("/nonexistent/ingat.toml")).unwrap();
        assert_eq!(config.tick_secs, 60);
    }
}
