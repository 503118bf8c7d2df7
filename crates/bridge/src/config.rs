//! Bridge configuration: optional TOML file, overridden by `AMB_*`
//! environment variables, validated as a whole.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub hass: HassConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub base_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Upper bound for `hass.republish_secs` (30 days).
pub const MAX_REPUBLISH_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HassConfig {
    pub discovery_prefix: String,
    pub republish_secs: u64,
    pub settle_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            http: HttpConfig::default(),
            mqtt: MqttConfig::default(),
            hass: HassConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            // The controller firmware always posts to 443.
            port: 443,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "akwatek".to_string(),
            base_topic: "akwatek".to_string(),
            username: None,
            password: None,
        }
    }
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            republish_secs: 3600,
            settle_secs: 5,
        }
    }
}

impl HassConfig {
    pub fn republish(&self) -> Duration {
        Duration::from_secs(self.republish_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: '{value}'"))
}

impl Config {
    /// Apply `AMB_*` overrides. `lookup` returns the variable's value, if set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("AMB_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("AMB_HTTP_PORT") {
            self.http.port = parse_var("AMB_HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("AMB_TLS_CERT") {
            self.http.tls_cert = Some(v);
        }
        if let Some(v) = lookup("AMB_TLS_KEY") {
            self.http.tls_key = Some(v);
        }
        if let Some(v) = lookup("AMB_MQTT_BROKER_HOST") {
            self.mqtt.broker_host = v;
        }
        if let Some(v) = lookup("AMB_MQTT_BROKER_PORT") {
            self.mqtt.broker_port = parse_var("AMB_MQTT_BROKER_PORT", &v)?;
        }
        if let Some(v) = lookup("AMB_MQTT_CLIENT_ID") {
            self.mqtt.client_id = v;
        }
        if let Some(v) = lookup("AMB_MQTT_BASE_TOPIC") {
            self.mqtt.base_topic = v;
        }
        if let Some(v) = lookup("AMB_MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup("AMB_MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = lookup("AMB_HASS_DISCOVERY_PREFIX") {
            self.hass.discovery_prefix = v;
        }
        if let Some(v) = lookup("AMB_HASS_REPUBLISH_SECS") {
            self.hass.republish_secs = parse_var("AMB_HASS_REPUBLISH_SECS", &v)?;
        }
        if let Some(v) = lookup("AMB_HASS_SETTLE_SECS") {
            self.hass.settle_secs = parse_var("AMB_HASS_SETTLE_SECS", &v)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate all settings. Returns `Ok(())` or an error describing every
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.http.port == 0 {
            errors.push("http.port must be nonzero".to_string());
        }
        match (&self.http.tls_cert, &self.http.tls_key) {
            (Some(_), None) => errors.push("http.tls_cert is set but http.tls_key is not".to_string()),
            (None, Some(_)) => errors.push("http.tls_key is set but http.tls_cert is not".to_string()),
            _ => {}
        }

        if self.mqtt.broker_host.trim().is_empty() {
            errors.push("mqtt.broker_host is empty".to_string());
        }
        if self.mqtt.broker_port == 0 {
            errors.push("mqtt.broker_port must be nonzero".to_string());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        validate_topic("mqtt.base_topic", &self.mqtt.base_topic, &mut errors);
        validate_topic("hass.discovery_prefix", &self.hass.discovery_prefix, &mut errors);

        if self.hass.republish_secs == 0 {
            errors.push("hass.republish_secs must be positive".to_string());
        } else if self.hass.republish_secs > MAX_REPUBLISH_SECS {
            errors.push(format!(
                "hass.republish_secs must be at most {MAX_REPUBLISH_SECS}, got {}",
                self.hass.republish_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

fn validate_topic(name: &str, topic: &str, errors: &mut Vec<String>) {
    if topic.trim().is_empty() {
        errors.push(format!("{name} is empty"));
    } else if topic.contains(['+', '#']) {
        errors.push(format!("{name} '{topic}' must not contain MQTT wildcards"));
    } else if topic.starts_with('/') || topic.ends_with('/') {
        errors.push(format!("{name} '{topic}' must not start or end with '/'"));
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read the TOML file at `path` (defaults when it does not exist), apply
/// environment overrides, and validate.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        Config::default()
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
