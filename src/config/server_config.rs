//! Server configuration using Figment
//!
//! Strongly-typed configuration for the publishing server. Loaded from a TOML file
//! with `SPECTRA_OPC_` environment overrides, then validated; any failure here is
//! fatal at start-up.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::polling::PollingConfig;
use crate::registry::{names, VariantType};
use crate::server::ServerSettings;
use crate::watchdog::WatchdogConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/spectra_opc.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML or environment source could not be read or parsed
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// Values parsed but are out of range or inconsistent
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Protocol server and variable declarations
    pub opc: OpcConfig,
    /// Instrument acquisition settings
    pub instrument: InstrumentConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_application_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format of log lines
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_application_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, ANSI coloured
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Security policies the endpoint offers to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// No signing or encryption
    None,
    /// Messages signed
    #[serde(rename = "Basic256Sha256_Sign")]
    Basic256Sha256Sign,
    /// Messages signed and encrypted
    #[serde(rename = "Basic256Sha256_SignAndEncrypt")]
    Basic256Sha256SignAndEncrypt,
}

/// Protocol server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcConfig {
    /// Endpoint address (e.g., "opc.tcp://0.0.0.0:4840/spectro/server/")
    pub endpoint: String,
    /// Server display name
    pub name: String,
    /// Namespace URI registered for the published variables
    pub uri: String,
    /// Prefix applied to every node id
    #[serde(default)]
    pub root_node: String,
    /// Heartbeat staleness threshold in watchdog ticks
    pub comms_timeout: u32,
    /// Length of one watchdog tick in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Offered security policies
    #[serde(default = "default_security_policies")]
    pub security_policies: Vec<SecurityPolicy>,
    /// Ordered variable declarations
    #[serde(default)]
    pub tags: Vec<TagDeclaration>,
}

/// One declared variable: logical name plus type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDeclaration {
    /// Logical name, also the node id suffix
    pub name: String,
    /// Declared value type
    #[serde(rename = "type")]
    pub value_type: VariantType,
}

impl TagDeclaration {
    /// Declaration for `name` with type `value_type`.
    pub fn new(name: impl Into<String>, value_type: VariantType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Instrument acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Integration time applied on connect, in microseconds
    pub integration_time_micros: u32,
    /// Pause between samples while capturing, in seconds
    pub sampling_interval_secs: f64,
    /// Pause between iterations while not capturing, in milliseconds
    #[serde(default = "default_idle_poll_interval")]
    pub idle_poll_interval_ms: u64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_application_name() -> String {
    "Spectrometer OPC UA Server".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval() -> u64 {
    1000
}

fn default_security_policies() -> Vec<SecurityPolicy> {
    vec![
        SecurityPolicy::None,
        SecurityPolicy::Basic256Sha256SignAndEncrypt,
        SecurityPolicy::Basic256Sha256Sign,
    ]
}

fn default_idle_poll_interval() -> u64 {
    100
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ServerConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPECTRA_OPC_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Endpoint is an `opc.tcp://` address
    /// - Tag names are unique and every required variable is declared with a usable type
    /// - Watchdog threshold and timing values are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !self.opc.endpoint.starts_with("opc.tcp://") {
            return Err(ConfigError::Validation(format!(
                "Invalid endpoint '{}'. Must start with opc.tcp://",
                self.opc.endpoint
            )));
        }

        if self.opc.uri.is_empty() {
            return Err(ConfigError::Validation(
                "Namespace 'uri' cannot be empty".to_string(),
            ));
        }

        self.validate_tags()?;

        if self.opc.comms_timeout == 0 {
            return Err(ConfigError::Validation(
                "'comms_timeout' must be > 0".to_string(),
            ));
        }

        if self.opc.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "'heartbeat_interval_ms' must be > 0".to_string(),
            ));
        }

        if self.instrument.integration_time_micros == 0 {
            return Err(ConfigError::Validation(
                "'integration_time_micros' must be > 0".to_string(),
            ));
        }

        let interval = self.instrument.sampling_interval_secs;
        if !interval.is_finite()
            || interval < 0.0
            || Duration::try_from_secs_f64(interval).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid sampling_interval_secs {interval}. Must be a finite value >= 0"
            )));
        }

        Ok(())
    }

    fn validate_tags(&self) -> Result<(), ConfigError> {
        if self.opc.tags.is_empty() {
            return Err(ConfigError::Validation(
                "No tags declared under [opc]".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for tag in &self.opc.tags {
            if tag.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Tag names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(tag.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate tag name: '{}'",
                    tag.name
                )));
            }
        }

        for (name, allowed) in names::REQUIRED {
            let tag = self
                .opc
                .tags
                .iter()
                .find(|tag| tag.name == *name)
                .ok_or_else(|| {
                    ConfigError::Validation(format!("Required tag '{name}' is not declared"))
                })?;
            if !allowed.contains(&tag.value_type) {
                let allowed: Vec<String> = allowed.iter().map(|ty| ty.to_string()).collect();
                return Err(ConfigError::Validation(format!(
                    "Tag '{}' declared as {}. Must be one of: {}",
                    name,
                    tag.value_type,
                    allowed.join(", ")
                )));
            }
        }

        if let Some(tag) = self
            .opc
            .tags
            .iter()
            .find(|tag| tag.name == names::INSTRUMENT_CONNECTED)
        {
            if tag.value_type != VariantType::Boolean {
                return Err(ConfigError::Validation(format!(
                    "Tag '{}' declared as {}. Must be Boolean",
                    tag.name, tag.value_type
                )));
            }
        }

        Ok(())
    }

    /// Watchdog settings derived from the `[opc]` section
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            timeout_ticks: self.opc.comms_timeout,
            tick_interval: Duration::from_millis(self.opc.heartbeat_interval_ms),
        }
    }

    /// Polling loop settings derived from the `[instrument]` section
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            integration_time_micros: self.instrument.integration_time_micros,
            sampling_interval: Duration::from_secs_f64(self.instrument.sampling_interval_secs),
            idle_poll_interval: Duration::from_millis(self.instrument.idle_poll_interval_ms),
        }
    }

    /// Protocol server settings derived from the `[opc]` section
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            endpoint: self.opc.endpoint.clone(),
            name: self.opc.name.clone(),
            namespace_uri: self.opc.uri.clone(),
            security_policies: self.opc.security_policies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn required_tags() -> Vec<TagDeclaration> {
        vec![
            TagDeclaration::new("Heartbit_s", VariantType::Boolean),
            TagDeclaration::new("Heartbit_c", VariantType::Boolean),
            TagDeclaration::new("Comms", VariantType::Boolean),
            TagDeclaration::new("SpectraTrigger", VariantType::Float),
            TagDeclaration::new("SpectraCounter", VariantType::UInt32),
            TagDeclaration::new("Wavelengths", VariantType::FloatArray),
            TagDeclaration::new("Intensities", VariantType::FloatArray),
            TagDeclaration::new("DeviceModel", VariantType::String),
            TagDeclaration::new("DeviceSerial", VariantType::String),
        ]
    }

    fn valid_config() -> ServerConfig {
        ServerConfig {
            application: ApplicationConfig::default(),
            opc: OpcConfig {
                endpoint: "opc.tcp://0.0.0.0:4840/spectro/server/".to_string(),
                name: "Test Spectrometer".to_string(),
                uri: "urn:test:spectro".to_string(),
                root_node: "Spectro.".to_string(),
                comms_timeout: 5,
                heartbeat_interval_ms: 1000,
                security_policies: default_security_policies(),
                tags: required_tags(),
            },
            instrument: InstrumentConfig {
                integration_time_micros: 10_000,
                sampling_interval_secs: 0.1,
                idle_poll_interval_ms: 100,
            },
        }
    }

    fn validation_message(config: &ServerConfig) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "verbose".to_string();
        assert!(validation_message(&config).contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = valid_config();
        config.opc.endpoint = "http://localhost:4840".to_string();
        assert!(validation_message(&config).contains("Invalid endpoint"));
    }

    #[test]
    fn test_duplicate_tag_names() {
        let mut config = valid_config();
        config
            .opc
            .tags
            .push(TagDeclaration::new("Comms", VariantType::Boolean));
        assert!(validation_message(&config).contains("Duplicate tag name: 'Comms'"));
    }

    #[test]
    fn test_missing_required_tag() {
        let mut config = valid_config();
        config.opc.tags.retain(|tag| tag.name != "SpectraCounter");
        assert!(validation_message(&config).contains("Required tag 'SpectraCounter'"));
    }

    #[test]
    fn test_required_tag_with_wrong_type() {
        let mut config = valid_config();
        for tag in &mut config.opc.tags {
            if tag.name == "SpectraTrigger" {
                tag.value_type = VariantType::String;
            }
        }
        assert!(validation_message(&config).contains("Tag 'SpectraTrigger' declared as String"));
    }

    #[test]
    fn test_trigger_may_be_unsigned() {
        let mut config = valid_config();
        for tag in &mut config.opc.tags {
            if tag.name == "SpectraTrigger" {
                tag.value_type = VariantType::UInt32;
            }
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_optional_connection_tag_must_be_boolean() {
        let mut config = valid_config();
        config
            .opc
            .tags
            .push(TagDeclaration::new("InstrumentConnected", VariantType::UInt32));
        assert!(validation_message(&config).contains("InstrumentConnected"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid_config();
        config.opc.comms_timeout = 0;
        assert!(validation_message(&config).contains("comms_timeout"));
    }

    #[test]
    fn test_negative_sampling_interval_rejected() {
        let mut config = valid_config();
        config.instrument.sampling_interval_secs = -0.5;
        assert!(validation_message(&config).contains("sampling_interval_secs"));

        config.instrument.sampling_interval_secs = f64::NAN;
        assert!(validation_message(&config).contains("sampling_interval_secs"));
    }

    #[test]
    fn test_oversized_sampling_interval_rejected() {
        let mut config = valid_config();
        config.instrument.sampling_interval_secs = 1e20;
        assert!(validation_message(&config).contains("sampling_interval_secs"));

        config.instrument.sampling_interval_secs = 3600.0;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.polling_config().sampling_interval,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_derived_component_configs() {
        let config = valid_config();

        let watchdog = config.watchdog_config();
        assert_eq!(watchdog.timeout_ticks, 5);
        assert_eq!(watchdog.tick_interval, Duration::from_secs(1));

        let polling = config.polling_config();
        assert_eq!(polling.integration_time_micros, 10_000);
        assert_eq!(polling.sampling_interval, Duration::from_millis(100));

        let server = config.server_settings();
        assert_eq!(server.namespace_uri, "urn:test:spectro");
        assert_eq!(server.security_policies.len(), 3);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[application]
log_level = "debug"
log_format = "json"

[opc]
endpoint = "opc.tcp://127.0.0.1:4840/"
name = "Bench"
uri = "urn:bench"
root_node = "Bench."
comms_timeout = 3
security_policies = ["None"]
tags = [
    {{ name = "Heartbit_s", type = "Boolean" }},
    {{ name = "Heartbit_c", type = "Boolean" }},
    {{ name = "Comms", type = "Boolean" }},
    {{ name = "SpectraTrigger", type = "UInt32" }},
    {{ name = "SpectraCounter", type = "UInt32" }},
    {{ name = "Wavelengths", type = "FloatArray" }},
    {{ name = "Intensities", type = "FloatArray" }},
    {{ name = "DeviceModel", type = "String" }},
    {{ name = "DeviceSerial", type = "String" }},
]

[instrument]
integration_time_micros = 20000
sampling_interval_secs = 0.5
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.opc.root_node, "Bench.");
        assert_eq!(config.opc.heartbeat_interval_ms, 1000);
        assert_eq!(config.opc.security_policies, vec![SecurityPolicy::None]);
        assert_eq!(config.opc.tags[3].value_type, VariantType::UInt32);
        assert_eq!(config.instrument.idle_poll_interval_ms, 100);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[opc]
endpoint = "opc.tcp://127.0.0.1:4840/"
name = "Bench"
uri = "urn:bench"
comms_timeout = 3

[instrument]
integration_time_micros = 20000
sampling_interval_secs = 0.5
"#
        )
        .unwrap();

        let err = ServerConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = ServerConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
        assert_eq!(config.opc.tags.len(), names::REQUIRED.len() + 1);
    }
}
