//! Configuration System
//!
//! Configuration is loaded with Figment from (in order of precedence):
//! 1. Environment variables prefixed with `SPECTRA_OPC_` (`__` separates nested keys)
//! 2. TOML configuration file (default: `config/spectra_opc.toml`)
//!
//! # Example
//!
//! ```no_run
//! use spectra_opc::config::ServerConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load()?;
//!     println!("Endpoint: {}", config.opc.endpoint);
//!     println!("Declared tags: {}", config.opc.tags.len());
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! ```text
//! # Raise verbosity
//! SPECTRA_OPC_APPLICATION__LOG_LEVEL=debug
//!
//! # Longer integration time
//! SPECTRA_OPC_INSTRUMENT__INTEGRATION_TIME_MICROS=20000
//! ```

pub mod server_config;

pub use server_config::{
    ApplicationConfig, ConfigError, InstrumentConfig, LogFormat, OpcConfig, SecurityPolicy,
    ServerConfig, TagDeclaration, DEFAULT_CONFIG_PATH,
};
