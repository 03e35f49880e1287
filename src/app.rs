//! Server orchestration
//!
//! [`SpectraServer`] wires the components together in start-up order:
//!
//! 1. Build the node registry from the declared tags (fatal on error)
//! 2. Resolve the watchdog and polling variables (fatal on error)
//! 3. Start the protocol server
//! 4. Spawn the heartbeat watchdog
//! 5. Run the polling loop on the caller's task until shutdown
//!
//! Shutdown runs in reverse: watchdog stopped and joined, then the server is
//! stopped last so consumers see final values until the end.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::AppResult;
use crate::instrument::InstrumentDriver;
use crate::polling::PollingLoop;
use crate::registry::NodeRegistry;
use crate::server::{LocalServer, ProtocolServer};
use crate::shutdown::ShutdownSignal;
use crate::watchdog::Watchdog;

/// Spectrometer publishing server.
pub struct SpectraServer {
    config: ServerConfig,
    registry: Arc<NodeRegistry>,
    server: Arc<LocalServer>,
}

impl SpectraServer {
    /// Build the registry and server from validated configuration.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let registry = Arc::new(NodeRegistry::from_declarations(
            config.opc.uri.clone(),
            &config.opc.root_node,
            &config.opc.tags,
        )?);
        let server = Arc::new(LocalServer::new(
            config.server_settings(),
            Arc::clone(&registry),
        ));

        Ok(Self {
            config,
            registry,
            server,
        })
    }

    /// Variables published by this server.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Consumer-facing server handle.
    pub fn server(&self) -> &Arc<LocalServer> {
        &self.server
    }

    /// Configuration the server was built from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run until `shutdown` is requested or a component fails fatally.
    pub async fn run(
        &self,
        driver: Arc<dyn InstrumentDriver>,
        shutdown: ShutdownSignal,
    ) -> AppResult<()> {
        let watchdog = Watchdog::new(&self.registry, &self.config.watchdog_config())?;
        let polling = PollingLoop::new(&self.registry, driver, self.config.polling_config())?;

        self.server.start().await?;
        let watchdog = watchdog.spawn();

        let polling_result = polling.run(shutdown).await;

        info!("Shutting down");
        watchdog.stop();
        let watchdog_result = watchdog.join().await;
        debug!(snapshot = %self.registry.snapshot_json(), "Final variable values");
        let server_result = self.server.stop().await;

        if let Err(e) = &watchdog_result {
            error!(error = %e, "Heartbeat watchdog failed");
        }
        polling_result.and(watchdog_result).and(server_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ApplicationConfig, InstrumentConfig, OpcConfig, SecurityPolicy, TagDeclaration,
    };
    use crate::error::ServerError;
    use crate::instrument::{DeviceInfo, MockSpectrometer};
    use crate::registry::{names, NodeId, VariantType};
    use crate::shutdown::ShutdownController;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn test_config(tags: Vec<TagDeclaration>) -> ServerConfig {
        ServerConfig {
            application: ApplicationConfig::default(),
            opc: OpcConfig {
                endpoint: "opc.tcp://127.0.0.1:4840/spectro/".to_string(),
                name: "Test Spectrometer".to_string(),
                uri: "urn:spectro:test".to_string(),
                root_node: "Spectro.".to_string(),
                comms_timeout: 3,
                heartbeat_interval_ms: 1000,
                security_policies: vec![SecurityPolicy::None],
                tags,
            },
            instrument: InstrumentConfig {
                integration_time_micros: 10_000,
                sampling_interval_secs: 0.1,
                idle_poll_interval_ms: 100,
            },
        }
    }

    fn driver() -> Arc<MockSpectrometer> {
        Arc::new(
            MockSpectrometer::builder()
                .device(DeviceInfo::new("SN-1", "USB2000"))
                .pixel_count(16)
                .build(),
        )
    }

    #[test]
    fn test_duplicate_tags_fail_construction() {
        let mut tags = names::required_declarations();
        tags.push(TagDeclaration::new(names::COMMS, VariantType::Boolean));
        assert!(matches!(
            SpectraServer::new(test_config(tags)),
            Err(ServerError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn test_server_built_from_config() {
        let app = SpectraServer::new(test_config(names::required_declarations())).unwrap();
        let server = app.server();
        assert_eq!(server.endpoint(), "opc.tcp://127.0.0.1:4840/spectro/");
        assert_eq!(server.settings().namespace_uri, "urn:spectro:test");
        assert_eq!(server.settings().security_policies, vec![SecurityPolicy::None]);
        assert_eq!(app.registry().namespace_index(), 2);
        assert_eq!(app.registry().len(), names::REQUIRED.len());
    }

    #[tokio::test]
    async fn test_missing_variable_fails_before_start() {
        let tags: Vec<TagDeclaration> = names::required_declarations()
            .into_iter()
            .filter(|tag| tag.name != names::HEARTBEAT_CLIENT)
            .collect();
        let app = SpectraServer::new(test_config(tags)).unwrap();
        let controller = ShutdownController::new();

        let err = app.run(driver(), controller.signal()).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
        assert!(!app.server().is_running());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_run_serves_until_shutdown() {
        let app = SpectraServer::new(test_config(names::required_declarations())).unwrap();
        let controller = ShutdownController::new();

        let consumer = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let server = app.server();
            assert!(server.is_running());

            let ns = app.registry().namespace_index();
            let trigger = NodeId::new(ns, format!("Spectro.{}", names::SPECTRA_TRIGGER));
            server.write(&trigger, 1.0).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;

            let counter = NodeId::new(ns, format!("Spectro.{}", names::SPECTRA_COUNTER));
            let count = server.read(&counter).unwrap().as_u32().unwrap();
            controller.request();
            count
        };

        let (result, count) = tokio::join!(app.run(driver(), controller.signal()), consumer);
        result.unwrap();
        assert!(count >= 3, "only {count} samples published");
        assert!(!app.server().is_running());
        assert!(logs_contain("OPC UA server started"));
        assert!(logs_contain("Instrument connected"));
        assert!(logs_contain("OPC UA server stopped"));
    }
}
