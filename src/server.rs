//! Protocol server boundary.
//!
//! The wire-level server (sessions, encoding, security negotiation) is an external
//! collaborator; this crate consumes it through [`ProtocolServer`]. [`LocalServer`] is
//! the in-process implementation: it serves the [`NodeRegistry`] to consumers through
//! [`LocalServer::read`] / [`LocalServer::write`], enforcing per-variable access and
//! types exactly as a networked server would.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SecurityPolicy;
use crate::error::{AppResult, ServerError};
use crate::registry::{AccessLevel, NodeId, NodeRegistry, Variant, VariantType};

/// Endpoint and identity settings for the protocol server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Endpoint address (`opc.tcp://...`)
    pub endpoint: String,
    /// Display name
    pub name: String,
    /// Namespace URI of the published variables
    pub namespace_uri: String,
    /// Security policies offered to clients
    pub security_policies: Vec<SecurityPolicy>,
}

/// Lifecycle of a server publishing a node registry.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    /// Start accepting consumer requests.
    async fn start(&self) -> AppResult<()>;

    /// Stop accepting requests and release the endpoint. Idempotent.
    async fn stop(&self) -> AppResult<()>;

    /// Whether consumer requests are accepted.
    fn is_running(&self) -> bool;

    /// Endpoint address the server listens on.
    fn endpoint(&self) -> &str;
}

/// One row of [`LocalServer::browse`].
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseEntry {
    /// Address of the node
    pub node_id: NodeId,
    /// Logical variable name
    pub name: String,
    /// Declared value type
    pub value_type: VariantType,
    /// Consumer access level
    pub access: AccessLevel,
}

/// In-process server over a shared registry.
pub struct LocalServer {
    settings: ServerSettings,
    registry: Arc<NodeRegistry>,
    running: AtomicBool,
}

impl LocalServer {
    /// Server over `registry`; not started.
    pub fn new(settings: ServerSettings, registry: Arc<NodeRegistry>) -> Self {
        Self {
            settings,
            registry,
            running: AtomicBool::new(false),
        }
    }

    /// Endpoint and identity settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn ensure_running(&self) -> AppResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ServerError::Server(format!(
                "server at {} is not running",
                self.settings.endpoint
            )))
        }
    }

    /// Consumer read of a node's current value.
    pub fn read(&self, node_id: &NodeId) -> AppResult<Variant> {
        self.ensure_running()?;
        Ok(self.registry.find_by_node_id(node_id)?.get_value())
    }

    /// Consumer write; only consumer-writable nodes accept it.
    pub fn write(&self, node_id: &NodeId, value: impl Into<Variant>) -> AppResult<()> {
        self.ensure_running()?;
        let variable = self.registry.find_by_node_id(node_id)?;
        if !variable.access().is_consumer_writable() {
            warn!(node = %node_id, "Rejected consumer write to read-only node");
            return Err(ServerError::AccessDenied(variable.name().to_string()));
        }
        variable.set_value(value)
    }

    /// Every published node in declaration order.
    pub fn browse(&self) -> Vec<BrowseEntry> {
        self.registry
            .variables()
            .map(|var| BrowseEntry {
                node_id: var.node_id().clone(),
                name: var.name().to_string(),
                value_type: var.value_type(),
                access: var.access(),
            })
            .collect()
    }
}

#[async_trait]
impl ProtocolServer for LocalServer {
    async fn start(&self) -> AppResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Server(format!(
                "server at {} already started",
                self.settings.endpoint
            )));
        }
        info!(
            endpoint = %self.settings.endpoint,
            name = %self.settings.name,
            namespace = %self.settings.namespace_uri,
            policies = ?self.settings.security_policies,
            nodes = self.registry.len(),
            "OPC UA server started"
        );
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(endpoint = %self.settings.endpoint, "OPC UA server stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagDeclaration;
    use crate::registry::names;

    fn test_server() -> LocalServer {
        let decls = vec![
            TagDeclaration::new(names::HEARTBEAT_CLIENT, VariantType::Boolean),
            TagDeclaration::new(names::SPECTRA_TRIGGER, VariantType::Float),
            TagDeclaration::new(names::INTENSITIES, VariantType::FloatArray),
        ];
        let registry = NodeRegistry::from_declarations("urn:test", "Spectro.", &decls).unwrap();
        LocalServer::new(
            ServerSettings {
                endpoint: "opc.tcp://127.0.0.1:4840/".to_string(),
                name: "Test".to_string(),
                namespace_uri: "urn:test".to_string(),
                security_policies: vec![SecurityPolicy::None],
            },
            Arc::new(registry),
        )
    }

    fn node(name: &str) -> NodeId {
        NodeId::new(2, format!("Spectro.{name}"))
    }

    #[tokio::test]
    async fn test_requests_rejected_until_started() {
        let server = test_server();
        assert!(matches!(
            server.read(&node(names::INTENSITIES)),
            Err(ServerError::Server(_))
        ));

        server.start().await.unwrap();
        assert_eq!(
            server.read(&node(names::INTENSITIES)).unwrap(),
            Variant::FloatArray(vec![])
        );

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(server.read(&node(names::INTENSITIES)).is_err());
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let server = test_server();
        server.start().await.unwrap();
        assert!(server.start().await.is_err());
        server.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_write_access() {
        let server = test_server();
        server.start().await.unwrap();

        server.write(&node(names::HEARTBEAT_CLIENT), true).unwrap();
        assert_eq!(
            server.read(&node(names::HEARTBEAT_CLIENT)).unwrap(),
            Variant::Boolean(true)
        );

        server.write(&node(names::SPECTRA_TRIGGER), 1.0).unwrap();

        let err = server
            .write(&node(names::INTENSITIES), vec![1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, ServerError::AccessDenied(name) if name == names::INTENSITIES));
    }

    #[tokio::test]
    async fn test_consumer_write_type_checked() {
        let server = test_server();
        server.start().await.unwrap();

        let err = server.write(&node(names::SPECTRA_TRIGGER), true).unwrap_err();
        assert!(matches!(err, ServerError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let server = test_server();
        server.start().await.unwrap();
        assert!(matches!(
            server.read(&NodeId::new(2, "Spectro.Missing")),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_browse_lists_nodes_in_order() {
        let server = test_server();
        let entries = server.browse();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].node_id.to_string(), "ns=2;s=Spectro.Heartbit_c");
        assert_eq!(entries[2].access, AccessLevel::ReadOnly);
    }
}
