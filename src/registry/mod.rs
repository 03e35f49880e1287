//! Node Registry
//!
//! Owns every variable the server publishes. Each [`Variable`] wraps a
//! `tokio::sync::watch` channel: the sender holds the current value, so reads and
//! writes are atomic per variable and any number of readers (the watchdog, the
//! polling loop, protocol consumers) observe a fully written value, never a partial one.
//!
//! Variables are created once at start-up from the declaration list in the
//! configuration and live for the process lifetime. A variable's type never
//! changes; writes that disagree with it are rejected with
//! [`ServerError::TypeMismatch`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = NodeRegistry::new("urn:spectra");
//! let counter = registry.create("SpectraCounter", VariantType::UInt32, "Spectro.")?;
//! registry.set_value(&counter, 7u32)?;
//! assert_eq!(registry.get_value(&counter), Variant::UInt32(7));
//! ```

pub mod names;
mod variant;

pub use variant::{Variant, VariantType};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::config::TagDeclaration;
use crate::error::{AppResult, ServerError};

/// Namespace index of the first application namespace (0 and 1 are reserved).
pub const APPLICATION_NAMESPACE_INDEX: u16 = 2;

/// Shared reference to a registered variable.
pub type VariableHandle = Arc<Variable>;

/// Address of a variable as seen by protocol consumers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index
    pub namespace: u16,
    /// String identifier within the namespace
    pub identifier: String,
}

impl NodeId {
    /// Node id with a string identifier.
    pub fn new(namespace: u16, identifier: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};s={}", self.namespace, self.identifier)
    }
}

/// Who may write a variable besides this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    /// Consumers may only read.
    ReadOnly,
    /// Consumers may read and write (heartbeat pair, trigger).
    ConsumerWritable,
}

impl AccessLevel {
    /// Whether protocol consumers may write.
    pub fn is_consumer_writable(self) -> bool {
        self == AccessLevel::ConsumerWritable
    }
}

/// A named, typed slot published to protocol consumers.
pub struct Variable {
    name: String,
    node_id: NodeId,
    value_type: VariantType,
    access: AccessLevel,
    /// The watch channel sender (holds current value)
    value: watch::Sender<Variant>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("node_id", &self.node_id.to_string())
            .field("value_type", &self.value_type)
            .field("access", &self.access)
            .finish()
    }
}

impl Variable {
    fn new(name: String, node_id: NodeId, value_type: VariantType, access: AccessLevel) -> Self {
        let (value, _) = watch::channel(value_type.zero_value());
        Self {
            name,
            node_id,
            value_type,
            access,
            value,
        }
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node id consumers address this variable with.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Declared type; fixed for the variable's lifetime.
    pub fn value_type(&self) -> VariantType {
        self.value_type
    }

    /// Consumer access level.
    pub fn access(&self) -> AccessLevel {
        self.access
    }

    /// Current value (clone), without side effects.
    pub fn get_value(&self) -> Variant {
        self.value.borrow().clone()
    }

    /// Overwrite the current value, notifying subscribers.
    ///
    /// Fails with [`ServerError::TypeMismatch`] if the value's type disagrees with
    /// the declared type; the stored value is left untouched in that case.
    pub fn set_value(&self, value: impl Into<Variant>) -> AppResult<()> {
        let value = value.into();
        let found = value.variant_type();
        if found != self.value_type {
            return Err(ServerError::TypeMismatch {
                name: self.name.clone(),
                expected: self.value_type,
                found,
            });
        }
        self.value.send_replace(value);
        Ok(())
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<Variant> {
        self.value.subscribe()
    }
}

/// Mapping from logical variable names to published variables.
///
/// Built mutably during start-up, then shared behind an `Arc`; after that
/// the set of variables is fixed and only values change.
#[derive(Debug)]
pub struct NodeRegistry {
    namespace_uri: String,
    namespace_index: u16,
    variables: HashMap<String, VariableHandle>,
    node_ids: HashMap<NodeId, String>,
    /// Declaration order, for browsing
    order: Vec<String>,
}

impl NodeRegistry {
    /// Create an empty registry for the given namespace URI.
    pub fn new(namespace_uri: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            namespace_index: APPLICATION_NAMESPACE_INDEX,
            variables: HashMap::new(),
            node_ids: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build a registry from an ordered declaration list.
    ///
    /// Names listed in [`names::CONSUMER_WRITABLE`] are created consumer-writable,
    /// everything else read-only.
    pub fn from_declarations(
        namespace_uri: impl Into<String>,
        root_prefix: &str,
        declarations: &[TagDeclaration],
    ) -> AppResult<Self> {
        let mut registry = Self::new(namespace_uri);
        for decl in declarations {
            let access = if names::is_consumer_writable(&decl.name) {
                AccessLevel::ConsumerWritable
            } else {
                AccessLevel::ReadOnly
            };
            registry.create_with_access(&decl.name, decl.value_type, root_prefix, access)?;
        }
        debug!(
            namespace = %registry.namespace_uri,
            variables = registry.len(),
            "Node registry built"
        );
        Ok(registry)
    }

    /// Register a new read-only variable initialised to its type's zero value.
    pub fn create(
        &mut self,
        name: &str,
        value_type: VariantType,
        root_prefix: &str,
    ) -> AppResult<VariableHandle> {
        self.create_with_access(name, value_type, root_prefix, AccessLevel::ReadOnly)
    }

    /// Register a new variable with an explicit access level.
    pub fn create_with_access(
        &mut self,
        name: &str,
        value_type: VariantType,
        root_prefix: &str,
        access: AccessLevel,
    ) -> AppResult<VariableHandle> {
        if self.variables.contains_key(name) {
            return Err(ServerError::DuplicateVariable(name.to_string()));
        }

        let node_id = NodeId::new(self.namespace_index, format!("{root_prefix}{name}"));
        if self.node_ids.contains_key(&node_id) {
            return Err(ServerError::DuplicateVariable(node_id.to_string()));
        }

        let variable = Arc::new(Variable::new(
            name.to_string(),
            node_id.clone(),
            value_type,
            access,
        ));
        self.variables.insert(name.to_string(), Arc::clone(&variable));
        self.node_ids.insert(node_id, name.to_string());
        self.order.push(name.to_string());
        Ok(variable)
    }

    /// Look up a variable by logical name.
    pub fn get(&self, name: &str) -> AppResult<VariableHandle> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(name.to_string()))
    }

    /// Look up a variable by the node id consumers address it with.
    pub fn find_by_node_id(&self, node_id: &NodeId) -> AppResult<VariableHandle> {
        self.node_ids
            .get(node_id)
            .and_then(|name| self.variables.get(name))
            .cloned()
            .ok_or_else(|| ServerError::NotFound(node_id.to_string()))
    }

    /// Whether a variable named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Overwrite a variable's value (type-checked).
    pub fn set_value(&self, handle: &Variable, value: impl Into<Variant>) -> AppResult<()> {
        handle.set_value(value)
    }

    /// Read a variable's current value.
    pub fn get_value(&self, handle: &Variable) -> Variant {
        handle.get_value()
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = &VariableHandle> {
        self.order.iter().filter_map(|name| self.variables.get(name))
    }

    /// Namespace URI the variables are published under.
    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    /// Namespace index assigned to every node id.
    pub fn namespace_index(&self) -> u16 {
        self.namespace_index
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether no variables are registered.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Current values of all variables as a JSON object keyed by name.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let map = self
            .variables()
            .map(|var| {
                let value = serde_json::to_value(var.get_value()).unwrap_or(serde_json::Value::Null);
                (var.name().to_string(), value)
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
