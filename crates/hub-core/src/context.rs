//! Context type for tracking request origin and causality

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ids::PluginId;

/// Context for tracking the origin and causality of runtime events
///
/// Every lifecycle event carries a Context. Events caused by a plugin (state
/// updates, emitted device events, auto devices) name that plugin; events
/// caused by an API call carry the caller's context so consumers can follow
/// the chain from a request to everything it set off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// Plugin that originated this action (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<PluginId>,

    /// Parent context ID for tracking causality chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            plugin_id: None,
            parent_id: None,
        }
    }

    /// Create a new context with a specific ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugin_id: None,
            parent_id: None,
        }
    }

    /// Create a new context attributed to a plugin
    pub fn from_plugin(plugin_id: PluginId) -> Self {
        Self {
            id: Ulid::new().to_string(),
            plugin_id: Some(plugin_id),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            plugin_id: self.plugin_id,
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let plugin = PluginId::generate();
        let root = Context::from_plugin(plugin);
        let child = root.child();
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.plugin_id, Some(plugin));
        assert_ne!(child.id, root.id);
    }
}
