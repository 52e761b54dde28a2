//! Hook trait for reacting to watch events.

use async_trait::async_trait;

use super::types::{ResourceEvent, ResourceEventType};

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Hook execution failed: {0}")]
    Execution(String),

    #[error("Channel send failed: {0}")]
    Channel(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HookError {
    pub fn execution(msg: impl Into<String>) -> Self {
        HookError::Execution(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        HookError::Channel(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        HookError::Store(msg.into())
    }
}

/// Asynchronous handler for resource events.
///
/// Hooks run in isolated tasks; errors are logged and never reach the
/// writer that produced the event. Heavy work belongs on an internal
/// channel so `handle` returns quickly.
#[async_trait]
pub trait ResourceHook: Send + Sync {
    /// Unique name for logging.
    fn name(&self) -> &str;

    /// Kinds this hook is interested in. Empty matches all kinds.
    fn kinds(&self) -> &[&str];

    /// Event types this hook handles. Empty matches all.
    fn event_types(&self) -> &[ResourceEventType] {
        &[]
    }

    async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError>;

    async fn on_start(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the dispatcher fell behind and `missed` events were
    /// dropped without reaching `handle`. Hooks that derive work from events
    /// should resynchronize from the store here.
    async fn on_lagged(&self, _missed: u64) -> Result<(), HookError> {
        Ok(())
    }

    fn matches(&self, event: &ResourceEvent) -> bool {
        let kinds = self.kinds();
        if !kinds.is_empty() && !kinds.contains(&event.kind.as_str()) {
            return false;
        }

        let event_types = self.event_types();
        event_types.is_empty() || event_types.contains(&event.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectKey;

    struct KindHook {
        kinds: Vec<&'static str>,
        event_types: Vec<ResourceEventType>,
    }

    #[async_trait]
    impl ResourceHook for KindHook {
        fn name(&self) -> &str {
            "kind_hook"
        }

        fn kinds(&self) -> &[&str] {
            &self.kinds
        }

        fn event_types(&self) -> &[ResourceEventType] {
            &self.event_types
        }

        async fn handle(&self, _event: &ResourceEvent) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn test_matches_kind_and_type() {
        let hook = KindHook {
            kinds: vec!["Endpoint", "Payload"],
            event_types: vec![ResourceEventType::Created],
        };
        let key = ObjectKey::new("default", "x");

        assert!(hook.matches(&ResourceEvent::created("Payload", &key, serde_json::json!({}))));
        assert!(!hook.matches(&ResourceEvent::created("DeliveryJob", &key, serde_json::json!({}))));
        assert!(!hook.matches(&ResourceEvent::deleted("Payload", &key, None)));
    }

    #[test]
    fn test_empty_filters_match_all() {
        let hook = KindHook {
            kinds: vec![],
            event_types: vec![],
        };
        let key = ObjectKey::new("default", "x");
        assert!(hook.matches(&ResourceEvent::deleted("Anything", &key, None)));
    }

    #[test]
    fn test_hook_error_display() {
        assert_eq!(
            HookError::execution("boom").to_string(),
            "Hook execution failed: boom"
        );
        assert_eq!(HookError::store("gone").to_string(), "Store error: gone");
    }
}
