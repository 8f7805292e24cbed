//! Event store facade: emit and look up lifecycle events.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::store::LifecycleStore;
use signet_shared::{EventSource, EventType, LifecycleEvent};

/// Append-only log of lifecycle events. Emit performs a single insert; on
/// failure the caller must not assume the event was recorded (there is no
/// retry at this layer).
pub struct EventLog {
    store: Arc<dyn LifecycleStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self { store }
    }

    /// Record one lifecycle event with `processed = false` and return its id.
    pub async fn emit(
        &self,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        event_type: EventType,
        source: EventSource,
        data: Option<serde_json::Value>,
    ) -> EngineResult<LifecycleEvent> {
        let event = LifecycleEvent::new(
            organization_id,
            user_id,
            event_type,
            source,
            data.unwrap_or_else(|| serde_json::json!({})),
        );

        self.store.insert_event(&event).await?;

        info!(
            event_id = %event.id,
            organization_id = %organization_id,
            event_type = event_type.as_str(),
            source = source.as_str(),
            "Lifecycle event emitted"
        );

        Ok(event)
    }

    pub async fn get(&self, id: Uuid) -> EngineResult<Option<LifecycleEvent>> {
        self.store.get_event(id).await
    }
}
