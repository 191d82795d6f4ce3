//! In-process publish/subscribe for lifecycle events (§4.3).
//!
//! Not a durability mechanism: it exists only to decouple the engine from
//! observability sinks. Grounded on the teacher's use of `dashmap` for
//! lock-free concurrent maps rather than a `Mutex<HashMap<..>>`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

const DEFAULT_LISTENER_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    WorkflowRecovered,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    ScheduleFired,
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WorkflowStarted => "workflow:started",
            Self::WorkflowCompleted => "workflow:completed",
            Self::WorkflowFailed => "workflow:failed",
            Self::WorkflowCancelled => "workflow:cancelled",
            Self::WorkflowRecovered => "workflow:recovered",
            Self::NodeStarted => "node:started",
            Self::NodeCompleted => "node:completed",
            Self::NodeFailed => "node:failed",
            Self::ScheduleFired => "schedule:fired",
            Self::Custom(name) => name,
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub workflow_instance_id: Option<i64>,
    pub node_instance_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            workflow_instance_id: None,
            node_instance_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn for_instance(mut self, instance_id: i64) -> Self {
        self.workflow_instance_id = Some(instance_id);
        self
    }

    pub fn for_node(mut self, node_instance_id: i64) -> Self {
        self.node_instance_id = Some(node_instance_id);
        self
    }

    fn scoped_channel(&self) -> Option<String> {
        self.workflow_instance_id
            .map(|id| format!("{id}:{}", self.event_type))
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("listener limit of {limit} exceeded for channel {channel}")]
    ListenerLimitExceeded { channel: String, limit: usize },
}

struct Subscription {
    id: Uuid,
    instance_scope: Option<i64>,
    listener: Listener,
}

/// Single-process pub/sub bus, keyed by event-type channel and, optionally,
/// by an `"<instance_id>:<type>"` scoped channel.
pub struct EventBus {
    channels: DashMap<String, Vec<Subscription>>,
    listener_limit: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_LIMIT)
    }
}

impl EventBus {
    pub fn new(listener_limit: usize) -> Self {
        Self {
            channels: DashMap::new(),
            listener_limit,
        }
    }

    /// Subscribe to every event of `event_type`, regardless of instance.
    pub fn subscribe(
        &self,
        event_type: EventType,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Uuid, EventBusError> {
        self.subscribe_inner(event_type.to_string(), None, listener)
    }

    /// Subscribe to `event_type` events scoped to a single instance.
    pub fn subscribe_scoped(
        &self,
        event_type: EventType,
        instance_id: i64,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Uuid, EventBusError> {
        let channel = format!("{instance_id}:{event_type}");
        self.subscribe_inner(channel, Some(instance_id), listener)
    }

    fn subscribe_inner(
        &self,
        channel: String,
        instance_scope: Option<i64>,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Uuid, EventBusError> {
        let mut entry = self.channels.entry(channel.clone()).or_default();
        if entry.len() >= self.listener_limit {
            return Err(EventBusError::ListenerLimitExceeded {
                channel,
                limit: self.listener_limit,
            });
        }
        let id = Uuid::now_v7();
        entry.push(Subscription {
            id,
            instance_scope,
            listener: Arc::new(listener),
        });
        Ok(id)
    }

    /// Publish to the type channel, and additionally to the scoped channel
    /// when the event carries an instance id.
    pub fn emit(&self, event: Event) {
        let type_channel = event.event_type.to_string();
        if let Some(mut subs) = self.channels.get_mut(&type_channel) {
            for sub in subs.iter() {
                (sub.listener)(&event);
            }
        }
        if let Some(scoped) = event.scoped_channel() {
            if let Some(subs) = self.channels.get(&scoped) {
                for sub in subs.iter() {
                    (sub.listener)(&event);
                }
            }
        }
    }

    /// Remove a single subscriber by its handle.
    pub fn unsubscribe(&self, id: Uuid) {
        for mut entry in self.channels.iter_mut() {
            entry.retain(|s| s.id != id);
        }
    }

    /// Remove every subscriber scoped to `instance_id`.
    pub fn unsubscribe_instance(&self, instance_id: i64) {
        for mut entry in self.channels.iter_mut() {
            entry.retain(|s| s.instance_scope != Some(instance_id));
        }
    }

    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.channels
            .get(&event_type.to_string())
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn emit_reaches_type_subscriber() {
        let bus = EventBus::default();
        let count = StdArc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(EventType::WorkflowStarted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.emit(Event::new(EventType::WorkflowStarted, serde_json::json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_reaches_scoped_subscriber() {
        let bus = EventBus::default();
        let count = StdArc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe_scoped(EventType::NodeCompleted, 7, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.emit(Event::new(EventType::NodeCompleted, serde_json::json!({})).for_instance(7));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.emit(Event::new(EventType::NodeCompleted, serde_json::json!({})).for_instance(8));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_by_handle() {
        let bus = EventBus::default();
        let count = StdArc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus
            .subscribe(EventType::WorkflowCompleted, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        bus.unsubscribe(id);
        bus.emit(Event::new(EventType::WorkflowCompleted, serde_json::json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_instance_removes_only_scoped_subscribers() {
        let bus = EventBus::default();
        bus.subscribe_scoped(EventType::NodeFailed, 1, |_| {}).unwrap();
        assert_eq!(bus.listener_count(&EventType::NodeFailed), 0); // type channel, not scoped
        bus.unsubscribe_instance(1);
    }

    #[test]
    fn listener_limit_enforced() {
        let bus = EventBus::new(1);
        bus.subscribe(EventType::ScheduleFired, |_| {}).unwrap();
        let err = bus.subscribe(EventType::ScheduleFired, |_| {}).unwrap_err();
        assert!(matches!(err, EventBusError::ListenerLimitExceeded { .. }));
    }
}
