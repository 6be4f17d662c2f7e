//! 인메모리 이벤트 버스
//!
//! 이벤트 이름(`"{table}.{created|updated|deleted}"`)별로 핸들러를 등록하고,
//! 발행 시 등록된 핸들러를 동기적으로 호출합니다. 버스는 전역이 아니라
//! 명시적으로 만들어 데이터베이스에 주입합니다.

use crate::monitoring::metrics::Metrics;
use crate::service::db::core::transaction::Transaction;
use crate::service::db::core::types::{DbChangeData, DbChangeType};
use crate::service::events::ChangePublisher;
use crate::tool::current_time::CurrentTime;
use crate::tool::data_utils::{deep_compare, WatchedProperty};
use crate::tool::error::DbResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the `subscribe()` channel; slow receivers lag instead of blocking publishers.
const BROADCAST_CAPACITY: usize = 1024;

/// 버스로 전달되는 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMemoryEvent {
    pub name: String,
    pub table: String,
    pub change_type: DbChangeType,
    pub doc: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_doc: Option<Value>,
    /// RFC3339, stamped when published
    pub created_at: String,
}

impl InMemoryEvent {
    pub fn event_name(table: &str, change_type: DbChangeType) -> String {
        format!("{}.{}", table, change_type.past_tense())
    }

    pub fn new(table: &str, change_type: DbChangeType, data: DbChangeData) -> Self {
        Self {
            name: Self::event_name(table, change_type),
            table: table.to_string(),
            change_type,
            doc: data.doc,
            prev_doc: data.prev_doc,
            created_at: CurrentTime::new().to_rfc3339(),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&InMemoryEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    handler: EventHandler,
    once: bool,
}

/// 프로세스 내부 발행/구독 버스
pub struct EventBus {
    handlers: DashMap<String, Vec<Registration>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<InMemoryEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    fn register(&self, name: &str, handler: EventHandler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push(Registration { id, handler, once });
        id
    }

    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&InMemoryEvent) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(handler), false)
    }

    /// Handler runs for the next matching event only
    pub fn once<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&InMemoryEvent) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(handler), true)
    }

    /// `"{entity}.updated"` handler that runs only when a watched property changed
    /// between `prev_doc` and `doc`.
    pub fn on_updated<F>(
        &self,
        entity: &str,
        properties: Vec<WatchedProperty>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&InMemoryEvent) + Send + Sync + 'static,
    {
        let name = InMemoryEvent::event_name(entity, DbChangeType::Update);
        self.on(&name, move |event| {
            if deep_compare(&event.doc, event.prev_doc.as_ref(), &properties) {
                handler(event);
            }
        })
    }

    pub fn off(&self, name: &str, id: SubscriptionId) -> bool {
        match self.handlers.get_mut(name) {
            Some(mut registrations) => {
                let before = registrations.len();
                registrations.retain(|r| r.id != id);
                registrations.len() != before
            }
            None => false,
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.handlers.get(name).map(|r| r.len()).unwrap_or(0)
    }

    /// Every published event, independent of names
    pub fn subscribe(&self) -> broadcast::Receiver<InMemoryEvent> {
        self.sender.subscribe()
    }

    /// Calls the handlers registered for `event.name`; returns how many ran.
    pub fn publish(&self, event: InMemoryEvent) -> usize {
        // handlers are cloned out so they may (un)subscribe while running
        let handlers: Vec<EventHandler> = {
            match self.handlers.get_mut(&event.name) {
                Some(mut registrations) => {
                    let snapshot = registrations.iter().map(|r| r.handler.clone()).collect();
                    registrations.retain(|r| !r.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };

        for handler in &handlers {
            handler(&event);
        }

        let _ = self.sender.send(event);
        handlers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes changes to an `EventBus` after the write resolved
pub struct InMemoryPublisher {
    bus: Arc<EventBus>,
}

impl InMemoryPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[async_trait]
impl ChangePublisher for InMemoryPublisher {
    async fn publish_db_change(
        &self,
        table: &str,
        change_type: DbChangeType,
        data: DbChangeData,
        _transaction: Option<&Transaction>,
    ) -> DbResult<()> {
        let event = InMemoryEvent::new(table, change_type, data);
        let name = event.name.clone();
        let delivered = self.bus.publish(event);
        Metrics::record_change_event(self.sink_name(), change_type.as_str());
        debug!("published in-memory event: {} ({} handlers)", name, delivered);
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        false
    }

    fn sink_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<InMemoryEvent>>>, impl Fn(&InMemoryEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event: &InMemoryEvent| sink.lock().push(event.clone()))
    }

    #[tokio::test]
    async fn test_publisher_names_events_by_table_and_type() {
        let bus = Arc::new(EventBus::new());
        let (seen, handler) = recorder();
        bus.on("users.created", handler);

        let publisher = InMemoryPublisher::new(bus.clone());
        publisher
            .publish_db_change("users", DbChangeType::Create, DbChangeData::new(json!({"id": 1})), None)
            .await
            .unwrap();
        publisher
            .publish_db_change("users", DbChangeType::Delete, DbChangeData::new(json!({"id": 1})), None)
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "users.created");
        assert_eq!(seen[0].doc, json!({"id": 1}));
        assert!(!seen[0].created_at.is_empty());
    }

    #[test]
    fn test_once_and_off() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.once("t.updated", handler);
        let (other_seen, other) = recorder();
        let id = bus.on("t.updated", other);

        let event = InMemoryEvent::new("t", DbChangeType::Update, DbChangeData::new(json!({})));
        assert_eq!(bus.publish(event.clone()), 2);
        assert!(bus.off("t.updated", id));
        assert_eq!(bus.publish(event), 0);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(other_seen.lock().len(), 1);
        assert_eq!(bus.listener_count("t.updated"), 0);
    }

    #[test]
    fn test_on_updated_filters_unchanged_properties() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.on_updated(
            "users",
            vec![
                "profile.name".into(),
                WatchedProperty::ChangedTo(vec![("status".to_string(), json!("active"))]),
            ],
            handler,
        );

        let unchanged = DbChangeData::with_prev(
            json!({"profile": {"name": "A"}, "status": "new", "age": 2}),
            json!({"profile": {"name": "A"}, "status": "new", "age": 1}),
        );
        bus.publish(InMemoryEvent::new("users", DbChangeType::Update, unchanged));
        assert!(seen.lock().is_empty());

        let renamed = DbChangeData::with_prev(
            json!({"profile": {"name": "B"}, "status": "new"}),
            json!({"profile": {"name": "A"}, "status": "new"}),
        );
        bus.publish(InMemoryEvent::new("users", DbChangeType::Update, renamed));

        let activated = DbChangeData::with_prev(
            json!({"profile": {"name": "B"}, "status": "active"}),
            json!({"profile": {"name": "B"}, "status": "new"}),
        );
        bus.publish(InMemoryEvent::new("users", DbChangeType::Update, activated));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_receives_every_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(InMemoryEvent::new("a", DbChangeType::Create, DbChangeData::new(json!(1))));
        bus.publish(InMemoryEvent::new("b", DbChangeType::Delete, DbChangeData::new(json!(2))));

        assert_eq!(rx.recv().await.unwrap().name, "a.created");
        assert_eq!(rx.recv().await.unwrap().name, "b.deleted");
    }
}
