pub mod db;
pub mod events;

pub use db::*;
pub use events::{ChangePublisher, EventBus, InMemoryEvent, InMemoryPublisher, Outbox, OutboxEvent};
