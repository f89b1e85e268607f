//! Event bus for cross-manager notifications
//!
//! Managers never call each other to announce changes. Each publishes
//! [`ManagerEvent`]s on a shared [`EventBus`] handle it received at
//! construction, and interested managers subscribe with
//! [`EventBus::listen`].
//!
//! # Example
//!
//! ```rust
//! use taskgenius_index::events::{EventBus, EventKind, EventPayload, ManagerEvent};
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//! let mut subscriber = bus.subscribe();
//!
//! bus.publish(ManagerEvent::new(
//!     EventKind::FileModified,
//!     EventPayload::file("notes/today.md"),
//!     "file-manager",
//! ));
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.path(), Some("notes/today.md"));
//! # });
//! ```

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Channel capacity for broadcast events
const CHANNEL_CAPACITY: usize = 1024;

/// Event types published by the managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    FileCreated,
    FileModified,
    FileDeleted,
    MetadataChanged,
    ProjectDataUpdated,
    TaskDataUpdated,
}

/// What happened to the task cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    FileIndexed,
    FileRemoved,
    TaskUpdated,
    TaskDeleted,
    CacheLoaded,
    CacheCleared,
}

/// Event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    File {
        path: String,
    },
    Project {
        path: String,
        project: Option<String>,
    },
    Tasks {
        action: TaskAction,
        path: Option<String>,
        task_ids: Vec<String>,
    },
}

impl EventPayload {
    pub fn file(path: impl Into<String>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn tasks(action: TaskAction, path: Option<String>, task_ids: Vec<String>) -> Self {
        Self::Tasks {
            action,
            path,
            task_ids,
        }
    }
}

/// Envelope published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerEvent {
    pub kind: EventKind,
    pub data: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Id of the publishing manager
    pub source: String,
}

impl ManagerEvent {
    pub fn new(kind: EventKind, data: EventPayload, source: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// File path the event concerns, if any
    pub fn path(&self) -> Option<&str> {
        match &self.data {
            EventPayload::File { path } | EventPayload::Project { path, .. } => Some(path),
            EventPayload::Tasks { path, .. } => path.as_deref(),
        }
    }

    pub fn task_action(&self) -> Option<TaskAction> {
        match &self.data {
            EventPayload::Tasks { action, .. } => Some(*action),
            _ => None,
        }
    }
}

/// Shared pub/sub handle
///
/// Clones share the same underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: ManagerEvent) {
        // Ignore errors - it's ok if there are no subscribers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` for every future event whose kind is in `kinds`
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed. Events are handled one at a time in arrival
    /// order. Abort the returned handle to detach.
    pub fn listen<F, Fut>(&self, kinds: &[EventKind], handler: F) -> JoinHandle<()>
    where
        F: Fn(ManagerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kinds = kinds.to_vec();
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if kinds.contains(&event.kind) => handler(event).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(ManagerEvent::new(
            EventKind::FileCreated,
            EventPayload::file("a.md"),
            "test",
        ));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_filters_by_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = bus.listen(&[EventKind::FileDeleted], move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(ManagerEvent::new(EventKind::FileCreated, EventPayload::file("a.md"), "t"));
        bus.publish(ManagerEvent::new(EventKind::FileDeleted, EventPayload::file("a.md"), "t"));
        bus.publish(ManagerEvent::new(EventKind::FileDeleted, EventPayload::file("b.md"), "t"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        handle.abort();
    }

    #[test]
    fn test_event_path_accessor() {
        let event = ManagerEvent::new(
            EventKind::TaskDataUpdated,
            EventPayload::tasks(TaskAction::TaskDeleted, None, vec!["x".into()]),
            "t",
        );
        assert_eq!(event.path(), None);
        assert_eq!(event.task_action(), Some(TaskAction::TaskDeleted));
    }
}
