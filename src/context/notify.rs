//! Context change notifications

use crate::context::changes::RecordDelta;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Pending changes were processed at the end of a unit of work
    ObjectsDidChange,
    /// Changes were pushed to the parent
    DidSave,
}

#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub kind: NotificationKind,
    /// Label of the context that posted the notification
    pub context: String,
    pub delta: RecordDelta,
}

/// Which notifications an observer wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeFrequency {
    #[default]
    EveryChange,
    SaveOnly,
}

impl ChangeFrequency {
    pub(crate) fn kind(self) -> NotificationKind {
        match self {
            ChangeFrequency::EveryChange => NotificationKind::ObjectsDidChange,
            ChangeFrequency::SaveOnly => NotificationKind::DidSave,
        }
    }
}

type Handler = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

struct Entry {
    id: u64,
    kind: NotificationKind,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(&self, kind: NotificationKind, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, kind, handler });
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every matching handler; handlers run without the registry lock held
    pub(crate) fn dispatch(&self, notification: &ChangeNotification) {
        let handlers: Vec<Handler> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == notification.kind)
            .map(|entry| entry.handler.clone())
            .collect();
        for handler in handlers {
            handler(notification);
        }
    }
}

/// Registration returned by `Context::observe`; dropping it unsubscribes
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<ObserverRegistry>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<ObserverRegistry>, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
