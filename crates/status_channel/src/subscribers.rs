//! Status batch observers

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::types::StatusEntry;

pub(crate) type StatusCallback = Arc<dyn Fn(&[StatusEntry]) + Send + Sync>;

/// Observer list for status batches
#[derive(Default)]
pub(crate) struct SubscriberList {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, StatusCallback)>>,
}

impl SubscriberList {
    pub(crate) fn add(self: &Arc<Self>, callback: StatusCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, callback));
        Subscription {
            id,
            list: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Calls every subscriber once. The list is snapshotted first so a
    /// callback may subscribe or unsubscribe without deadlocking.
    pub(crate) fn notify(&self, batch: &[StatusEntry]) {
        let snapshot: Vec<StatusCallback> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(batch);
        }
    }
}

/// Handle returned by `StatusChannel::subscribe`.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    list: Weak<SubscriberList>,
}

impl Subscription {
    /// Removes exactly this callback. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.list.upgrade() {
            Some(list) => list.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for SubscriberList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberList")
            .field("len", &self.len())
            .finish()
    }
}
