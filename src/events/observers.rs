//! Observer registry used for playback and cache notifications.
//!
//! Observers are boxed closures registered under an [`ObserverId`]. Removal
//! is idempotent. Notification runs every observer in registration order and
//! isolates panics: a panicking observer is logged and skipped, the others
//! still run, and the notifying component keeps its own state consistent.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use log::error;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`ObserverList::add`]. Unique across all lists, so a
/// component owning several lists can route removal by id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Callback<T> = Box<dyn FnMut(&T)>;

/// Ordered list of callbacks receiving `&T`.
pub struct ObserverList<T> {
    label: &'static str,
    entries: Vec<(ObserverId, Callback<T>)>,
}

impl<T> ObserverList<T> {
    /// `label` names the list in log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, callback: impl FnMut(&T) + 'static) -> ObserverId {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.push((id, Box::new(callback)));
        id
    }

    /// Returns whether an observer was removed. Removing twice is a no-op.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(eid, _)| *eid != id);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call every observer with `value`. Returns how many observers panicked.
    pub fn notify(&mut self, value: &T) -> usize {
        let mut failures = 0;
        for (id, callback) in self.entries.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(value)));
            if outcome.is_err() {
                failures += 1;
                error!("[{}] observer {:?} panicked; skipping it", self.label, id);
            }
        }
        failures
    }
}

impl<T> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("label", &self.label)
            .field(
                "ids",
                &self.entries.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .finish()
    }
}
