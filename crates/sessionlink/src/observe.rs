//! Listener registry shared by the binder and the transition coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registered change listeners, keyed by subscription id.
pub(crate) struct Listeners<T> {
    next_id: AtomicU64,
    entries: DashMap<u64, Listener<T>>,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        })
    }

    pub(crate) fn add<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Arc::new(listener));

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.entries.remove(&id);
                }
            })),
        }
    }

    /// Invoke every listener with `value`.
    ///
    /// Listeners are collected first so a listener may unsubscribe itself
    /// (or others) without deadlocking the map.
    pub(crate) fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by `subscribe`; the listener stays registered until this
/// is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription immediately removes its listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for the lifetime of its registry.
    pub fn detach(mut self) {
        self.remove = None;
    }

    fn release(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
