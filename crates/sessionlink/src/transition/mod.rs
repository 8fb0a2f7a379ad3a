//! Page transition coordinator.
//!
//! A transition request stores the target in a single pending slot (which
//! drives a "leaving page" indicator), waits a short delay, then hands the
//! URL to the host's [`Navigator`] and clears the slot.
//!
//! ```text
//! Idle --request--> Pending --delay--> Navigating --done--> Idle
//! ```
//!
//! A second request while one is pending follows the [`ReentryPolicy`]:
//! `Replace` cancels the armed timer and re-arms it for the new target,
//! `Ignore` keeps the armed transition. A navigation already in progress is
//! never aborted by a new request; it finishes but no longer owns the slot.

mod navigator;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use navigator::{HardRedirect, NavigationError, Navigator};

use crate::config::TransitionConfig;
use crate::observe::{Listeners, Subscription};

/// Delay used when neither the request nor the builder sets one.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

/// A requested navigation that has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub target_url: String,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionPhase {
    Idle,
    Pending,
    Navigating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionOutcome {
    /// Stored as pending; navigation follows after the delay.
    Scheduled,
    /// No navigator mounted; redirected immediately without a pending state.
    Redirected,
    /// A transition was already under way and the policy kept it.
    Ignored,
}

/// What to do with a request that arrives while another is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReentryPolicy {
    #[default]
    Replace,
    Ignore,
}

/// Process-wide coordinator; clones share the same pending slot.
#[derive(Clone)]
pub struct TransitionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    navigator: Option<Arc<dyn Navigator>>,
    fallback: Arc<dyn HardRedirect>,
    default_delay: Duration,
    policy: ReentryPolicy,
    slot: Mutex<TransitionSlot>,
    pending_tx: watch::Sender<Option<PendingTransition>>,
    phase_tx: watch::Sender<TransitionPhase>,
    listeners: Arc<Listeners<Option<PendingTransition>>>,
}

struct TransitionSlot {
    /// Bumped on every request and reset; a timer only acts while its
    /// sequence number is still current.
    seq: u64,
    pending: Option<PendingTransition>,
    phase: TransitionPhase,
    timer: Option<JoinHandle<()>>,
}

pub struct TransitionCoordinatorBuilder {
    navigator: Option<Arc<dyn Navigator>>,
    fallback: Arc<dyn HardRedirect>,
    default_delay: Duration,
    policy: ReentryPolicy,
}

impl TransitionCoordinatorBuilder {
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn reentry(mut self, policy: ReentryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(self, config: &TransitionConfig) -> Self {
        self.default_delay(config.default_delay()).reentry(config.reentry)
    }

    pub fn build(self) -> TransitionCoordinator {
        let (pending_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(TransitionPhase::Idle);

        TransitionCoordinator {
            inner: Arc::new(CoordinatorInner {
                navigator: self.navigator,
                fallback: self.fallback,
                default_delay: self.default_delay,
                policy: self.policy,
                slot: Mutex::new(TransitionSlot {
                    seq: 0,
                    pending: None,
                    phase: TransitionPhase::Idle,
                    timer: None,
                }),
                pending_tx,
                phase_tx,
                listeners: Listeners::new(),
            }),
        }
    }
}

impl TransitionCoordinator {
    /// Start building a coordinator. `fallback` performs the hard redirect
    /// used when no navigator is mounted.
    pub fn builder(fallback: Arc<dyn HardRedirect>) -> TransitionCoordinatorBuilder {
        TransitionCoordinatorBuilder {
            navigator: None,
            fallback,
            default_delay: DEFAULT_DELAY,
            policy: ReentryPolicy::default(),
        }
    }

    /// Request a navigation to `target_url` after `delay` (or the default).
    ///
    /// Never blocks. Scheduling needs a tokio runtime; the redirect fallback
    /// does not.
    pub fn request_transition(
        &self,
        target_url: impl Into<String>,
        delay: Option<Duration>,
    ) -> TransitionOutcome {
        let target_url = target_url.into();

        let Some(navigator) = self.inner.navigator.as_ref() else {
            info!("No navigator mounted; redirecting to {}", target_url);
            self.inner.fallback.redirect(&target_url);
            return TransitionOutcome::Redirected;
        };

        let pending = PendingTransition {
            target_url: target_url.clone(),
            delay: delay.unwrap_or(self.inner.default_delay),
        };

        let changed = {
            let mut slot = lock(&self.inner.slot);
            if slot.phase != TransitionPhase::Idle && self.inner.policy == ReentryPolicy::Ignore {
                debug!(
                    "Ignoring transition to {} while one is {:?}",
                    target_url, slot.phase
                );
                return TransitionOutcome::Ignored;
            }

            // A navigation already handed to the navigator runs to completion.
            let previous = slot.timer.take();
            if slot.phase == TransitionPhase::Pending
                && let Some(timer) = previous
            {
                timer.abort();
            }

            slot.seq += 1;
            slot.pending = Some(pending.clone());
            slot.phase = TransitionPhase::Pending;
            let changed = self.inner.publish(&slot);

            let timer = tokio::spawn(fire(
                Arc::downgrade(&self.inner),
                slot.seq,
                pending.clone(),
            ));
            slot.timer = Some(timer);
            changed
        };

        navigator.prefetch(&target_url);
        debug!(
            "Transition to {} scheduled in {:?}",
            pending.target_url, pending.delay
        );
        if changed {
            self.inner.notify();
        }
        TransitionOutcome::Scheduled
    }

    /// The transition currently pending, if any.
    pub fn current_pending(&self) -> Option<PendingTransition> {
        self.inner.pending_tx.borrow().clone()
    }

    pub fn phase(&self) -> TransitionPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Receiver that follows the pending slot, for driving an indicator.
    pub fn watch(&self) -> watch::Receiver<Option<PendingTransition>> {
        self.inner.pending_tx.subscribe()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Option<PendingTransition>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Whether requests are scheduled or redirected immediately.
    pub fn has_navigator(&self) -> bool {
        self.inner.navigator.is_some()
    }

    /// Cancel any armed or running transition and clear the slot.
    pub fn reset(&self) {
        let changed = {
            let mut slot = lock(&self.inner.slot);
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.seq += 1;
            slot.pending = None;
            slot.phase = TransitionPhase::Idle;
            self.inner.publish(&slot)
        };
        if changed {
            debug!("Pending transition cleared");
            self.inner.notify();
        }
    }
}

impl std::fmt::Debug for TransitionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionCoordinator")
            .field("phase", &self.phase())
            .field("pending", &self.current_pending())
            .field("navigator", &self.has_navigator())
            .finish()
    }
}

impl CoordinatorInner {
    /// Returns whether the pending slot changed.
    fn publish(&self, slot: &TransitionSlot) -> bool {
        let phase = slot.phase;
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });

        let pending = slot.pending.clone();
        self.pending_tx.send_if_modified(|current| {
            if *current == pending {
                return false;
            }
            *current = pending;
            true
        })
    }

    fn notify(&self) {
        let pending = self.pending_tx.borrow().clone();
        self.listeners.notify(&pending);
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let slot = self
            .slot
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
    }
}

async fn fire(inner: Weak<CoordinatorInner>, seq: u64, pending: PendingTransition) {
    tokio::time::sleep(pending.delay).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };

    let navigator = {
        let mut slot = lock(&inner.slot);
        if slot.seq != seq {
            return;
        }
        slot.phase = TransitionPhase::Navigating;
        inner.publish(&slot);
        inner.navigator.clone()
    };

    if let Some(navigator) = navigator {
        debug!("Navigating to {}", pending.target_url);
        if let Err(e) = navigator.navigate(&pending.target_url).await {
            warn!("Navigation to {} failed: {}", pending.target_url, e);
        }
    }

    let changed = {
        let mut slot = lock(&inner.slot);
        if slot.seq != seq {
            return;
        }
        slot.pending = None;
        slot.phase = TransitionPhase::Idle;
        slot.timer = None;
        inner.publish(&slot)
    };
    if changed {
        inner.notify();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
