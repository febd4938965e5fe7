// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared handles to audio/video termini (output devices and the like).
//!
//! A terminus may be bound by several graphs at once, and some native engines
//! keep internal pointers to it for a short while after a rewire. Handles are
//! therefore reference counted, and dropping the last one does not release the
//! terminus: it is parked in a [`DeferredReleaser`] and only dropped once the
//! grace period has elapsed.
//!
//! # Key Features
//!
//! - **Identity equality**: two handles are equal iff they share the same terminus
//! - **Deduplication**: [`TerminusPool`] hands out the same terminus for the same key
//!   while it is alive (including while parked)
//! - **Timer-driven release**: [`DeferredReleaser::spawn`] purges expired entries

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Kind of stream a terminus renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminusKind {
    Audio,
    Video,
}

/// A concrete sink resource owned by the native engine.
///
/// Implementations release their native resource in `Drop`.
pub trait Terminus: Send + Sync + 'static {
    fn kind(&self) -> TerminusKind;

    /// Human-readable name, used for logging.
    fn name(&self) -> &str;
}

struct Parked {
    deadline: Instant,
    terminus: Arc<dyn Terminus>,
}

/// Grace-period queue for termini whose last handle has been dropped.
#[derive(Clone)]
pub struct DeferredReleaser {
    queue: Arc<Mutex<VecDeque<Parked>>>,
    grace: Duration,
}

impl fmt::Debug for DeferredReleaser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredReleaser")
            .field("grace", &self.grace)
            .field("parked", &self.parked_count())
            .finish()
    }
}

impl DeferredReleaser {
    pub fn new(grace: Duration) -> Self {
        Self { queue: Arc::new(Mutex::new(VecDeque::new())), grace }
    }

    pub const fn grace(&self) -> Duration {
        self.grace
    }

    fn defer(&self, terminus: Arc<dyn Terminus>) {
        tracing::debug!(
            terminus = terminus.name(),
            grace_ms = self.grace.as_millis(),
            "Parking terminus for deferred release"
        );
        let deadline = Instant::now() + self.grace;
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(Parked {
            deadline,
            terminus,
        });
    }

    pub fn parked_count(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Releases every parked terminus whose grace period has expired at `now`.
    /// Returns the number released.
    pub fn purge(&self, now: Instant) -> usize {
        // Deadlines are monotonic because the grace period is fixed.
        let expired: Vec<Parked> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let split = queue.iter().take_while(|p| p.deadline <= now).count();
            queue.drain(..split).collect()
        };
        for parked in &expired {
            tracing::debug!(terminus = parked.terminus.name(), "Releasing terminus");
        }
        expired.len()
    }

    /// Releases everything immediately, regardless of deadlines.
    pub fn drain(&self) -> usize {
        let drained: Vec<Parked> =
            self.queue.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        drained.len()
    }

    /// Spawns the periodic reaper. On cancellation all parked termini are released.
    pub fn spawn(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let releaser = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        let released = releaser.drain();
                        tracing::debug!(released, "Terminus reaper stopped");
                        break;
                    },
                    _ = ticker.tick() => {
                        releaser.purge(Instant::now());
                    },
                }
            }
        })
    }
}

/// Reference-counted handle to a terminus.
pub struct TerminusHandle {
    terminus: Option<Arc<dyn Terminus>>,
    releaser: DeferredReleaser,
}

impl TerminusHandle {
    pub fn new(terminus: Arc<dyn Terminus>, releaser: DeferredReleaser) -> Self {
        Self { terminus: Some(terminus), releaser }
    }

    fn inner(&self) -> Option<&Arc<dyn Terminus>> {
        self.terminus.as_ref()
    }

    pub fn kind(&self) -> Option<TerminusKind> {
        self.inner().map(|t| t.kind())
    }

    pub fn name(&self) -> &str {
        self.inner().map_or("", |t| t.name())
    }

    fn identity(&self) -> *const () {
        self.inner().map_or(std::ptr::null(), |t| Arc::as_ptr(t).cast::<()>())
    }
}

impl Clone for TerminusHandle {
    fn clone(&self) -> Self {
        Self { terminus: self.terminus.clone(), releaser: self.releaser.clone() }
    }
}

impl PartialEq for TerminusHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.identity(), other.identity())
    }
}

impl Eq for TerminusHandle {}

impl fmt::Debug for TerminusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminusHandle")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Drop for TerminusHandle {
    fn drop(&mut self) {
        if let Some(terminus) = self.terminus.take() {
            if Arc::strong_count(&terminus) == 1 {
                self.releaser.defer(terminus);
            }
        }
    }
}

/// Deduplicating factory for termini keyed by device identity.
pub struct TerminusPool<K> {
    entries: Mutex<HashMap<K, Weak<dyn Terminus>>>,
    releaser: DeferredReleaser,
}

impl<K: Eq + Hash + Clone + fmt::Debug> TerminusPool<K> {
    pub fn new(releaser: DeferredReleaser) -> Self {
        Self { entries: Mutex::new(HashMap::new()), releaser }
    }

    pub const fn releaser(&self) -> &DeferredReleaser {
        &self.releaser
    }

    /// Returns a handle to the live terminus for `key`, opening a new one if needed.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `open`.
    pub fn get_or_open<E, F>(&self, key: &K, open: F) -> Result<TerminusHandle, E>
    where
        F: FnOnce() -> Result<Arc<dyn Terminus>, E>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = entries.get(key).and_then(Weak::upgrade) {
            tracing::trace!(key = ?key, "Reusing live terminus");
            return Ok(TerminusHandle::new(live, self.releaser.clone()));
        }

        let terminus = open()?;
        tracing::debug!(key = ?key, terminus = terminus.name(), "Opened terminus");
        entries.insert(key.clone(), Arc::downgrade(&terminus));
        entries.retain(|_, weak| weak.strong_count() > 0);
        Ok(TerminusHandle::new(terminus, self.releaser.clone()))
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
