//! Process-wide trigger coordination.
//!
//! Every store queues its notifications here. The coordinator merges them per
//! callback, holds them back while a trigger block is active or a throttle
//! window is still open, and flushes whatever is ready in a single pass.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = TriggerCoordinator::new(Options::default());
//! let store = Store::new(&coordinator, StoreConfig::default());
//!
//! {
//!     let _block = coordinator.block_triggers();
//!     store.trigger("a");
//!     store.trigger("b");
//!     // nothing delivered yet
//! }
//! // subscribers of "a" and "b" have now been notified once each
//! ```

use crate::error::{Result, StoreError};
use crate::options::Options;
use crate::types::{Callback, CallbackId, StoreId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Notification metadata waiting for the next flush.
struct PendingCallback {
    callback: Callback,
    /// Position ticket; `order` slots carrying an older ticket are stale.
    seq: u64,
    /// `None` once an all-keys trigger reached this callback.
    keys: Option<Vec<String>>,
    throttled_until: Option<Instant>,
    bypass_block: bool,
}

/// One queued notification, produced by a store trigger.
pub(crate) struct QueuedCallback {
    pub callback: Callback,
    pub keys: Option<Vec<String>>,
}

/// Pending map keyed by callback identity, iterated in insertion order.
///
/// Removal leaves the entry's `order` slot behind; stale slots are skipped
/// by `take_ready` and compacted once they outnumber live entries.
#[derive(Default)]
struct PendingCallbacks {
    order: Vec<(CallbackId, u64)>,
    entries: HashMap<CallbackId, PendingCallback>,
    next_seq: u64,
}

impl PendingCallbacks {
    fn merge(
        &mut self,
        queued: QueuedCallback,
        throttled_until: Option<Instant>,
        bypass_block: bool,
    ) {
        let id = queued.callback.id();
        match self.entries.get_mut(&id) {
            Some(existing) => {
                match (&mut existing.keys, queued.keys) {
                    (Some(keys), Some(new_keys)) => keys.extend(new_keys),
                    (keys, None) => *keys = None,
                    (None, Some(_)) => {}
                }
                existing.throttled_until = match (existing.throttled_until, throttled_until) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    _ => None,
                };
                existing.bypass_block |= bypass_block;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.order.push((id, seq));
                self.entries.insert(
                    id,
                    PendingCallback {
                        callback: queued.callback,
                        seq,
                        keys: queued.keys,
                        throttled_until,
                        bypass_block,
                    },
                );
            }
        }
    }

    fn is_live(&self, slot: &(CallbackId, u64)) -> bool {
        self.entries.get(&slot.0).is_some_and(|entry| entry.seq == slot.1)
    }

    fn remove(&mut self, id: CallbackId) -> bool {
        if self.entries.remove(&id).is_none() {
            return false;
        }
        if self.order.len() > 2 * self.entries.len() + 64 {
            let order = std::mem::take(&mut self.order);
            let live: Vec<_> = order.into_iter().filter(|slot| self.is_live(slot)).collect();
            self.order = live;
        }
        true
    }

    /// Remove and return every entry allowed to fire, preserving order.
    fn take_ready(
        &mut self,
        now: Instant,
        blocked: bool,
        bypass_throttle: bool,
    ) -> Vec<(Callback, Option<Vec<String>>)> {
        let mut ready = Vec::new();
        let mut remaining = Vec::new();

        for (id, seq) in std::mem::take(&mut self.order) {
            let Some(entry) = self.entries.get(&id).filter(|entry| entry.seq == seq) else {
                continue;
            };
            if blocked && !entry.bypass_block {
                remaining.push((id, seq));
                continue;
            }
            if !bypass_throttle && entry.throttled_until.is_some_and(|until| until > now) {
                remaining.push((id, seq));
                continue;
            }
            if let Some(entry) = self.entries.remove(&id) {
                ready.push((entry.callback, entry.keys.map(dedup_keys)));
            }
        }

        self.order = remaining;
        ready
    }
}

/// Stable de-duplication keeping the first occurrence of each key.
fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

struct CoordinatorState {
    pending: PendingCallbacks,
    block_count: usize,
    flush_in_progress: bool,
    flush_requested: bool,
    throttling_enabled: bool,
    /// Open throttle windows by store, holding the scheduled flush time.
    throttle_windows: HashMap<StoreId, Instant>,
}

/// Shared coordinator for all stores built on it.
pub struct TriggerCoordinator {
    options: Options,
    state: Mutex<CoordinatorState>,
}

static GLOBAL: OnceLock<Arc<TriggerCoordinator>> = OnceLock::new();

impl TriggerCoordinator {
    /// Create an isolated coordinator.
    pub fn new(options: Options) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(CoordinatorState {
                pending: PendingCallbacks::default(),
                block_count: 0,
                flush_in_progress: false,
                flush_requested: false,
                throttling_enabled: true,
                throttle_windows: HashMap::new(),
            }),
        })
    }

    /// The process-wide coordinator, created with default options on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(Options::default())))
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // --- Trigger Blocks ---

    /// Hold back every non-bypassing notification until the matching pop.
    pub fn push_trigger_block(&self) {
        let mut state = self.state.lock();
        state.block_count += 1;
        tracing::debug!(depth = state.block_count, "trigger block pushed");
    }

    /// Release one level of blocking. Flushes when the last level is released.
    pub fn pop_trigger_block(&self) -> Result<()> {
        let released = {
            let mut state = self.state.lock();
            if state.block_count == 0 {
                return Err(StoreError::TriggerBlockOverPopped);
            }
            state.block_count -= 1;
            tracing::debug!(depth = state.block_count, "trigger block popped");
            state.block_count == 0
        };

        if released {
            self.resolve_callbacks();
        }
        Ok(())
    }

    /// Push a trigger block that is popped when the guard drops.
    pub fn block_triggers(self: &Arc<Self>) -> TriggerBlockGuard {
        self.push_trigger_block();
        TriggerBlockGuard {
            coordinator: Arc::clone(self),
        }
    }

    pub fn trigger_block_depth(&self) -> usize {
        self.state.lock().block_count
    }

    // --- Throttling ---

    /// Disabling throttling makes every throttled notification due immediately.
    pub fn set_throttle_status(&self, enabled: bool) {
        self.state.lock().throttling_enabled = enabled;
        tracing::debug!(enabled, "throttle status changed");
        self.resolve_callbacks();
    }

    pub fn is_throttling_enabled(&self) -> bool {
        self.state.lock().throttling_enabled
    }

    /// Earliest scheduled throttle flush, if any window is open.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.state.lock().throttle_windows.values().min().copied()
    }

    /// Close every throttle window whose time has come and flush.
    ///
    /// This is the event-loop turn for throttled stores: hosts call it when
    /// [`next_timer_deadline`](Self::next_timer_deadline) passes. Returns the
    /// number of windows closed.
    pub fn run_timers(&self) -> usize {
        let now = self.options.clock.now();
        let closed = {
            let mut state = self.state.lock();
            let before = state.throttle_windows.len();
            state.throttle_windows.retain(|_, deadline| *deadline > now);
            before - state.throttle_windows.len()
        };

        if closed > 0 {
            tracing::trace!(closed, "throttle windows elapsed");
            self.resolve_callbacks();
        }
        closed
    }

    /// Sleep until the next throttle deadline, then run timers.
    pub fn run_timers_blocking(&self) -> usize {
        let Some(deadline) = self.next_timer_deadline() else {
            return 0;
        };
        let now = self.options.clock.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.run_timers()
    }

    /// Open a throttle window for a store unless one is already open.
    /// Returns the window's scheduled flush time.
    pub(crate) fn open_throttle_window(&self, store: StoreId, throttle: Duration) -> Instant {
        let now = self.options.clock.now();
        let mut state = self.state.lock();
        *state.throttle_windows.entry(store).or_insert_with(|| {
            tracing::debug!(store = %store, ?throttle, "throttle window opened");
            now + throttle
        })
    }

    pub(crate) fn throttle_window(&self, store: StoreId) -> Option<Instant> {
        self.state.lock().throttle_windows.get(&store).copied()
    }

    // --- Pending Callbacks ---

    /// Merge a batch of notifications into the pending map.
    pub(crate) fn queue(
        &self,
        batch: Vec<QueuedCallback>,
        throttled_until: Option<Instant>,
        bypass_block: bool,
    ) {
        let mut state = self.state.lock();
        for queued in batch {
            state.pending.merge(queued, throttled_until, bypass_block);
        }
    }

    /// Drop any pending notification for a callback.
    pub(crate) fn cancel(&self, callback: &Callback) {
        if self.state.lock().pending.remove(callback.id()) {
            tracing::trace!(?callback, "pending notification cancelled");
        }
    }

    pub fn pending_callback_count(&self) -> usize {
        self.state.lock().pending.entries.len()
    }

    /// Fire every pending callback that is allowed to run.
    ///
    /// Re-entrant calls (a callback triggering a store) only mark a flush as
    /// requested; the outermost call keeps draining until nothing new arrives.
    pub(crate) fn resolve_callbacks(&self) {
        loop {
            let ready = {
                let mut state = self.state.lock();
                if state.flush_in_progress {
                    state.flush_requested = true;
                    return;
                }
                state.flush_in_progress = true;
                state.flush_requested = false;

                let blocked = state.block_count > 0;
                let bypass_throttle = !state.throttling_enabled;
                state
                    .pending
                    .take_ready(self.options.clock.now(), blocked, bypass_throttle)
            };

            let flush = FlushInProgress { coordinator: self };
            if !ready.is_empty() {
                tracing::trace!(callbacks = ready.len(), "resolving callbacks");
            }
            for (callback, keys) in &ready {
                callback.call(keys.as_deref());
            }
            drop(flush);

            if !self.state.lock().flush_requested {
                return;
            }
        }
    }
}

/// Clears the in-progress flag even if a callback panics.
struct FlushInProgress<'a> {
    coordinator: &'a TriggerCoordinator,
}

impl Drop for FlushInProgress<'_> {
    fn drop(&mut self) {
        self.coordinator.state.lock().flush_in_progress = false;
    }
}

/// Scoped trigger block, see [`TriggerCoordinator::block_triggers`].
#[must_use = "the block is released as soon as the guard is dropped"]
pub struct TriggerBlockGuard {
    coordinator: Arc<TriggerCoordinator>,
}

impl Drop for TriggerBlockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.coordinator.pop_trigger_block() {
            tracing::warn!("failed to release trigger block: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (Callback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback = Callback::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    fn queued(callback: &Callback, keys: Option<Vec<&str>>) -> QueuedCallback {
        QueuedCallback {
            callback: callback.clone(),
            keys: keys.map(|k| k.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_merge_all_keys_wins() {
        let mut pending = PendingCallbacks::default();
        let (callback, _) = counting_callback();

        pending.merge(queued(&callback, Some(vec!["a"])), None, false);
        pending.merge(queued(&callback, None), None, false);
        pending.merge(queued(&callback, Some(vec!["b"])), None, false);

        let ready = pending.take_ready(Instant::now(), false, false);
        assert_eq!(ready.len(), 1);
        assert!(ready[0].1.is_none());
    }

    #[test]
    fn test_merge_keeps_earliest_deadline_and_bypass() {
        let mut pending = PendingCallbacks::default();
        let (callback, _) = counting_callback();
        let now = Instant::now();

        pending.merge(
            queued(&callback, Some(vec!["a"])),
            Some(now + Duration::from_millis(100)),
            false,
        );
        pending.merge(
            queued(&callback, Some(vec!["b"])),
            Some(now + Duration::from_millis(50)),
            true,
        );

        let entry = &pending.entries[&callback.id()];
        assert_eq!(entry.throttled_until, Some(now + Duration::from_millis(50)));
        assert!(entry.bypass_block);
    }

    #[test]
    fn test_take_ready_dedups_keys() {
        let mut pending = PendingCallbacks::default();
        let (callback, _) = counting_callback();

        pending.merge(queued(&callback, Some(vec!["a", "b", "a"])), None, false);
        pending.merge(queued(&callback, Some(vec!["b", "c"])), None, false);

        let ready = pending.take_ready(Instant::now(), false, false);
        assert_eq!(
            ready[0].1.as_deref(),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
        assert!(pending.entries.is_empty());
        assert!(pending.order.is_empty());
    }

    #[test]
    fn test_blocked_entries_stay_pending() {
        let mut pending = PendingCallbacks::default();
        let (held, _) = counting_callback();
        let (bypass, _) = counting_callback();

        pending.merge(queued(&held, Some(vec!["a"])), None, false);
        pending.merge(queued(&bypass, Some(vec!["a"])), None, true);

        let ready = pending.take_ready(Instant::now(), true, false);
        assert_eq!(ready.len(), 1);
        assert!(ready[0].0.ptr_eq(&bypass));
        assert_eq!(pending.order.len(), 1);
        assert_eq!(pending.order[0].0, held.id());
    }

    #[test]
    fn test_removed_then_requeued_fires_once_in_new_position() {
        let mut pending = PendingCallbacks::default();
        let (first, _) = counting_callback();
        let (second, _) = counting_callback();

        pending.merge(queued(&first, Some(vec!["a"])), None, false);
        pending.merge(queued(&second, Some(vec!["b"])), None, false);
        assert!(pending.remove(first.id()));
        pending.merge(queued(&first, Some(vec!["c"])), None, false);

        let ready = pending.take_ready(Instant::now(), false, false);
        assert_eq!(ready.len(), 2);
        assert!(ready[0].0.ptr_eq(&second));
        assert!(ready[1].0.ptr_eq(&first));
        assert_eq!(ready[1].1.as_deref(), Some(&["c".to_string()][..]));
    }

    #[test]
    fn test_mass_removal_compacts_order() {
        let mut pending = PendingCallbacks::default();
        let callbacks: Vec<_> = (0..1_000).map(|_| counting_callback().0).collect();
        for callback in &callbacks {
            pending.merge(queued(callback, None), None, false);
        }
        for callback in &callbacks[..990] {
            assert!(pending.remove(callback.id()));
        }

        assert_eq!(pending.entries.len(), 10);
        assert!(pending.order.len() <= 2 * pending.entries.len() + 64);
        let ready = pending.take_ready(Instant::now(), false, false);
        assert_eq!(ready.len(), 10);
    }

    #[test]
    fn test_over_pop_fails() {
        let coordinator = TriggerCoordinator::new(Options::default());
        coordinator.push_trigger_block();
        coordinator.pop_trigger_block().unwrap();
        assert!(matches!(
            coordinator.pop_trigger_block(),
            Err(StoreError::TriggerBlockOverPopped)
        ));
    }

    #[test]
    fn test_guard_releases_block() {
        let coordinator = TriggerCoordinator::new(Options::default());
        let (callback, count) = counting_callback();
        {
            let _block = coordinator.block_triggers();
            coordinator.queue(vec![queued(&callback, Some(vec!["a"]))], None, false);
            coordinator.resolve_callbacks();
            assert_eq!(count.load(Ordering::SeqCst), 0);
            assert_eq!(coordinator.trigger_block_depth(), 1);
        }
        assert_eq!(coordinator.trigger_block_depth(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_removes_pending() {
        let coordinator = TriggerCoordinator::new(Options::default());
        let (callback, count) = counting_callback();

        coordinator.push_trigger_block();
        coordinator.queue(vec![queued(&callback, None)], None, false);
        assert_eq!(coordinator.pending_callback_count(), 1);

        coordinator.cancel(&callback);
        coordinator.pop_trigger_block().unwrap();
        assert_eq!(coordinator.pending_callback_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
