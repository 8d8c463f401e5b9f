//! Store: subscribable state with keyed triggers.

use crate::coordinator::TriggerCoordinator;
use crate::error::{Result, StoreError};
use crate::keys::{normalize_key, normalize_keys, Key};
use crate::subscriptions::{AutoSubscription, StoreHooks, SubscriptionManager};
use crate::types::{Callback, StoreId, SubscriptionToken};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Counter for generating store IDs.
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Name used in diagnostics.
    pub name: Option<String>,

    /// Accumulate triggers for this long before flushing.
    /// None = use the coordinator's default
    pub throttle_ms: Option<u64>,

    /// Never hold this store's notifications behind trigger blocks.
    pub bypass_trigger_blocks: bool,

    /// Whether auto-subscribing accessors may be used on this store.
    pub auto_subscribe: bool,
}

impl StoreConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn throttled(ms: u64) -> Self {
        Self {
            throttle_ms: Some(ms),
            ..Default::default()
        }
    }

    pub fn bypassing_blocks() -> Self {
        Self {
            bypass_trigger_blocks: true,
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: None,
            throttle_ms: None,
            bypass_trigger_blocks: false,
            auto_subscribe: true,
        }
    }
}

pub(crate) struct StoreInner {
    id: StoreId,
    config: StoreConfig,
    coordinator: Arc<TriggerCoordinator>,
    hooks: Option<Arc<dyn StoreHooks>>,
    subscriptions: SubscriptionManager,
}

/// A named aggregate of subscribable state.
///
/// `Store` is a cheap handle; clones refer to the same store. The data itself
/// lives in the application type that owns the store and calls
/// [`trigger`](Self::trigger) after mutating it.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning reference to a store.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Create a store attached to a coordinator.
    pub fn new(coordinator: &Arc<TriggerCoordinator>, config: StoreConfig) -> Self {
        Self::build(coordinator, config, None)
    }

    /// Create a store whose tracking hooks are forwarded to `hooks`.
    pub fn with_hooks(
        coordinator: &Arc<TriggerCoordinator>,
        config: StoreConfig,
        hooks: Arc<dyn StoreHooks>,
    ) -> Self {
        Self::build(coordinator, config, Some(hooks))
    }

    fn build(
        coordinator: &Arc<TriggerCoordinator>,
        config: StoreConfig,
        hooks: Option<Arc<dyn StoreHooks>>,
    ) -> Self {
        let id = StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst));
        Self {
            inner: Arc::new(StoreInner {
                id,
                config,
                coordinator: Arc::clone(coordinator),
                hooks,
                subscriptions: SubscriptionManager::new(),
            }),
        }
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.config.name.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Arc<TriggerCoordinator> {
        &self.inner.coordinator
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    // --- Manual Subscriptions ---

    /// Register `callback` for `key`. Use [`KEY_ALL`](crate::KEY_ALL) to be
    /// notified of every trigger.
    pub fn subscribe(&self, callback: &Callback, key: impl Into<Key>) -> Result<SubscriptionToken> {
        let key = normalize_key(key.into())?;
        let (token, started) = self
            .inner
            .subscriptions
            .subscribe(key.clone(), callback.clone());

        tracing::trace!(store = %self.id(), %key, ?token, "subscribed");
        if started {
            self.started_tracking(&key);
        }
        Ok(token)
    }

    /// Remove a registration and cancel any notification still pending for
    /// its callback.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        self.remove_subscription(token, true)
    }

    /// Remove a registration whose callback stays subscribed elsewhere, so
    /// its pending notification must not be dropped.
    pub(crate) fn unsubscribe_keeping_pending(&self, token: SubscriptionToken) -> Result<()> {
        self.remove_subscription(token, false)
    }

    fn remove_subscription(&self, token: SubscriptionToken, cancel_pending: bool) -> Result<()> {
        let (subscription, stopped) = self.inner.subscriptions.unsubscribe(token)?;
        if cancel_pending {
            self.inner.coordinator.cancel(&subscription.callback);
        }

        tracing::trace!(store = %self.id(), key = %subscription.key, ?token, "unsubscribed");
        if stopped {
            self.stopped_tracking(&subscription.key);
        }
        Ok(())
    }

    // --- Auto Subscriptions ---

    pub fn track_auto_subscription(&self, subscription: &Arc<AutoSubscription>) -> Result<()> {
        if subscription.store_id() != self.id() {
            return Err(StoreError::Inconsistent(format!(
                "auto-subscription for store {} tracked on store {}",
                subscription.store_id(),
                self.id()
            )));
        }

        let started = self
            .inner
            .subscriptions
            .track_auto(Arc::clone(subscription));
        if started {
            self.started_tracking(subscription.key());
        }
        Ok(())
    }

    pub fn remove_auto_subscription(&self, subscription: &Arc<AutoSubscription>) -> Result<()> {
        let stopped = self.inner.subscriptions.remove_auto(subscription)?;
        if stopped {
            self.stopped_tracking(subscription.key());
        }
        Ok(())
    }

    // --- Triggering ---

    /// Notify subscribers of one or more keys.
    ///
    /// `0` is an ordinary key; use [`trigger_all`](Self::trigger_all) for a
    /// keyless trigger. An empty key list notifies nobody.
    pub fn trigger(&self, keys: impl Into<Key>) -> Result<()> {
        let keys = normalize_keys(keys.into())?;
        if keys.is_empty() {
            return Ok(());
        }
        self.dispatch(Some(keys));
        Ok(())
    }

    /// Notify every subscriber of this store, without a key list.
    pub fn trigger_all(&self) {
        self.dispatch(None);
    }

    fn dispatch(&self, keys: Option<Vec<String>>) {
        let coordinator = &self.inner.coordinator;
        let throttle_ms = self
            .inner
            .config
            .throttle_ms
            .unwrap_or(coordinator.options().default_throttle_ms);

        let throttled_until = (throttle_ms > 0).then(|| {
            coordinator.open_throttle_window(self.id(), Duration::from_millis(throttle_ms))
        });
        let bypass_block = self.inner.config.bypass_trigger_blocks;

        let batch = match &keys {
            None => self.inner.subscriptions.collect_all(),
            Some(keys) => self.inner.subscriptions.collect_for_keys(keys),
        };
        tracing::trace!(
            store = %self.id(),
            keys = keys.as_ref().map_or(0, Vec::len),
            callbacks = batch.len(),
            "trigger"
        );
        coordinator.queue(batch, throttled_until, bypass_block);

        if throttled_until.is_none() || bypass_block || !coordinator.is_throttling_enabled() {
            coordinator.resolve_callbacks();
        }
    }

    // --- Introspection ---

    /// Scheduled flush time of the open throttle window, if any.
    pub fn throttle_deadline(&self) -> Option<Instant> {
        self.inner.coordinator.throttle_window(self.id())
    }

    pub fn is_tracking_key(&self, key: &str) -> bool {
        self.inner.subscriptions.is_tracking(key)
    }

    pub fn tracked_keys(&self) -> Vec<String> {
        self.inner.subscriptions.tracked_keys()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.subscription_count()
    }

    pub fn auto_subscription_count(&self, key: &str) -> usize {
        self.inner.subscriptions.auto_subscription_count(key)
    }

    fn started_tracking(&self, key: &str) {
        tracing::debug!(store = %self.id(), %key, "started tracking key");
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_subscription_started(key);
        }
    }

    fn stopped_tracking(&self, key: &str) {
        tracing::debug!(store = %self.id(), %key, "stopped tracking key");
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_subscription_stopped(key);
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}
