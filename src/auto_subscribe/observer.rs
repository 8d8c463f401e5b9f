//! Observers: consumers whose subscriptions follow what they read.

use super::handler::{ActiveHandler, HandlerScope};
use crate::coordinator::TriggerCoordinator;
use crate::error::Result;
use crate::keys::KEY_ALL;
use crate::options::EqualityComparator;
use crate::store::Store;
use crate::subscriptions::AutoSubscription;
use crate::types::{Callback, StoreId, SubscriptionToken};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type KeyResolver = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Key of an explicit observer subscription.
#[derive(Clone)]
pub enum SubscriptionKey {
    /// Every trigger of the store.
    All,
    /// One fixed key.
    Fixed(String),
    /// A key derived from the observer's current inputs. Re-evaluated by
    /// [`Observer::refresh_explicit_subscriptions`]; `None` means no
    /// subscription for now.
    Dynamic(KeyResolver),
}

impl SubscriptionKey {
    pub fn fixed(key: impl Into<String>) -> Self {
        SubscriptionKey::Fixed(key.into())
    }

    pub fn dynamic<F>(resolver: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        SubscriptionKey::Dynamic(Arc::new(resolver))
    }

    fn resolve(&self) -> Option<String> {
        match self {
            SubscriptionKey::All => Some(KEY_ALL.to_string()),
            SubscriptionKey::Fixed(key) => Some(key.clone()),
            SubscriptionKey::Dynamic(resolver) => resolver(),
        }
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::All => write!(f, "All"),
            SubscriptionKey::Fixed(key) => write!(f, "Fixed({key:?})"),
            SubscriptionKey::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

struct ExplicitSubscription {
    store: Store,
    key: SubscriptionKey,
    /// Key currently registered with the store.
    resolved: Option<String>,
    token: Option<SubscriptionToken>,
}

impl ExplicitSubscription {
    fn covers(&self, store: StoreId, key: &str) -> bool {
        self.store.id() == store
            && self
                .resolved
                .as_deref()
                .is_some_and(|resolved| resolved == key || resolved == KEY_ALL)
    }
}

pub(crate) struct ObserverInner {
    callback: Callback,
    coordinator: Arc<TriggerCoordinator>,
    comparator: EqualityComparator,
    auto: Mutex<Vec<Arc<AutoSubscription>>>,
    explicit: Mutex<Vec<ExplicitSubscription>>,
    last_state: Mutex<Option<Value>>,
    disposed: AtomicBool,
}

impl ObserverInner {
    /// Record a read of `key` on `store` made during this observer's build.
    pub(crate) fn handle_auto_subscribe(&self, store: &Store, key: &str) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(());
        }

        {
            let auto = self.auto.lock();
            if let Some(existing) = auto.iter().find(|sub| sub.matches(store.id(), key)) {
                existing.set_used(true);
                return Ok(());
            }
        }

        if self
            .explicit
            .lock()
            .iter()
            .any(|sub| sub.covers(store.id(), key))
        {
            return Ok(());
        }

        let subscription = AutoSubscription::new(store, key, self.callback.clone());
        self.auto.lock().push(Arc::clone(&subscription));
        tracing::trace!(store = %store.id(), %key, "auto-subscribed");
        store.track_auto_subscription(&subscription)
    }

    fn reset_used(&self) {
        for sub in self.auto.lock().iter() {
            sub.set_used(false);
        }
    }

    /// Drop every auto-subscription the last pass did not touch.
    fn release_unused(&self) -> Result<()> {
        let stale: Vec<_> = {
            let mut auto = self.auto.lock();
            let (used, stale): (Vec<_>, Vec<_>) = auto.drain(..).partition(|sub| sub.is_used());
            *auto = used;
            stale
        };

        for sub in stale {
            tracing::trace!(store = %sub.store_id(), key = %sub.key(), "auto-subscription expired");
            if let Some(store) = sub.store() {
                store.remove_auto_subscription(&sub)?;
            }
        }
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let auto = std::mem::take(&mut *self.auto.lock());
        for sub in auto {
            if let Some(store) = sub.store() {
                store.remove_auto_subscription(&sub)?;
            }
        }

        let explicit = std::mem::take(&mut *self.explicit.lock());
        for sub in explicit {
            if let Some(token) = sub.token {
                sub.store.unsubscribe(token)?;
            }
        }

        self.coordinator.cancel(&self.callback);
        Ok(())
    }

    fn holds_subscriptions(&self) -> bool {
        !self.auto.lock().is_empty() || self.explicit.lock().iter().any(|sub| sub.token.is_some())
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("observer teardown failed: {}", e);
        }
    }
}

/// One consumer of store data, such as a UI component instance.
///
/// Reads made through auto-subscribing accessors inside [`build`](Self::build)
/// become subscriptions; after the pass, subscriptions that were not read
/// again are removed. Every subscription shares the observer's callback, so
/// one flush invalidates the observer at most once.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    /// Create an observer invalidated through `on_invalidate`.
    pub fn new<F>(coordinator: &Arc<TriggerCoordinator>, on_invalidate: F) -> Self
    where
        F: Fn(Option<&[String]>) + Send + Sync + 'static,
    {
        Self::with_callback(coordinator, Callback::new(on_invalidate))
    }

    pub fn with_callback(coordinator: &Arc<TriggerCoordinator>, callback: Callback) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                callback,
                coordinator: Arc::clone(coordinator),
                comparator: Arc::clone(&coordinator.options().equality_comparator),
                auto: Mutex::new(Vec::new()),
                explicit: Mutex::new(Vec::new()),
                last_state: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn callback(&self) -> &Callback {
        &self.inner.callback
    }

    /// Run a build pass, tracking the keys `f` reads.
    pub fn build<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.inner.reset_used();
        let result = {
            let _scope =
                HandlerScope::enter(ActiveHandler::Tracking(Arc::downgrade(&self.inner)));
            f()
        };
        self.inner.release_unused()?;
        Ok(result)
    }

    /// Build a state value and report whether it differs from the previous
    /// build, using the coordinator's equality comparator.
    pub fn build_state<T: Serialize>(&self, f: impl FnOnce() -> T) -> Result<(T, bool)> {
        let state = self.build(f)?;
        let value = serde_json::to_value(&state)?;

        let mut last = self.inner.last_state.lock();
        let changed = match last.as_ref() {
            Some(previous) => !(self.inner.comparator)(previous, &value),
            None => true,
        };
        *last = Some(value);
        Ok((state, changed))
    }

    /// Subscribe explicitly. Explicit subscriptions also cover matching
    /// auto-subscribing reads, which then create nothing new.
    pub fn subscribe_explicit(&self, store: &Store, key: SubscriptionKey) -> Result<()> {
        let resolved = key.resolve();
        let token = match &resolved {
            Some(k) => Some(store.subscribe(&self.inner.callback, k.as_str())?),
            None => None,
        };

        self.inner.explicit.lock().push(ExplicitSubscription {
            store: store.clone(),
            key,
            resolved,
            token,
        });
        Ok(())
    }

    /// Re-resolve dynamic explicit keys, moving subscriptions whose key changed.
    ///
    /// Notifications already pending for the observer survive the move while
    /// it still holds any subscription; they may have been queued through
    /// one of the others.
    pub fn refresh_explicit_subscriptions(&self) -> Result<()> {
        let mut explicit = std::mem::take(&mut *self.inner.explicit.lock());
        let mut outcome = Ok(());
        let mut moved = false;

        for sub in explicit.iter_mut() {
            let resolved = sub.key.resolve();
            if resolved == sub.resolved {
                continue;
            }
            moved = true;
            if let Some(token) = sub.token.take() {
                if let Err(e) = sub.store.unsubscribe_keeping_pending(token) {
                    outcome = Err(e);
                    break;
                }
            }
            sub.resolved = None;
            if let Some(key) = &resolved {
                match sub.store.subscribe(&self.inner.callback, key.as_str()) {
                    Ok(token) => sub.token = Some(token),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            sub.resolved = resolved;
        }

        self.inner.explicit.lock().append(&mut explicit);
        if moved && !self.inner.holds_subscriptions() {
            self.inner.coordinator.cancel(&self.inner.callback);
        }
        outcome
    }

    pub fn auto_subscription_count(&self) -> usize {
        self.inner.auto.lock().len()
    }

    /// Keys this observer is auto-subscribed to on `store`.
    pub fn auto_subscribed_keys(&self, store: &Store) -> Vec<String> {
        self.inner
            .auto
            .lock()
            .iter()
            .filter(|sub| sub.store_id() == store.id())
            .map(|sub| sub.key().to_string())
            .collect()
    }

    /// Remove every subscription. Later builds track nothing.
    pub fn dispose(&self) -> Result<()> {
        self.inner.teardown()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("callback", &self.inner.callback)
            .field("auto_subscriptions", &self.auto_subscription_count())
            .finish()
    }
}
