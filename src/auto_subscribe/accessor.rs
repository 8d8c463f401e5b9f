//! Store accessors wrapped with auto-subscribe behavior.
//!
//! An [`Accessor`] is declared once per store read method and wraps each call:
//!
//! ```ignore
//! struct TodoStore {
//!     store: Store,
//!     todos: Mutex<HashMap<String, Todo>>,
//!     by_id: Accessor,
//! }
//!
//! impl TodoStore {
//!     fn new(coordinator: &Arc<TriggerCoordinator>) -> Result<Self> {
//!         let store = Store::new(coordinator, StoreConfig::named("todos"));
//!         let by_id = Accessor::auto_subscribe_with_key(&store, "todo")?;
//!         Ok(Self { store, todos: Default::default(), by_id })
//!     }
//!
//!     fn get(&self, id: &str) -> Result<Option<Todo>> {
//!         self.by_id.read_key(id, || self.todos.lock().get(id).cloned())
//!     }
//!
//!     fn set(&self, id: &str, todo: Todo) -> Result<()> {
//!         self.todos.lock().insert(id.to_string(), todo);
//!         self.store.trigger(self.by_id.keys_for(Some(id)))
//!     }
//! }
//! ```

use super::handler::{self, AccessorScope, ActiveHandler};
use crate::error::{Result, StoreError};
use crate::keys::{form_compound_key, normalize_key, normalize_keys, Key, KEY_ALL};
use crate::store::Store;

/// How an accessor participates in auto-subscription tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorKind {
    /// Reads subscribe the active observer.
    AutoSubscribe,
    /// Safe to call anywhere; never subscribes and never warns.
    DisableWarnings,
    /// Plain read. Warns in development mode when called during a build.
    Untracked,
}

#[derive(Clone, Debug)]
pub struct Accessor {
    store: Store,
    kind: AccessorKind,
    /// Statically declared keys. Empty means the whole store.
    declared_keys: Vec<String>,
    name: &'static str,
}

impl Accessor {
    fn new(store: &Store, kind: AccessorKind, declared_keys: Vec<String>) -> Self {
        Self {
            store: store.clone(),
            kind,
            declared_keys,
            name: "accessor",
        }
    }

    /// Accessor that subscribes to the per-call key, or to every key.
    pub fn auto_subscribe(store: &Store) -> Self {
        Self::new(store, AccessorKind::AutoSubscribe, Vec::new())
    }

    /// Accessor that subscribes to declared key(s), combined with the
    /// per-call key when one is given.
    pub fn auto_subscribe_with_key(store: &Store, keys: impl Into<Key>) -> Result<Self> {
        let declared_keys = normalize_keys(keys.into())?;
        if declared_keys.is_empty() {
            return Err(StoreError::InvalidKey("no declared keys".to_string()));
        }
        Ok(Self::new(store, AccessorKind::AutoSubscribe, declared_keys))
    }

    pub fn disable_warnings(store: &Store) -> Self {
        Self::new(store, AccessorKind::DisableWarnings, Vec::new())
    }

    pub fn untracked(store: &Store) -> Self {
        Self::new(store, AccessorKind::Untracked, Vec::new())
    }

    /// Name reported in development warnings.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn kind(&self) -> AccessorKind {
        self.kind
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Keys a read subscribes to, and that writers should trigger.
    ///
    /// The per-call key comes first in a compound key, the declared key last.
    pub fn keys_for(&self, dynamic_key: Option<&str>) -> Vec<String> {
        match (dynamic_key, self.declared_keys.is_empty()) {
            (None, true) => vec![KEY_ALL.to_string()],
            (Some(dynamic), true) => vec![dynamic.to_string()],
            (None, false) => self.declared_keys.clone(),
            (Some(dynamic), false) => self
                .declared_keys
                .iter()
                .map(|declared| form_compound_key([dynamic, declared.as_str()]))
                .collect(),
        }
    }

    /// Call `f` as a read of the whole accessor.
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.invoke(None, f)
    }

    /// Call `f` as a read of one entity, identified by `key`.
    pub fn read_key<R>(&self, key: impl Into<Key>, f: impl FnOnce() -> R) -> Result<R> {
        let key = normalize_key(key.into())?;
        self.invoke(Some(&key), f)
    }

    fn invoke<R>(&self, dynamic_key: Option<&str>, f: impl FnOnce() -> R) -> Result<R> {
        match self.kind {
            AccessorKind::AutoSubscribe => {
                self.subscribe_active_handler(dynamic_key)?;
                let _scope = AccessorScope::enter();
                Ok(f())
            }
            AccessorKind::DisableWarnings => {
                let _scope = AccessorScope::enter();
                Ok(f())
            }
            AccessorKind::Untracked => {
                self.warn_if_building();
                Ok(f())
            }
        }
    }

    fn subscribe_active_handler(&self, dynamic_key: Option<&str>) -> Result<()> {
        if !self.store.config().auto_subscribe {
            return Err(StoreError::NotAutoSubscribeStore(self.store.id()));
        }

        match handler::current() {
            Some(ActiveHandler::Forbid) => Err(StoreError::AutoSubscribeForbidden),
            Some(ActiveHandler::Tracking(observer)) => {
                let Some(observer) = observer.upgrade() else {
                    return Ok(());
                };
                for key in self.keys_for(dynamic_key) {
                    observer.handle_auto_subscribe(&self.store, &key)?;
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(debug_assertions)]
    fn warn_if_building(&self) {
        if !self.store.coordinator().options().development_mode {
            return;
        }
        if handler::is_building() && !handler::in_accessor() {
            tracing::warn!(
                store = %self.store.id(),
                accessor = self.name,
                "untracked accessor called during a build; its reads are not subscribed"
            );
        }
    }

    #[cfg(not(debug_assertions))]
    fn warn_if_building(&self) {}
}
