//! # ReSub Stores
//!
//! Keyed stores with fine-grained, automatically tracked subscriptions.
//!
//! ## Core Concepts
//!
//! - **Stores**: own subscribable state and notify subscribers by key
//! - **Coordinator**: merges notifications per callback, applies trigger
//!   blocks and throttle windows, and flushes in one pass
//! - **Observers**: subscribe to exactly the keys their last build read
//!
//! ## Example
//!
//! ```ignore
//! use resub::{Accessor, Callback, Observer, Options, Store, StoreConfig, TriggerCoordinator};
//!
//! let coordinator = TriggerCoordinator::new(Options::default());
//! let store = Store::new(&coordinator, StoreConfig::named("users"));
//!
//! // Manual subscription
//! let token = store.subscribe(&Callback::new(|keys| println!("{:?}", keys)), "u1")?;
//! store.trigger("u1")?;
//! store.unsubscribe(token)?;
//!
//! // Automatic subscription
//! let by_id = Accessor::auto_subscribe(&store);
//! let observer = Observer::new(&coordinator, |_| println!("rebuild"));
//! observer.build(|| by_id.read_key("u1", || lookup("u1")))??;
//! ```

pub mod auto_subscribe;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod options;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use auto_subscribe::{
    forbid_auto_subscribe, is_building, is_forbidden, Accessor, AccessorKind, Observer,
    SubscriptionKey,
};
pub use coordinator::{TriggerBlockGuard, TriggerCoordinator};
pub use error::{Result, StoreError};
pub use keys::{form_compound_key, normalize_key, normalize_keys, Key, KEY_ALL, KEY_SEPARATOR};
pub use options::{Clock, EqualityComparator, ManualClock, Options, SystemClock};
pub use store::{Store, StoreConfig};
pub use subscriptions::{AutoSubscription, ManualSubscription, StoreHooks, SubscriptionManager};
pub use types::*;
