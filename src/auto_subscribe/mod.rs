//! Automatic subscription tracking.
//!
//! While an [`Observer`] builds, every auto-subscribing [`Accessor`] read
//! registers the observer with the store key it touched. At the end of the
//! pass, subscriptions that were not read again are released:
//! - Idle: reads pass straight through
//! - Building: reads subscribe the innermost building observer
//! - Forbidden: auto-subscribing reads fail
//!
//! # Example
//!
//! ```ignore
//! let observer = Observer::new(&coordinator, |_keys| rerender());
//! let name = observer.build(|| users.name_of("u1"))?;
//! // a later users.store.trigger(..) for "u1" invalidates the observer
//! ```

mod accessor;
mod handler;
mod observer;

pub use accessor::{Accessor, AccessorKind};
pub use handler::{forbid_auto_subscribe, is_building, is_forbidden};
pub use observer::{Observer, SubscriptionKey};
