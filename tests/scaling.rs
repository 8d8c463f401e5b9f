//! Scaling tests for very large trigger sets.
//!
//! Trigger sets of 10^5 keys must neither overflow the stack nor degrade into
//! quadratic work:
//! - One callback subscribed to every key individually
//! - A KEY_ALL subscriber receiving the whole list
//! - Many distinct callbacks, one per key

use parking_lot::Mutex;
use resub::{
    Accessor, Callback, Key, Observer, Options, Store, StoreConfig, TriggerCoordinator, KEY_ALL,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

const KEY_COUNT: usize = 150_000;

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.start.elapsed().as_secs_f64() * 1000.0;
        println!("  {} took {:.2}ms ({} items)", self.name, ms, count);
    }
}

fn all_keys() -> Vec<String> {
    (0..KEY_COUNT).map(|i| format!("key-{i}")).collect()
}

#[test]
fn test_scaling_150k_keys_single_subscriber() {
    println!("\n=== 150k keys, one subscriber per key ===");
    let coordinator = TriggerCoordinator::new(Options::default());
    let store = Store::new(&coordinator, StoreConfig::default());

    let delivered = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&delivered);
    let callback = Callback::new(move |keys| *sink.lock() = keys.map(<[String]>::len));

    let keys = all_keys();
    let timer = Timer::new("Subscribe");
    for key in &keys {
        store.subscribe(&callback, key).unwrap();
    }
    timer.report_with_count(KEY_COUNT);

    // Every key twice; delivery is deduplicated.
    let mut doubled = keys.clone();
    doubled.extend(keys.iter().cloned());

    let timer = Timer::new("Trigger");
    store.trigger(doubled).unwrap();
    timer.report_with_count(KEY_COUNT * 2);

    assert_eq!(*delivered.lock(), Some(KEY_COUNT));
}

#[test]
fn test_scaling_150k_keys_key_all_subscriber() {
    println!("\n=== 150k keys, KEY_ALL subscriber ===");
    let coordinator = TriggerCoordinator::new(Options::default());
    let store = Store::new(&coordinator, StoreConfig::default());

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let callback = Callback::new(move |keys| {
        if let Some(keys) = keys {
            sink.lock().extend_from_slice(keys);
        }
    });
    store.subscribe(&callback, KEY_ALL).unwrap();

    let keys = all_keys();
    let timer = Timer::new("Trigger under block");
    {
        let _block = coordinator.block_triggers();
        let (first, second) = keys.split_at(KEY_COUNT / 2);
        store.trigger(first.to_vec()).unwrap();
        store.trigger(second.to_vec()).unwrap();
        store.trigger(first.to_vec()).unwrap();
    }
    timer.report_with_count(KEY_COUNT);

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), KEY_COUNT);
    assert_eq!(*delivered, keys);
}

#[test]
fn test_scaling_many_callbacks() {
    println!("\n=== 150k distinct callbacks ===");
    let coordinator = TriggerCoordinator::new(Options::default());
    let store = Store::new(&coordinator, StoreConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));

    let keys = all_keys();
    for key in &keys {
        let counter = Arc::clone(&fired);
        let callback = Callback::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        store.subscribe(&callback, key).unwrap();
    }

    let timer = Timer::new("Trigger all");
    store.trigger_all();
    timer.report_with_count(KEY_COUNT);
    assert_eq!(fired.load(Ordering::Relaxed), KEY_COUNT);

    let timer = Timer::new("Trigger by key");
    store.trigger(keys).unwrap();
    timer.report_with_count(KEY_COUNT);
    assert_eq!(fired.load(Ordering::Relaxed), KEY_COUNT * 2);
}

#[test]
fn test_scaling_deeply_nested_key_list() {
    let mut key = Key::from("leaf");
    for _ in 0..100_000 {
        key = Key::Many(vec![key]);
    }
    assert_eq!(resub::normalize_keys(key).unwrap(), vec!["leaf"]);
}

#[test]
fn test_scaling_observer_many_keys() {
    println!("\n=== Observer reading 2k keys ===");
    let coordinator = TriggerCoordinator::new(Options::default());
    let store = Store::new(&coordinator, StoreConfig::default());
    let accessor = Accessor::auto_subscribe_with_key(&store, "row").unwrap();
    let observer = Observer::new(&coordinator, |_| {});

    let timer = Timer::new("Build");
    observer
        .build(|| {
            for i in 0..2_000 {
                accessor.read_key(i, || ()).unwrap();
            }
        })
        .unwrap();
    timer.report_with_count(2_000);
    assert_eq!(observer.auto_subscription_count(), 2_000);

    let timer = Timer::new("Rebuild half");
    observer
        .build(|| {
            for i in 0..1_000 {
                accessor.read_key(i, || ()).unwrap();
            }
        })
        .unwrap();
    timer.report_with_count(1_000);
    assert_eq!(observer.auto_subscription_count(), 1_000);
    assert_eq!(store.subscription_count(), 1_000);
}
