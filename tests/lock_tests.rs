mod common;

use annoroute::annotation::AnnotationRegistry;
use annoroute::lock::{
    acquire, release, resolve_key, run_guarded, Acquisition, Guarded, LockDefaults, LockMap,
    LockStore, ManualClock, MemoryStore, SimpleRequest,
};
use annoroute::route::{CompileOptions, RouteTableCompiler};
use common::fixtures::shop_provider;
use std::sync::{Arc, Barrier};
use std::thread;

const SHA256_OF_123: &str = "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3";

fn compile_locks() -> (LockMap, annoroute::RouteTable) {
    let provider = shop_provider();
    let registry = AnnotationRegistry::builtin().unwrap();
    let options = CompileOptions::default();
    let routes = RouteTableCompiler::new(&provider, &registry, &options)
        .compile("shop")
        .unwrap();
    let locks = LockMap::compile(
        &provider,
        &registry,
        &options,
        &LockDefaults::default(),
        "shop",
        &routes,
    )
    .unwrap();
    (locks, routes)
}

#[test]
fn test_checkout_policy_and_key() {
    let (locks, _) = compile_locks();
    assert_eq!(locks.len(), 2);

    let policy = locks.get("order/checkout").unwrap();
    assert_eq!(policy.name, "order_checkout");
    assert_eq!(policy.expire, 30);
    assert!(!policy.once);
    assert_eq!(policy.response["code"], 500);

    let ctx = SimpleRequest::new("order/checkout").with_body("orderId", "123");
    assert_eq!(
        resolve_key(policy, &ctx),
        format!("sync_lock_annotation_order_checkout:{SHA256_OF_123}")
    );

    let other = SimpleRequest::new("order/checkout").with_body("orderId", "124");
    assert_ne!(resolve_key(policy, &ctx), resolve_key(policy, &other));
}

#[test]
fn test_same_order_denied_until_expiry() {
    let (locks, _) = compile_locks();
    let policy = locks.get("order/checkout").unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let store = MemoryStore::with_clock(clock.clone());
    let ctx = SimpleRequest::new("order/checkout").with_query("orderId", "123");

    let first = acquire(policy, &ctx, &store).unwrap();
    assert!(matches!(first, Acquisition::Held(_)));
    assert!(matches!(
        acquire(policy, &ctx, &store).unwrap(),
        Acquisition::Denied { .. }
    ));

    clock.advance_secs(29);
    assert!(matches!(
        acquire(policy, &ctx, &store).unwrap(),
        Acquisition::Denied { .. }
    ));
    clock.advance_secs(1);
    assert!(matches!(
        acquire(policy, &ctx, &store).unwrap(),
        Acquisition::Held(_)
    ));
}

#[test]
fn test_exactly_one_concurrent_acquire_wins() {
    let (locks, _) = compile_locks();
    let policy = Arc::new(locks.get("order/checkout").unwrap().clone());
    let store = Arc::new(MemoryStore::new());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let policy = Arc::clone(&policy);
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = SimpleRequest::new("order/checkout").with_body("orderId", "123");
                barrier.wait();
                matches!(
                    acquire(&policy, &ctx, store.as_ref()).unwrap(),
                    Acquisition::Held(_)
                )
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|held| *held)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_token_scoped_once_lock_outlives_run() {
    let (locks, routes) = compile_locks();
    let policy = locks.get("order/{id}/pay").unwrap();
    assert!(policy.once);
    assert_eq!(policy.suffix.as_deref(), Some("header.$token"));

    let clock = Arc::new(ManualClock::new(0));
    let store = MemoryStore::with_clock(clock.clone());
    let ctx = SimpleRequest::new("/order/7/pay").with_header("Token", "abc");

    let first = run_guarded(&locks, Some(&routes.index), &ctx, &store, || "paid").unwrap();
    assert_eq!(first, Guarded::Ran("paid"));
    assert_eq!(store.len(), 1);

    let second = run_guarded(&locks, Some(&routes.index), &ctx, &store, || "paid").unwrap();
    assert!(second.is_denied());

    let other_user = SimpleRequest::new("/order/7/pay").with_header("Token", "xyz");
    assert!(!run_guarded(&locks, Some(&routes.index), &other_user, &store, || ())
        .unwrap()
        .is_denied());

    clock.advance_secs(86_400);
    assert_eq!(
        run_guarded(&locks, Some(&routes.index), &ctx, &store, || 1).unwrap(),
        Guarded::Ran(1)
    );
}

#[test]
fn test_release_frees_key_for_next_request() {
    let (locks, _) = compile_locks();
    let policy = locks.get("order/checkout").unwrap();
    let store = MemoryStore::new();
    let ctx = SimpleRequest::new("order/checkout").with_body("orderId", 123);

    let Acquisition::Held(held) = acquire(policy, &ctx, &store).unwrap() else {
        panic!("first acquire must succeed");
    };
    let key = held.key.clone();
    assert_eq!(store.get(&key).unwrap().as_deref(), Some("1"));
    assert!(release(held, &store).unwrap());
    assert_eq!(store.get(&key).unwrap(), None);
}
