mod common;

use annoroute::artifact::{self, MODULE_FILE, ROUTE_FILE};
use annoroute::cache::{ArtifactCache, REBUILD_LOCK_PREFIX};
use annoroute::introspect::ManifestMember;
use annoroute::lock::{Guarded, LockStore, MemoryStore, SimpleRequest};
use annoroute::node::MemoryNodeSink;
use annoroute::{AnnotationConfig, CompileError};
use common::fixtures::{shop_provider, shop_type, ORDER_CONTROLLER};
use common::providers::EditableProvider;
use std::sync::Arc;
use tempfile::TempDir;

fn shop_config() -> AnnotationConfig {
    AnnotationConfig {
        modules: vec!["shop".into()],
        ..AnnotationConfig::default()
    }
}

fn setup(config: AnnotationConfig) -> (Arc<EditableProvider>, Arc<MemoryStore>, ArtifactCache) {
    let provider = Arc::new(EditableProvider::new(shop_provider()));
    let store = Arc::new(MemoryStore::new());
    let cache = ArtifactCache::new(provider.clone(), config, store.clone())
        .unwrap()
        .in_memory();
    (provider, store, cache)
}

#[test]
fn test_touched_source_triggers_rebuild() {
    let (provider, store, cache) = setup(shop_config());
    let first = cache.ensure("shop", false).unwrap();
    assert!(cache.is_fresh(&first));

    provider.touch(ORDER_CONTROLLER, 101);
    assert!(!cache.is_fresh(&first));

    let second = cache.ensure("shop", false).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.sources[ORDER_CONTROLLER], Some(101));
    assert!(store.is_empty(), "rebuild lock must be released");
}

#[test]
fn test_forced_rebuild_replaces_fresh_artifact() {
    let (_, _, cache) = setup(shop_config());
    let first = cache.ensure("shop", false).unwrap();
    let forced = cache.ensure("shop", true).unwrap();
    assert!(!Arc::ptr_eq(&first, &forced));
    assert_eq!(first.routes, forced.routes);
}

#[test]
fn test_contended_rebuild_keeps_existing_artifact() {
    let (provider, store, cache) = setup(shop_config());
    let first = cache.ensure("shop", false).unwrap();
    provider.touch(ORDER_CONTROLLER, 150);

    let key = format!("{REBUILD_LOCK_PREFIX}shop");
    assert!(store.set_nx_ex(&key, "other-process", 60).unwrap());

    let served = cache.ensure("shop", false).unwrap();
    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(
        store.get(&key).unwrap().as_deref(),
        Some("other-process"),
        "a contended caller must not release someone else's lock"
    );
}

#[test]
fn test_unresolved_path_rebuilds_when_auto_create() {
    let mut config = shop_config();
    config.auto_create = true;
    let (provider, _, cache) = setup(config);
    let first = cache.ensure("shop", false).unwrap();
    assert_eq!(cache.resolve("shop", "refund/7").unwrap(), None);

    let mut order = shop_type(ORDER_CONTROLLER);
    order.modified = Some(300);
    order.members.push(ManifestMember {
        name: "refund".into(),
        doc: r#"@PostMapping("refund/{id}")"#.into(),
        ..ManifestMember::default()
    });
    provider.replace(order);

    let found = cache.resolve("shop", "/refund/7").unwrap().unwrap();
    assert_eq!(found.handler.member, "refund");
    assert_eq!(found.params["id"], "7");
    assert!(!Arc::ptr_eq(&first, &cache.get("shop").unwrap()));
}

#[test]
fn test_unresolved_path_without_auto_create_is_a_miss() {
    let (provider, _, cache) = setup(shop_config());
    let first = cache.ensure("shop", false).unwrap();
    provider.touch(ORDER_CONTROLLER, 101);

    // The recorded mtime no longer matches, so the cached entry is rejected.
    assert_eq!(cache.resolve("shop", "api/users/5").unwrap(), None);
    assert!(Arc::ptr_eq(&first, &cache.get("shop").unwrap()));
}

#[test]
fn test_resolve_reports_template_and_params() {
    let (_, _, cache) = setup(shop_config());
    let found = cache.resolve_any("api/users/5/profile").unwrap().unwrap();
    assert_eq!(found.module, "shop");
    assert_eq!(found.template, "api/users/{id}/{tab?}");
    assert_eq!(found.params["id"], "5");
    assert_eq!(found.params["tab"], "profile");
}

#[test]
fn test_guarded_run_and_interceptor_switch() {
    let (_, _, cache) = setup(shop_config());
    let ctx = SimpleRequest::new("order/checkout").with_body("orderId", "9");
    let nested = cache
        .run_guarded("shop", &ctx, || {
            cache.run_guarded("shop", &ctx, || "inner").unwrap()
        })
        .unwrap();
    assert!(matches!(nested, Guarded::Ran(Guarded::Denied(_))));

    let mut config = shop_config();
    config.interceptor.lock.enabled = false;
    let (_, _, disabled) = setup(config);
    let nested = disabled
        .run_guarded("shop", &ctx, || {
            disabled.run_guarded("shop", &ctx, || "inner").unwrap()
        })
        .unwrap();
    assert_eq!(nested, Guarded::Ran(Guarded::Ran("inner")));
}

#[test]
fn test_failed_node_compile_releases_rebuild_lock() {
    let mut config = shop_config();
    config.auto_create_node = true;
    let provider = Arc::new(EditableProvider::new(shop_provider()));
    let mut order = shop_type(ORDER_CONTROLLER);
    order.members.push(ManifestMember {
        name: "export".into(),
        doc: "@Node(name=Export, parent=Missing/default_page)".into(),
        ..ManifestMember::default()
    });
    provider.replace(order);
    let store = Arc::new(MemoryStore::new());
    let cache = ArtifactCache::new(provider, config, store.clone())
        .unwrap()
        .in_memory()
        .with_node_sink(Box::new(MemoryNodeSink::new()));

    let err = cache.ensure("shop", false).unwrap_err();
    match err {
        CompileError::ParentScopeUnresolved {
            module,
            parent,
            attempts,
            ..
        } => {
            assert_eq!(module, "shop");
            assert_eq!(parent, "shop/Missing/default_page");
            assert_eq!(attempts, 15);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.is_empty());
    assert!(cache.get("shop").is_none());
}

#[test]
fn test_persisted_artifacts_warm_a_new_cache() {
    let tmp = TempDir::new().unwrap();
    let mut config = shop_config();
    config.annotation_path = tmp.path().to_path_buf();

    let provider = Arc::new(shop_provider());
    let writer = ArtifactCache::new(provider.clone(), config.clone(), Arc::new(MemoryStore::new()))
        .unwrap();
    let compiled = writer.ensure("shop", false).unwrap();

    let dir = tmp.path().join("shop");
    assert!(dir.join(ROUTE_FILE).exists());
    assert!(dir.join(MODULE_FILE).exists());
    assert_eq!(artifact::read_module(&dir).unwrap().as_ref(), Some(&*compiled));

    let reader = ArtifactCache::new(provider, config, Arc::new(MemoryStore::new())).unwrap();
    assert_eq!(reader.warm().unwrap(), 1);
    let warmed = reader.get("shop").unwrap();
    assert!(reader.is_fresh(&warmed));
    assert!(Arc::ptr_eq(&warmed, &reader.ensure("shop", false).unwrap()));
}
