mod common;

use annoroute::cache::ArtifactCache;
use annoroute::introspect::ManifestMember;
use annoroute::lock::{MemoryStore, SimpleRequest};
use annoroute::{AnnotationConfig, CompileError};
use common::fixtures::{shop_provider, shop_type, ORDER_CONTROLLER};
use common::providers::EditableProvider;
use std::sync::Arc;

fn with_member(name: &str, doc: &str) -> Arc<EditableProvider> {
    let provider = Arc::new(EditableProvider::new(shop_provider()));
    let mut order = shop_type(ORDER_CONTROLLER);
    order.members.push(ManifestMember {
        name: name.into(),
        doc: doc.into(),
        ..ManifestMember::default()
    });
    provider.replace(order);
    provider
}

fn cache(provider: Arc<EditableProvider>, config: AnnotationConfig) -> (Arc<MemoryStore>, ArtifactCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = ArtifactCache::new(provider, config, store.clone())
        .unwrap()
        .in_memory();
    (store, cache)
}

fn shop_config() -> AnnotationConfig {
    AnnotationConfig {
        modules: vec!["shop".into()],
        ..AnnotationConfig::default()
    }
}

const REGISTER_DOC: &str = r#"@PostMapping("user/register")
@Validation(field=username, rule=required|alpha_num, attribute=user name)
@Email(email)"#;

#[test]
fn test_input_checked_against_compiled_rules() {
    let (_, cache) = cache(with_member("register", REGISTER_DOC), shop_config());
    let compiled = cache.ensure("shop", false).unwrap();
    assert_eq!(compiled.validations.len(), 1);
    assert!(compiled.validations.get("user/register").is_some());

    let missing = SimpleRequest::new("user/register").with_body("email", "a@b.io");
    let violation = cache.check_input("shop", &missing).unwrap().unwrap();
    assert_eq!(violation.field, "username");
    assert_eq!(violation.rule, "required");
    assert_eq!(violation.message, "The user name field is required.");

    let bad_email = SimpleRequest::new("/user/register")
        .with_body("username", "alice")
        .with_body("email", "not-an-address");
    let violation = cache.check_input("shop", &bad_email).unwrap().unwrap();
    assert_eq!((violation.field.as_str(), violation.rule.as_str()), ("email", "email"));

    let ok = SimpleRequest::new("user/register")
        .with_body("username", "alice")
        .with_query("email", "alice@example.com");
    assert_eq!(cache.check_input("shop", &ok).unwrap(), None);

    // Paths without rules always pass.
    let other = SimpleRequest::new("order/checkout");
    assert_eq!(cache.check_input("shop", &other).unwrap(), None);
}

#[test]
fn test_rules_follow_templated_paths() {
    let doc = r#"@PostMapping("user/{id}/rename")
@Required(name)
@Between(field=name, rule=2|8)"#;
    let (_, cache) = cache(with_member("rename", doc), shop_config());

    let short = SimpleRequest::new("user/7/rename").with_body("name", "a");
    let violation = cache.check_input("shop", &short).unwrap().unwrap();
    assert_eq!(violation.rule, "between");
    assert_eq!(violation.message, "The name must be between 2 and 8.");

    let fine = SimpleRequest::new("user/7/rename").with_body("name", "bob");
    assert_eq!(cache.check_input("shop", &fine).unwrap(), None);
}

#[test]
fn test_disabled_validation_skips_checks() {
    let mut config = shop_config();
    config.interceptor.validate.enabled = false;
    let (_, cache) = cache(with_member("register", REGISTER_DOC), config);
    let empty = SimpleRequest::new("user/register");
    assert_eq!(cache.check_input("shop", &empty).unwrap(), None);
}

#[test]
fn test_unknown_rule_fails_compile_and_releases_lock() {
    let doc = r#"@PostMapping("user/register")
@Validation(field=username, rule=required|shiny)"#;
    let (store, cache) = cache(with_member("register", doc), shop_config());

    match cache.ensure("shop", false).unwrap_err() {
        CompileError::InvalidAnnotation {
            module,
            handler,
            reason,
        } => {
            assert_eq!(module, "shop");
            assert!(handler.contains("register"));
            assert!(reason.contains("shiny"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.is_empty());
    assert!(cache.get("shop").is_none());
}

#[test]
fn test_shop_fixture_has_no_rules() {
    let (_, cache) = cache(Arc::new(EditableProvider::new(shop_provider())), shop_config());
    assert!(cache.ensure("shop", false).unwrap().validations.is_empty());
}
