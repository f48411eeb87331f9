mod common;

use annoroute::annotation::AnnotationRegistry;
use annoroute::introspect::{ManifestMember, ManifestProvider, ManifestType};
use annoroute::node::{MemoryNodeSink, NodeCompiler, NodeSink};
use annoroute::route::CompileOptions;
use common::fixtures::{shop_manifest, shop_provider};

fn compile(provider: &ManifestProvider, sink: &mut MemoryNodeSink) -> annoroute::node::NodeReport {
    let registry = AnnotationRegistry::builtin().unwrap();
    let options = CompileOptions::default();
    NodeCompiler::new(provider, &registry, &options)
        .compile("shop", sink)
        .unwrap()
}

#[test]
fn test_shop_menu_nodes() {
    let provider = shop_provider();
    let mut sink = MemoryNodeSink::new();
    let report = compile(&provider, &mut sink);

    assert_eq!(report.passes, 1);
    assert_eq!(sink.len(), 2);
    let landing = sink.get("shop/Order/default_page").unwrap();
    assert_eq!(landing.name, "Orders");
    assert_eq!(landing.menu, 1);
    assert_eq!(landing.parent, None);

    let list = sink.get("shop/Order/index").unwrap();
    assert_eq!(list.name, "Order list");
    assert_eq!(list.parent.as_deref(), Some("shop/Order/default_page"));
    assert_eq!(list.auth, 2);

    // Landing page cannot be removed while it has children.
    assert!(!sink.delete("shop", "Order", "default_page").unwrap());

    let second = compile(&provider, &mut sink);
    assert_eq!(second.saved, 0);
    assert_eq!(second.unchanged, 2);
}

#[test]
fn test_parent_in_later_type_needs_another_pass() {
    let mut manifest = shop_manifest();
    manifest.types.insert(
        0,
        ManifestType {
            id: "app::controllers::shop::AuditController".into(),
            members: vec![ManifestMember {
                name: "export".into(),
                doc: "@Node(name=Export orders, parent=Order/index)".into(),
                ..ManifestMember::default()
            }],
            ..ManifestType::default()
        },
    );
    let provider = ManifestProvider::from_manifest(manifest);
    let mut sink = MemoryNodeSink::new();
    let report = compile(&provider, &mut sink);

    assert_eq!(report.passes, 2);
    let export = sink.get("shop/Audit/export").unwrap();
    assert_eq!(export.parent.as_deref(), Some("shop/Order/index"));
    assert_eq!(export.code, "export");
}

#[test]
fn test_delete_flag_removes_leaf_node() {
    let provider = shop_provider();
    let mut sink = MemoryNodeSink::new();
    compile(&provider, &mut sink);

    let mut manifest = shop_manifest();
    let order = manifest
        .types
        .iter_mut()
        .find(|t| t.id.ends_with("OrderController"))
        .unwrap();
    let index = order.members.iter_mut().find(|m| m.name == "index").unwrap();
    index.doc = "@Node(name=Order list, delete=1)".into();
    let report = compile(&ManifestProvider::from_manifest(manifest), &mut sink);

    assert_eq!(report.deleted, 1);
    assert!(sink.get("shop/Order/index").is_none());
    assert!(sink.get("shop/Order/default_page").is_some());
}
