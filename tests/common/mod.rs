#![allow(dead_code)]

pub mod fixtures {
    use annoroute::introspect::{Manifest, ManifestProvider, ManifestType};

    pub const ORDER_CONTROLLER: &str = "app::controllers::shop::OrderController";
    pub const CART_CONTROLLER: &str = "app::controllers::shop::CartController";

    /// Module `shop`: grouped, variable-arity, locked and multi-group routes.
    pub const SHOP_MANIFEST: &str = r#"
types:
  - id: app::controllers::shop::OrderController
    modified: 100
    doc: "@Node(name=Orders, menu=1)"
    members:
      - name: default_page
      - name: index
        doc: |
          @GetMapping("orders")
          @Group(prefix=api)
          @Node(name=Order list)
      - name: show
        doc: |
          @GetMapping("users/{id}/{tab?}")
          @Group(prefix=api)
      - name: checkout
        doc: |
          @PostMapping("order/checkout")
          @SyncLock(name=checkout, suffix="$orderId", expire=30)
      - name: pay
        doc: |
          @Route(url="order/{id}/pay", method="post")
          @SyncLockByToken(name=pay, once=1)
      - name: helper
        doc: "Plain documentation without annotations."
  - id: app::controllers::shop::CartController
    modified: 200
    doc: "@Group(prefix=cart)"
    members:
      - name: add
        doc: |
          @RequestMapping
          @Group(prefix=v1)
          @Group(prefix=v2)
"#;

    pub fn shop_manifest() -> Manifest {
        serde_yaml::from_str(SHOP_MANIFEST).unwrap()
    }

    pub fn shop_provider() -> ManifestProvider {
        ManifestProvider::from_manifest(shop_manifest())
    }

    /// A single fixture type, for tests that edit and re-insert it.
    pub fn shop_type(id: &str) -> ManifestType {
        shop_manifest()
            .types
            .into_iter()
            .find(|t| t.id == id)
            .unwrap()
    }
}

pub mod providers {
    use annoroute::error::CompileError;
    use annoroute::introspect::{
        IntrospectionProvider, ManifestProvider, ManifestType, MemberDescriptor, Visibility,
    };
    use std::sync::RwLock;

    /// Provider whose manifest can be edited while a cache holds it.
    pub struct EditableProvider {
        inner: RwLock<ManifestProvider>,
    }

    impl EditableProvider {
        pub fn new(inner: ManifestProvider) -> Self {
            Self {
                inner: RwLock::new(inner),
            }
        }

        /// Simulate a source edit by changing the recorded modification time.
        pub fn touch(&self, type_id: &str, modified: u64) {
            let mut inner = self.inner.write().unwrap();
            inner.type_mut(type_id).unwrap().modified = Some(modified);
        }

        pub fn replace(&self, ty: ManifestType) {
            self.inner.write().unwrap().insert(ty);
        }
    }

    impl IntrospectionProvider for EditableProvider {
        fn types_in(&self, namespace: &str) -> Vec<String> {
            self.inner.read().unwrap().types_in(namespace)
        }

        fn type_doc(&self, type_id: &str) -> Result<String, CompileError> {
            self.inner.read().unwrap().type_doc(type_id)
        }

        fn members(
            &self,
            type_id: &str,
            visibility: Visibility,
        ) -> Result<Vec<MemberDescriptor>, CompileError> {
            self.inner.read().unwrap().members(type_id, visibility)
        }

        fn modified_time(&self, type_id: &str) -> Result<Option<u64>, CompileError> {
            self.inner.read().unwrap().modified_time(type_id)
        }
    }
}
