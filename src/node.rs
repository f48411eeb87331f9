//! # Menu Node Compilation
//!
//! `@Node` annotations describe menu entries and permission rules. A type
//! level `@Node` names the container's landing page (`default_page`), member
//! level annotations describe children.
//!
//! ```text
//! /// @Node(name=Users, menu=1, actions=index)
//! struct UserController;
//!
//! /// @Node(name=List, parent=default_page)
//! fn index();
//! ```
//!
//! Records are pushed into a [`NodeSink`]; storage is the sink's concern.
//! A node may reference a parent that has not been written yet. The whole
//! module is then compiled again, up to [`MAX_NODE_PASSES`] times, before
//! the missing parent is reported as [`CompileError::ParentScopeUnresolved`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::annotation::spec::NODE;
use crate::annotation::{flatten_value, AnnotationRegistry, Matcher, ParsedAnnotation};
use crate::error::CompileError;
use crate::introspect::{IntrospectionProvider, Visibility};
use crate::route::CompileOptions;

/// Whole-module passes attempted before a missing parent is fatal.
pub const MAX_NODE_PASSES: usize = 15;

/// Member acting as a container's landing node.
pub const DEFAULT_PAGE: &str = "default_page";

/// Action names that double as permission codes.
const PERMISSION_CODES: &[&str] = &[
    "query", "add", "edit", "upload", "download", "delete", "export", "import", "check",
    "uncheck", "refuse", "disable", "enable", "toggle",
];

/// One menu node with its permission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub module: String,
    pub controller: String,
    pub action: String,
    /// `module/controller/action` of the parent, `None` for a root node
    pub parent: Option<String>,
    pub name: String,
    pub menu: i64,
    pub auth: i64,
    pub order: i64,
    pub icon: String,
    pub remark: String,
    pub code: String,
    pub param: String,
    /// `module/controller/action`
    pub rule: String,
}

/// Destination of compiled node records.
pub trait NodeSink {
    fn find(&self, module: &str, controller: &str, action: &str) -> Option<NodeRecord>;

    /// Insert or update; `true` when something changed.
    fn upsert(&mut self, record: NodeRecord) -> Result<bool, CompileError>;

    /// Delete a record; `false` when it is missing or still has children.
    fn delete(&mut self, module: &str, controller: &str, action: &str) -> Result<bool, CompileError>;
}

/// [`NodeSink`] keeping records in memory, keyed by rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryNodeSink {
    records: BTreeMap<String, NodeRecord>,
}

impl MemoryNodeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, rule: &str) -> Option<&NodeRecord> {
        self.records.get(rule)
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn rule_of(module: &str, controller: &str, action: &str) -> String {
    format!("{module}/{controller}/{action}")
}

impl NodeSink for MemoryNodeSink {
    fn find(&self, module: &str, controller: &str, action: &str) -> Option<NodeRecord> {
        self.records.get(&rule_of(module, controller, action)).cloned()
    }

    fn upsert(&mut self, record: NodeRecord) -> Result<bool, CompileError> {
        if self.records.get(&record.rule) == Some(&record) {
            return Ok(false);
        }
        self.records.insert(record.rule.clone(), record);
        Ok(true)
    }

    fn delete(&mut self, module: &str, controller: &str, action: &str) -> Result<bool, CompileError> {
        let rule = rule_of(module, controller, action);
        if self
            .records
            .values()
            .any(|r| r.parent.as_deref() == Some(rule.as_str()))
        {
            return Ok(false);
        }
        Ok(self.records.remove(&rule).is_some())
    }
}

/// Counters for one module compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReport {
    pub passes: usize,
    pub saved: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
}

enum Outcome {
    Saved,
    Unchanged,
    Deleted,
    Skipped,
    /// Parent reference and the path of the node waiting for it
    Pending(String, String),
}

/// Compiles `@Node` annotations of one module into a sink.
pub struct NodeCompiler<'a> {
    provider: &'a dyn IntrospectionProvider,
    registry: &'a AnnotationRegistry,
    options: &'a CompileOptions,
}

impl<'a> NodeCompiler<'a> {
    #[must_use]
    pub fn new(
        provider: &'a dyn IntrospectionProvider,
        registry: &'a AnnotationRegistry,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            provider,
            registry,
            options,
        }
    }

    /// Compile `module` into `sink`, re-running while parents are missing.
    ///
    /// # Errors
    ///
    /// - [`CompileError::ParentScopeUnresolved`] once [`MAX_NODE_PASSES`] passes
    ///   still leave a parent missing
    /// - [`CompileError::HandlerUnresolvable`] and sink errors immediately
    pub fn compile(&self, module: &str, sink: &mut dyn NodeSink) -> Result<NodeReport, CompileError> {
        let Some(spec) = self.registry.get(NODE) else {
            return Ok(NodeReport::default());
        };
        let module_name = module.to_lowercase();
        let mut report = NodeReport::default();
        for pass in 1..=MAX_NODE_PASSES {
            report = NodeReport {
                passes: pass,
                ..NodeReport::default()
            };
            let mut pending: Option<(String, String)> = None;

            for type_id in self.provider.types_in(&self.options.module_namespace(module)) {
                let type_doc = self.provider.type_doc(&type_id)?;
                let matcher = Matcher::new(spec, &type_doc)
                    .with_ignored(self.options.ignore_members.iter().cloned());
                let type_fields = matcher
                    .match_type()
                    .map(|m| m.fields.clone())
                    .unwrap_or_default();
                let controller = self.options.container_name(&type_id);

                for member in self.provider.members(&type_id, Visibility::Public)? {
                    if matcher.is_ignored(&member.name) {
                        continue;
                    }
                    let member_fields = matcher
                        .match_member_first(&member)
                        .map(|m| m.fields)
                        .unwrap_or_default();
                    let target = NodeTarget {
                        module: &module_name,
                        controller,
                        action: &member.name,
                    };
                    match save_node(&target, &type_fields, member_fields, sink)? {
                        Outcome::Saved => report.saved += 1,
                        Outcome::Unchanged => report.unchanged += 1,
                        Outcome::Deleted => report.deleted += 1,
                        Outcome::Skipped => report.skipped += 1,
                        Outcome::Pending(parent, path) => {
                            debug!(module, parent = %parent, path = %path, pass, "Node waits for parent");
                            pending.get_or_insert((parent, path));
                        }
                    }
                }
            }

            match pending {
                None => {
                    info!(
                        module,
                        passes = report.passes,
                        saved = report.saved,
                        deleted = report.deleted,
                        "Menu nodes compiled"
                    );
                    return Ok(report);
                }
                Some((parent, path)) if pass == MAX_NODE_PASSES => {
                    return Err(CompileError::ParentScopeUnresolved {
                        module: module.to_string(),
                        parent,
                        path,
                        attempts: pass,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(report)
    }
}

struct NodeTarget<'a> {
    module: &'a str,
    controller: &'a str,
    action: &'a str,
}

fn text(fields: &ParsedAnnotation, key: &str) -> String {
    fields.get(key).map(flatten_value).unwrap_or_default()
}

fn number(fields: &ParsedAnnotation, key: &str, default: i64) -> i64 {
    fields
        .get(key)
        .map(flatten_value)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn truthy(fields: &ParsedAnnotation, key: &str) -> bool {
    match fields.get(key) {
        None | Some(Value::Null) => false,
        Some(value) => {
            let v = flatten_value(value);
            !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
        }
    }
}

fn save_node(
    target: &NodeTarget<'_>,
    type_fields: &ParsedAnnotation,
    mut fields: ParsedAnnotation,
    sink: &mut dyn NodeSink,
) -> Result<Outcome, CompileError> {
    let is_landing = target.action == DEFAULT_PAGE;
    let type_name = text(type_fields, "name");

    let prefixed = type_fields
        .get("actions")
        .map(flatten_value)
        .is_some_and(|actions| actions.split(',').any(|a| a.trim() == target.action));
    if prefixed || is_landing {
        let own = text(&fields, "name");
        fields.insert("name", Value::String(format!("{type_name}{own}")));
    }
    if is_landing {
        fields.merge_overrides(type_fields.as_map());
    }

    let name = text(&fields, "name");
    if name.trim().is_empty() || truthy(&fields, "ignore") {
        return Ok(Outcome::Skipped);
    }

    let existing = sink.find(target.module, target.controller, target.action);
    if existing.is_some() && truthy(&fields, "delete") {
        return Ok(
            if sink.delete(target.module, target.controller, target.action)? {
                Outcome::Deleted
            } else {
                Outcome::Skipped
            },
        );
    }

    let parent_ref = match fields.non_empty_str("parent") {
        Some(p) => p.to_string(),
        None if is_landing => String::new(),
        None => DEFAULT_PAGE.to_string(),
    };
    let menu = number(&fields, "menu", 0);
    let auth = number(&fields, "auth", 2);
    let rule = rule_of(target.module, target.controller, target.action);

    let parent = if is_landing && parent_ref.is_empty() {
        None
    } else {
        let parts: Vec<&str> = parent_ref.split('/').collect();
        let (m, c, a) = match parts.as_slice() {
            [action] => (target.module, target.controller, *action),
            [controller, action] => (target.module, *controller, *action),
            [module, controller, action, ..] => (*module, *controller, *action),
            [] => (target.module, target.controller, ""),
        };
        match sink.find(m, c, a) {
            Some(found) => Some(found.rule),
            None if is_landing => None,
            None => return Ok(Outcome::Pending(rule_of(m, c, a), rule)),
        }
    };

    let code = fields
        .non_empty_str("code")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if PERMISSION_CODES.contains(&target.action) {
                target.action.to_string()
            } else {
                "query".to_string()
            }
        });

    let record = NodeRecord {
        module: target.module.to_string(),
        controller: target.controller.to_string(),
        action: target.action.to_string(),
        parent,
        name,
        menu,
        auth,
        order: number(&fields, "order", 0),
        icon: text(&fields, "icon"),
        remark: text(&fields, "remark"),
        code,
        param: text(&fields, "param"),
        rule,
    };
    Ok(if sink.upsert(record)? {
        Outcome::Saved
    } else {
        Outcome::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{ManifestMember, ManifestProvider, ManifestType};

    fn provider(types: &[(&str, &str, &[(&str, &str)])]) -> ManifestProvider {
        let mut provider = ManifestProvider::default();
        for (id, doc, members) in types {
            provider.insert(ManifestType {
                id: (*id).into(),
                doc: (*doc).into(),
                members: members
                    .iter()
                    .map(|(name, doc)| ManifestMember {
                        name: (*name).into(),
                        doc: (*doc).into(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            });
        }
        provider
    }

    fn compile(p: &ManifestProvider, sink: &mut MemoryNodeSink) -> Result<NodeReport, CompileError> {
        let registry = AnnotationRegistry::builtin().unwrap();
        let options = CompileOptions::default();
        NodeCompiler::new(p, &registry, &options).compile("Admin", sink)
    }

    #[test]
    fn test_landing_page_and_children() {
        let p = provider(&[(
            "app::controllers::Admin::UserController",
            "@Node(name=Users, menu=1, auth=0, actions=index)",
            &[
                ("default_page", ""),
                ("index", "@Node(name=List)"),
                ("add", "@Node(add user)"),
                ("helper", ""),
                ("hidden", "@Node(name=x, ignore)"),
            ],
        )]);
        let mut sink = MemoryNodeSink::new();
        let report = compile(&p, &mut sink).unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.saved, 3);

        let landing = sink.get("admin/User/default_page").unwrap();
        assert_eq!(landing.name, "Users");
        assert_eq!(landing.parent, None);
        assert_eq!(landing.menu, 1);

        let index = sink.get("admin/User/index").unwrap();
        assert_eq!(index.name, "UsersList");
        assert_eq!(index.parent.as_deref(), Some("admin/User/default_page"));
        assert_eq!(index.code, "query");

        let add = sink.get("admin/User/add").unwrap();
        assert_eq!(add.name, "add user");
        assert_eq!(add.code, "add");
        assert!(sink.get("admin/User/hidden").is_none());
    }

    #[test]
    fn test_parent_declared_later_resolves_on_second_pass() {
        let p = provider(&[
            (
                "app::controllers::Admin::AOrderController",
                "",
                &[("refund", "@Node(name=Refund, parent=Order/default_page)")],
            ),
            (
                "app::controllers::Admin::OrderController",
                "@Node(name=Orders)",
                &[("default_page", "")],
            ),
        ]);
        let mut sink = MemoryNodeSink::new();
        let report = compile(&p, &mut sink).unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(
            sink.get("admin/AOrder/refund").unwrap().parent.as_deref(),
            Some("admin/Order/default_page")
        );
    }

    #[test]
    fn test_missing_parent_is_fatal_after_cap() {
        let p = provider(&[(
            "app::controllers::Admin::UserController",
            "",
            &[("index", "@Node(name=List, parent=shop/Missing/page)")],
        )]);
        let mut sink = MemoryNodeSink::new();
        let err = compile(&p, &mut sink).unwrap_err();
        assert_eq!(
            err,
            CompileError::ParentScopeUnresolved {
                module: "Admin".into(),
                parent: "shop/Missing/page".into(),
                path: "admin/User/index".into(),
                attempts: MAX_NODE_PASSES,
            }
        );
    }

    #[test]
    fn test_delete_flag_removes_existing_record() {
        let mut sink = MemoryNodeSink::new();
        let first = provider(&[(
            "app::controllers::Admin::UserController",
            "@Node(name=Users)",
            &[("default_page", ""), ("export", "@Node(name=Export)")],
        )]);
        compile(&first, &mut sink).unwrap();
        assert_eq!(sink.len(), 2);

        let second = provider(&[(
            "app::controllers::Admin::UserController",
            "@Node(name=Users)",
            &[("default_page", ""), ("export", "@Node(name=Export, delete=1)")],
        )]);
        let report = compile(&second, &mut sink).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(sink.get("admin/User/export").is_none());
        assert_eq!(report.unchanged, 1);
    }
}
