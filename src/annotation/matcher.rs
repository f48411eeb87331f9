use once_cell::sync::OnceCell;
use serde_json::Value;

use super::parser::{ParsedAnnotation, DEFAULT_VALUE_FIELD};
use super::spec::{AnnotationSpec, TargetKind};
use crate::introspect::{MemberDescriptor, MemberKind};

/// Members skipped by every matcher: constructors and framework hooks.
pub const DEFAULT_IGNORED_MEMBERS: &[&str] = &[
    "new",
    "default",
    "drop",
    "call_action",
    "middleware",
    "get_middleware",
    "authorize",
    "authorize_resource",
    "validate",
    "validate_with",
];

/// One annotation occurrence after parsing and alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMatch {
    /// Name as written at the declaration site, e.g. `GetMapping`
    pub name: String,
    pub fields: ParsedAnnotation,
}

impl AnnotationMatch {
    /// Whether the occurrence used an alias rather than the canonical name.
    #[must_use]
    pub fn is_alias(&self, spec: &AnnotationSpec) -> bool {
        !spec.is_canonical(&self.name)
    }
}

/// Matches one annotation kind against one type and its members.
///
/// The type-level result is computed once per matcher.
pub struct Matcher<'a> {
    spec: &'a AnnotationSpec,
    type_doc: &'a str,
    ignored: Vec<String>,
    type_match: OnceCell<Option<AnnotationMatch>>,
}

impl<'a> Matcher<'a> {
    #[must_use]
    pub fn new(spec: &'a AnnotationSpec, type_doc: &'a str) -> Self {
        Self {
            spec,
            type_doc,
            ignored: DEFAULT_IGNORED_MEMBERS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            type_match: OnceCell::new(),
        }
    }

    /// Extend the ignore list with configured member names.
    #[must_use]
    pub fn with_ignored<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn spec(&self) -> &AnnotationSpec {
        self.spec
    }

    /// First occurrence on the type itself, `None` when absent.
    ///
    /// `Some` with empty fields means the annotation was present without arguments.
    pub fn match_type(&self) -> Option<&AnnotationMatch> {
        self.type_match
            .get_or_init(|| {
                if !self.spec.targets(TargetKind::Type) {
                    return None;
                }
                self.scan(self.type_doc, false).into_iter().next()
            })
            .as_ref()
    }

    /// Occurrences on a member: the first only, or all of them.
    ///
    /// Returns `None` for ignored members, inapplicable member kinds, and
    /// members without the annotation.
    #[must_use]
    pub fn match_member(
        &self,
        member: &MemberDescriptor,
        all_occurrences: bool,
    ) -> Option<Vec<AnnotationMatch>> {
        if self.is_ignored(&member.name) {
            return None;
        }
        let target = match member.kind {
            MemberKind::Method => TargetKind::Method,
            MemberKind::Property => TargetKind::Property,
        };
        if !self.spec.targets(target) {
            return None;
        }
        let found = self.scan(&member.doc, all_occurrences);
        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    }

    /// Convenience for the single-occurrence case.
    #[must_use]
    pub fn match_member_first(&self, member: &MemberDescriptor) -> Option<AnnotationMatch> {
        self.match_member(member, false)
            .and_then(|found| found.into_iter().next())
    }

    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.iter().any(|n| n == name)
    }

    fn scan(&self, doc: &str, all: bool) -> Vec<AnnotationMatch> {
        let mut found = Vec::new();
        for caps in self.spec.pattern().captures_iter(doc) {
            let name = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let text = caps.get(3).map_or("", |m| m.as_str());
            found.push(self.resolve(name, text));
            if !all {
                break;
            }
        }
        found
    }

    fn resolve(&self, name: String, text: &str) -> AnnotationMatch {
        let mut fields = self.spec.parse(text);
        if let Some(target) = self.spec.value_field() {
            if fields.get(target).is_none() {
                if let Some(value) = fields.get(DEFAULT_VALUE_FIELD).cloned() {
                    if value.as_str().map_or(true, |s| !s.is_empty()) {
                        fields.insert(target, value);
                    }
                }
            }
        }
        if let Some(overrides) = self.spec.alias_overrides(&name) {
            fields.merge_overrides(overrides);
        }
        AnnotationMatch { name, fields }
    }
}

/// Render a value for hashing or display: strings verbatim, lists comma-joined.
#[must_use]
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(flatten_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::spec::{AnnotationRegistry, GROUP, ROUTE, SYNC_LOCK};
    use crate::introspect::Visibility;

    fn member(name: &str, doc: &str) -> MemberDescriptor {
        MemberDescriptor {
            owner: "app::admin::UserController".into(),
            name: name.into(),
            kind: MemberKind::Method,
            visibility: Visibility::Public,
            doc: doc.into(),
            modified: None,
        }
    }

    #[test]
    fn test_type_match_distinguishes_absent_from_empty() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let group = registry.get(GROUP).unwrap();
        let with_empty = Matcher::new(group, "/// @Group\n/// docs");
        let found = with_empty.match_type().unwrap();
        assert!(found.fields.is_empty());

        let absent = Matcher::new(group, "/// plain docs");
        assert!(absent.match_type().is_none());
    }

    #[test]
    fn test_type_match_requires_type_target() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let route = registry.get(ROUTE).unwrap();
        let matcher = Matcher::new(route, "@Route(url=x)");
        assert!(matcher.match_type().is_none());
    }

    #[test]
    fn test_member_first_and_all() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let group = registry.get(GROUP).unwrap();
        let matcher = Matcher::new(group, "");
        let m = member("index", "@Group(prefix=a)\n@Group(prefix=b)");
        let first = matcher.match_member(&m, false).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].fields.get_str("prefix"), Some("a"));
        let all = matcher.match_member(&m, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].fields.get_str("prefix"), Some("b"));
    }

    #[test]
    fn test_ignored_members_are_skipped() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let route = registry.get(ROUTE).unwrap();
        let matcher = Matcher::new(route, "").with_ignored(["boot"]);
        assert!(matcher.match_member(&member("new", "@Route"), false).is_none());
        assert!(matcher.match_member(&member("boot", "@Route"), false).is_none());
        assert!(matcher.match_member(&member("index", "@Route"), false).is_some());
    }

    #[test]
    fn test_alias_overrides_win_only_for_their_fields() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let route = registry.get(ROUTE).unwrap();
        let matcher = Matcher::new(route, "");
        let found = matcher
            .match_member_first(&member("login", "@PostMapping(url=login, method=get)"))
            .unwrap();
        assert_eq!(found.name, "PostMapping");
        assert!(found.is_alias(route));
        assert_eq!(found.fields.get_str("method"), Some("POST"));
        assert_eq!(found.fields.get_str("url"), Some("login"));
    }

    #[test]
    fn test_bare_value_maps_to_value_field() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let lock = registry.get(SYNC_LOCK).unwrap();
        let matcher = Matcher::new(lock, "");
        let found = matcher
            .match_member_first(&member("pay", "@SyncLock(30)"))
            .unwrap();
        assert_eq!(found.fields.get_str("expire"), Some("30"));
    }

    #[test]
    fn test_flatten_value() {
        assert_eq!(flatten_value(&serde_json::json!(["a", "b"])), "a,b");
        assert_eq!(flatten_value(&serde_json::json!(" x ")), "x");
        assert_eq!(flatten_value(&serde_json::json!(3)), "3");
    }
}
