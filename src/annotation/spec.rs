use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::parser::{parse_annotation, ParseOptions, ParsedAnnotation};

/// Declaration sites an annotation may appear on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Type,
    Method,
    Property,
}

/// Serializable description of an annotation kind, as found in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationSpecConfig {
    /// Canonical kind, e.g. `route`
    pub kind: String,
    /// Interchangeable names, canonical name first
    pub names: Vec<String>,
    pub targets: Vec<TargetKind>,
    /// Replacement values for items written with an empty value
    pub defaults: BTreeMap<String, String>,
    /// Alias name → fields forced on top of the parsed result
    pub aliases: BTreeMap<String, Map<String, Value>>,
    /// Fields written as `name={...}`
    pub structured_fields: Vec<String>,
    /// Field a bare value stands for, when not `value`
    pub value_field: Option<String>,
}

/// A compiled annotation kind: names, targets, defaults and match pattern.
#[derive(Debug, Clone)]
pub struct AnnotationSpec {
    kind: String,
    names: Vec<String>,
    targets: Vec<TargetKind>,
    defaults: BTreeMap<String, String>,
    aliases: BTreeMap<String, Map<String, Value>>,
    structured_fields: Vec<String>,
    value_field: Option<String>,
    pattern: Regex,
}

impl AnnotationSpec {
    /// Compile a spec from its configuration.
    ///
    /// The match pattern is `@(Name|Alias...)` followed by an optional
    /// parenthesised argument list running to the last `)` on that line.
    pub fn new(config: AnnotationSpecConfig) -> Result<Self, regex::Error> {
        let mut names = config.names;
        if names.is_empty() {
            names.push(config.kind.clone());
        }
        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)@({alternation})\b[ \t]*(\([ \t]*(.*)\))?"))?;
        let aliases = config
            .aliases
            .into_iter()
            .map(|(name, fields)| (name.to_ascii_lowercase(), fields))
            .collect();
        Ok(Self {
            kind: config.kind,
            names,
            targets: config.targets,
            defaults: config.defaults,
            aliases,
            structured_fields: config.structured_fields,
            value_field: config.value_field,
            pattern,
        })
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    #[must_use]
    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    #[must_use]
    pub fn value_field(&self) -> Option<&str> {
        self.value_field.as_deref()
    }

    #[must_use]
    pub fn targets(&self, target: TargetKind) -> bool {
        self.targets.contains(&target)
    }

    /// Whether `name` is the canonical (first) name of this spec.
    #[must_use]
    pub fn is_canonical(&self, name: &str) -> bool {
        self.names
            .first()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    /// Override fields implied by an alias name, if any.
    #[must_use]
    pub fn alias_overrides(&self, name: &str) -> Option<&Map<String, Value>> {
        self.aliases.get(&name.to_ascii_lowercase())
    }

    /// Parse argument text with this spec's defaults and structured fields.
    #[must_use]
    pub fn parse(&self, text: &str) -> ParsedAnnotation {
        parse_annotation(
            text,
            &ParseOptions {
                defaults: Some(&self.defaults),
                structured_fields: &self.structured_fields,
            },
        )
    }
}

/// Annotation kinds known to the compiler, keyed by kind.
#[derive(Debug, Clone)]
pub struct AnnotationRegistry {
    specs: BTreeMap<String, AnnotationSpec>,
}

pub const ROUTE: &str = "route";
pub const GROUP: &str = "group";
pub const SYNC_LOCK: &str = "sync_lock";
pub const SYNC_LOCK_BY_TOKEN: &str = "sync_lock_by_token";
pub const NODE: &str = "node";
pub const VALIDATION: &str = "validation";

impl AnnotationRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in route, group, lock, validation and node kinds.
    pub fn builtin() -> Result<Self, regex::Error> {
        let mut registry = Self::empty();
        for config in builtin_configs() {
            registry.register(AnnotationSpec::new(config)?);
        }
        Ok(registry)
    }

    /// Built-ins with configured entries layered on top (same kind replaces).
    pub fn with_overrides(configs: &[AnnotationSpecConfig]) -> Result<Self, regex::Error> {
        let mut registry = Self::builtin()?;
        for config in configs {
            registry.register(AnnotationSpec::new(config.clone())?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: AnnotationSpec) {
        self.specs.insert(spec.kind.clone(), spec);
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&AnnotationSpec> {
        self.specs.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationSpec> {
        self.specs.values()
    }
}

fn fields(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn builtin_configs() -> Vec<AnnotationSpecConfig> {
    let lock_fields = strings(&["response", "suffixes"]);
    vec![
        AnnotationSpecConfig {
            kind: ROUTE.into(),
            names: strings(&[
                "Route",
                "RequestMapping",
                "GetMapping",
                "PostMapping",
                "OptionsMapping",
            ]),
            targets: vec![TargetKind::Method],
            defaults: [("method".to_string(), "get".to_string())].into(),
            aliases: [
                ("RequestMapping".to_string(), fields(&[("method", "GET|POST")])),
                ("GetMapping".to_string(), fields(&[("method", "GET")])),
                ("PostMapping".to_string(), fields(&[("method", "POST")])),
                ("OptionsMapping".to_string(), fields(&[("method", "OPTIONS")])),
            ]
            .into(),
            structured_fields: Vec::new(),
            value_field: None,
        },
        AnnotationSpecConfig {
            kind: GROUP.into(),
            names: strings(&["Group"]),
            targets: vec![TargetKind::Type, TargetKind::Method],
            ..Default::default()
        },
        AnnotationSpecConfig {
            kind: SYNC_LOCK.into(),
            names: strings(&["SyncLock"]),
            targets: vec![TargetKind::Method],
            structured_fields: lock_fields.clone(),
            value_field: Some("expire".into()),
            ..Default::default()
        },
        AnnotationSpecConfig {
            kind: SYNC_LOCK_BY_TOKEN.into(),
            names: strings(&["SyncLockByToken"]),
            targets: vec![TargetKind::Method],
            structured_fields: lock_fields,
            value_field: Some("expire".into()),
            ..Default::default()
        },
        AnnotationSpecConfig {
            kind: VALIDATION.into(),
            names: strings(&[
                "Validation",
                "Validate",
                "Required",
                "Numeric",
                "Integer",
                "Boolean",
                "IsArray",
                "Email",
                "AlphaNum",
                "In",
                "NotIn",
                "Regex",
                "Min",
                "Max",
                "Between",
                "MobileInternational",
                "Mobile",
                "IdCard",
                "SimpleChinese",
            ]),
            targets: vec![TargetKind::Method],
            structured_fields: strings(&["rules", "messages"]),
            value_field: Some("field".into()),
            ..Default::default()
        },
        AnnotationSpecConfig {
            kind: NODE.into(),
            names: strings(&["Node"]),
            targets: vec![TargetKind::Type, TargetKind::Method],
            defaults: [
                ("menu".to_string(), "0".to_string()),
                ("auth".to_string(), "0".to_string()),
                ("order".to_string(), "0".to_string()),
                ("ignore".to_string(), "1".to_string()),
            ]
            .into(),
            value_field: Some("name".into()),
            ..Default::default()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_route_aliases() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let route = registry.get(ROUTE).unwrap();
        assert!(route.is_canonical("route"));
        assert!(!route.is_canonical("GetMapping"));
        assert_eq!(
            route.alias_overrides("getmapping").and_then(|m| m.get("method")),
            Some(&Value::String("GET".into()))
        );
        assert!(route.alias_overrides("Route").is_none());
        assert!(route.targets(TargetKind::Method));
        assert!(!route.targets(TargetKind::Type));
    }

    #[test]
    fn test_pattern_is_word_bounded_and_case_insensitive() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let group = registry.get(GROUP).unwrap();
        assert!(group.pattern().is_match("/// @group(prefix=api)"));
        assert!(!group.pattern().is_match("/// @Groups(prefix=api)"));
        let lock = registry.get(SYNC_LOCK).unwrap();
        assert!(!lock.pattern().is_match("@SyncLockByToken"));
    }

    #[test]
    fn test_validation_shorthands_do_not_swallow_longer_names() {
        let registry = AnnotationRegistry::builtin().unwrap();
        let validation = registry.get(VALIDATION).unwrap();
        let caps = validation.pattern().captures("@Integer(age)").unwrap();
        assert_eq!(&caps[1], "Integer");
        let caps = validation.pattern().captures("@MobileInternational(phone)").unwrap();
        assert_eq!(&caps[1], "MobileInternational");
        assert!(!validation.pattern().is_match("@Inject(service)"));
        assert!(!validation.pattern().is_match("@RequestMapping(\"a\")"));
    }

    #[test]
    fn test_config_override_replaces_kind() {
        let custom = AnnotationSpecConfig {
            kind: GROUP.into(),
            names: vec!["Scope".into()],
            targets: vec![TargetKind::Type],
            ..Default::default()
        };
        let registry = AnnotationRegistry::with_overrides(&[custom]).unwrap();
        let group = registry.get(GROUP).unwrap();
        assert!(group.pattern().is_match("@Scope(prefix=x)"));
        assert!(!group.pattern().is_match("@Group(prefix=x)"));
    }
}
