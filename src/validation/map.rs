use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use super::rule::{snake_case, Rule};
use crate::annotation::spec::VALIDATION;
use crate::annotation::{AnnotationMatch, AnnotationRegistry, Matcher};
use crate::error::CompileError;
use crate::introspect::{IntrospectionProvider, Visibility};
use crate::lock::{RequestContext, ValueSource};
use crate::route::{CompileOptions, HandlerRef, RouteIndex, RouteTable};

/// Annotation names that take the full `field`/`rule`/`rules` form.
const FULL_FORMS: &[&str] = &["validation", "validate"];

/// Rules for a validator referenced by `class=Name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedValidator {
    /// Field → `|` separated rules
    pub rules: BTreeMap<String, String>,
    /// `field.rule` or `rule` → message template
    pub messages: BTreeMap<String, String>,
    /// Field → display name
    pub attributes: BTreeMap<String, String>,
}

/// A rule bound to a field, with its custom message if one was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Rule name as written, e.g. `mobile`
    pub name: String,
    pub rule: Rule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// All rules for one input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRules {
    /// Input name; dots descend into nested objects
    pub field: String,
    /// Name substituted for `:attribute`
    pub attribute: String,
    pub rules: Vec<FieldRule>,
}

/// First failed check of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Violation {}

/// Ordered field rules for one handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    fields: Vec<FieldRules>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldRules> {
        self.fields.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append `rule` to `field`, creating the field entry on first use.
    pub fn push(&mut self, field: &str, attribute: Option<&str>, rule: FieldRule) {
        let pos = match self.fields.iter().position(|f| f.field == field) {
            Some(pos) => pos,
            None => {
                self.fields.push(FieldRules {
                    field: field.to_string(),
                    attribute: field.to_string(),
                    rules: Vec::new(),
                });
                self.fields.len() - 1
            }
        };
        let entry = &mut self.fields[pos];
        if let Some(attribute) = attribute {
            entry.attribute = attribute.to_string();
        }
        entry.rules.push(rule);
    }

    /// Check fields in declaration order and report the first failure.
    #[must_use]
    pub fn check(&self, ctx: &dyn RequestContext) -> Option<Violation> {
        for field in &self.fields {
            let value = input_value(ctx, &field.field);
            for bound in &field.rules {
                if bound.rule.check(value.as_ref()) {
                    continue;
                }
                let template = bound
                    .message
                    .as_deref()
                    .unwrap_or_else(|| bound.rule.default_message());
                return Some(Violation {
                    field: field.field.clone(),
                    rule: bound.name.clone(),
                    message: bound.rule.render(template, &field.attribute),
                });
            }
        }
        None
    }

    /// Add the rules of one annotation occurrence.
    ///
    /// `@Validation`/`@Validate` take `field`, `rule` (`|` separated) or
    /// `rules`, `attribute`, `message` (`|` separated, aligned with the rules)
    /// or `messages`, and `class` naming a configured validator. Any other
    /// name is itself the rule: `@Required(username)`,
    /// `@In(field=sex, rule=1|2)`.
    pub fn add_occurrence(
        &mut self,
        found: &AnnotationMatch,
        validators: &BTreeMap<String, NamedValidator>,
    ) -> Result<(), String> {
        let fields = &found.fields;
        let full_form = FULL_FORMS
            .iter()
            .any(|n| found.name.eq_ignore_ascii_case(n));

        if full_form {
            if let Some(class) = fields.non_empty_str("class") {
                return self.add_named(class, validators);
            }
        }

        let field = fields
            .non_empty_str("field")
            .or_else(|| fields.non_empty_str("name"))
            .or_else(|| fields.non_empty_str("value"))
            .ok_or_else(|| format!("@{} declares no field", found.name))?;
        let attribute = fields.non_empty_str("attribute");

        let rule_texts: Vec<String> = if full_form {
            let texts = match fields.get("rules") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                Some(Value::String(s)) => split_rules(s),
                _ => fields.get_str("rule").map(split_rules).unwrap_or_default(),
            };
            if texts.is_empty() {
                return Err(format!("@{} on field '{field}' declares no rule", found.name));
            }
            texts
        } else {
            let name = snake_case(&found.name);
            match fields.non_empty_str("rule") {
                Some(args) if matches!(name.as_str(), "in" | "not_in" | "between") => {
                    vec![format!("{name}:{}", args.replace('|', ","))]
                }
                Some(args) => vec![format!("{name}:{args}")],
                None => vec![name],
            }
        };

        let positional: Vec<&str> = fields
            .non_empty_str("message")
            .or_else(|| fields.non_empty_str("msg"))
            .map(|m| m.split('|').map(str::trim).collect())
            .unwrap_or_default();
        let keyed = match fields.get("messages") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        for (i, text) in rule_texts.iter().enumerate() {
            let rule = Rule::parse(text).map_err(|e| format!("field '{field}': {e}"))?;
            let name = rule_name(text);
            let message = keyed_message(&keyed, field, &name).or_else(|| {
                positional
                    .get(i)
                    .filter(|m| !m.is_empty())
                    .map(|m| (*m).to_string())
            });
            self.push(field, attribute, FieldRule { name, rule, message });
        }
        Ok(())
    }

    fn add_named(
        &mut self,
        class: &str,
        validators: &BTreeMap<String, NamedValidator>,
    ) -> Result<(), String> {
        let name = class_name(class);
        let validator = validators
            .get(name)
            .ok_or_else(|| format!("validator '{name}' is not configured"))?;
        for (field, rules) in &validator.rules {
            let attribute = validator.attributes.get(field).map(String::as_str);
            for text in split_rules(rules) {
                let rule = Rule::parse(&text)
                    .map_err(|e| format!("validator '{name}', field '{field}': {e}"))?;
                let rule_name = rule_name(&text);
                let message = keyed_message(&validator.messages, field, &rule_name);
                self.push(
                    field,
                    attribute,
                    FieldRule {
                        name: rule_name,
                        rule,
                        message,
                    },
                );
            }
        }
        Ok(())
    }
}

fn split_rules(text: &str) -> Vec<String> {
    text.split('|')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

fn rule_name(text: &str) -> String {
    snake_case(text.split(':').next().unwrap_or(text).trim())
}

/// `app\Validators\UserValidator::class` → `UserValidator`.
fn class_name(class: &str) -> &str {
    let class = class.trim().trim_end_matches("::class");
    class
        .rsplit(['\\', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or(class)
}

fn keyed_message(messages: &BTreeMap<String, String>, field: &str, rule: &str) -> Option<String> {
    messages
        .get(&format!("{field}.{rule}"))
        .or_else(|| messages.get(rule))
        .cloned()
}

/// Request input for a possibly dotted field name.
fn input_value(ctx: &dyn RequestContext, field: &str) -> Option<Value> {
    let mut parts = field.split('.');
    let mut value = ctx.value(ValueSource::Input, parts.next()?)?;
    for part in parts {
        value = match value {
            Value::Object(mut map) => map.remove(part)?,
            Value::Array(mut items) => {
                let idx: usize = part.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Route path → rules checked before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationMap {
    sets: BTreeMap<String, RuleSet>,
}

impl ValidationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, rules: RuleSet) {
        self.sets
            .insert(path.into().trim_matches('/').to_string(), rules);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&RuleSet> {
        self.sets.get(path.trim_matches('/'))
    }

    /// Rules for a live request path: exact match first, then via the index.
    #[must_use]
    pub fn find(&self, path: &str, index: Option<&RouteIndex>) -> Option<&RuleSet> {
        self.get(path).or_else(|| {
            index
                .and_then(|idx| idx.lookup(path))
                .and_then(|found| self.get(&found.entry.path))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RuleSet)> {
        self.sets.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Compile validation annotations for one module against its route table.
    ///
    /// Rules are registered under the full path of every route bound to the
    /// member; members without routes are skipped.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidAnnotation`] for unknown rules, missing fields
    /// or unconfigured validators, and provider errors.
    pub fn compile(
        provider: &dyn IntrospectionProvider,
        registry: &AnnotationRegistry,
        options: &CompileOptions,
        validators: &BTreeMap<String, NamedValidator>,
        module: &str,
        routes: &RouteTable,
    ) -> Result<Self, CompileError> {
        let mut map = ValidationMap::new();
        let Some(spec) = registry.get(VALIDATION) else {
            return Ok(map);
        };
        for type_id in provider.types_in(&options.module_namespace(module)) {
            let members = provider.members(&type_id, Visibility::Public)?;
            let matcher =
                Matcher::new(spec, "").with_ignored(options.ignore_members.iter().cloned());
            for member in &members {
                let Some(found) = matcher.match_member(member, true) else {
                    continue;
                };
                let handler = HandlerRef::new(type_id.clone(), member.name.clone());
                let mut rules = RuleSet::new();
                for occurrence in &found {
                    rules.add_occurrence(occurrence, validators).map_err(|reason| {
                        CompileError::InvalidAnnotation {
                            module: module.to_string(),
                            handler: handler.to_string(),
                            reason,
                        }
                    })?;
                }
                let mut bound = false;
                for route in routes.routes_for(&handler) {
                    map.insert(route.full_path.clone(), rules.clone());
                    bound = true;
                }
                if !bound {
                    debug!(module, handler = %handler, "Validation on unrouted member skipped");
                }
            }
        }
        info!(module, validations_count = map.len(), "Validation map compiled");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::SimpleRequest;
    use serde_json::json;

    fn occurrence(name: &str, fields: Value) -> AnnotationMatch {
        AnnotationMatch {
            name: name.into(),
            fields: fields.as_object().cloned().unwrap_or_default().into(),
        }
    }

    #[test]
    fn test_full_form_with_positional_messages() {
        let mut rules = RuleSet::new();
        rules
            .add_occurrence(
                &occurrence(
                    "Validation",
                    json!({"field": "username", "rule": "required|min:5", "attribute": "user name", "message": "|too short"}),
                ),
                &BTreeMap::new(),
            )
            .unwrap();

        let missing = rules.check(&SimpleRequest::new("user")).unwrap();
        assert_eq!(missing.rule, "required");
        assert_eq!(missing.message, "The user name field is required.");

        let short = rules
            .check(&SimpleRequest::new("user").with_body("username", "abc"))
            .unwrap();
        assert_eq!(short.message, "too short");
        assert!(rules
            .check(&SimpleRequest::new("user").with_query("username", "abcdef"))
            .is_none());
    }

    #[test]
    fn test_shorthand_names_accumulate_on_one_field() {
        let mut rules = RuleSet::new();
        let none = BTreeMap::new();
        rules
            .add_occurrence(&occurrence("Required", json!({"field": "sex"})), &none)
            .unwrap();
        rules
            .add_occurrence(
                &occurrence("In", json!({"field": "sex", "rule": "1|2", "message": ":attribute must be 1 or 2"})),
                &none,
            )
            .unwrap();

        let fields: Vec<_> = rules.fields().collect();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].rules.len(), 2);
        let bad = rules
            .check(&SimpleRequest::new("p").with_body("sex", 3))
            .unwrap();
        assert_eq!((bad.rule.as_str(), bad.message.as_str()), ("in", "sex must be 1 or 2"));
    }

    #[test]
    fn test_named_validator_and_nested_fields() {
        let validators = BTreeMap::from([(
            "UserValidator".to_string(),
            NamedValidator {
                rules: BTreeMap::from([("profile.email".to_string(), "required|email".to_string())]),
                messages: BTreeMap::from([("email".to_string(), "bad :attribute".to_string())]),
                attributes: BTreeMap::from([("profile.email".to_string(), "e-mail".to_string())]),
            },
        )]);
        let mut rules = RuleSet::new();
        rules
            .add_occurrence(
                &occurrence("Validation", json!({"class": "UserValidator::class"})),
                &validators,
            )
            .unwrap();

        let ctx = SimpleRequest::new("u").with_body("profile", json!({"email": "nope"}));
        assert_eq!(rules.check(&ctx).unwrap().message, "bad e-mail");
        let ok = SimpleRequest::new("u").with_body("profile", json!({"email": "a@b.io"}));
        assert!(rules.check(&ok).is_none());

        let err = RuleSet::new()
            .add_occurrence(&occurrence("Validation", json!({"class": "Missing"})), &validators)
            .unwrap_err();
        assert!(err.contains("Missing"));
    }

    #[test]
    fn test_incomplete_annotations_are_rejected() {
        let none = BTreeMap::new();
        assert!(RuleSet::new()
            .add_occurrence(&occurrence("Validation", json!({"field": "a"})), &none)
            .is_err());
        assert!(RuleSet::new()
            .add_occurrence(&occurrence("Required", json!({})), &none)
            .is_err());
        assert!(RuleSet::new()
            .add_occurrence(&occurrence("Validation", json!({"field": "a", "rule": "shiny"})), &none)
            .is_err());
    }

    #[test]
    fn test_class_name_forms() {
        assert_eq!(class_name("UserValidator::class"), "UserValidator");
        assert_eq!(class_name(r"App\Validators\UserValidator"), "UserValidator");
        assert_eq!(class_name("app::validators::UserValidator"), "UserValidator");
    }
}
