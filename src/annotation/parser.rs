//! Annotation argument parser.
//!
//! Turns the text between an annotation's parentheses into an ordered
//! key/value mapping. Three grammars are tried in order:
//!
//! 1. A JSON object or array literal, decoded as-is (nesting allowed).
//! 2. A single brace pair that is not valid JSON, e.g. `{prefix=api}`; the
//!    braces are stripped and the interior falls through to (3).
//! 3. `key=value` items separated by commas. Without a comma the text is either
//!    one `key=value` pair or a bare value stored under `value`.
//!
//! Values produced by the key/value grammar are always strings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Key used when the annotation carries a bare value, e.g. `@GetMapping("users")`.
pub const DEFAULT_VALUE_FIELD: &str = "value";

static JSON_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*(\{.*\}|\[.*\])\s*$").expect("valid json literal regex"));

static BRACED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*\{(.*)\}\s*$").expect("valid brace regex"));

/// Ordered field mapping produced by parsing one annotation occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedAnnotation(Map<String, Value>);

impl ParsedAnnotation {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of a field, `None` when absent or not a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Trimmed, non-empty string value of a field.
    #[must_use]
    pub fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.get_str(key).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Merge `overrides` on top of the parsed fields.
    ///
    /// Only keys present in `overrides` are replaced; everything else is kept.
    pub fn merge_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Whether every value is a plain string.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.0.values().all(Value::is_string)
    }
}

impl From<Map<String, Value>> for ParsedAnnotation {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for ParsedAnnotation {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An item the key/value grammar could not use.
///
/// Reported for diagnostics only; the item is dropped and parsing continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Raw item text
    pub item: String,
    /// Why it was dropped
    pub reason: &'static str,
}

/// Parser options supplied by the annotation spec being matched.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions<'a> {
    /// Replacement values for items whose value is empty
    pub defaults: Option<&'a BTreeMap<String, String>>,
    /// Fields written as `name={...}` that are extracted before comma splitting
    pub structured_fields: &'a [String],
}

/// Parse annotation argument text, discarding diagnostics.
#[must_use]
pub fn parse_annotation(text: &str, options: &ParseOptions<'_>) -> ParsedAnnotation {
    let (parsed, dropped) = parse_annotation_reporting(text, options);
    for err in &dropped {
        debug!(item = %err.item, reason = err.reason, "Dropped annotation item");
    }
    parsed
}

/// Parse annotation argument text and report dropped items.
#[must_use]
pub fn parse_annotation_reporting(
    text: &str,
    options: &ParseOptions<'_>,
) -> (ParsedAnnotation, Vec<ParseError>) {
    let mut dropped = Vec::new();
    if text.trim().is_empty() {
        return (ParsedAnnotation::new(), dropped);
    }

    if JSON_LITERAL.is_match(text) {
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            return (from_json(value), dropped);
        }
    }

    let (structured, rest) = extract_structured(text, options.structured_fields);

    let interior = match BRACED.captures(&rest) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => rest,
    };
    let cleaned: String = interior.chars().filter(|c| *c != '"' && *c != '\'').collect();

    let mut parsed = ParsedAnnotation::new();
    if !cleaned.contains(',') {
        if let Some((key, value)) = cleaned.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                dropped.push(ParseError {
                    item: cleaned.clone(),
                    reason: "empty key",
                });
            } else {
                parsed.insert(key, Value::String(value.trim().to_string()));
            }
        } else if !cleaned.trim().is_empty() || structured.is_empty() {
            parsed.insert(
                DEFAULT_VALUE_FIELD,
                Value::String(cleaned.trim().to_string()),
            );
        }
    } else {
        for item in cleaned.split(',') {
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (item.trim(), ""),
            };
            if key.is_empty() {
                if !item.trim().is_empty() {
                    dropped.push(ParseError {
                        item: item.to_string(),
                        reason: "empty key",
                    });
                }
                continue;
            }
            if value.is_empty() {
                match options.defaults.and_then(|d| d.get(key)) {
                    Some(default) => {
                        parsed.insert(key, Value::String(default.clone()));
                    }
                    None => dropped.push(ParseError {
                        item: item.to_string(),
                        reason: "empty value without default",
                    }),
                }
                continue;
            }
            parsed.insert(key, Value::String(value.to_string()));
        }
    }

    for (key, value) in structured {
        parsed.insert(key, value);
    }
    (parsed, dropped)
}

fn from_json(value: Value) -> ParsedAnnotation {
    match value {
        Value::Object(map) => ParsedAnnotation(map),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            let mut parsed = ParsedAnnotation::new();
            parsed.insert(DEFAULT_VALUE_FIELD, other);
            parsed
        }
    }
}

/// Pull `name={...}` and `name=[...]` fields out of the text so their inner
/// commas survive.
///
/// A brace body without `:` is a list (`{"$a", "$b"}`); other brace bodies and
/// bracket bodies are decoded as JSON, falling back to a comma-split list.
fn extract_structured(text: &str, fields: &[String]) -> (Vec<(String, Value)>, String) {
    if fields.is_empty() {
        return (Vec::new(), text.to_string());
    }
    let names: Vec<String> = fields.iter().map(|f| regex::escape(f)).collect();
    let pattern = format!(r"({})\s*=\s*(\{{.*?\}}|\[.*?\])", names.join("|"));
    let Ok(re) = Regex::new(&pattern) else {
        return (Vec::new(), text.to_string());
    };

    let mut extracted = Vec::new();
    for caps in re.captures_iter(text) {
        let name = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let body = caps.get(2).map_or("", |m| m.as_str());
        let value = if body.starts_with('[') {
            serde_json::from_str(body).unwrap_or_else(|_| split_list(body))
        } else if body.contains(':') {
            serde_json::from_str(body).unwrap_or(Value::Null)
        } else {
            split_list(body)
        };
        extracted.push((name, value));
    }
    if extracted.is_empty() {
        return (extracted, text.to_string());
    }

    let rest = re.replace_all(text, "");
    let rest = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (extracted, rest)
}

fn split_list(body: &str) -> Value {
    let inner = body
        .trim_start_matches(['{', '['])
        .trim_end_matches(['}', ']']);
    Value::Array(
        inner
            .split(',')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}
