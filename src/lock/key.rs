use serde_json::{Map, Value};
use std::collections::HashMap;

use super::policy::LockPolicy;
use crate::digest::{canonical_json, sha256_hex};

/// Marker in front of a field name that asks for the live request value.
pub const VARIABLE_MARKER: char = '$';

/// Named request location a suffix reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSource {
    Header,
    Query,
    Body,
    /// Body first, then query
    Input,
}

impl ValueSource {
    /// Source named by the first segment of a suffix spec.
    ///
    /// Unknown names fall back to the combined lookup.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => ValueSource::Header,
            "query" | "get" => ValueSource::Query,
            "body" | "post" | "put" => ValueSource::Body,
            _ => ValueSource::Input,
        }
    }
}

/// Request accessors consulted while deriving lock keys.
pub trait RequestContext {
    /// Request path without leading slash or query string.
    fn path(&self) -> &str;

    /// Value of `field` at `source`, `None` when absent.
    fn value(&self, source: ValueSource, field: &str) -> Option<Value>;
}

/// Plain in-memory request used by the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub path: String,
    /// Header names are matched case-insensitively
    pub headers: HashMap<String, String>,
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
}

impl SimpleRequest {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into().trim_matches('/').to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.body.insert(name.to_string(), value.into());
        self
    }
}

impl RequestContext for SimpleRequest {
    fn path(&self) -> &str {
        &self.path
    }

    fn value(&self, source: ValueSource, field: &str) -> Option<Value> {
        match source {
            ValueSource::Header => self
                .headers
                .get(&field.to_ascii_lowercase())
                .map(|v| Value::String(v.clone())),
            ValueSource::Query => self.query.get(field).cloned(),
            ValueSource::Body => self.body.get(field).cloned(),
            ValueSource::Input => self
                .body
                .get(field)
                .or_else(|| self.query.get(field))
                .cloned(),
        }
    }
}

/// Resolve one suffix spec against the request.
///
/// `source.$field` and `$field` read live values; anything else is literal
/// and returned as written.
#[must_use]
pub fn resolve_fragment(spec: &str, ctx: &dyn RequestContext) -> String {
    let (source, field) = match spec.split_once('.') {
        Some((source, field)) => (ValueSource::parse(source), field),
        None => (ValueSource::Input, spec),
    };
    let Some(name) = field.strip_prefix(VARIABLE_MARKER) else {
        return spec.to_string();
    };
    match ctx.value(source, name) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => canonical_json(&other),
    }
}

/// Derive the concrete key for `policy` and this request.
///
/// Fragments are concatenated in resolution order and digested; the digest
/// is appended after a colon only when some fragment is non-empty.
#[must_use]
pub fn resolve_key(policy: &LockPolicy, ctx: &dyn RequestContext) -> String {
    let joined: String = policy
        .suffix_specs()
        .map(|spec| resolve_fragment(spec, ctx))
        .collect();
    let base = policy.base_key();
    if joined.is_empty() {
        base
    } else {
        format!("{base}:{}", sha256_hex(joined.as_bytes()))
    }
}
