use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::annotation::{flatten_value, ParsedAnnotation};

/// Prefix used when an annotation does not name one.
pub const DEFAULT_LOCK_PREFIX: &str = "sync_lock_annotation_";

/// Lock lifetime in seconds when none is given.
pub const DEFAULT_LOCK_EXPIRE: u64 = 86_400;

/// Source/field pair composed into the suffix of token-scoped locks.
pub const DEFAULT_TOKEN_BODY: &str = "header";
pub const DEFAULT_TOKEN_FIELD: &str = "token";

/// Values treated as `false` for the `once` flag.
const FALSE_LITERALS: &[&str] = &["", "0", "false", "no", "off"];

/// Fallback values applied when an annotation leaves them out.
#[derive(Debug, Clone, PartialEq)]
pub struct LockDefaults {
    pub expire: u64,
    /// Payload returned to callers when the lock is held elsewhere
    pub response: Value,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self {
            expire: DEFAULT_LOCK_EXPIRE,
            response: default_denied_response(),
        }
    }
}

/// Response used when neither the annotation nor configuration supplies one.
#[must_use]
pub fn default_denied_response() -> Value {
    json!({"code": 500, "msg": "Request busy, please try again later"})
}

/// Compiled lock annotation for one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockPolicy {
    /// Key prefix, always ending in `_`
    pub prefix: String,
    /// Lowercased `container_name`
    pub name: String,
    /// Explicit suffix spec, resolved before `suffixes`
    pub suffix: Option<String>,
    pub suffixes: Vec<String>,
    /// Seconds the key lives
    pub expire: u64,
    /// Leave the key to expire instead of deleting it after the run
    pub once: bool,
    pub response: Value,
}

impl LockPolicy {
    /// Compile lock annotation fields found on `member` of `container`.
    ///
    /// # Arguments
    ///
    /// * `container` - Container short name with its marker suffix removed
    /// * `member` - Member name, used when the annotation has no `name`
    /// * `fields` - Parsed annotation fields
    /// * `token_scoped` - Whether the annotation is the token-scoped variant
    /// * `defaults` - Configured fallback expire and response
    #[must_use]
    pub fn compile(
        container: &str,
        member: &str,
        fields: &ParsedAnnotation,
        token_scoped: bool,
        defaults: &LockDefaults,
    ) -> Self {
        let name = fields.non_empty_str("name").unwrap_or(member);
        let prefix = fields
            .non_empty_str("prefix")
            .map(|p| format!("{}_", p.trim_end_matches('_')))
            .unwrap_or_else(|| DEFAULT_LOCK_PREFIX.to_string());

        let (default_body, default_token) = if token_scoped {
            (DEFAULT_TOKEN_BODY, DEFAULT_TOKEN_FIELD)
        } else {
            ("", "")
        };
        let body = fields.non_empty_str("body").unwrap_or(default_body);
        let token = fields.non_empty_str("token").unwrap_or(default_token);
        let suffix = fields
            .non_empty_str("suffix")
            .map(|s| s.trim_start_matches(':').to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                if body.is_empty() || token.is_empty() {
                    None
                } else {
                    Some(format!("{body}.${token}"))
                }
            });

        let suffixes = match fields.get("suffixes") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| flatten_value(v).trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let expire = fields
            .get("expire")
            .map(flatten_value)
            .and_then(|e| e.parse::<u64>().ok())
            .filter(|e| *e > 0)
            .unwrap_or(defaults.expire);

        let once = fields
            .get("once")
            .map(flatten_value)
            .is_some_and(|v| !FALSE_LITERALS.contains(&v.to_ascii_lowercase().as_str()));

        let response = match fields.get("response") {
            Some(value @ Value::Object(map)) if !map.is_empty() => value.clone(),
            _ => match fields.get("code").map(flatten_value) {
                Some(code) => json!({
                    "code": code.parse::<i64>().unwrap_or_default(),
                    "msg": fields.get("msg").map(flatten_value).unwrap_or_default(),
                }),
                None => defaults.response.clone(),
            },
        };

        Self {
            prefix,
            name: format!("{container}_{name}").to_lowercase(),
            suffix,
            suffixes,
            expire,
            once,
            response,
        }
    }

    /// `prefix` followed by `name`, the key before any digest.
    #[must_use]
    pub fn base_key(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }

    /// Suffix specs in resolution order: explicit suffix first.
    pub fn suffix_specs(&self) -> impl Iterator<Item = &str> {
        self.suffix
            .as_deref()
            .into_iter()
            .chain(self.suffixes.iter().map(String::as_str))
    }
}
