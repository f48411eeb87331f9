use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Named shorthands that expand to a regex check.
const REGEX_ALIASES: &[(&str, &str)] = &[
    ("mobile", r"^1\d{10}$"),
    ("mobile_international", r"^(\+\d{2,3}-*)?1\d{10}$"),
    ("id_card", r"(?i)^[0-9]{15,18}(X)?$"),
    ("simple_chinese", r"^[\x{4e00}-\x{9fa5}]+$"),
];

/// A compiled regex that serializes as its source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(de::Error::custom)
    }
}

/// One input check.
///
/// `min`, `max` and `between` measure numbers by value, strings by character
/// count and arrays by length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", content = "args", rename_all = "snake_case")]
pub enum Rule {
    Required,
    Numeric,
    Integer,
    Boolean,
    Array,
    Email,
    AlphaNum,
    In(Vec<String>),
    NotIn(Vec<String>),
    Regex(Pattern),
    Min(f64),
    Max(f64),
    Between(f64, f64),
}

impl Rule {
    /// Parse `name[:args]`, e.g. `required`, `in:1,2`, `regex:~^\w+$~i`.
    ///
    /// Names are matched after converting `CamelCase` to `snake_case`.
    pub fn parse(text: &str) -> Result<Rule, String> {
        let (name, args) = match text.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (text, None),
        };
        let name = snake_case(name.trim());
        if let Some((_, source)) = REGEX_ALIASES.iter().find(|(alias, _)| *alias == name) {
            return Pattern::new(source)
                .map(Rule::Regex)
                .map_err(|e| format!("invalid pattern for '{name}': {e}"));
        }
        let rule = match name.as_str() {
            "required" => Rule::Required,
            "numeric" => Rule::Numeric,
            "integer" => Rule::Integer,
            "boolean" => Rule::Boolean,
            "array" | "is_array" => Rule::Array,
            "email" => Rule::Email,
            "alpha_num" => Rule::AlphaNum,
            "in" => Rule::In(list_args(&name, args)?),
            "not_in" => Rule::NotIn(list_args(&name, args)?),
            "regex" => {
                let raw = args.ok_or_else(|| "rule 'regex' needs a pattern".to_string())?;
                Pattern::new(&delimited_pattern(raw))
                    .map(Rule::Regex)
                    .map_err(|e| format!("invalid pattern '{raw}': {e}"))?
            }
            "min" => Rule::Min(number_arg(&name, args)?),
            "max" => Rule::Max(number_arg(&name, args)?),
            "between" => {
                let bounds = list_args(&name, args)?;
                let [low, high] = bounds.as_slice() else {
                    return Err("rule 'between' needs two bounds".to_string());
                };
                Rule::Between(
                    number_arg(&name, Some(low.as_str()))?,
                    number_arg(&name, Some(high.as_str()))?,
                )
            }
            other => return Err(format!("unknown validation rule '{other}'")),
        };
        Ok(rule)
    }

    /// Whether `value` passes. Absent values only fail `required`.
    #[must_use]
    pub fn check(&self, value: Option<&Value>) -> bool {
        let Some(value) = value.filter(|v| !is_blank(v)) else {
            return !matches!(self, Rule::Required);
        };
        match self {
            Rule::Required => true,
            Rule::Numeric => as_number(value).is_some(),
            Rule::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            Rule::Boolean => matches!(scalar(value).as_deref(), Some("0" | "1" | "true" | "false")),
            Rule::Array => matches!(value, Value::Array(_) | Value::Object(_)),
            Rule::Email => scalar(value).is_some_and(|s| EMAIL.is_match(&s)),
            Rule::AlphaNum => {
                scalar(value).is_some_and(|s| s.chars().all(char::is_alphanumeric))
            }
            Rule::In(allowed) => each_scalar(value, |s| allowed.iter().any(|a| a == s)),
            Rule::NotIn(denied) => each_scalar(value, |s| !denied.iter().any(|d| d == s)),
            Rule::Regex(pattern) => scalar(value).is_some_and(|s| pattern.is_match(&s)),
            Rule::Min(min) => size(value).is_some_and(|n| n >= *min),
            Rule::Max(max) => size(value).is_some_and(|n| n <= *max),
            Rule::Between(min, max) => size(value).is_some_and(|n| n >= *min && n <= *max),
        }
    }

    /// Built-in message template; `:attribute`, `:min` and `:max` are replaced.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        match self {
            Rule::Required => "The :attribute field is required.",
            Rule::Numeric => "The :attribute must be a number.",
            Rule::Integer => "The :attribute must be an integer.",
            Rule::Boolean => "The :attribute field must be true or false.",
            Rule::Array => "The :attribute must be an array.",
            Rule::Email => "The :attribute must be a valid email address.",
            Rule::AlphaNum => "The :attribute may only contain letters and numbers.",
            Rule::In(_) | Rule::NotIn(_) => "The selected :attribute is invalid.",
            Rule::Regex(_) => "The :attribute format is invalid.",
            Rule::Min(_) => "The :attribute must be at least :min.",
            Rule::Max(_) => "The :attribute may not be greater than :max.",
            Rule::Between(..) => "The :attribute must be between :min and :max.",
        }
    }

    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self {
            Rule::Min(min) => (Some(*min), None),
            Rule::Max(max) => (None, Some(*max)),
            Rule::Between(min, max) => (Some(*min), Some(*max)),
            _ => (None, None),
        }
    }

    /// Fill a message template for this rule.
    #[must_use]
    pub fn render(&self, template: &str, attribute: &str) -> String {
        let mut message = template.replace(":attribute", attribute);
        let (min, max) = self.bounds();
        if let Some(min) = min {
            message = message.replace(":min", &fmt_number(min));
        }
        if let Some(max) = max {
            message = message.replace(":max", &fmt_number(max));
        }
        message
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => f.write_str("required"),
            Rule::Numeric => f.write_str("numeric"),
            Rule::Integer => f.write_str("integer"),
            Rule::Boolean => f.write_str("boolean"),
            Rule::Array => f.write_str("array"),
            Rule::Email => f.write_str("email"),
            Rule::AlphaNum => f.write_str("alpha_num"),
            Rule::In(values) => write!(f, "in:{}", values.join(",")),
            Rule::NotIn(values) => write!(f, "not_in:{}", values.join(",")),
            Rule::Regex(pattern) => write!(f, "regex:{}", pattern.as_str()),
            Rule::Min(n) => write!(f, "min:{}", fmt_number(*n)),
            Rule::Max(n) => write!(f, "max:{}", fmt_number(*n)),
            Rule::Between(a, b) => write!(f, "between:{},{}", fmt_number(*a), fmt_number(*b)),
        }
    }
}

/// `AlphaNum` → `alpha_num`; already snake names pass through lowercased.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Strip `~...~flags` style delimiters and turn the flags into inline groups.
fn delimited_pattern(raw: &str) -> String {
    let raw = raw.trim();
    let Some(delim) = raw
        .chars()
        .next()
        .filter(|c| !c.is_alphanumeric() && !matches!(c, '\\' | '^' | '(' | '['))
    else {
        return raw.to_string();
    };
    let body = &raw[delim.len_utf8()..];
    let Some(end) = body.rfind(delim) else {
        return raw.to_string();
    };
    let flags: String = body[end + delim.len_utf8()..]
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    if flags.is_empty() {
        body[..end].to_string()
    } else {
        format!("(?{flags}){}", &body[..end])
    }
}

fn list_args(name: &str, args: Option<&str>) -> Result<Vec<String>, String> {
    let values: Vec<String> = args
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        Err(format!("rule '{name}' needs at least one value"))
    } else {
        Ok(values)
    }
}

fn number_arg(name: &str, arg: Option<&str>) -> Result<f64, String> {
    arg.and_then(|a| a.trim().parse::<f64>().ok())
        .ok_or_else(|| format!("rule '{name}' needs a numeric argument"))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn each_scalar(value: &Value, pred: impl Fn(&str) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().all(|v| scalar(v).is_some_and(|s| pred(&s))),
        other => scalar(other).is_some_and(|s| pred(&s)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn size(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        Value::Bool(_) | Value::Null => None,
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
