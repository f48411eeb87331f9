use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::HandlerRef;

/// `{name}` or `{name?}` path placeholder
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}$").expect("placeholder pattern is valid")
});

/// Inclusive range of variable segment counts a route accepts.
///
/// Serialized as the string key `"min-max"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl Arity {
    #[must_use]
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, count: usize) -> bool {
        self.min <= count && count <= self.max
    }

    #[must_use]
    pub fn overlaps(&self, other: &Arity) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl FromStr for Arity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("arity key '{s}' is not of the form min-max"))?;
        let min = min
            .parse()
            .map_err(|_| format!("invalid arity minimum in '{s}'"))?;
        let max = max
            .parse()
            .map_err(|_| format!("invalid arity maximum in '{s}'"))?;
        if min > max {
            return Err(format!("arity key '{s}' has min above max"));
        }
        Ok(Self { min, max })
    }
}

impl Serialize for Arity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Arity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A path template split into its static base and variable tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    /// Static segments before the first placeholder
    pub base: String,
    /// Placeholder names in order of appearance
    pub placeholders: Vec<String>,
    pub arity: Arity,
}

impl PathTemplate {
    /// Split `path` at its first placeholder.
    ///
    /// Every segment after the base counts towards the arity; optional
    /// placeholders (`{tab?}`) lower the minimum only.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let first_var = segments
            .iter()
            .position(|s| PLACEHOLDER.is_match(s))
            .unwrap_or(segments.len());

        let mut placeholders = Vec::new();
        let mut min = 0;
        for segment in &segments[first_var..] {
            match PLACEHOLDER.captures(segment) {
                Some(caps) => {
                    placeholders.push(caps[1].to_string());
                    if caps.get(2).is_none() {
                        min += 1;
                    }
                }
                None => min += 1,
            }
        }
        Self {
            base: segments[..first_var].join("/"),
            placeholders,
            arity: Arity::new(min, segments.len() - first_var),
        }
    }
}

/// A segment that looks like a value rather than a route name.
#[must_use]
pub fn is_variable_segment(segment: &str) -> bool {
    segment.starts_with(|c: char| c.is_ascii_digit())
        || segment
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

/// Target of one arity range under a base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub handler: HandlerRef,
    /// Source modification time recorded at compile time
    pub modified: Option<u64>,
    pub placeholders: Vec<String>,
    /// Full path template, group prefixes included
    pub path: String,
}

/// Result of a successful index lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMatch<'a> {
    pub base: String,
    pub arity: Arity,
    pub entry: &'a IndexEntry,
    /// Observed variable segments, in order
    pub variables: Vec<String>,
}

/// Base path → arity range → target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteIndex {
    entries: BTreeMap<String, BTreeMap<Arity, IndexEntry>>,
}

impl RouteIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a full path template.
    ///
    /// Returns `false` when an overlapping range under the same base already
    /// points at another handler; the first registration is kept.
    pub fn insert(
        &mut self,
        full_path: &str,
        handler: &HandlerRef,
        modified: Option<u64>,
    ) -> bool {
        let template = PathTemplate::parse(full_path);
        let ranges = self.entries.entry(template.base.clone()).or_default();
        let mut overlapping = ranges
            .iter()
            .filter(|(arity, _)| arity.overlaps(&template.arity));
        if let Some((arity, existing)) = overlapping
            .clone()
            .find(|(_, existing)| existing.handler != *handler)
        {
            debug!(
                base = %template.base,
                existing_range = %arity,
                new_range = %template.arity,
                kept = %existing.handler,
                dropped = %handler,
                "Overlapping arity range ignored"
            );
            return false;
        }
        if overlapping.any(|(arity, _)| *arity == template.arity) {
            return true;
        }
        ranges.insert(
            template.arity,
            IndexEntry {
                handler: handler.clone(),
                modified,
                placeholders: template.placeholders,
                path: full_path.trim_matches('/').to_string(),
            },
        );
        true
    }

    /// Resolve a live request path.
    ///
    /// Trailing variable-looking segments are stripped first; on a miss one
    /// more trailing segment is treated as variable, down to a single root
    /// segment.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<IndexMatch<'_>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return self.find(&segments, 0);
        }
        let trailing = segments
            .iter()
            .rev()
            .take_while(|s| is_variable_segment(s))
            .count();
        let mut base_len = (segments.len() - trailing).max(1);
        loop {
            if let Some(found) = self.find(&segments, base_len) {
                return Some(found);
            }
            if base_len <= 1 {
                return None;
            }
            base_len -= 1;
        }
    }

    fn find(&self, segments: &[&str], base_len: usize) -> Option<IndexMatch<'_>> {
        let base = segments[..base_len].join("/");
        let count = segments.len() - base_len;
        let ranges = self.entries.get(&base)?;
        let (arity, entry) = ranges.iter().find(|(arity, _)| arity.contains(count))?;
        Some(IndexMatch {
            base,
            arity: *arity,
            entry,
            variables: segments[base_len..].iter().map(|s| (*s).to_string()).collect(),
        })
    }

    #[must_use]
    pub fn ranges(&self, base: &str) -> Option<&BTreeMap<Arity, IndexEntry>> {
        self.entries.get(base)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<Arity, IndexEntry>)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
