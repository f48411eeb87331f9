//! # Group Scopes and the Group Tree
//!
//! A route may sit inside several grouping scopes: the module's configured
//! root group, a `@Group` on its container type and one or more `@Group`s on
//! the member itself. Scopes are normalized, deduplicated and merged into a
//! tree with exactly one node per distinct scope combination, so the emitted
//! route file nests the fewest possible group blocks.
//!
//! ```text
//! root {prefix=api}
//! └── {middleware=auth}
//!     ├── route users.index
//!     └── route users.show
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::annotation::{flatten_value, ParsedAnnotation};
use crate::digest::sha256_hex;

/// A normalized grouping scope with its canonical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupScope {
    /// Options sorted by key with empty values removed
    pub options: Map<String, Value>,
    /// Hex digest of the sorted `key=value` pairs
    pub key: String,
}

impl GroupScope {
    /// Normalize parsed annotation fields into a scope.
    ///
    /// Returns `None` when nothing non-empty remains.
    #[must_use]
    pub fn from_fields(fields: &ParsedAnnotation) -> Option<Self> {
        Self::from_map(fields.as_map())
    }

    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let mut entries: Vec<(String, Value)> = map
            .iter()
            .filter(|(_, v)| !is_empty_value(v))
            .map(|(k, v)| (k.trim().to_string(), v.clone()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        if entries.is_empty() {
            return None;
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical = entries
            .iter()
            .map(|(k, v)| format!("{k}={}", flatten_value(v)))
            .collect::<Vec<_>>()
            .join("&");
        let key = sha256_hex(canonical.as_bytes());
        Some(Self {
            options: entries.into_iter().collect(),
            key,
        })
    }

    /// `prefix` option, trimmed of slashes.
    #[must_use]
    pub fn prefix(&self) -> Option<String> {
        self.options
            .get("prefix")
            .map(flatten_value)
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

/// Merge scope candidates, outermost first, into a deduplicated chain.
///
/// Empty scopes are dropped. A scope whose canonical key already occurs
/// anywhere earlier in the chain contributes no new nesting level, not only
/// when it directly follows an equal scope: `[A, B, A]` merges to `[A, B]`.
/// Re-entering an enclosing scope would only repeat options already in force.
#[must_use]
pub fn merge_scopes<'a, I>(candidates: I) -> Vec<GroupScope>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut chain: Vec<GroupScope> = Vec::new();
    for candidate in candidates {
        let Some(scope) = GroupScope::from_map(candidate) else {
            continue;
        };
        if chain.iter().any(|existing| existing.key == scope.key) {
            continue;
        }
        chain.push(scope);
    }
    chain
}

/// An entry inside a group node: a nested group or an attached leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupEntry<T> {
    Group(usize),
    Leaf(T),
}

/// One scope in the tree with its ordered entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode<T> {
    pub scope: GroupScope,
    pub entries: Vec<GroupEntry<T>>,
}

/// Nested grouping tree; leaves are route entries.
///
/// Nodes live in an arena and refer to children by index. Siblings never
/// share a canonical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTree<T> {
    nodes: Vec<GroupNode<T>>,
    /// Top-level entries: ungrouped leaves and outermost groups
    root: Vec<GroupEntry<T>>,
}

impl<T> Default for GroupTree<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            root: Vec::new(),
        }
    }
}

/// Visitor events produced by [`GroupTree::walk`].
#[derive(Debug, PartialEq)]
pub enum Visit<'a, T> {
    Enter(&'a GroupScope, usize),
    Leaf(&'a T, usize),
    Exit(&'a GroupScope, usize),
}

impl<T> GroupTree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `leaf` beneath `chain`, reusing existing nodes for shared prefixes.
    pub fn insert(&mut self, chain: &[GroupScope], leaf: T) {
        let mut parent: Option<usize> = None;
        for scope in chain {
            let existing = self
                .entries(parent)
                .iter()
                .find_map(|entry| match entry {
                    GroupEntry::Group(idx) if self.nodes[*idx].scope.key == scope.key => Some(*idx),
                    _ => None,
                });
            let idx = match existing {
                Some(idx) => idx,
                None => {
                    self.nodes.push(GroupNode {
                        scope: scope.clone(),
                        entries: Vec::new(),
                    });
                    let idx = self.nodes.len() - 1;
                    self.entries_mut(parent).push(GroupEntry::Group(idx));
                    idx
                }
            };
            parent = Some(idx);
        }
        self.entries_mut(parent).push(GroupEntry::Leaf(leaf));
    }

    fn entries(&self, node: Option<usize>) -> &[GroupEntry<T>] {
        match node {
            Some(idx) => &self.nodes[idx].entries,
            None => &self.root,
        }
    }

    fn entries_mut(&mut self, node: Option<usize>) -> &mut Vec<GroupEntry<T>> {
        match node {
            Some(idx) => &mut self.nodes[idx].entries,
            None => &mut self.root,
        }
    }

    /// Number of group nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    #[must_use]
    pub fn root_entries(&self) -> &[GroupEntry<T>] {
        &self.root
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&GroupNode<T>> {
        self.nodes.get(idx)
    }

    /// Depth-first traversal in insertion order using an explicit stack.
    ///
    /// The `usize` in each event is the nesting depth.
    #[must_use]
    pub fn walk(&self) -> Vec<Visit<'_, T>> {
        enum Frame {
            Entries(Option<usize>, usize),
            Exit(usize),
        }
        let mut events = Vec::new();
        let mut stack = vec![Frame::Entries(None, 0)];
        let mut depth = 0usize;
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Exit(idx) => {
                    depth -= 1;
                    events.push(Visit::Exit(&self.nodes[idx].scope, depth));
                }
                Frame::Entries(node, pos) => {
                    let entries = self.entries(node);
                    let Some(entry) = entries.get(pos) else {
                        continue;
                    };
                    stack.push(Frame::Entries(node, pos + 1));
                    match entry {
                        GroupEntry::Leaf(leaf) => events.push(Visit::Leaf(leaf, depth)),
                        GroupEntry::Group(idx) => {
                            events.push(Visit::Enter(&self.nodes[*idx].scope, depth));
                            depth += 1;
                            stack.push(Frame::Exit(*idx));
                            stack.push(Frame::Entries(Some(*idx), 0));
                        }
                    }
                }
            }
        }
        events
    }

    /// Leaves in traversal order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&T> {
        self.walk()
            .into_iter()
            .filter_map(|v| match v {
                Visit::Leaf(leaf, _) => Some(leaf),
                _ => None,
            })
            .collect()
    }

    /// Whether any node has two child groups with the same canonical key.
    #[must_use]
    pub fn has_duplicate_siblings(&self) -> bool {
        let levels = std::iter::once(&self.root).chain(self.nodes.iter().map(|n| &n.entries));
        for entries in levels {
            let mut seen = std::collections::HashSet::new();
            for entry in entries {
                if let GroupEntry::Group(idx) = entry {
                    if !seen.insert(self.nodes[*idx].scope.key.as_str()) {
                        return true;
                    }
                }
            }
        }
        false
    }
}
