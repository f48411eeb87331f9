//! # Member Introspection
//!
//! The compiler never reflects over code itself. Instead an
//! [`IntrospectionProvider`] supplies, per type, its doc text, its members with
//! their doc text, and the modification time of the source artifact that
//! defines it.
//!
//! [`ManifestProvider`] is the bundled implementation. It reads a YAML or JSON
//! manifest describing types and members:
//!
//! ```yaml
//! types:
//!   - id: app::controllers::admin::UserController
//!     source: src/admin/user.rs        # optional, mtime read live
//!     modified: 1700000000             # optional, used when no source
//!     doc: "@Group(prefix=admin)"
//!     members:
//!       - name: show
//!         kind: method
//!         doc: '@GetMapping("users/{id}/{tab?}")'
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::CompileError;

/// Kind of a type member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Method,
    Property,
}

/// Member visibility used to filter introspection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// One member as seen by the annotation matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    /// Owning type id
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    pub visibility: Visibility,
    /// Raw doc comment text
    pub doc: String,
    /// Source modification time of the owner, seconds since the epoch
    pub modified: Option<u64>,
}

/// Supplies doc text and modification times for types in a namespace.
///
/// Implementations only report what exists; they never parse annotations.
pub trait IntrospectionProvider: Send + Sync {
    /// Ids of the concrete types declared directly in `namespace`.
    fn types_in(&self, namespace: &str) -> Vec<String>;

    /// Doc text attached to the type.
    fn type_doc(&self, type_id: &str) -> Result<String, CompileError>;

    /// Members of the type visible at `visibility` or wider, in declaration order.
    fn members(
        &self,
        type_id: &str,
        visibility: Visibility,
    ) -> Result<Vec<MemberDescriptor>, CompileError>;

    /// Live modification time of the artifact defining the type.
    fn modified_time(&self, type_id: &str) -> Result<Option<u64>, CompileError>;

    /// Whether the type still declares a member with this name.
    fn has_member(&self, type_id: &str, member: &str) -> bool {
        self.members(type_id, Visibility::Private)
            .map(|members| members.iter().any(|m| m.name == member))
            .unwrap_or(false)
    }
}

/// Last path segment of a type id (`a::b::UserController` → `UserController`).
#[must_use]
pub fn short_name(type_id: &str) -> &str {
    type_id.rsplit("::").next().unwrap_or(type_id)
}

/// Segment preceding the short name, used as the module name.
#[must_use]
pub fn module_of(type_id: &str) -> Option<&str> {
    let mut parts = type_id.rsplit("::");
    parts.next()?;
    parts.next()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestMember {
    pub name: String,
    pub kind: Option<MemberKind>,
    pub visibility: Visibility,
    pub doc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestType {
    pub id: String,
    pub doc: String,
    /// Source file whose mtime is read on every freshness check
    pub source: Option<PathBuf>,
    /// Fixed modification time when no source file is given
    pub modified: Option<u64>,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    pub members: Vec<ManifestMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub types: Vec<ManifestType>,
}

/// Introspection provider backed by a type manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestProvider {
    types: BTreeMap<String, ManifestType>,
    order: Vec<String>,
    base_dir: Option<PathBuf>,
}

impl ManifestProvider {
    #[must_use]
    pub fn from_manifest(manifest: Manifest) -> Self {
        let mut provider = Self::default();
        for ty in manifest.types {
            provider.insert(ty);
        }
        provider
    }

    /// Load a manifest file; `.yaml`/`.yml` are read as YAML, anything else as JSON.
    ///
    /// Relative `source` paths resolve against the manifest's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = if path
            .extension()
            .map(|s| s == "yaml" || s == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid YAML manifest {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON manifest {}", path.display()))?
        };
        let mut provider = Self::from_manifest(manifest);
        provider.base_dir = path.parent().map(Path::to_path_buf);
        Ok(provider)
    }

    /// Add or replace a type.
    pub fn insert(&mut self, ty: ManifestType) {
        if !self.types.contains_key(&ty.id) {
            self.order.push(ty.id.clone());
        }
        self.types.insert(ty.id.clone(), ty);
    }

    /// Mutable access for tests and tooling that simulate source edits.
    pub fn type_mut(&mut self, type_id: &str) -> Option<&mut ManifestType> {
        self.types.get_mut(type_id)
    }

    fn lookup(&self, type_id: &str) -> Result<&ManifestType, CompileError> {
        self.types
            .get(type_id)
            .ok_or_else(|| CompileError::HandlerUnresolvable {
                module: module_of(type_id).unwrap_or_default().to_string(),
                container: type_id.to_string(),
                member: String::new(),
                reason: "type is not declared in the manifest".into(),
            })
    }

    fn source_mtime(&self, source: &Path) -> Option<u64> {
        let path = match &self.base_dir {
            Some(base) if source.is_relative() => base.join(source),
            _ => source.to_path_buf(),
        };
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }
}

impl IntrospectionProvider for ManifestProvider {
    fn types_in(&self, namespace: &str) -> Vec<String> {
        let prefix = format!("{}::", namespace.trim_end_matches("::"));
        self.order
            .iter()
            .filter(|id| {
                id.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains("::"))
            })
            .filter(|id| self.types.get(*id).is_some_and(|t| !t.is_abstract))
            .cloned()
            .collect()
    }

    fn type_doc(&self, type_id: &str) -> Result<String, CompileError> {
        Ok(self.lookup(type_id)?.doc.clone())
    }

    fn members(
        &self,
        type_id: &str,
        visibility: Visibility,
    ) -> Result<Vec<MemberDescriptor>, CompileError> {
        let ty = self.lookup(type_id)?;
        let modified = self.modified_time(type_id)?;
        Ok(ty
            .members
            .iter()
            .filter(|m| m.visibility <= visibility)
            .map(|m| MemberDescriptor {
                owner: ty.id.clone(),
                name: m.name.clone(),
                kind: m.kind.unwrap_or(MemberKind::Method),
                visibility: m.visibility,
                doc: m.doc.clone(),
                modified,
            })
            .collect())
    }

    fn modified_time(&self, type_id: &str) -> Result<Option<u64>, CompileError> {
        let ty = self.lookup(type_id)?;
        Ok(match &ty.source {
            Some(source) => self.source_mtime(source).or(ty.modified),
            None => ty.modified,
        })
    }
}
