//! # Artifact Persistence
//!
//! A compiled module is written to `annotation_path/<module>/`:
//!
//! | File | Content |
//! |------|---------|
//! | `route.rs.txt` | rendered registration statements |
//! | `alias.json` | conventional path → explicit path |
//! | `index.json` | base path → arity range → target |
//! | `lock_annotation.json` | route path → lock policy |
//! | `validation.json` | route path → input rules |
//! | `module.json` | the whole [`CompiledModule`], read back on warm start |
//!
//! Only `module.json` is read back; the other files are for consumers
//! outside this crate.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::lock::LockMap;
use crate::route::{render_routes, RouteTable};
use crate::validation::ValidationMap;

pub const ROUTE_FILE: &str = "route.rs.txt";
pub const ALIAS_FILE: &str = "alias.json";
pub const INDEX_FILE: &str = "index.json";
pub const LOCK_FILE: &str = "lock_annotation.json";
pub const VALIDATION_FILE: &str = "validation.json";
pub const MODULE_FILE: &str = "module.json";

/// Everything compiled for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub module: String,
    pub routes: RouteTable,
    pub locks: LockMap,
    #[serde(default)]
    pub validations: ValidationMap,
    /// Type id → modification time observed when compiling
    pub sources: BTreeMap<String, Option<u64>>,
    /// Seconds since the epoch
    pub compiled_at: u64,
}

impl CompiledModule {
    #[must_use]
    pub fn new(
        module: impl Into<String>,
        routes: RouteTable,
        locks: LockMap,
        sources: BTreeMap<String, Option<u64>>,
    ) -> Self {
        Self {
            module: module.into(),
            routes,
            locks,
            validations: ValidationMap::new(),
            sources,
            compiled_at: now_secs(),
        }
    }

    #[must_use]
    pub fn with_validations(mut self, validations: ValidationMap) -> Self {
        self.validations = validations;
        self
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write every artifact file of `compiled` into `dir`.
///
/// # Errors
///
/// Fails when the directory cannot be created or a file cannot be written.
pub fn write_module(dir: &Path, compiled: &CompiledModule, namespace: &str) -> anyhow::Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

    write_file(
        &dir.join(ROUTE_FILE),
        render_routes(&compiled.routes, &compiled.module, namespace),
    )?;
    write_json(&dir.join(ALIAS_FILE), &compiled.routes.aliases)?;
    write_json(&dir.join(INDEX_FILE), &compiled.routes.index)?;
    write_json(&dir.join(LOCK_FILE), &compiled.locks)?;
    write_json(&dir.join(VALIDATION_FILE), &compiled.validations)?;
    write_json(&dir.join(MODULE_FILE), compiled)?;
    Ok(())
}

/// Read `module.json` from `dir`; `None` when it was never written.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or decoded.
pub fn read_module(dir: &Path) -> anyhow::Result<Option<CompiledModule>> {
    let path = dir.join(MODULE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let compiled = serde_json::from_str(&content)
        .with_context(|| format!("Invalid artifact {}", path.display()))?;
    Ok(Some(compiled))
}

/// Paths of all artifact files for a module directory.
#[must_use]
pub fn artifact_paths(dir: &Path) -> Vec<PathBuf> {
    [
        ROUTE_FILE,
        ALIAS_FILE,
        INDEX_FILE,
        LOCK_FILE,
        VALIDATION_FILE,
        MODULE_FILE,
    ]
        .iter()
        .map(|f| dir.join(f))
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to encode {}", path.display()))?;
    write_file(path, content)
}

fn write_file(path: &Path, content: String) -> anyhow::Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
