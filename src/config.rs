//! # Configuration Module
//!
//! Compiler and runtime settings, loaded from a YAML or JSON file and then
//! overridden from the environment.
//!
//! ## Example
//!
//! ```yaml
//! controller_namespace: app::controllers
//! modules: [admin, shop]
//! annotation_path: data/routes
//! auto_create: true
//! root_group:
//!   admin: { prefix: admin, middleware: auth }
//! interceptor:
//!   lock:
//!     enabled: true
//!     expire: 600
//!     response: { code: 429, msg: "Too many requests" }
//!   validate:
//!     enabled: true
//!     validators:
//!       UserValidator:
//!         rules: { username: "required|alpha_num", email: "required|email" }
//!         attributes: { username: "user name" }
//! ```
//!
//! ## Environment Variables
//!
//! - `ANNOROUTE_AUTO_CREATE` - `true`/`false`, rebuild on unresolved paths
//! - `ANNOROUTE_MODULES` - comma separated module list
//! - `ANNOROUTE_ANNOTATION_PATH` - artifact directory
//! - `ANNOROUTE_VALIDATE` - `true`/`false`, input validation interceptor switch

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::annotation::{AnnotationRegistry, AnnotationSpecConfig};
use crate::lock::{default_denied_response, LockDefaults, DEFAULT_LOCK_EXPIRE};
use crate::route::CompileOptions;
use crate::validation::NamedValidator;

/// Lock interceptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockInterceptorConfig {
    pub enabled: bool,
    /// Payload for denied requests when the annotation gives none
    pub response: Value,
    /// Expire seconds when the annotation gives none
    pub expire: u64,
}

impl Default for LockInterceptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            response: default_denied_response(),
            expire: DEFAULT_LOCK_EXPIRE,
        }
    }
}

/// Input validation interceptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateInterceptorConfig {
    pub enabled: bool,
    /// Validators referenced by `@Validation(class=Name)`
    pub validators: BTreeMap<String, NamedValidator>,
}

impl Default for ValidateInterceptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            validators: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    pub lock: LockInterceptorConfig,
    pub validate: ValidateInterceptorConfig,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub controller_namespace: String,
    pub modules: Vec<String>,
    /// Directory receiving one artifact folder per module
    pub annotation_path: PathBuf,
    /// Rebuild a module when a request path does not resolve
    pub auto_create: bool,
    /// Compile menu nodes together with routes
    pub auto_create_node: bool,
    /// Module → outermost group scope
    pub root_group: BTreeMap<String, Map<String, Value>>,
    pub container_suffix: String,
    pub ignore_members: Vec<String>,
    /// Seconds the per-module rebuild lock is held at most
    pub rebuild_lock_ttl: u64,
    pub interceptor: InterceptorConfig,
    /// Extra or replacement annotation kinds
    pub annotations: Vec<AnnotationSpecConfig>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            controller_namespace: "app::controllers".to_string(),
            modules: Vec::new(),
            annotation_path: PathBuf::from("data/routes"),
            auto_create: false,
            auto_create_node: false,
            root_group: BTreeMap::new(),
            container_suffix: "Controller".to_string(),
            ignore_members: Vec::new(),
            rebuild_lock_ttl: 60,
            interceptor: InterceptorConfig::default(),
            annotations: Vec::new(),
        }
    }
}

impl AnnotationConfig {
    /// Load from `path` (`.yaml`/`.yml` as YAML, otherwise JSON) and apply
    /// environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self = if path
            .extension()
            .map(|s| s == "yaml" || s == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON config {}", path.display()))?
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `ANNOROUTE_*` variables.
    pub fn apply_env(&mut self) {
        if let Ok(val) = env::var("ANNOROUTE_AUTO_CREATE") {
            if let Some(flag) = parse_flag(&val) {
                self.auto_create = flag;
            }
        }
        if let Ok(val) = env::var("ANNOROUTE_VALIDATE") {
            if let Some(flag) = parse_flag(&val) {
                self.interceptor.validate.enabled = flag;
            }
        }
        if let Ok(val) = env::var("ANNOROUTE_MODULES") {
            let modules: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            if !modules.is_empty() {
                self.modules = modules;
            }
        }
        if let Ok(val) = env::var("ANNOROUTE_ANNOTATION_PATH") {
            if !val.trim().is_empty() {
                self.annotation_path = PathBuf::from(val.trim());
            }
        }
    }

    #[must_use]
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            controller_namespace: self.controller_namespace.clone(),
            container_suffix: self.container_suffix.clone(),
            ignore_members: self.ignore_members.clone(),
            root_group: self.root_group.clone(),
        }
    }

    #[must_use]
    pub fn lock_defaults(&self) -> LockDefaults {
        LockDefaults {
            expire: if self.interceptor.lock.expire > 0 {
                self.interceptor.lock.expire
            } else {
                DEFAULT_LOCK_EXPIRE
            },
            response: self.interceptor.lock.response.clone(),
        }
    }

    /// Built-in annotation kinds with configured ones layered on top.
    pub fn registry(&self) -> anyhow::Result<AnnotationRegistry> {
        AnnotationRegistry::with_overrides(&self.annotations)
            .context("invalid annotation name in configuration")
    }

    /// Artifact directory for one module.
    #[must_use]
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.annotation_path.join(module)
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
