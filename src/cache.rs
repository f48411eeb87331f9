//! # Artifact Cache
//!
//! Holds the compiled artifacts of every module and decides when to rebuild
//! them.
//!
//! ## Rebuild triggers
//!
//! - no compiled artifact exists for the module
//! - the caller forces a rebuild
//! - a request path fails to validate against the cached index and
//!   `auto_create` is on
//!
//! [`ArtifactCache::ensure`] additionally treats an artifact as stale when the
//! module's type set or any source modification time changed.
//!
//! ## Rebuild lock
//!
//! A rebuild holds the store key `distributed_lock:compile_module:{module}`
//! for at most `rebuild_lock_ttl` seconds. The key is deleted when the guard
//! drops, whether the rebuild succeeded or not. A caller that finds the key
//! held does not wait: it keeps serving the artifact it already has, or
//! reports [`CompileError::RebuildLockTimeout`] when it has none.
//!
//! Readers load the current artifact map through an `ArcSwap` and never block
//! on a rebuild.

use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::annotation::AnnotationRegistry;
use crate::artifact::{self, CompiledModule};
use crate::config::AnnotationConfig;
use crate::error::CompileError;
use crate::introspect::IntrospectionProvider;
use crate::lock::{self, Guarded, LockMap, LockStore, RequestContext};
use crate::node::{NodeCompiler, NodeReport, NodeSink};
use crate::route::{Arity, CompileOptions, HandlerRef, RouteTableCompiler};
use crate::validation::{self, ValidationMap, Violation};

/// Prefix of the per-module rebuild lock key.
pub const REBUILD_LOCK_PREFIX: &str = "distributed_lock:compile_module:";

/// A request path resolved through a module's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub module: String,
    pub handler: HandlerRef,
    /// Full path template that matched
    pub template: String,
    pub arity: Arity,
    /// Placeholder name → observed segment
    pub params: BTreeMap<String, String>,
}

/// Held rebuild lock; the key is deleted on drop.
struct RebuildLock<'a> {
    store: &'a dyn LockStore,
    key: String,
}

impl<'a> RebuildLock<'a> {
    fn try_acquire(
        store: &'a dyn LockStore,
        module: &str,
        ttl: u64,
    ) -> Result<Option<Self>, CompileError> {
        let key = format!("{REBUILD_LOCK_PREFIX}{module}");
        if store.set_nx_ex(&key, "1", ttl.max(1))? {
            Ok(Some(Self { store, key }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for RebuildLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.store.delete(&self.key) {
            warn!(key = %self.key, error = %err, "Failed to release rebuild lock");
        }
    }
}

/// Compiled artifacts for all modules, rebuilt on demand.
pub struct ArtifactCache {
    provider: Arc<dyn IntrospectionProvider>,
    registry: AnnotationRegistry,
    config: AnnotationConfig,
    options: CompileOptions,
    store: Arc<dyn LockStore>,
    modules: ArcSwap<HashMap<String, Arc<CompiledModule>>>,
    nodes: Option<Mutex<Box<dyn NodeSink + Send>>>,
    persist: bool,
}

impl ArtifactCache {
    /// Build a cache that writes artifacts under `config.annotation_path`.
    ///
    /// # Errors
    ///
    /// Fails when the configured annotation kinds are invalid.
    pub fn new(
        provider: Arc<dyn IntrospectionProvider>,
        config: AnnotationConfig,
        store: Arc<dyn LockStore>,
    ) -> anyhow::Result<Self> {
        let registry = config.registry()?;
        let options = config.compile_options();
        Ok(Self {
            provider,
            registry,
            config,
            options,
            store,
            modules: ArcSwap::from_pointee(HashMap::new()),
            nodes: None,
            persist: true,
        })
    }

    /// Keep artifacts in memory only.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Receive menu nodes on every rebuild when `auto_create_node` is set.
    #[must_use]
    pub fn with_node_sink(mut self, sink: Box<dyn NodeSink + Send>) -> Self {
        self.nodes = Some(Mutex::new(sink));
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    /// Current artifact for `module` without checking freshness.
    #[must_use]
    pub fn get(&self, module: &str) -> Option<Arc<CompiledModule>> {
        self.modules.load().get(module).cloned()
    }

    /// Compile `module` without touching the cache or the rebuild lock.
    ///
    /// # Errors
    ///
    /// Propagates [`CompileError::HandlerUnresolvable`],
    /// [`CompileError::InvalidAnnotation`] for malformed validation rules and,
    /// when nodes are compiled, [`CompileError::ParentScopeUnresolved`].
    pub fn compile(&self, module: &str) -> Result<CompiledModule, CompileError> {
        let provider = self.provider.as_ref();
        let routes = RouteTableCompiler::new(provider, &self.registry, &self.options).compile(module)?;
        let locks = LockMap::compile(
            provider,
            &self.registry,
            &self.options,
            &self.config.lock_defaults(),
            module,
            &routes,
        )?;
        let validations = ValidationMap::compile(
            provider,
            &self.registry,
            &self.options,
            &self.config.interceptor.validate.validators,
            module,
            &routes,
        )?;
        let mut sources = BTreeMap::new();
        for type_id in provider.types_in(&self.options.module_namespace(module)) {
            let modified = provider.modified_time(&type_id)?;
            sources.insert(type_id, modified);
        }
        if self.config.auto_create_node {
            if let Some(report) = self.compile_nodes(module)? {
                debug!(module, passes = report.passes, saved = report.saved, "Menu nodes compiled");
            }
        }
        Ok(CompiledModule::new(module, routes, locks, sources).with_validations(validations))
    }

    /// Compile menu nodes of `module` into the attached sink, if any.
    pub fn compile_nodes(&self, module: &str) -> Result<Option<NodeReport>, CompileError> {
        let Some(sink) = &self.nodes else {
            return Ok(None);
        };
        let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let report = NodeCompiler::new(self.provider.as_ref(), &self.registry, &self.options)
            .compile(module, &mut **sink)?;
        Ok(Some(report))
    }

    /// Whether `compiled` still describes the live sources.
    #[must_use]
    pub fn is_fresh(&self, compiled: &CompiledModule) -> bool {
        let live = self
            .provider
            .types_in(&self.options.module_namespace(&compiled.module));
        if live.len() != compiled.sources.len() {
            return false;
        }
        live.iter().all(|type_id| match compiled.sources.get(type_id) {
            Some(recorded) => self
                .provider
                .modified_time(type_id)
                .map(|now| now == *recorded)
                .unwrap_or(false),
            None => false,
        })
    }

    /// Return a fresh artifact for `module`, rebuilding when needed.
    ///
    /// # Errors
    ///
    /// - [`CompileError::RebuildLockTimeout`] when another caller is
    ///   rebuilding and no artifact exists yet
    /// - any compile or persistence error, after the rebuild lock is released
    pub fn ensure(&self, module: &str, force: bool) -> Result<Arc<CompiledModule>, CompileError> {
        let current = self.get(module);
        if !force {
            if let Some(compiled) = &current {
                if self.is_fresh(compiled) {
                    return Ok(Arc::clone(compiled));
                }
                info!(module, "Stale artifact detected");
            }
        }

        let Some(_guard) =
            RebuildLock::try_acquire(self.store.as_ref(), module, self.config.rebuild_lock_ttl)?
        else {
            warn!(module, "Rebuild lock contended, keeping existing artifact");
            return current.ok_or_else(|| CompileError::RebuildLockTimeout {
                module: module.to_string(),
            });
        };

        let compiled = Arc::new(self.compile(module)?);
        if self.persist {
            artifact::write_module(
                &self.config.module_dir(module),
                &compiled,
                &self.options.controller_namespace,
            )
            .map_err(|e| CompileError::Artifact {
                module: module.to_string(),
                message: format!("{e:#}"),
            })?;
        }
        self.install(Arc::clone(&compiled));
        info!(
            module,
            routes_count = compiled.routes.routes.len(),
            locks_count = compiled.locks.len(),
            validations_count = compiled.validations.len(),
            "Module artifacts rebuilt"
        );
        Ok(compiled)
    }

    fn install(&self, compiled: Arc<CompiledModule>) {
        self.modules.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(compiled.module.clone(), Arc::clone(&compiled));
            next
        });
    }

    /// Load persisted artifacts of every configured module.
    ///
    /// Returns the number of modules loaded. Loaded artifacts are still
    /// checked for freshness by [`ArtifactCache::ensure`].
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Artifact`] when a persisted file is unreadable.
    pub fn warm(&self) -> Result<usize, CompileError> {
        let mut loaded = 0;
        for module in &self.config.modules {
            let found = artifact::read_module(&self.config.module_dir(module)).map_err(|e| {
                CompileError::Artifact {
                    module: module.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            if let Some(compiled) = found {
                debug!(module = %module, "Loaded persisted artifact");
                self.install(Arc::new(compiled));
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    fn current_or_build(&self, module: &str) -> Result<Arc<CompiledModule>, CompileError> {
        match self.get(module) {
            Some(compiled) => Ok(compiled),
            None => self.ensure(module, false),
        }
    }

    /// Resolve a request path within `module`.
    ///
    /// A cached index entry only counts when its member still exists and its
    /// recorded modification time matches the live one. With `auto_create`
    /// on, a miss forces one rebuild and the lookup is retried.
    ///
    /// # Errors
    ///
    /// Compile errors from a triggered rebuild; a contended rebuild lock is
    /// not an error here.
    pub fn resolve(&self, module: &str, path: &str) -> Result<Option<ResolvedRoute>, CompileError> {
        let compiled = self.current_or_build(module)?;
        if let Some(found) = self.verify_entry(&compiled, path) {
            return Ok(Some(found));
        }
        if !self.config.auto_create {
            return Ok(None);
        }
        info!(module, path, "Path did not validate, rebuilding module");
        let rebuilt = match self.ensure(module, true) {
            Ok(rebuilt) => rebuilt,
            Err(err) if err.is_recoverable() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(self.verify_entry(&rebuilt, path))
    }

    /// Try every configured module in order.
    pub fn resolve_any(&self, path: &str) -> Result<Option<ResolvedRoute>, CompileError> {
        for module in &self.config.modules {
            if let Some(found) = self.resolve(module, path)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn verify_entry(&self, compiled: &CompiledModule, path: &str) -> Option<ResolvedRoute> {
        let found = compiled.routes.index.lookup(path.trim_matches('/'))?;
        let handler = &found.entry.handler;
        if !self.provider.has_member(&handler.type_id, &handler.member) {
            debug!(handler = %handler, "Indexed member no longer exists");
            return None;
        }
        if let Some(recorded) = found.entry.modified {
            let live = self.provider.modified_time(&handler.type_id).ok().flatten();
            if live != Some(recorded) {
                debug!(handler = %handler, recorded, "Indexed source changed");
                return None;
            }
        }
        let params = found
            .entry
            .placeholders
            .iter()
            .cloned()
            .zip(found.variables.iter().cloned())
            .collect();
        Some(ResolvedRoute {
            module: compiled.module.clone(),
            handler: handler.clone(),
            template: found.entry.path.clone(),
            arity: found.arity,
            params,
        })
    }

    /// Check request input against the rules of its path in `module`.
    ///
    /// Returns the first violation, or `None` when the input passes, the path
    /// has no rules, or `interceptor.validate.enabled` is off.
    ///
    /// # Errors
    ///
    /// Compile errors when the module must be built first.
    pub fn check_input(
        &self,
        module: &str,
        ctx: &dyn RequestContext,
    ) -> Result<Option<Violation>, CompileError> {
        if !self.config.interceptor.validate.enabled {
            return Ok(None);
        }
        let compiled = self.current_or_build(module)?;
        Ok(validation::check_request(
            &compiled.validations,
            Some(&compiled.routes.index),
            ctx,
        ))
    }

    /// Run `f` under the lock policy of the request path in `module`.
    ///
    /// With `interceptor.lock.enabled` off, `f` always runs unguarded.
    ///
    /// # Errors
    ///
    /// Compile errors when the module must be built first, and store errors
    /// during acquisition.
    pub fn run_guarded<T, F>(
        &self,
        module: &str,
        ctx: &dyn RequestContext,
        f: F,
    ) -> Result<Guarded<T>, CompileError>
    where
        F: FnOnce() -> T,
    {
        if !self.config.interceptor.lock.enabled {
            return Ok(Guarded::Ran(f()));
        }
        let compiled = self.current_or_build(module)?;
        lock::run_guarded(
            &compiled.locks,
            Some(&compiled.routes.index),
            ctx,
            self.store.as_ref(),
            f,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{ManifestMember, ManifestProvider, ManifestType};
    use crate::lock::MemoryStore;

    fn provider() -> ManifestProvider {
        let mut provider = ManifestProvider::default();
        provider.insert(ManifestType {
            id: "app::controllers::shop::OrderController".into(),
            modified: Some(1),
            members: vec![ManifestMember {
                name: "show".into(),
                doc: "@GetMapping(\"orders/{id}\")".into(),
                ..ManifestMember::default()
            }],
            ..ManifestType::default()
        });
        provider
    }

    fn cache(store: Arc<MemoryStore>) -> ArtifactCache {
        let config = AnnotationConfig {
            modules: vec!["shop".into()],
            ..AnnotationConfig::default()
        };
        ArtifactCache::new(Arc::new(provider()), config, store)
            .unwrap()
            .in_memory()
    }

    #[test]
    fn test_ensure_compiles_once_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(Arc::clone(&store));
        let first = cache.ensure("shop", false).unwrap();
        let second = cache.ensure("shop", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.is_empty());
    }

    #[test]
    fn test_contended_rebuild_without_artifact_times_out() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(Arc::clone(&store));
        store
            .set_nx_ex("distributed_lock:compile_module:shop", "1", 60)
            .unwrap();
        let err = cache.ensure("shop", false).unwrap_err();
        assert_eq!(
            err,
            CompileError::RebuildLockTimeout {
                module: "shop".into()
            }
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_resolve_fills_params() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let found = cache.resolve("shop", "/orders/42").unwrap().unwrap();
        assert_eq!(found.handler.member, "show");
        assert_eq!(found.params["id"], "42");
        assert_eq!(cache.resolve("shop", "missing/path").unwrap(), None);
    }
}
