use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::policy::{LockDefaults, LockPolicy};
use crate::annotation::spec::{SYNC_LOCK, SYNC_LOCK_BY_TOKEN};
use crate::annotation::{AnnotationRegistry, Matcher};
use crate::error::CompileError;
use crate::introspect::{IntrospectionProvider, Visibility};
use crate::route::{CompileOptions, HandlerRef, RouteIndex, RouteTable};

/// Route path → compiled lock policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockMap {
    policies: BTreeMap<String, LockPolicy>,
}

impl LockMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, policy: LockPolicy) {
        self.policies
            .insert(path.into().trim_matches('/').to_string(), policy);
    }

    /// Policy registered for an exact path template.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&LockPolicy> {
        self.policies.get(path.trim_matches('/'))
    }

    /// Policy for a live request path: exact match first, then via the index.
    #[must_use]
    pub fn find(&self, path: &str, index: Option<&RouteIndex>) -> Option<&LockPolicy> {
        self.get(path).or_else(|| {
            index
                .and_then(|idx| idx.lookup(path))
                .and_then(|found| self.get(&found.entry.path))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LockPolicy)> {
        self.policies.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Compile lock annotations for one module against its route table.
    ///
    /// Each locked member is registered under the full path of every route
    /// bound to it; members without routes are skipped.
    pub fn compile(
        provider: &dyn IntrospectionProvider,
        registry: &AnnotationRegistry,
        options: &CompileOptions,
        defaults: &LockDefaults,
        module: &str,
        routes: &RouteTable,
    ) -> Result<Self, CompileError> {
        let specs: Vec<_> = [(SYNC_LOCK, false), (SYNC_LOCK_BY_TOKEN, true)]
            .into_iter()
            .filter_map(|(kind, token_scoped)| registry.get(kind).map(|s| (s, token_scoped)))
            .collect();

        let mut map = LockMap::new();
        if specs.is_empty() {
            return Ok(map);
        }
        for type_id in provider.types_in(&options.module_namespace(module)) {
            let members = provider.members(&type_id, Visibility::Public)?;
            let container = options.container_name(&type_id);
            for member in &members {
                // The first matching kind wins when a member carries both.
                let compiled = specs.iter().find_map(|(spec, token_scoped)| {
                    Matcher::new(spec, "")
                        .with_ignored(options.ignore_members.iter().cloned())
                        .match_member_first(member)
                        .map(|found| {
                            LockPolicy::compile(
                                container,
                                &member.name,
                                &found.fields,
                                *token_scoped,
                                defaults,
                            )
                        })
                });
                let Some(policy) = compiled else {
                    continue;
                };
                let handler = HandlerRef::new(type_id.clone(), member.name.clone());
                let mut bound = false;
                for route in routes.routes_for(&handler) {
                    map.insert(route.full_path.clone(), policy.clone());
                    bound = true;
                }
                if !bound {
                    debug!(module, handler = %handler, "Lock annotation on unrouted member skipped");
                }
            }
        }
        info!(module, locks_count = map.len(), "Lock annotation map compiled");
        Ok(map)
    }
}
