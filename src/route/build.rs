use http::Method;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::index::PathTemplate;
use super::{HandlerRef, RouteDescriptor, RouteTable};
use crate::annotation::spec::{GROUP, ROUTE};
use crate::annotation::{flatten_value, AnnotationMatch, AnnotationRegistry, AnnotationSpec, Matcher};
use crate::error::CompileError;
use crate::group::{merge_scopes, GroupScope};
use crate::introspect::{short_name, IntrospectionProvider, MemberDescriptor, Visibility};

/// Module-independent compile settings.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Namespace holding one child namespace per module
    pub controller_namespace: String,
    /// Marker stripped from container short names
    pub container_suffix: String,
    /// Member names skipped in addition to the built-in list
    pub ignore_members: Vec<String>,
    /// Module name → outermost group scope
    pub root_group: BTreeMap<String, Map<String, Value>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            controller_namespace: "app::controllers".to_string(),
            container_suffix: "Controller".to_string(),
            ignore_members: Vec::new(),
            root_group: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    /// Namespace scanned for `module`.
    #[must_use]
    pub fn module_namespace(&self, module: &str) -> String {
        format!(
            "{}::{}",
            self.controller_namespace.trim_end_matches("::"),
            module
        )
    }

    /// Container short name with the marker suffix removed.
    #[must_use]
    pub fn container_name<'a>(&self, type_id: &'a str) -> &'a str {
        let short = short_name(type_id);
        match short.strip_suffix(self.container_suffix.as_str()) {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => short,
        }
    }
}

/// Drives the route and group matchers across one module's types.
pub struct RouteTableCompiler<'a> {
    provider: &'a dyn IntrospectionProvider,
    registry: &'a AnnotationRegistry,
    options: &'a CompileOptions,
}

impl<'a> RouteTableCompiler<'a> {
    #[must_use]
    pub fn new(
        provider: &'a dyn IntrospectionProvider,
        registry: &'a AnnotationRegistry,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            provider,
            registry,
            options,
        }
    }

    /// Compile every routed member of every type in `module`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::HandlerUnresolvable`] when the provider cannot
    /// describe a type it listed.
    pub fn compile(&self, module: &str) -> Result<RouteTable, CompileError> {
        let Some(route_spec) = self.registry.get(ROUTE) else {
            warn!(module, "No route annotation registered, nothing to compile");
            return Ok(RouteTable::default());
        };
        let group_spec = self.registry.get(GROUP);
        let root_scope = self.options.root_group.get(module).cloned().unwrap_or_default();

        let mut table = RouteTable::default();
        for type_id in self.provider.types_in(&self.options.module_namespace(module)) {
            let type_doc = self
                .provider
                .type_doc(&type_id)
                .map_err(|e| with_module(e, module))?;
            let members = self
                .provider
                .members(&type_id, Visibility::Public)
                .map_err(|e| with_module(e, module))?;

            let route_matcher = Matcher::new(route_spec, &type_doc)
                .with_ignored(self.options.ignore_members.iter().cloned());
            let group_matcher = group_spec.map(|spec| {
                Matcher::new(spec, &type_doc).with_ignored(self.options.ignore_members.iter().cloned())
            });
            let type_scope = group_matcher
                .as_ref()
                .and_then(Matcher::match_type)
                .map(|m| m.fields.as_map().clone())
                .unwrap_or_default();

            for member in &members {
                let Some(found) = route_matcher.match_member_first(member) else {
                    continue;
                };
                let member_scopes: Vec<Map<String, Value>> = group_matcher
                    .as_ref()
                    .and_then(|m| m.match_member(member, true))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| m.fields.into_map())
                    .collect();
                for chain in scope_chains(&root_scope, &type_scope, &member_scopes) {
                    let route = self.describe(module, member, &found, route_spec, chain);
                    register(&mut table, route);
                }
            }
        }

        info!(
            module,
            routes_count = table.routes.len(),
            groups_count = table.tree.node_count(),
            aliases_count = table.aliases.len(),
            "Route table compiled"
        );
        Ok(table)
    }

    fn describe(
        &self,
        module: &str,
        member: &MemberDescriptor,
        found: &AnnotationMatch,
        spec: &AnnotationSpec,
        groups: Vec<GroupScope>,
    ) -> RouteDescriptor {
        let container = self.options.container_name(&member.owner);
        let conventional = format!("{container}/{}", member.name);

        let explicit = found
            .fields
            .non_empty_str("url")
            .or_else(|| {
                if found.is_alias(spec) {
                    found.fields.non_empty_str("value")
                } else {
                    None
                }
            })
            .map(|url| url.trim_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let path = explicit.clone().unwrap_or_else(|| conventional.clone());
        let full_path = groups
            .iter()
            .filter_map(GroupScope::prefix)
            .chain(std::iter::once(path.clone()))
            .collect::<Vec<_>>()
            .join("/");
        let template = PathTemplate::parse(&path);

        RouteDescriptor {
            name: format!("{}.{container}.{}", module.to_lowercase(), member.name),
            verbs: parse_verbs(found.fields.get("method"), &member.name),
            path,
            full_path,
            handler: HandlerRef::new(member.owner.clone(), member.name.clone()),
            alias: explicit.map(|_| conventional),
            groups,
            arity: template.arity,
            placeholders: template.placeholders,
            modified: member.modified,
        }
    }
}

/// Scope chains a route is registered under.
///
/// A repeated member-level group next to a distinct type-level group yields
/// one chain per repetition; otherwise every level is merged into one chain.
fn scope_chains(
    root: &Map<String, Value>,
    type_scope: &Map<String, Value>,
    member_scopes: &[Map<String, Value>],
) -> Vec<Vec<GroupScope>> {
    let type_key = GroupScope::from_map(type_scope).map(|s| s.key);
    let distinct_members = member_scopes
        .iter()
        .filter_map(GroupScope::from_map)
        .filter(|s| Some(&s.key) != type_key.as_ref())
        .count();

    if type_key.is_some() && member_scopes.len() > 1 && distinct_members > 0 {
        member_scopes
            .iter()
            .map(|scope| merge_scopes([root, type_scope, scope]))
            .collect()
    } else {
        vec![merge_scopes(
            [root, type_scope].into_iter().chain(member_scopes.iter()),
        )]
    }
}

fn register(table: &mut RouteTable, route: RouteDescriptor) {
    if let Some(alias) = &route.alias {
        table.aliases.insert(alias.clone(), route.path.clone());
    }
    if !table
        .index
        .insert(&route.full_path, &route.handler, route.modified)
    {
        debug!(route = %route.name, path = %route.full_path, "Route shadowed in index");
    }
    let idx = table.routes.len();
    table.tree.insert(&route.groups, idx);
    table.routes.push(route);
}

/// Verb set from the `method` field: `|`/`,` separated, defaulting to GET.
fn parse_verbs(field: Option<&Value>, member: &str) -> Vec<Method> {
    let raw = field.map(flatten_value).unwrap_or_default();
    let mut verbs: Vec<Method> = Vec::new();
    for token in raw.split(['|', ',']).map(str::trim).filter(|t| !t.is_empty()) {
        match Method::from_bytes(token.to_ascii_uppercase().as_bytes()) {
            Ok(method) if !verbs.contains(&method) => verbs.push(method),
            Ok(_) => {}
            Err(_) => warn!(member, verb = token, "Ignoring unknown HTTP verb"),
        }
    }
    if verbs.is_empty() {
        verbs.push(Method::GET);
    }
    verbs
}

fn with_module(err: CompileError, module: &str) -> CompileError {
    match err {
        CompileError::HandlerUnresolvable {
            container,
            member,
            reason,
            ..
        } => CompileError::HandlerUnresolvable {
            module: module.to_string(),
            container,
            member,
            reason,
        },
        other => other,
    }
}
