//! # Route Module
//!
//! Compiles route annotations found on controller members into three artifacts:
//!
//! - an ordered list of [`RouteDescriptor`]s arranged in a [`GroupTree`]
//! - an alias map from the conventional `{controller}/{action}` path to the
//!   explicit path written in the annotation
//! - a [`RouteIndex`] answering live request paths with variable-arity tails
//!
//! ## Overview
//!
//! ```text
//! /// @Group(prefix=api)
//! struct UserController;
//!
//! /// @GetMapping("users/{id}/{tab?}")
//! fn show();
//! ```
//!
//! compiles to a route named `admin.User.show`, nested under the `{prefix=api}`
//! group, indexed as base path `api/users` with arity range `1-2`.
//!
//! ## Rendering
//!
//! [`render_routes`] produces the registration text stored as `route.rs.txt`:
//!
//! ```text
//! route::group({"prefix":"api"}, || {
//!     route::get("users/{id}/{tab?}", "admin::UserController@show").name("admin.User.show");
//! });
//! ```

mod build;
mod emit;
mod index;

pub use build::{CompileOptions, RouteTableCompiler};
pub use emit::render_routes;
pub use index::{is_variable_segment, Arity, IndexEntry, IndexMatch, PathTemplate, RouteIndex};

use http::Method;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::group::{GroupScope, GroupTree};
use crate::introspect::short_name;

/// A handler target: container type id and member name.
///
/// Serialized as `type_id@member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerRef {
    pub type_id: String,
    pub member: String,
}

impl HandlerRef {
    #[must_use]
    pub fn new(type_id: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            member: member.into(),
        }
    }

    /// `ShortName@member`, relative to `namespace` when the type lives under it.
    #[must_use]
    pub fn relative_to(&self, namespace: &str) -> String {
        let prefix = format!("{}::", namespace.trim_end_matches("::"));
        match self.type_id.strip_prefix(&prefix) {
            Some(rest) => format!("{rest}@{}", self.member),
            None => format!("{}@{}", short_name(&self.type_id), self.member),
        }
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_id, self.member)
    }
}

impl FromStr for HandlerRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((type_id, member)) if !type_id.is_empty() && !member.is_empty() => {
                Ok(Self::new(type_id, member))
            }
            _ => Err(format!("handler reference '{s}' is not of the form type@member")),
        }
    }
}

impl Serialize for HandlerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HandlerRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One compiled route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    /// Stable external name: `module.Controller.member`
    pub name: String,
    #[serde(with = "verbs")]
    pub verbs: Vec<Method>,
    /// Path template as registered inside its groups
    pub path: String,
    /// Group prefixes followed by the template; what the index answers
    pub full_path: String,
    pub handler: HandlerRef,
    /// Conventional path replaced by an explicit one
    pub alias: Option<String>,
    /// Deduplicated scope chain, outermost first
    pub groups: Vec<GroupScope>,
    pub arity: Arity,
    pub placeholders: Vec<String>,
    pub modified: Option<u64>,
}

/// Everything compiled from one module's route annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub routes: Vec<RouteDescriptor>,
    /// Leaves are indexes into `routes`
    pub tree: GroupTree<usize>,
    /// Conventional path → explicit path
    pub aliases: BTreeMap<String, String>,
    pub index: RouteIndex,
}

impl RouteTable {
    /// Routes registered for a handler, in compile order.
    pub fn routes_for<'a>(
        &'a self,
        handler: &'a HandlerRef,
    ) -> impl Iterator<Item = &'a RouteDescriptor> + 'a {
        self.routes.iter().filter(move |r| r.handler == *handler)
    }

    #[must_use]
    pub fn route_named(&self, name: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.name == name)
    }
}

mod verbs {
    use http::Method;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(verbs: &[Method], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(verbs.iter().map(Method::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Method>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|v| Method::from_bytes(v.to_ascii_uppercase().as_bytes()).map_err(de::Error::custom))
            .collect()
    }
}
