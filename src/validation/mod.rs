//! # Validation Module
//!
//! `@Validation` annotations declare input rules for a handler. They compile
//! per module into a [`ValidationMap`] keyed by route path, next to the lock
//! map, and are checked against the request before the handler runs.
//!
//! ```text
//! /// @PostMapping("user/register")
//! /// @Validation(field=username, rule="required|alpha_num", attribute="user name")
//! /// @Validation({"field": "password", "rules": ["required", "between:6,20"]})
//! /// @Mobile(field=phone, message=":attribute is not a mobile number")
//! /// @Validation(class=UserValidator)
//! ```
//!
//! Rule shorthands (`@Required`, `@Email`, `@In`, `@Mobile`, ...) name the
//! rule directly; `class` refers to a validator listed under
//! `interceptor.validate.validators` in the configuration.
//!
//! A request fails on the first broken rule, fields in declaration order.

mod map;
mod rule;

pub use map::{FieldRule, FieldRules, NamedValidator, RuleSet, ValidationMap, Violation};
pub use rule::{snake_case, Pattern, Rule};

use tracing::debug;

use crate::lock::RequestContext;
use crate::route::RouteIndex;

/// Check the request against the rules registered for its path.
///
/// Paths without rules pass.
#[must_use]
pub fn check_request(
    map: &ValidationMap,
    index: Option<&RouteIndex>,
    ctx: &dyn RequestContext,
) -> Option<Violation> {
    let path = ctx.path().trim_matches('/');
    let violation = map.find(path, index)?.check(ctx)?;
    debug!(path, field = %violation.field, rule = %violation.rule, "Request input rejected");
    Some(violation)
}
