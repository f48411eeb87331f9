use http::Method;
use serde_json::Value;
use std::fmt::{self, Write};

use super::{RouteDescriptor, RouteTable};
use crate::group::Visit;

const INDENT: &str = "    ";

/// Render the registration statements for a compiled table.
///
/// Handlers are written relative to `namespace`. Group blocks nest in tree
/// order; ungrouped routes appear at the top level.
#[must_use]
pub fn render_routes(table: &RouteTable, module: &str, namespace: &str) -> String {
    let mut out = String::new();
    match write_routes(&mut out, table, module, namespace) {
        Ok(()) => out,
        // Writing into a String does not fail.
        Err(_) => String::new(),
    }
}

fn write_routes(
    out: &mut String,
    table: &RouteTable,
    module: &str,
    namespace: &str,
) -> fmt::Result {
    writeln!(out, "// Routes compiled from annotations in module `{module}`.")?;
    for visit in table.tree.walk() {
        match visit {
            Visit::Enter(scope, depth) => {
                let options = Value::Object(scope.options.clone());
                writeln!(out, "{}route::group({options}, || {{", INDENT.repeat(depth))?;
            }
            Visit::Leaf(idx, depth) => {
                if let Some(route) = table.routes.get(*idx) {
                    writeln!(
                        out,
                        "{}{}",
                        INDENT.repeat(depth),
                        statement(route, namespace)
                    )?;
                }
            }
            Visit::Exit(_, depth) => {
                writeln!(out, "{}}});", INDENT.repeat(depth))?;
            }
        }
    }
    Ok(())
}

fn statement(route: &RouteDescriptor, namespace: &str) -> String {
    let handler = route.handler.relative_to(namespace);
    match route.verbs.as_slice() {
        [single] => format!(
            "route::{}({:?}, {:?}).name({:?});",
            verb_fn(single),
            route.path,
            handler,
            route.name
        ),
        verbs => {
            let list = verbs
                .iter()
                .map(|v| format!("{:?}", v.as_str().to_ascii_lowercase()))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "route::match([{list}], {:?}, {:?}).name({:?});",
                route.path, handler, route.name
            )
        }
    }
}

fn verb_fn(method: &Method) -> String {
    method.as_str().to_ascii_lowercase()
}
