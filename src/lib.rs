//! # annoroute
//!
//! **annoroute** compiles route tables, group trees, menu nodes and sync-lock
//! policies from structured annotations written in documentation comments.
//!
//! ## Overview
//!
//! Controllers declare their routing next to the code:
//!
//! ```text
//! /// @Group(prefix=shop)
//! struct OrderController;
//!
//! /// @PostMapping("orders/{id}/pay")
//! /// @SyncLock(name=pay, suffix="$id", expire=30)
//! fn pay();
//! ```
//!
//! The crate never reflects over code itself. An
//! [`introspect::IntrospectionProvider`] reports types, members, doc text and
//! source modification times; everything else is derived from that.
//!
//! ## Architecture
//!
//! - **[`annotation`]** - annotation grammar, registry of kinds, matcher
//! - **[`group`]** - scope merging and the deduplicated group tree
//! - **[`route`]** - route table compiler, variable-arity index, rendering
//! - **[`lock`]** - lock policies, key derivation, acquire/release, guard
//! - **[`validation`]** - input rules compiled per route and checked per request
//! - **[`node`]** - menu node compilation with bounded parent retries
//! - **[`cache`]** - compiled artifacts per module with a rebuild lock
//! - **[`artifact`]** - persisted artifact files
//! - **[`config`]** / **[`logging`]** / **[`cli`]** - the ambient pieces
//!
//! ### Compile Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Caller
//!     participant Cache as ArtifactCache
//!     participant Store as LockStore
//!     participant Routes as RouteTableCompiler
//!     participant Locks as LockMap::compile
//!     participant Rules as ValidationMap::compile
//!     participant FS as annotation_path
//!
//!     Caller->>Cache: ensure("shop", force)
//!     Cache->>Cache: fresh? (type set + mtimes)
//!     Cache->>Store: set_nx_ex(distributed_lock:compile_module:shop)
//!     alt lock held elsewhere
//!         Cache-->>Caller: existing artifact or RebuildLockTimeout
//!     end
//!     Cache->>Routes: compile("shop")
//!     Routes-->>Cache: RouteTable (routes, tree, aliases, index)
//!     Cache->>Locks: compile(..., &routes)
//!     Locks-->>Cache: LockMap
//!     Cache->>Rules: compile(..., &routes)
//!     Rules-->>Cache: ValidationMap
//!     Cache->>FS: route.rs.txt, alias.json, index.json, ...
//!     Cache->>Store: delete(rebuild lock)
//!     Cache-->>Caller: Arc<CompiledModule>
//! ```
//!
//! ### Request Guarding
//!
//! ```rust,ignore
//! use annoroute::lock::{Guarded, SimpleRequest};
//!
//! let ctx = SimpleRequest::new("shop/orders/7/pay").with_body("id", "7");
//! if let Some(violation) = cache.check_input("shop", &ctx)? {
//!     return respond_error(violation.message);
//! }
//! match cache.run_guarded("shop", &ctx, || pay(7))? {
//!     Guarded::Ran(result) => respond(result),
//!     Guarded::Denied(payload) => respond_json(payload),
//! }
//! ```

pub mod annotation;
pub mod artifact;
pub mod cache;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod group;
pub mod introspect;
pub mod lock;
pub mod logging;
pub mod node;
pub mod route;
pub mod validation;

pub use annotation::{parse_annotation, AnnotationRegistry, Matcher, ParsedAnnotation};
pub use artifact::CompiledModule;
pub use cache::{ArtifactCache, ResolvedRoute};
pub use config::AnnotationConfig;
pub use error::CompileError;
pub use group::{GroupScope, GroupTree};
pub use introspect::{IntrospectionProvider, ManifestProvider};
pub use lock::{acquire, release, Acquisition, LockPolicy, LockStore, MemoryStore};
pub use route::{RouteIndex, RouteTable, RouteTableCompiler};
pub use validation::{ValidationMap, Violation};
