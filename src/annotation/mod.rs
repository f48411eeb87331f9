//! # Annotation Module
//!
//! Annotations are directives embedded in documentation comments:
//!
//! ```text
//! /// @Group(prefix=api, middleware=auth)
//! /// @GetMapping("users/{id}/{tab?}")
//! /// @SyncLock(name=checkout, suffix="$orderId", expire=30)
//! ```
//!
//! - [`parser`] turns the argument text of one occurrence into fields
//! - [`spec`] describes annotation kinds: names, aliases, defaults, targets
//! - [`matcher`] finds occurrences in type and member doc text

pub mod matcher;
pub mod parser;
pub mod spec;

pub use matcher::{flatten_value, AnnotationMatch, Matcher, DEFAULT_IGNORED_MEMBERS};
pub use parser::{
    parse_annotation, parse_annotation_reporting, ParseError, ParseOptions, ParsedAnnotation,
};
pub use spec::{AnnotationRegistry, AnnotationSpec, AnnotationSpecConfig, TargetKind};
