use std::fmt;

/// Errors raised while compiling or refreshing annotation artifacts.
///
/// Legitimate "nothing found" outcomes are modelled as `Option::None` and a
/// denied lock as [`crate::lock::Acquisition::Denied`]; neither is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A declared parent node was still missing after the retry cap.
    ParentScopeUnresolved {
        /// Module being compiled
        module: String,
        /// Parent reference as written (`module/controller/action`)
        parent: String,
        /// Path of the node that declared the parent
        path: String,
        /// Number of whole-module passes attempted
        attempts: usize,
    },
    /// The introspection provider cannot resolve a declared handler.
    ///
    /// This is a programming error and is never retried.
    HandlerUnresolvable {
        /// Module being compiled
        module: String,
        /// Container type id
        container: String,
        /// Member name, empty when the type itself is unknown
        member: String,
        /// Provider supplied reason
        reason: String,
    },
    /// An annotation is present but cannot be compiled, e.g. an unknown
    /// validation rule.
    InvalidAnnotation {
        /// Module being compiled
        module: String,
        /// Annotated handler (`type@member`)
        handler: String,
        reason: String,
    },
    /// Another process holds the module rebuild lock.
    RebuildLockTimeout {
        /// Module whose rebuild was skipped
        module: String,
    },
    /// Reading or writing a persisted artifact failed.
    Artifact {
        /// Module the artifact belongs to
        module: String,
        /// Underlying failure
        message: String,
    },
    /// The lock store rejected an operation.
    Store {
        /// Key involved
        key: String,
        /// Underlying failure
        message: String,
    },
}

impl CompileError {
    /// Whether callers should fall back to an existing artifact instead of failing.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CompileError::RebuildLockTimeout { .. })
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::ParentScopeUnresolved {
                module,
                parent,
                path,
                attempts,
            } => write!(
                f,
                "parent node '{parent}' for '{path}' in module '{module}' could not be resolved after {attempts} passes"
            ),
            CompileError::HandlerUnresolvable {
                module,
                container,
                member,
                reason,
            } => {
                if member.is_empty() {
                    write!(
                        f,
                        "handler type '{container}' in module '{module}' is unresolvable: {reason}"
                    )
                } else {
                    write!(
                        f,
                        "handler '{container}@{member}' in module '{module}' is unresolvable: {reason}"
                    )
                }
            }
            CompileError::InvalidAnnotation {
                module,
                handler,
                reason,
            } => write!(
                f,
                "invalid annotation on '{handler}' in module '{module}': {reason}"
            ),
            CompileError::RebuildLockTimeout { module } => write!(
                f,
                "rebuild lock for module '{module}' is held by another process"
            ),
            CompileError::Artifact { module, message } => {
                write!(f, "artifact error in module '{module}': {message}")
            }
            CompileError::Store { key, message } => {
                write!(f, "lock store error for key '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for CompileError {}
