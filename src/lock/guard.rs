use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::key::RequestContext;
use super::map::LockMap;
use super::store::LockStore;
use super::{acquire, release, Acquisition, HeldLock};
use crate::error::CompileError;
use crate::route::RouteIndex;

/// Paths eligible for lock lookup.
static GUARDABLE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\-/]+$").expect("guardable path pattern is valid"));

/// Result of a guarded invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    /// The operation ran, under a lock when one applies
    Ran(T),
    /// The key was held elsewhere; the operation did not run
    Denied(Value),
}

impl<T> Guarded<T> {
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Guarded::Denied(_))
    }
}

/// Whether a request path is considered for locking at all.
#[must_use]
pub fn is_guardable_path(path: &str) -> bool {
    !path.is_empty() && GUARDABLE_PATH.is_match(path)
}

/// Run `f` under the lock policy registered for the request path.
///
/// The policy is looked up by exact path first and then through `index`.
/// Paths with characters outside `[\w\-/]` and paths without a policy run
/// unguarded. The key is released when `f` returns or unwinds, unless the
/// policy is `once`. A store failure while releasing is logged; the result
/// of `f` is still returned.
///
/// # Errors
///
/// Returns [`CompileError::Store`] if the store fails during acquisition.
pub fn run_guarded<T, F>(
    locks: &LockMap,
    index: Option<&RouteIndex>,
    ctx: &dyn RequestContext,
    store: &dyn LockStore,
    f: F,
) -> Result<Guarded<T>, CompileError>
where
    F: FnOnce() -> T,
{
    let path = ctx.path().trim_matches('/');
    if !is_guardable_path(path) {
        return Ok(Guarded::Ran(f()));
    }
    let Some(policy) = locks.find(path, index) else {
        return Ok(Guarded::Ran(f()));
    };
    match acquire(policy, ctx, store)? {
        Acquisition::Denied { response, .. } => Ok(Guarded::Denied(response)),
        Acquisition::Held(held) => {
            let _release = ReleaseOnDrop {
                held: Some(held),
                store,
            };
            Ok(Guarded::Ran(f()))
        }
    }
}

/// Hands a held key back to the store when dropped, including on unwind.
struct ReleaseOnDrop<'a> {
    held: Option<HeldLock>,
    store: &'a dyn LockStore,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        let key = held.key.clone();
        if let Err(err) = release(held, self.store) {
            warn!(key = %key, error = %err, "Failed to release lock key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{default_denied_response, LockPolicy, MemoryStore, SimpleRequest};
    use crate::route::HandlerRef;

    fn locks() -> LockMap {
        let mut map = LockMap::new();
        map.insert(
            "order/{id}",
            LockPolicy {
                prefix: "sync_lock_annotation_".into(),
                name: "order_pay".into(),
                suffix: Some("$id".into()),
                suffixes: Vec::new(),
                expire: 60,
                once: false,
                response: default_denied_response(),
            },
        );
        map
    }

    #[test]
    fn test_nested_run_is_denied_and_lock_released_after() {
        let locks = locks();
        let mut index = RouteIndex::new();
        index.insert("order/{id}", &HandlerRef::new("app::OrderController", "pay"), None);
        let store = MemoryStore::new();
        let ctx = SimpleRequest::new("/order/7").with_query("id", "7");

        let outer = run_guarded(&locks, Some(&index), &ctx, &store, || {
            run_guarded(&locks, Some(&index), &ctx, &store, || "inner").unwrap()
        })
        .unwrap();
        assert!(matches!(outer, Guarded::Ran(Guarded::Denied(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_panicking_handler_still_releases_key() {
        let locks = locks();
        let mut index = RouteIndex::new();
        index.insert("order/{id}", &HandlerRef::new("app::OrderController", "pay"), None);
        let store = MemoryStore::new();
        let ctx = SimpleRequest::new("/order/7").with_query("id", "7");

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_guarded(&locks, Some(&index), &ctx, &store, || -> u8 {
                panic!("handler failed")
            })
        }));
        assert!(outcome.is_err());
        assert!(store.is_empty());
        assert_eq!(
            run_guarded(&locks, Some(&index), &ctx, &store, || 2).unwrap(),
            Guarded::Ran(2)
        );
    }

    #[test]
    fn test_unmatched_and_odd_paths_bypass() {
        let store = MemoryStore::new();
        let ctx = SimpleRequest::new("health");
        assert_eq!(
            run_guarded(&locks(), None, &ctx, &store, || 1).unwrap(),
            Guarded::Ran(1)
        );
        assert!(!is_guardable_path("order/7?x=1"));
        assert!(is_guardable_path("order/7"));
    }
}
