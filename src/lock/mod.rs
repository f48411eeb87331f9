//! # Lock Module
//!
//! `@SyncLock` and `@SyncLockByToken` annotations guard a handler against
//! concurrent duplicate execution. Each annotation compiles to a
//! [`LockPolicy`]; at request time the policy and the live request derive a
//! concrete key that is set atomically in a [`LockStore`].
//!
//! ## Key shape
//!
//! ```text
//! {prefix}{container}_{name}[:{sha256(fragments)}]
//! sync_lock_annotation_order_checkout:a665a459...
//! ```
//!
//! ## Protocol
//!
//! - [`acquire`] sets the key if absent, with the policy's expiry. A held key
//!   yields [`Acquisition::Denied`] carrying the response payload; there is no
//!   waiting or retry.
//! - [`release`] deletes the key unless the policy is `once`, in which case
//!   the key is left to expire.
//! - Keys are not re-entrant.

mod guard;
mod key;
mod map;
mod policy;
mod store;

pub use guard::{is_guardable_path, run_guarded, Guarded};
pub use key::{resolve_fragment, resolve_key, RequestContext, SimpleRequest, ValueSource};
pub use map::LockMap;
pub use policy::{
    default_denied_response, LockDefaults, LockPolicy, DEFAULT_LOCK_EXPIRE, DEFAULT_LOCK_PREFIX,
};
pub use store::{Clock, LockStore, ManualClock, MemoryStore, SystemClock};

use serde_json::Value;
use tracing::info;

use crate::error::CompileError;

/// A key set by [`acquire`], to be handed back to [`release`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct HeldLock {
    pub key: String,
    pub once: bool,
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Held(HeldLock),
    /// The key is held elsewhere; respond with the payload and skip the handler
    Denied { key: String, response: Value },
}

/// Try to take the lock for this request.
///
/// # Errors
///
/// Returns [`CompileError::Store`] when the store itself fails.
pub fn acquire(
    policy: &LockPolicy,
    ctx: &dyn RequestContext,
    store: &dyn LockStore,
) -> Result<Acquisition, CompileError> {
    let key = resolve_key(policy, ctx);
    if store.set_nx_ex(&key, "1", policy.expire)? {
        Ok(Acquisition::Held(HeldLock {
            key,
            once: policy.once,
        }))
    } else {
        info!(key = %key, path = ctx.path(), "Lock key denied");
        Ok(Acquisition::Denied {
            key,
            response: policy.response.clone(),
        })
    }
}

/// Give a held lock back. One-shot locks stay set until they expire.
///
/// Returns whether a key was deleted.
pub fn release(held: HeldLock, store: &dyn LockStore) -> Result<bool, CompileError> {
    if held.once {
        return Ok(false);
    }
    store.delete(&held.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(once: bool) -> LockPolicy {
        LockPolicy {
            prefix: DEFAULT_LOCK_PREFIX.into(),
            name: "order_checkout".into(),
            suffix: Some("$orderId".into()),
            suffixes: Vec::new(),
            expire: 30,
            once,
            response: default_denied_response(),
        }
    }

    #[test]
    fn test_second_acquire_is_denied_until_release() {
        let store = MemoryStore::new();
        let ctx = SimpleRequest::new("order/checkout").with_body("orderId", "123");
        let Acquisition::Held(held) = acquire(&policy(false), &ctx, &store).unwrap() else {
            panic!("first acquire must succeed");
        };
        match acquire(&policy(false), &ctx, &store).unwrap() {
            Acquisition::Denied { response, .. } => assert_eq!(response["code"], 500),
            Acquisition::Held(_) => panic!("second acquire must be denied"),
        }
        assert!(release(held, &store).unwrap());
        assert!(matches!(
            acquire(&policy(false), &ctx, &store).unwrap(),
            Acquisition::Held(_)
        ));
    }

    #[test]
    fn test_once_lock_survives_release_until_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::with_clock(clock.clone());
        let ctx = SimpleRequest::new("order/checkout").with_body("orderId", "123");
        let Acquisition::Held(held) = acquire(&policy(true), &ctx, &store).unwrap() else {
            panic!("first acquire must succeed");
        };
        assert!(!release(held, &store).unwrap());
        assert!(matches!(
            acquire(&policy(true), &ctx, &store).unwrap(),
            Acquisition::Denied { .. }
        ));
        clock.advance_secs(30);
        assert!(matches!(
            acquire(&policy(true), &ctx, &store).unwrap(),
            Acquisition::Held(_)
        ));
    }

    #[test]
    fn test_different_inputs_do_not_contend() {
        let store = MemoryStore::new();
        let a = SimpleRequest::new("order/checkout").with_body("orderId", "1");
        let b = SimpleRequest::new("order/checkout").with_body("orderId", "2");
        assert!(matches!(acquire(&policy(false), &a, &store).unwrap(), Acquisition::Held(_)));
        assert!(matches!(acquire(&policy(false), &b, &store).unwrap(), Acquisition::Held(_)));
    }
}
