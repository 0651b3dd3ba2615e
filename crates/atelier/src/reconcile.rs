//! Optimistic mutation with authoritative refetch on rejection.
//!
//! The in-memory copy changes first so readers see the result immediately.
//! The change is then written to the durable source; if that write is
//! rejected, the in-memory copy is replaced wholesale by a fresh read. There
//! is no partial retry and no per-field merge.

use std::sync::RwLock;

/// Result of a [`tentative_apply`].
#[derive(Debug, PartialEq)]
pub enum Reconciliation<T, E> {
    /// Applied in memory and persisted.
    Committed(T),
    /// The write was rejected and the state was reloaded from the source.
    Reverted { error: E },
    /// Both the write and the reload failed; memory still holds the
    /// unconfirmed change.
    Diverged { error: E, reload_error: E },
    /// `apply` had nothing to change.
    Skipped,
}

impl<T, E> Reconciliation<T, E> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Reconciliation::Committed(_))
    }
}

/// Applies `apply` to `state`, then `persist`s the value it returned.
///
/// `apply` returns `None` when there is nothing to do. On a rejected write the
/// whole state is replaced with the output of `refetch`.
pub fn tentative_apply<S, T, E, A, P, R>(
    state: &RwLock<S>,
    apply: A,
    persist: P,
    refetch: R,
) -> Reconciliation<T, E>
where
    A: FnOnce(&mut S) -> Option<T>,
    P: FnOnce(&T) -> Result<(), E>,
    R: FnOnce() -> Result<S, E>,
{
    let applied = {
        let mut guard = match state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Reconciled state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        apply(&mut guard)
    };
    let Some(value) = applied else {
        return Reconciliation::Skipped;
    };

    let error = match persist(&value) {
        Ok(()) => return Reconciliation::Committed(value),
        Err(e) => e,
    };

    match refetch() {
        Ok(fresh) => {
            let mut guard = match state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = fresh;
            Reconciliation::Reverted { error }
        }
        Err(reload_error) => Reconciliation::Diverged {
            error,
            reload_error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_keeps_change() {
        let state = RwLock::new(vec![1, 2, 3]);
        let result: Reconciliation<i32, String> = tentative_apply(
            &state,
            |v| {
                v[0] = 10;
                Some(v[0])
            },
            |_| Ok(()),
            || Ok(vec![]),
        );
        assert_eq!(result, Reconciliation::Committed(10));
        assert_eq!(*state.read().unwrap(), vec![10, 2, 3]);
    }

    #[test]
    fn test_rejected_write_reloads() {
        let state = RwLock::new(vec![1, 2, 3]);
        let result = tentative_apply(
            &state,
            |v| {
                v.push(4);
                Some(())
            },
            |_| Err("disk full".to_string()),
            || Ok(vec![1, 2, 3]),
        );
        assert_eq!(
            result,
            Reconciliation::Reverted {
                error: "disk full".to_string()
            }
        );
        assert_eq!(*state.read().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_reload_leaves_state() {
        let state = RwLock::new(0);
        let result = tentative_apply(
            &state,
            |v| {
                *v = 7;
                Some(())
            },
            |_| Err("write"),
            || Err("read"),
        );
        assert_eq!(
            result,
            Reconciliation::Diverged {
                error: "write",
                reload_error: "read"
            }
        );
        assert_eq!(*state.read().unwrap(), 7);
    }

    #[test]
    fn test_skip_does_not_persist() {
        let state = RwLock::new(0);
        let mut persisted = false;
        let result: Reconciliation<(), ()> = tentative_apply(
            &state,
            |_| None,
            |_| {
                persisted = true;
                Ok(())
            },
            || Ok(0),
        );
        assert_eq!(result, Reconciliation::Skipped);
        assert!(!persisted);
    }
}
