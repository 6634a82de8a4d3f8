//! Scoped machine locks
//!
//! Hypervisor APIs often require a session lock on a machine before it can be
//! inspected or modified, and lock attempts fail transiently while another
//! session holds it. [`with_machine_lock`] acquires the lock under a
//! [`RetryPolicy`], applies a callback to the locked session, and releases the
//! lock through [`LockGuard`] on every exit path.

use crate::retry::{RetryDecision, RetryPolicy};
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::debug;

/// Kind of lock to take on a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive lock, required to modify the machine
    Write,
    /// Shared lock, enough to read machine state
    Shared,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Write => f.write_str("write"),
            LockMode::Shared => f.write_str("shared"),
        }
    }
}

/// Errors from locking a machine
#[derive(Debug, Error)]
pub enum LockError {
    /// No machine is registered under this id (not retried)
    #[error("Could not find a registered machine named {0}")]
    MachineNotFound(String),

    /// The machine is locked by another session (retryable)
    #[error("Machine {machine_id} is busy: {message}")]
    Busy { machine_id: String, message: String },

    /// Every attempt failed with a busy lock
    #[error("Error locking {machine_id} with {mode} lock after {attempts} attempts")]
    Exhausted {
        machine_id: String,
        mode: LockMode,
        attempts: u32,
        #[source]
        source: Box<LockError>,
    },

    /// Any other hypervisor error (not retried)
    #[error("Error locking {machine_id}")]
    Other {
        machine_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LockError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            LockError::Busy { .. } => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        }
    }
}

/// Hypervisor API able to lock machines
pub trait MachineLocker {
    /// Locked session handle
    type Session;

    /// Take a lock on a machine
    fn lock(&self, machine_id: &str, mode: LockMode) -> Result<Self::Session, LockError>;

    /// Release a previously taken lock. Must not fail.
    fn unlock(&self, session: &mut Self::Session);
}

/// RAII guard that releases a machine lock when dropped
pub struct LockGuard<'a, L: MachineLocker> {
    locker: &'a L,
    session: L::Session,
}

impl<'a, L: MachineLocker> LockGuard<'a, L> {
    /// Acquire a lock once, without retrying
    pub fn acquire(locker: &'a L, machine_id: &str, mode: LockMode) -> Result<Self, LockError> {
        let session = locker.lock(machine_id, mode)?;
        Ok(Self { locker, session })
    }
}

impl<L: MachineLocker> Deref for LockGuard<'_, L> {
    type Target = L::Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<L: MachineLocker> DerefMut for LockGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl<L: MachineLocker> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.locker.unlock(&mut self.session);
    }
}

/// Lock a machine, apply `apply` to the locked session, then unlock.
///
/// Returns `Ok(None)` if the machine does not exist. Busy locks are retried
/// according to `policy` (usually [`RetryPolicy::lock_default`]); other errors
/// stop immediately.
pub async fn with_machine_lock<L, T, F>(
    locker: &L,
    machine_id: &str,
    mode: LockMode,
    policy: &RetryPolicy,
    apply: F,
) -> Result<Option<T>, LockError>
where
    L: MachineLocker,
    F: FnOnce(&mut L::Session) -> T,
{
    let what = format!("{mode} lock on {machine_id}");
    let mut attempts = 0u32;

    let acquired = policy
        .run(
            &what,
            || {
                attempts += 1;
                let result = LockGuard::acquire(locker, machine_id, mode);
                async move { result }
            },
            LockError::retry_decision,
        )
        .await;

    let mut guard = match acquired {
        Ok(guard) => guard,
        Err(LockError::MachineNotFound(id)) => {
            debug!(machine_id = %id, "Machine not found, nothing to lock");
            return Ok(None);
        }
        Err(e @ LockError::Busy { .. }) => {
            return Err(LockError::Exhausted {
                machine_id: machine_id.to_string(),
                mode,
                attempts,
                source: Box::new(e),
            });
        }
        Err(e) => return Err(e),
    };

    debug!(machine_id = %machine_id, mode = %mode, attempts, "Machine locked");
    Ok(Some(apply(&mut *guard)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::Mutex;

    /// Locker that reports busy a fixed number of times before granting
    #[derive(Default)]
    struct FakeLocker {
        busy_for: u32,
        missing: bool,
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        lock_calls: u32,
        unlocks: u32,
        held: bool,
    }

    struct FakeSession {
        machine_id: String,
        mode: LockMode,
    }

    impl MachineLocker for FakeLocker {
        type Session = FakeSession;

        fn lock(&self, machine_id: &str, mode: LockMode) -> Result<FakeSession, LockError> {
            let mut state = self.state.lock().unwrap();
            state.lock_calls += 1;
            if self.missing {
                return Err(LockError::MachineNotFound(machine_id.to_string()));
            }
            if state.lock_calls <= self.busy_for {
                return Err(LockError::Busy {
                    machine_id: machine_id.to_string(),
                    message: "session busy".to_string(),
                });
            }
            state.held = true;
            Ok(FakeSession {
                machine_id: machine_id.to_string(),
                mode,
            })
        }

        fn unlock(&self, _session: &mut FakeSession) {
            let mut state = self.state.lock().unwrap();
            state.unlocks += 1;
            state.held = false;
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::lock_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_and_unlocks() {
        let locker = FakeLocker {
            busy_for: 2,
            ..Default::default()
        };

        let result = with_machine_lock(&locker, "vm-1", LockMode::Write, &policy(), |session| {
            assert_eq!(session.mode, LockMode::Write);
            format!("applied to {}", session.machine_id)
        })
        .await
        .unwrap();

        assert_eq!(result.as_deref(), Some("applied to vm-1"));
        let state = locker.state.lock().unwrap();
        assert_eq!(state.lock_calls, 3);
        assert_eq!(state.unlocks, 1);
        assert!(!state.held);
    }

    #[tokio::test]
    async fn test_missing_machine_returns_none() {
        let locker = FakeLocker {
            missing: true,
            ..Default::default()
        };

        let result = with_machine_lock(&locker, "ghost", LockMode::Shared, &policy(), |_| 1)
            .await
            .unwrap();

        assert!(result.is_none());
        let state = locker.state.lock().unwrap();
        assert_eq!(state.lock_calls, 1);
        assert_eq!(state.unlocks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_machine_exhausts_attempts() {
        let locker = FakeLocker {
            busy_for: u32::MAX,
            ..Default::default()
        };

        let err = with_machine_lock(&locker, "vm-1", LockMode::Write, &policy(), |_| ())
            .await
            .unwrap_err();

        match err {
            LockError::Exhausted {
                attempts, mode, ..
            } => {
                assert_eq!(attempts, armsweep_common::defaults::DEFAULT_LOCK_ATTEMPTS);
                assert_eq!(mode, LockMode::Write);
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
        assert_eq!(locker.state.lock().unwrap().unlocks, 0);
    }

    #[tokio::test]
    async fn test_panic_in_apply_still_unlocks() {
        let locker = FakeLocker::default();

        let outcome = AssertUnwindSafe(with_machine_lock(
            &locker,
            "vm-1",
            LockMode::Write,
            &policy(),
            |_: &mut FakeSession| -> () { panic!("callback failed") },
        ))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        let state = locker.state.lock().unwrap();
        assert_eq!(state.unlocks, 1);
        assert!(!state.held);
    }
}
