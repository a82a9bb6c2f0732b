//! Per-user single flight.
//!
//! One async mutex per user id, created on first use. Entries carry a count
//! of holders plus waiters and are removed when it drops to zero, including
//! when a waiter is cancelled before it gets the lock.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    refs: usize,
}

type LockMap = Arc<Mutex<HashMap<i64, LockEntry>>>;

#[derive(Default)]
pub struct UserLocks {
    entries: LockMap,
}

/// Counts one holder or waiter; releases the map entry on drop.
struct Ticket {
    user_id: i64,
    entries: LockMap,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.user_id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.user_id);
                trace!("released lock entry for user {}", self.user_id);
            }
        }
    }
}

/// Held for the duration of one user's turn.
pub struct UserGuard {
    // Field order matters: unlock before the ticket releases the entry.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`.
    pub async fn acquire(&self, user_id: i64) -> UserGuard {
        let lock = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.entry(user_id).or_insert_with(|| LockEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            entry.lock.clone()
        };
        let ticket = Ticket {
            user_id,
            entries: self.entries.clone(),
        };
        let guard = lock.lock_owned().await;
        UserGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Users with a holder or waiter.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
