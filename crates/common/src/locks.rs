//! Keyed mutual exclusion.
//!
//! Two requests that resolve to the same destination path must not decrypt,
//! convert or write it at the same time. [`KeyedMutex`] hands out one exclusive
//! token per key. Tokens are created on first acquisition and dropped from the
//! registry once nobody holds or waits for them, so the map does not grow over
//! the lifetime of the process.
//!
//! Holders and waiters are counted under the registry lock. A token is only
//! removed when that count reaches zero, which cannot race with a new waiter
//! because the new waiter increments the count under the same lock before it
//! starts waiting.
//!
//! The lock is not reentrant. Acquiring a key that the current task already
//! holds deadlocks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    token: Arc<AsyncMutex<()>>,
    /// holders + waiters
    refs: usize,
}

/// Registry of per-key exclusive tokens.
#[derive(Default)]
pub struct KeyedMutex {
    slots: Mutex<HashMap<String, Slot>>,
}

impl fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("tracked", &self.len())
            .finish()
    }
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the token for `key` is ours.
    ///
    /// The token is released when the returned guard is dropped. Dropping the
    /// future before it resolves gives up the place in the queue.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyGuard<'_> {
        let key = key.into();
        let token = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                token: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            slot.token.clone()
        };

        // Built before waiting so a cancelled wait still gives back its ref
        let mut guard = KeyGuard {
            registry: self,
            key,
            held: None,
        };
        guard.held = Some(token.lock_owned().await);
        tracing::trace!(key = %guard.key, "acquired keyed lock");
        guard
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether anyone holds or waits for `key`.
    pub fn is_tracked(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    fn release_ref(&self, key: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(key);
            }
        }
    }
}

/// Exclusive hold on one key of a [`KeyedMutex`].
pub struct KeyGuard<'a> {
    registry: &'a KeyedMutex,
    key: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Give the token back. Same as dropping the guard.
    pub fn release(self) {}
}

impl fmt::Debug for KeyGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // unlock first, then drop our ref
        if self.held.take().is_some() {
            tracing::trace!(key = %self.key, "released keyed lock");
        }
        self.registry.release_ref(&self.key);
    }
}
