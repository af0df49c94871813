//! Cancellation tokens for render work
//!
//! Every open document session owns a token. Render tasks carry a clone and
//! check it before publishing results, so closing a session turns any late
//! result into a no-op.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

/// Cooperative cancellation flag shared between clones.
///
/// # Example
///
/// ```
/// use shelf_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels this token and every clone. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether two tokens share the same flag.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Tokens keyed by owner, e.g. one per open document.
///
/// Registering a key that already has a token cancels the old one, so work
/// started under a previous registration can never publish into the new one.
#[derive(Debug)]
pub struct CancellationRegistry<K> {
    tokens: Mutex<HashMap<K, CancellationToken>>,
}

impl<K: Eq + Hash + Clone> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `key` and returns its fresh token.
    pub fn register(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancels and forgets the token for `key`. Returns `true` if one existed.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels and forgets every token. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancellationToken> = self.lock().drain().map(|(_, token)| token).collect();
        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    pub fn get(&self, key: &K) -> Option<CancellationToken> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token2.is_cancelled());

        token1.cancel();
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert!(token1.same_as(&token2));
    }

    #[test]
    fn test_cancellation_token_idempotent() {
        let token = CancellationToken::new();

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_forgets_key() {
        let registry = CancellationRegistry::new();

        let token = registry.register("doc");
        assert_eq!(registry.len(), 1);

        assert!(registry.cancel(&"doc"));
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
        assert!(!registry.cancel(&"doc"));
    }

    #[test]
    fn test_registry_reregister_cancels_previous() {
        let registry = CancellationRegistry::new();

        let first = registry.register(1);
        let second = registry.register(1);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(registry.get(&1).unwrap().same_as(&second));
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();

        let token1 = registry.register(1);
        let token2 = registry.register(2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert!(registry.get(&1).is_none());
    }
}
