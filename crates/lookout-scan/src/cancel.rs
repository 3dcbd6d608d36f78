//! Per-job cancellation tokens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use lookout_core::JobId;

/// Live cancellation tokens, keyed by job.
///
/// A token is registered when a job is accepted and removed once its worker
/// has recorded a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        // The map stays consistent even if a holder panicked.
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh token for `id`, replacing any previous one.
    pub fn register(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(id, token.clone());
        token
    }

    /// The token for `id`, registering one if none exists.
    pub fn token(&self, id: JobId) -> CancellationToken {
        self.lock().entry(id).or_default().clone()
    }

    /// Signal cancellation. Returns `false` if no token is registered.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.lock().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: JobId) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_registered_token() {
        let registry = CancelRegistry::new();
        let id = JobId::new();
        let token = registry.register(id);

        assert!(!token.is_cancelled());
        assert!(registry.cancel(id));
        assert!(token.is_cancelled());
        assert!(registry.token(id).is_cancelled());
    }

    #[test]
    fn unknown_job_has_nothing_to_cancel() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel(JobId::new()));
    }

    #[test]
    fn removal_forgets_token() {
        let registry = CancelRegistry::new();
        let id = JobId::new();
        registry.register(id);
        assert_eq!(registry.len(), 1);

        registry.remove(id);
        assert!(registry.is_empty());
        assert!(!registry.token(id).is_cancelled());
    }
}
