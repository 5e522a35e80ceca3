use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ClientError;

/// Locally held state that mutations update before the server confirms them.
///
/// Mutations are serialized through `gate`; reads never wait on it.
pub struct OptimisticState<T> {
    value: Arc<Mutex<T>>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<T> Clone for OptimisticState<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> OptimisticState<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn get(&self) -> T {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the value, waiting for any mutation in flight.
    pub async fn set(&self, value: T) {
        let _gate = self.gate.lock().await;
        self.replace(value);
    }

    fn replace(&self, value: T) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Applies `apply` now, then runs `commit` against the server.
    ///
    /// On success `reconcile` folds the server's answer into the value. On
    /// failure the value goes back to exactly what it was before `apply`.
    /// The commit and its follow-up run in their own task, so dropping this
    /// future does not abandon them.
    pub async fn mutate<R, Apply, Fut, Reconcile>(
        &self,
        apply: Apply,
        commit: Fut,
        reconcile: Reconcile,
    ) -> Result<R, ClientError>
    where
        R: Clone + Send + 'static,
        Apply: FnOnce(&mut T),
        Fut: Future<Output = Result<R, ClientError>> + Send + 'static,
        Reconcile: FnOnce(&mut T, &R) + Send + 'static,
    {
        let gate = self.gate.clone().lock_owned().await;

        let prior = {
            let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            let prior = value.clone();
            apply(&mut *value);
            prior
        };

        let this = self.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            match commit.await {
                Ok(response) => {
                    let mut value = this.value.lock().unwrap_or_else(PoisonError::into_inner);
                    reconcile(&mut *value, &response);
                    Ok(response)
                }
                Err(e) => {
                    tracing::warn!("Optimistic update rolled back: {}", e);
                    this.replace(prior);
                    Err(e)
                }
            }
        });

        task.await
            .map_err(|e| ClientError::Network(format!("commit task failed: {}", e)))?
    }
}

// ── Tests ──
