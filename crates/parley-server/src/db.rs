//! Async access to the synchronous store.
//!
//! `rusqlite` is blocking, so every call is shipped to tokio's blocking pool
//! and bounded by a deadline. A call that misses its deadline is reported as
//! an internal error; the blocking task itself runs to completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl DbHandle {
    pub fn new(database: Database, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(database)),
            timeout,
        }
    }

    /// Run `f` against the database on the blocking pool.
    ///
    /// `op` names the call in logs and timeout errors.
    pub async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || {
            // A panic in an earlier call does not leave SQLite inconsistent.
            let db = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&db)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(ServerError::from),
            Ok(Err(join)) => Err(ServerError::Internal(format!("{op} task failed: {join}"))),
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Database call timed out");
                Err(ServerError::Internal(format!("{op} timed out")))
            }
        }
    }
}
