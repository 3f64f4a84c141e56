//! Detached persistence work
//!
//! Writes that should not hold up the foreground (credential storage after a
//! prompt, session timestamps after a connect) run on the blocking pool. They
//! are tracked here so the process can wait for them before it exits.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Clone, Default)]
pub struct Background {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` on the blocking pool. A failure is logged, never returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_blocking<F, E>(&self, what: &'static str, work: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.spawn_blocking(move || match work() {
            Ok(()) => debug!("{} finished", what),
            Err(e) => error!("{} failed: {}", what, e),
        });
    }

    /// Wait for every task spawned so far
    pub async fn drain(&self) {
        let mut pending = {
            let mut tasks = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *tasks)
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                error!("Background task panicked: {}", e);
            }
        }
    }

    pub fn pending(&self) -> usize {
        match self.tasks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
