//! Background refresh and write-back tasks.
//!
//! Work handed to the [`RevalidationScheduler`] runs on a detached tokio
//! task. Errors and panics are logged there and go no further. There is no
//! retry: the next request for the same identity tries again.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::Error;
use crate::identity::RequestIdentity;
use crate::request::ProxyResponse;
use crate::store::CacheDb;

/// Spawns background tasks and remembers them until they finish.
///
/// Dropping the scheduler detaches its tasks; it never cancels them.
#[derive(Clone, Default)]
pub struct RevalidationScheduler {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RevalidationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background. Its outcome is only logged.
    pub fn spawn<F>(&self, label: &'static str, target: String, task: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => tracing::debug!(task = label, %target, "background task complete"),
                Ok(Err(e)) => tracing::warn!(task = label, %target, "background task failed: {e}"),
                Err(_) => tracing::error!(task = label, %target, "background task panicked"),
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Wait for every spawned task, including ones spawned while waiting.
    pub async fn drain(&self) {
        loop {
            let batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                return;
            }
            for task in batch {
                if let Err(e) = task.await {
                    tracing::error!("background task aborted: {e}");
                }
            }
        }
    }
}

impl std::fmt::Debug for RevalidationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevalidationScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// A store write whose target generation was fixed at dispatch time.
pub(crate) struct WriteBack {
    db: CacheDb,
    generation: String,
    identity: RequestIdentity,
    max_entries: Option<usize>,
}

impl WriteBack {
    pub(crate) fn new(db: CacheDb, generation: String, identity: RequestIdentity, max_entries: Option<usize>) -> Self {
        Self { db, generation, identity, max_entries }
    }

    pub(crate) async fn run(self, response: ProxyResponse) -> Result<(), Error> {
        self.db.put(&self.generation, &self.identity, &response).await?;

        if let Some(max) = self.max_entries {
            let trimmed = self.db.trim_generation(&self.generation, max).await?;
            if trimmed > 0 {
                tracing::debug!(generation = %self.generation, trimmed, "trimmed generation to quota");
            }
        }
        Ok(())
    }
}
