//! The request queue and the serialization queue.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use super::root::{RootCommand, RootSender};
use crate::error::SessionError;
use crate::request::Request;

/// Builds transport requests off the root queue.
///
/// Building may touch the file system, so it runs on the blocking pool. An
/// optional semaphore bounds how many builds run at once.
#[derive(Debug, Clone)]
pub(crate) struct RequestQueue {
    limit: Option<Arc<Semaphore>>,
}

impl RequestQueue {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            limit: limit.map(|permits| Arc::new(Semaphore::new(permits))),
        }
    }

    pub(crate) fn build(&self, request: Request, root: RootSender) {
        let limit = self.limit.clone();
        tokio::spawn(async move {
            // Held until the result is posted.
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let builder = request.clone();
            let result =
                tokio::task::spawn_blocking(move || builder.kind().build_transport_request())
                    .await
                    .unwrap_or_else(|e| {
                        Err(SessionError::invalid_description(format!(
                            "request builder did not complete: {e}"
                        )))
                    });
            if root
                .send(RootCommand::InitialRequestBuilt { request, result })
                .is_err()
            {
                debug!("root queue closed; dropping built request");
            }
        });
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs user callbacks one at a time, in submission order.
///
/// A panicking callback is logged and does not stop the queue.
#[derive(Debug, Clone)]
pub(crate) struct SerializationQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerializationQueue {
    /// Spawns the worker on the current runtime.
    pub(crate) fn spawn() -> Self {
        let (jobs, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("user callback panicked");
                }
            }
        });
        Self { jobs }
    }

    pub(crate) fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            warn!("serialization queue closed; dropping callback");
        }
    }
}
