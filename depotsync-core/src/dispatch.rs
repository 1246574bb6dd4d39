//! Mutation dispatcher
//!
//! Wraps persistence calls so that every successful mutating operation queues
//! a copy-up. The caller always gets its own operation's result back unchanged;
//! the copy-up runs later on the sync worker and its outcome only reaches the
//! sync tracker.

use crate::ops::Operation;
use crate::worker::{SyncHandle, SyncTrigger};
use std::future::Future;

#[derive(Debug, Clone)]
pub struct MutationDispatcher {
    sync: SyncHandle,
}

impl MutationDispatcher {
    pub fn new(sync: SyncHandle) -> Self {
        Self { sync }
    }

    /// Await `call` as operation `op`.
    pub async fn dispatch<T, E, F>(&self, op: Operation, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let result = call.await;
        self.after(op, result.is_ok());
        result
    }

    /// Run the blocking `call` as operation `op`.
    pub fn dispatch_with<T, E>(&self, op: Operation, call: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let result = call();
        self.after(op, result.is_ok());
        result
    }

    fn after(&self, op: Operation, succeeded: bool) {
        if op.is_mutating() && succeeded {
            self.sync.request_copy_up(SyncTrigger::Mutation(op));
        }
    }
}
