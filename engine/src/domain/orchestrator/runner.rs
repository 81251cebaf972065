//! Exclusive execution primitives
//!
//! Subset changes go through a caller-supplied [`ExclusiveRunner`], the
//! host's way of running a mutation while nothing else touches shared state.
//! [`DatasetLocks`] serializes whole compile/apply/history sequences per
//! dataset so concurrent runs on disjoint datasets never block each other.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::error::EngineError;

pub type ExclusiveTask<'a> = BoxFuture<'a, Result<(), EngineError>>;

#[async_trait]
pub trait ExclusiveRunner: Send + Sync {
    /// Run `task` for `dataset_id` under the host's exclusion rules
    async fn run<'a>(&self, dataset_id: &str, task: ExclusiveTask<'a>) -> Result<(), EngineError>;
}

/// Runs tasks directly; for hosts without shared mutable state
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

#[async_trait]
impl ExclusiveRunner for InlineRunner {
    async fn run<'a>(&self, _dataset_id: &str, task: ExclusiveTask<'a>) -> Result<(), EngineError> {
        task.await
    }
}

/// Runs one task at a time across every dataset
#[derive(Debug, Default)]
pub struct SerialRunner {
    gate: Mutex<()>,
}

impl SerialRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExclusiveRunner for SerialRunner {
    async fn run<'a>(&self, dataset_id: &str, task: ExclusiveTask<'a>) -> Result<(), EngineError> {
        let _guard = self.gate.lock().await;
        tracing::trace!(dataset = %dataset_id, "Running exclusive task");
        task.await
    }
}

/// One async mutex per dataset id
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a dataset
    pub async fn acquire(&self, dataset_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(dataset_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
