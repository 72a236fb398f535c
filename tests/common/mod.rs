//! Shared helpers for the integration suites.

#![allow(dead_code)]

use coframe::UniqueTask;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use coframe::test_utils::{DropProbe, Trigger};

/// Installs the test-writer subscriber once per process.
pub fn init_test_logging() {
    coframe::test_utils::init_test_logging();
}

/// Starts a task that returns `input + 1` once `input` resolves.
pub fn inc(input: UniqueTask<u64>) -> UniqueTask<u64> {
    UniqueTask::new(async move { input.await.map_or(0, |v| v + 1) })
}

/// Shared counter bumped from inside frames.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
