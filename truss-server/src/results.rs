//! Periodic writing of completed results to `SavedResults-*` files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use tracing::debug;

use truss_core::scheduler::results_file_name;
use truss_core::{Scheduler, TrussError};

/// Names and writes results files for one server instance.
#[derive(Debug)]
pub struct ResultsSink {
    directory: PathBuf,
    instance_uid: u32,
    counter: AtomicU32,
}

impl ResultsSink {
    /// A sink with a random instance ID in `1..=65536`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let uid = rand::thread_rng().gen_range(1..=65536);
        Self::with_instance(directory, uid)
    }

    pub fn with_instance(directory: impl Into<PathBuf>, instance_uid: u32) -> Self {
        Self {
            directory: directory.into(),
            instance_uid,
            counter: AtomicU32::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn instance_uid(&self) -> u32 {
        self.instance_uid
    }

    fn next_path(&self) -> PathBuf {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.directory
            .join(results_file_name(self.instance_uid, counter))
    }

    /// Save every completed record, returning where they went.
    pub async fn flush(&self, scheduler: &Arc<Scheduler>) -> Result<Option<(PathBuf, usize)>, TrussError> {
        if scheduler.completed_count() == 0 {
            debug!("no completed results to flush");
            return Ok(None);
        }

        let path = self.next_path();
        let scheduler = Arc::clone(scheduler);
        let target = path.clone();
        let saved = tokio::task::spawn_blocking(move || scheduler.save(&target)).await??;
        Ok((saved > 0).then_some((path, saved)))
    }
}
