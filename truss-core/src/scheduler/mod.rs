//! In-memory job scheduler shared by every connection handler.
//!
//! One store and one ID counter sit behind a single mutex, and every
//! operation holds the lock for its whole body, so operations are totally
//! ordered. Jobs are keyed by ID in a `BTreeMap`, which makes ID order the
//! queue order.

pub mod descriptor;
pub mod job;
pub mod results;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::TrussError;

pub use descriptor::{JobDescriptor, LoadReport, parse_descriptors};
pub use job::{Job, JobId, JobStatus, ResultKind, TargetOs};
pub use results::{RESULT_DIVIDER, render, results_file_name};

/// How many jobs `load_samples` enqueues.
pub const SAMPLE_JOB_COUNT: usize = 10;

#[derive(Debug, Default)]
struct JobStore {
    jobs: BTreeMap<JobId, Job>,
    /// Client ID → its single assigned job.
    assigned: HashMap<String, JobId>,
    next_id: JobId,
}

impl JobStore {
    fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        self.next_id
    }

    fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status() == status).count()
    }

    fn remove_where(&mut self, status: JobStatus) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.status() != status);
        before - self.jobs.len()
    }
}

// ── Listing ──────────────────────────────────────────────────────

/// One row of a status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRow {
    pub id: JobId,
    pub command: String,
    pub os: TargetOs,
    pub security_level: u32,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_lines: Option<usize>,
}

impl From<&Job> for ListingRow {
    fn from(job: &Job) -> Self {
        let assigned = job.status() == JobStatus::Assigned;
        let completed = job.status() == JobStatus::Completed;
        Self {
            id: job.id(),
            command: job.command().to_string(),
            os: job.os(),
            security_level: job.security_level(),
            status: job.status(),
            issued_to: assigned.then(|| job.issued_to().to_string()),
            seconds_since_issue: assigned.then(|| job.elapsed().as_secs()),
            error_lines: completed.then(|| job.error_lines().len()),
            output_lines: completed.then(|| job.output_lines().len()),
        }
    }
}

/// Counts of each status, for periodic status logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub unassigned: usize,
    pub assigned: usize,
    pub completed: usize,
}

impl SchedulerSnapshot {
    pub fn to_json(&self) -> Result<String, TrussError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Scheduler ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Scheduler {
    store: Mutex<JobStore>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JobStore> {
        // A panic while holding the lock leaves the store consistent:
        // every mutation is a single map operation.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Enqueue every well-formed `OS SECLEVEL COMMAND` line of `source`.
    pub fn load(&self, source: &str) -> LoadReport {
        let (accepted, rejected) = parse_descriptors(source);
        for error in &rejected {
            warn!("skipping job descriptor: {error}");
        }

        let mut store = self.lock();
        for d in &accepted {
            let id = store.allocate_id();
            store
                .jobs
                .insert(id, Job::pending(id, d.command.clone(), d.os, d.security_level));
        }
        info!(accepted = accepted.len(), rejected = rejected.len(), "jobs loaded");
        LoadReport {
            accepted: accepted.len(),
            rejected,
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<LoadReport, TrussError> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.load(&source))
    }

    /// Enqueue [`SAMPLE_JOB_COUNT`] demo jobs for `os`.
    pub fn load_samples(&self, os: TargetOs) -> usize {
        let command = match os {
            TargetOs::Windows => "time /T",
            TargetOs::Linux => "date",
            TargetOs::Any => "java -version",
        };
        let mut store = self.lock();
        for _ in 0..SAMPLE_JOB_COUNT {
            let id = store.allocate_id();
            store
                .jobs
                .insert(id, Job::pending(id, command.to_string(), os, 0));
        }
        SAMPLE_JOB_COUNT
    }

    // ── Assignment ───────────────────────────────────────────────

    /// First pending job the client may run, in queue order. `None` when
    /// nothing matches or the client already holds a job.
    pub fn assign(&self, client_id: &str, os: &str, security_level: u32) -> Option<String> {
        let class = TargetOs::classify_client(os);
        let mut store = self.lock();
        if store.assigned.contains_key(client_id) {
            return None;
        }

        let job = store
            .jobs
            .values_mut()
            .find(|job| job.matches(class, security_level))?;
        job.assign(client_id);
        let (id, command) = (job.id(), job.command().to_string());
        store.assigned.insert(client_id.to_string(), id);
        info!(job = id, client = client_id, %command, "job assigned");
        Some(command)
    }

    /// Remove the job assigned to `client_id`.
    pub fn signoff(&self, client_id: &str) -> bool {
        let mut store = self.lock();
        let Some(id) = store.assigned.remove(client_id) else {
            return false;
        };
        store.jobs.remove(&id);
        info!(job = id, client = client_id, "job signed off");
        true
    }

    /// Return assignments older than `max_age` to the pending set.
    pub fn requeue_stale(&self, max_age: Duration) -> usize {
        let mut store = self.lock();
        let stale: Vec<(String, JobId)> = store
            .assigned
            .iter()
            .filter(|&(_, id)| {
                store
                    .jobs
                    .get(id)
                    .is_some_and(|job| job.elapsed() >= max_age)
            })
            .map(|(client, id)| (client.clone(), *id))
            .collect();

        for (client, id) in &stale {
            store.assigned.remove(client);
            if let Some(job) = store.jobs.get_mut(id) {
                job.requeue();
            }
            warn!(job = id, client = %client, "stale assignment requeued");
        }
        stale.len()
    }

    // ── Results ──────────────────────────────────────────────────

    /// Open a completed record for an uploaded command.
    pub fn setup_result_storage(&self, command: &str) -> JobId {
        let mut store = self.lock();
        let id = store.allocate_id();
        store.jobs.insert(id, Job::completed(id, command.to_string()));
        id
    }

    /// Append a result line. Unknown or non-completed IDs are ignored.
    pub fn store_results(&self, id: JobId, line: &str, kind: ResultKind) {
        let mut store = self.lock();
        match store.jobs.get_mut(&id) {
            Some(job) if job.status() == JobStatus::Completed => job.record(line, kind),
            _ => warn!(job = id, "result line for unknown job dropped"),
        }
    }

    /// Drop a completed record whose upload never finished. Returns whether
    /// it existed.
    pub fn discard_result(&self, id: JobId) -> bool {
        let mut store = self.lock();
        match store.jobs.get(&id) {
            Some(job) if job.status() == JobStatus::Completed => {
                store.jobs.remove(&id);
                warn!(job = id, "partial results discarded");
                true
            }
            _ => false,
        }
    }

    /// Write every completed record to `destination` and drop them.
    /// Writes nothing, and creates no file, when there is nothing to save.
    pub fn save(&self, destination: &Path) -> Result<usize, TrussError> {
        let mut store = self.lock();
        let completed: Vec<Job> = store
            .jobs
            .values()
            .filter(|job| job.status() == JobStatus::Completed)
            .cloned()
            .collect();
        if completed.is_empty() {
            return Ok(0);
        }

        std::fs::write(destination, render(&completed))?;
        store.remove_where(JobStatus::Completed);
        info!(
            count = completed.len(),
            path = %destination.display(),
            "results saved"
        );
        Ok(completed.len())
    }

    /// A completed record, for inspection.
    pub fn completed_job(&self, id: JobId) -> Option<Job> {
        self.lock()
            .jobs
            .get(&id)
            .filter(|job| job.status() == JobStatus::Completed)
            .cloned()
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn unassigned_count(&self) -> usize {
        self.lock().count(JobStatus::Pending)
    }

    pub fn assigned_count(&self) -> usize {
        self.lock().count(JobStatus::Assigned)
    }

    pub fn completed_count(&self) -> usize {
        self.lock().count(JobStatus::Completed)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let store = self.lock();
        SchedulerSnapshot {
            unassigned: store.count(JobStatus::Pending),
            assigned: store.count(JobStatus::Assigned),
            completed: store.count(JobStatus::Completed),
        }
    }

    pub fn listing(&self, status: JobStatus) -> Vec<ListingRow> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.status() == status)
            .map(ListingRow::from)
            .collect()
    }

    pub fn clear_unassigned(&self) -> usize {
        self.lock().remove_where(JobStatus::Pending)
    }

    pub fn clear_assigned(&self) -> usize {
        let mut store = self.lock();
        store.assigned.clear();
        store.remove_where(JobStatus::Assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("truss-{}-{name}", std::process::id()))
    }

    #[test]
    fn load_then_assign_by_os_and_level() {
        let scheduler = Scheduler::new();
        let report = scheduler.load("any 0 echo hi\nwindows 5 dir\n");
        assert_eq!(report.accepted, 2);
        assert_eq!(scheduler.unassigned_count(), 2);

        assert_eq!(scheduler.assign("c1", "linux", 0).as_deref(), Some("echo hi"));
        assert_eq!(scheduler.assign("c1", "windows", 10), None);
        assert_eq!(scheduler.unassigned_count(), 1);
        assert_eq!(scheduler.assigned_count(), 1);
    }

    #[test]
    fn load_reports_malformed_lines() {
        let scheduler = Scheduler::new();
        let report = scheduler.load("any 0 ok\nplan9 0 nope\nlinux abc nope\n");
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(scheduler.unassigned_count(), 1);
    }

    #[test]
    fn assign_respects_security_level() {
        let scheduler = Scheduler::new();
        scheduler.load("any 3 secret-job\n");
        assert_eq!(scheduler.assign("low", "linux", 2), None);
        assert_eq!(
            scheduler.assign("high", "linux", 3).as_deref(),
            Some("secret-job")
        );
    }

    #[test]
    fn assign_skips_os_excluded_jobs_in_order() {
        let scheduler = Scheduler::new();
        scheduler.load("windows 0 dir\nlinux 0 ls\nany 0 java -version\n");
        assert_eq!(scheduler.assign("mac", "Mac OS X", 0).as_deref(), Some("ls"));
        assert_eq!(
            scheduler.assign("bsd", "FreeBSD", 0).as_deref(),
            Some("java -version")
        );
        assert_eq!(scheduler.assign("win", "Windows 11", 0).as_deref(), Some("dir"));
        assert_eq!(scheduler.unassigned_count(), 0);
    }

    #[test]
    fn signoff_removes_the_assigned_job() {
        let scheduler = Scheduler::new();
        scheduler.load("any 0 a\nany 0 b\n");
        assert!(!scheduler.signoff("c1"));

        scheduler.assign("c1", "linux", 0);
        assert!(scheduler.signoff("c1"));
        assert!(!scheduler.signoff("c1"));
        assert_eq!(scheduler.assigned_count(), 0);
        assert_eq!(scheduler.assign("c1", "linux", 0).as_deref(), Some("b"));
    }

    #[test]
    fn results_saved_in_id_order_and_removed() {
        let scheduler = Scheduler::new();
        let first = scheduler.setup_result_storage("build");
        let second = scheduler.setup_result_storage("test");
        assert!(second > first);

        scheduler.store_results(first, "e1", ResultKind::Error);
        scheduler.store_results(first, "e2", ResultKind::Error);
        scheduler.store_results(first, "o1", ResultKind::Output);
        scheduler.store_results(9999, "lost", ResultKind::Output);

        let path = temp_path("results-order");
        assert_eq!(scheduler.save(&path).unwrap(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            format!("Job:build\nError:e1\nError:e2\nOutput:o1\n{RESULT_DIVIDER}\nJob:test\n\n")
        );
        assert_eq!(scheduler.completed_count(), 0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn save_with_nothing_completed_writes_no_file() {
        let scheduler = Scheduler::new();
        let path = temp_path("results-empty");
        assert_eq!(scheduler.save(&path).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn discarded_results_are_never_saved() {
        let scheduler = Scheduler::new();
        scheduler.load("any 0 queued\n");
        let queued = scheduler.listing(JobStatus::Pending)[0].id;
        let partial = scheduler.setup_result_storage("make");
        scheduler.store_results(partial, "e1", ResultKind::Error);

        assert!(scheduler.discard_result(partial));
        assert!(!scheduler.discard_result(partial));
        // Only completed records can be discarded.
        assert!(!scheduler.discard_result(queued));
        assert_eq!(scheduler.unassigned_count(), 1);

        let path = temp_path("results-discarded");
        assert_eq!(scheduler.save(&path).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn store_results_ignores_pending_jobs() {
        let scheduler = Scheduler::new();
        scheduler.load("any 0 echo\n");
        let pending_id = scheduler.listing(JobStatus::Pending)[0].id;
        scheduler.store_results(pending_id, "x", ResultKind::Output);
        assert!(scheduler.completed_job(pending_id).is_none());
    }

    #[test]
    fn ids_strictly_increase_across_kinds() {
        let scheduler = Scheduler::new();
        scheduler.load("any 0 a\n");
        let loaded = scheduler.listing(JobStatus::Pending)[0].id;
        let completed = scheduler.setup_result_storage("x");
        assert!(completed > loaded);
    }

    #[test]
    fn requeue_stale_restores_queue_position() {
        let scheduler = Scheduler::new();
        scheduler.load("any 0 first\nany 0 second\n");
        assert_eq!(scheduler.assign("c1", "linux", 0).as_deref(), Some("first"));

        assert_eq!(scheduler.requeue_stale(Duration::from_secs(3600)), 0);
        assert_eq!(scheduler.requeue_stale(Duration::ZERO), 1);
        assert_eq!(scheduler.assigned_count(), 0);
        assert!(!scheduler.signoff("c1"));
        assert_eq!(scheduler.assign("c2", "linux", 0).as_deref(), Some("first"));
    }

    #[test]
    fn clear_operations_and_counts() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.load_samples(TargetOs::Linux), SAMPLE_JOB_COUNT);
        scheduler.assign("c1", "linux", 0);
        scheduler.setup_result_storage("done");

        assert_eq!(
            scheduler.snapshot(),
            SchedulerSnapshot {
                unassigned: 9,
                assigned: 1,
                completed: 1
            }
        );
        assert_eq!(scheduler.clear_unassigned(), 9);
        assert_eq!(scheduler.clear_assigned(), 1);
        assert!(!scheduler.signoff("c1"));
        assert_eq!(scheduler.completed_count(), 1);
    }

    #[test]
    fn listing_rows_serialize() {
        let scheduler = Scheduler::new();
        scheduler.load("linux 1 uname\n");
        scheduler.assign("c9", "linux", 1);
        let rows = scheduler.listing(JobStatus::Assigned);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issued_to.as_deref(), Some("c9"));

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["status"], "assigned");
        assert_eq!(json["os"], "linux");
        assert!(json.get("error_lines").is_none());
        assert_eq!(
            scheduler.snapshot().to_json().unwrap(),
            r#"{"unassigned":0,"assigned":1,"completed":0}"#
        );
    }

    #[test]
    fn concurrent_assignment_never_double_issues() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.load_samples(TargetOs::Any);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let scheduler = Arc::clone(&scheduler);
                std::thread::spawn(move || scheduler.assign(&format!("c{i}"), "linux", 0))
            })
            .collect();
        let issued = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();

        assert_eq!(issued, SAMPLE_JOB_COUNT);
        assert_eq!(scheduler.assigned_count(), SAMPLE_JOB_COUNT);
        assert_eq!(scheduler.unassigned_count(), 0);
    }
}
