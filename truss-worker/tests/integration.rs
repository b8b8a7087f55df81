//! Integration tests: a worker against real assignment and drop-off
//! listeners on localhost, with a scripted process runner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use truss_core::{
    ChannelOptions, ClientIdentity, ConnectionInfo, RekeyPolicy, Scheduler, SessionOptions,
    TrussError,
};
use truss_server::handler::HandlerOptions;
use truss_server::role::ConnectionRole;
use truss_server::service::{Listener, ListenerSettings};
use truss_worker::{Cycle, ProcessOutput, ProcessRunner, Worker};

const PSK: &str = "worker-integration-psk";

// ── Helpers ──────────────────────────────────────────────────────

/// Canned outputs keyed by command; unknown commands fail to start.
#[derive(Default, Clone)]
struct ScriptedRunner {
    outputs: HashMap<String, ProcessOutput>,
    ran: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    fn with(mut self, command: &str, stdout: &[&str], stderr: &[&str]) -> Self {
        self.outputs.insert(
            command.to_string(),
            ProcessOutput {
                status: Some(if stderr.is_empty() { 0 } else { 1 }),
                stdout: stdout.iter().map(|s| s.to_string()).collect(),
                stderr: stderr.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> Result<ProcessOutput, TrussError> {
        self.ran.lock().unwrap().push(command.to_string());
        self.outputs
            .get(command)
            .cloned()
            .ok_or_else(|| TrussError::Other(format!("no such command: {command}")))
    }
}

fn session_options(rekey_interval: u32) -> SessionOptions {
    SessionOptions {
        channel: ChannelOptions {
            receive_window: Duration::from_millis(500),
            idle_retries: 6,
            ..Default::default()
        },
        rekey: RekeyPolicy {
            prime_bits: 256,
            ..Default::default()
        },
        rekey_interval,
    }
}

async fn spawn_node(role: ConnectionRole, scheduler: Arc<Scheduler>) -> ConnectionInfo {
    let settings = ListenerSettings {
        psk: PSK.into(),
        role,
        channel: session_options(0).channel,
        handler: HandlerOptions::default(),
    };
    let listener = Listener::bind("127.0.0.1:0", scheduler, settings).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    ConnectionInfo::new(addr.ip().to_string(), addr.port())
}

struct Cluster {
    assignments: Arc<Scheduler>,
    results: Arc<Scheduler>,
    server: ConnectionInfo,
    dropoff: ConnectionInfo,
}

async fn cluster(jobs: &str) -> Cluster {
    let assignments = Arc::new(Scheduler::new());
    assignments.load(jobs);
    let results = Arc::new(Scheduler::new());
    let server = spawn_node(ConnectionRole::Assignment, Arc::clone(&assignments)).await;
    let dropoff = spawn_node(ConnectionRole::DropOff, Arc::clone(&results)).await;
    Cluster {
        assignments,
        results,
        server,
        dropoff,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn one_cycle_runs_uploads_and_signs_off() {
    let cluster = cluster("linux 0 build\n").await;
    let runner = ScriptedRunner::default().with("build", &["o1"], &["e1", "e2"]);

    let mut worker = Worker::connect(
        &cluster.server,
        &cluster.dropoff,
        PSK,
        ClientIdentity::new("linux", 0),
        session_options(100),
        runner,
    )
    .await
    .unwrap();

    assert_eq!(
        worker.run_once().await.unwrap(),
        Cycle::Completed {
            command: "build".into(),
            status: Some(1),
            signed_off: true,
        }
    );
    assert_eq!(worker.run_once().await.unwrap(), Cycle::Idle);
    worker.shutdown().await.unwrap();

    // Signed off jobs leave the assignment queue entirely.
    assert_eq!(cluster.assignments.unassigned_count(), 0);
    assert_eq!(cluster.assignments.assigned_count(), 0);

    let stored = cluster.results.completed_job(1).unwrap();
    assert_eq!(stored.command(), "build");
    assert_eq!(stored.error_lines(), ["e1", "e2"]);
    assert_eq!(stored.output_lines(), ["o1"]);
}

#[tokio::test]
async fn failed_start_is_uploaded_as_an_error_line() {
    let cluster = cluster("any 0 missing-tool\n").await;

    let mut worker = Worker::connect(
        &cluster.server,
        &cluster.dropoff,
        PSK,
        ClientIdentity::new("windows", 0),
        session_options(100),
        ScriptedRunner::default(),
    )
    .await
    .unwrap();

    let cycle = worker.run_once().await.unwrap();
    assert!(matches!(cycle, Cycle::Completed { status: None, .. }));
    worker.shutdown().await.unwrap();

    let stored = cluster.results.completed_job(1).unwrap();
    assert_eq!(stored.error_lines().len(), 1);
    assert!(stored.error_lines()[0].contains("missing-tool"));
    assert!(stored.output_lines().is_empty());
}

#[tokio::test]
async fn run_drains_queue_until_stopped() {
    let cluster = cluster("linux 0 a\nlinux 0 b\nlinux 0 c\nlinux 9 secret\n").await;
    let runner = ScriptedRunner::default()
        .with("a", &["1"], &[])
        .with("b", &["2"], &[])
        .with("c", &["3"], &[]);
    let ran = Arc::clone(&runner.ran);

    // A short rekey interval makes both sessions rekey mid-run.
    let mut worker = Worker::connect(
        &cluster.server,
        &cluster.dropoff,
        PSK,
        ClientIdentity::new("linux", 0),
        session_options(2),
        runner,
    )
    .await
    .unwrap()
    .with_idle_delay(Duration::from_millis(20));

    let (stop_tx, stop_rx) = watch::channel(false);
    let results = Arc::clone(&cluster.results);
    tokio::spawn(async move {
        while results.completed_count() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = stop_tx.send(true);
    });

    let completed = tokio::time::timeout(Duration::from_secs(20), worker.run(stop_rx))
        .await
        .expect("worker did not stop")
        .unwrap();
    assert_eq!(completed, 3);
    worker.shutdown().await.unwrap();

    assert_eq!(*ran.lock().unwrap(), ["a", "b", "c"]);
    // The level 9 job stays queued for a more trusted worker.
    assert_eq!(cluster.assignments.unassigned_count(), 1);
}
