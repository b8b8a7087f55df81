//! The worker loop: request a job, run it, upload its results to the
//! drop-off node, then sign off with the server.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{error, info, warn};

use truss_core::{ClientIdentity, ClientSession, ConnectionInfo, SessionOptions, TrussError};

use crate::runner::{ProcessOutput, ProcessRunner};

/// Outcome of one [`Worker::run_once`] cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// The server had nothing for us.
    Idle,
    Completed {
        command: String,
        status: Option<i32>,
        /// Whether the server accepted the sign-off.
        signed_off: bool,
    },
}

pub struct Worker<S, R> {
    server: ClientSession<S>,
    dropoff: ClientSession<S>,
    runner: R,
    idle_delay: Duration,
    completed: u64,
}

impl<R: ProcessRunner> Worker<TcpStream, R> {
    /// Connect to both nodes and establish a fresh key with each.
    pub async fn connect(
        server: &ConnectionInfo,
        dropoff: &ConnectionInfo,
        psk: &str,
        identity: ClientIdentity,
        options: SessionOptions,
        runner: R,
    ) -> Result<Self, TrussError> {
        let mut server_session =
            ClientSession::connect(server, psk, identity.clone(), options.clone()).await?;
        server_session.establish().await?;
        info!(%server, "assignment session established");

        let mut dropoff_session = ClientSession::connect(dropoff, psk, identity, options).await?;
        dropoff_session.establish().await?;
        info!(%dropoff, "drop-off session established");

        Ok(Self::new(server_session, dropoff_session, runner))
    }
}

impl<S, R> Worker<S, R>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: ProcessRunner,
{
    /// Wrap two sessions that have already been established.
    pub fn new(server: ClientSession<S>, dropoff: ClientSession<S>, runner: R) -> Self {
        Self {
            server,
            dropoff,
            runner,
            idle_delay: Duration::from_secs(2),
            completed: 0,
        }
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub async fn run_once(&mut self) -> Result<Cycle, TrussError> {
        let Some(command) = self.server.request_job().await? else {
            return Ok(Cycle::Idle);
        };
        info!(%command, "job assigned");

        let output = match self.runner.run(&command).await {
            Ok(output) => output,
            Err(e) => {
                error!(%command, "job did not run: {e}");
                ProcessOutput {
                    status: None,
                    stdout: Vec::new(),
                    stderr: vec![e.to_string()],
                }
            }
        };
        let status = output.status;
        info!(%command, ?status, "job finished");

        self.dropoff.upload(&output.into_results(&command)).await?;
        let signed_off = self.server.sign_off().await?;
        if !signed_off {
            warn!(%command, "server did not accept the sign-off");
        }
        self.completed += 1;

        Ok(Cycle::Completed {
            command,
            status,
            signed_off,
        })
    }

    /// Cycle until `stop` turns true. A cycle in progress always finishes
    /// so neither session is left mid-exchange.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> Result<u64, TrussError> {
        while !*stop.borrow() {
            if self.run_once().await? == Cycle::Idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_delay) => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        Ok(self.completed)
    }

    /// Send `quit` on both sessions.
    pub async fn shutdown(self) -> Result<(), TrussError> {
        let server = self.server.quit().await;
        let dropoff = self.dropoff.quit().await;
        info!(completed = self.completed, "worker stopped");
        server.and(dropoff)
    }
}
