//! truss-worker — entry point.
//!
//! ```text
//! truss-worker                          Run with truss-worker.toml (or defaults)
//! truss-worker --server 10.0.0.2:8080   Override the assignment server
//! truss-worker --role public            Only take level 0 jobs
//! truss-worker --gen-config             Write default config to stdout
//! truss-worker --init-config            Write default config to the --config path
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use truss_core::credentials::{CredentialProvider, Role, StaticCredentials};
use truss_core::{ClientIdentity, TrussError};
use truss_worker::config::WorkerConfig;
use truss_worker::{ShellRunner, Worker};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "truss-worker", about = "Truss worker: runs assigned jobs and uploads results")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "truss-worker.toml")]
    config: PathBuf,

    /// Assignment server as host:port.
    #[arg(long)]
    server: Option<String>,

    /// Drop-off node as host:port.
    #[arg(long)]
    dropoff: Option<String>,

    /// Worker role: public or private.
    #[arg(long)]
    role: Option<Role>,

    /// OS name reported to the server.
    #[arg(long)]
    os: Option<String>,

    /// Highest security level this worker accepts.
    #[arg(long)]
    level: Option<u32>,

    /// Pre-shared key (otherwise config, then TRUSS_PSK).
    #[arg(long)]
    psk: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,
}

fn split_endpoint(text: &str) -> Result<(String, u16), TrussError> {
    let (host, port) = text
        .rsplit_once(':')
        .ok_or_else(|| TrussError::Config(format!("expected host:port, got {text:?}")))?;
    let port = port
        .parse()
        .map_err(|_| TrussError::Config(format!("bad port in {text:?}")))?;
    Ok((host.to_string(), port))
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&WorkerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        WorkerConfig::write_default(&cli.config)?;
        println!("wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let mut config = WorkerConfig::load(&cli.config);
    if let Some(server) = &cli.server {
        (config.server.host, config.server.port) = split_endpoint(server)?;
    }
    if let Some(dropoff) = &cli.dropoff {
        (config.dropoff.host, config.dropoff.port) = split_endpoint(dropoff)?;
    }
    if let Some(role) = cli.role {
        config.identity.role = role;
    }
    if let Some(os) = cli.os {
        config.identity.os = os;
    }
    if let Some(level) = cli.level {
        config.identity.security_level = level;
    }
    if let Some(psk) = cli.psk {
        config.security.psk = psk;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("truss-worker v{}", env!("CARGO_PKG_VERSION"));

    let credentials = StaticCredentials::resolve(&config.security.psk, config.identity.role);
    if !credentials.role().is_worker() {
        return Err(TrussError::Config(format!(
            "role {} cannot run jobs; use worker-public or worker-private",
            credentials.role()
        ))
        .into());
    }
    let psk = credentials.psk()?;

    let identity = ClientIdentity::new(
        config.identity.os.clone(),
        config.effective_security_level(),
    );
    info!(
        os = %identity.os,
        level = identity.security_level,
        role = %credentials.role(),
        "worker identity"
    );

    let mut worker = Worker::connect(
        &config.server_endpoint(),
        &config.dropoff_endpoint(),
        &psk,
        identity,
        config.session_options(),
        ShellRunner,
    )
    .await?
    .with_idle_delay(config.idle_delay());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; finishing current job");
            let _ = stop_tx.send(true);
        }
    });

    match worker.run(stop_rx).await {
        Ok(completed) => {
            info!(completed, "worker loop finished");
            worker.shutdown().await?;
        }
        Err(e) => {
            error!("worker loop failed: {e}");
            return Err(e.into());
        }
    }
    Ok(())
}
