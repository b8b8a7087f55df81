//! truss-server — entry point.
//!
//! ```text
//! truss-server                          Run with truss-server.toml (or defaults)
//! truss-server --role dropoff           Collect results instead of assigning jobs
//! truss-server --jobs jobs.txt          Queue descriptor files at startup
//! truss-server --samples linux          Queue ten sample jobs
//! truss-server --gen-config             Write default config to stdout
//! truss-server --init-config            Write default config to the --config path
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use truss_core::credentials::{CredentialProvider, Role, StaticCredentials};
use truss_core::{Scheduler, TargetOs};
use truss_server::config::ServerConfig;
use truss_server::maintenance::{self, MaintenancePlan};
use truss_server::results::ResultsSink;
use truss_server::role::ConnectionRole;
use truss_server::service::{Listener, ListenerSettings};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "truss-server", about = "Truss job assignment and result drop-off server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "truss-server.toml")]
    config: PathBuf,

    /// Node role: assignment or dropoff.
    #[arg(long)]
    role: Option<Role>,

    /// Interface to bind.
    #[arg(long)]
    bind: Option<String>,

    /// TCP port (must be above 1024).
    #[arg(short, long)]
    port: Option<u16>,

    /// Pre-shared key (otherwise config, then TRUSS_PSK).
    #[arg(long)]
    psk: Option<String>,

    /// Job descriptor file to queue (repeatable).
    #[arg(long = "jobs")]
    jobs: Vec<PathBuf>,

    /// Queue sample jobs for windows, linux or any (repeatable).
    #[arg(long = "samples")]
    samples: Vec<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        ServerConfig::write_default(&cli.config)?;
        println!("wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(role) = cli.role {
        config.node.role = role;
    }
    if let Some(bind) = cli.bind {
        config.network.bind = bind;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(psk) = cli.psk {
        config.security.psk = psk;
    }
    config.scheduler.job_files.extend(cli.jobs);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("truss-server v{}", env!("CARGO_PKG_VERSION"));

    let credentials = StaticCredentials::resolve(&config.security.psk, config.node.role);
    let psk = credentials.psk()?;
    let role = ConnectionRole::try_from(credentials.role())?;
    info!("role: {role}");

    let scheduler = Arc::new(Scheduler::new());
    if role == ConnectionRole::Assignment {
        for path in &config.scheduler.job_files {
            match scheduler.load_file(path) {
                Ok(report) => info!(
                    "loaded {} jobs from {} ({} rejected)",
                    report.accepted,
                    path.display(),
                    report.rejected.len()
                ),
                Err(e) => warn!("could not read {}: {e}", path.display()),
            }
        }
        for kind in &cli.samples {
            match kind.parse::<TargetOs>() {
                Ok(os) => {
                    let count = scheduler.load_samples(os);
                    info!("loaded {count} sample jobs ({os})");
                }
                Err(()) => warn!("unknown sample set {kind:?}; expected windows, linux or any"),
            }
        }
    } else if !config.scheduler.job_files.is_empty() || !cli.samples.is_empty() {
        warn!("job files and samples are ignored by a drop-off node");
    }

    let settings = ListenerSettings {
        psk,
        role,
        channel: config.channel_options(),
        handler: config.handler_options(),
    };
    let listener = Listener::bind(&config.listen_address(), Arc::clone(&scheduler), settings).await?;

    let sink = Arc::new(ResultsSink::new(&config.results.directory));
    info!(
        "results directory: {} (instance {})",
        sink.directory().display(),
        sink.instance_uid()
    );
    let plan = MaintenancePlan {
        interval: config.flush_interval(),
        role,
        assignment_timeout: config.assignment_timeout(),
    };
    let upkeep = maintenance::spawn(plan.clone(), Arc::clone(&scheduler), Arc::clone(&sink));

    tokio::select! {
        _ = listener.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
        }
    }
    upkeep.abort();

    if role == ConnectionRole::DropOff {
        maintenance::run_once(&plan, &scheduler, &sink).await;
    }
    Ok(())
}
