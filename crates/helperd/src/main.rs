//! Helper server entry point.
//!
//! Started by a privileged supervisor with a fixed positional argument
//! list and an inherited admin pipe. The first 64 bytes on the pipe are
//! the shared connection secret; any later byte, or EOF, orders shutdown.
//! Exits 0 on clean shutdown, 1 on a startup error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{signal, SigHandler, Signal};
use tokio::net::unix::pipe;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use helperd::config::Config;
use helperd::secret::SharedSecret;
use helperd::server::Server;
use helperd_core::fd::OwnedDescriptor;
use helperd_core::paths;
use helperd_core::pool::{ApplicationPool, SpawnerPool};

fn main() -> ExitCode {
    let config = Config::parse();

    init_tracing(&config);

    // Process-wide: a client that disconnects mid-response must surface as
    // a failed write, not kill the process. Installed before any I/O.
    ignore_sigpipe();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "cannot create the runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => {
            info!("helper server exited");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "helper server startup failed");
            ExitCode::FAILURE
        }
    }
}

/// Startup sequence: admin channel, secret, pool, server.
async fn run(config: Config) -> Result<()> {
    // SAFETY: the supervisor hands us this descriptor for exclusive use;
    // nothing else in the process touches it.
    let admin_fd = unsafe { OwnedDescriptor::from_raw(config.admin_fd) };
    let mut admin_channel = pipe::Receiver::from_owned_fd(admin_fd.into_owned_fd())
        .context("cannot open the admin pipe")?;

    let secret = SharedSecret::receive(&mut admin_channel)
        .await
        .context("could not read password from the admin pipe")?;

    let pool = Arc::new(SpawnerPool::new(
        &config.interpreter,
        config.spawn_server_path(),
    ));
    pool.set_max(config.max_pool_size);
    pool.set_max_per_app(config.max_instances_per_app);
    pool.set_max_idle_time(config.pool_idle_time());

    let temp_dir = paths::service_temp_dir();
    let server = Server::bind(
        &temp_dir,
        secret,
        Arc::clone(&pool) as Arc<dyn ApplicationPool>,
        config.max_pool_size,
    )?;

    info!(pid = std::process::id(), "helper server started");
    server.run(admin_channel).await?;
    Ok(())
}

/// Ignores `SIGPIPE` for the whole process.
fn ignore_sigpipe() {
    // SAFETY: SigIgn carries no handler code; this only changes the
    // disposition of SIGPIPE.
    if let Err(err) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) } {
        error!(error = %err, "cannot ignore SIGPIPE");
    }
}

/// Maps the supervisor's numeric log level onto a `tracing` filter.
fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();
}
