//! tally-server: a thread-pool TCP server.
//!
//! Each client connection carries one message. The server replies with the
//! number of times the message's last character occurs in it, tagged odd or
//! even, and appends every transaction to a request log.
//!
//! Features:
//! - Fixed pool of worker threads fed by a FIFO job queue
//! - Optional bounded queue with acceptor backpressure
//! - Serialized, line-atomic request log
//! - Graceful drain on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

mod config;
mod log_writer;
mod pool;
mod processor;
mod queue;
mod server;
mod shutdown;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration. Clap handles its own usage errors; anything else
    // (including a zero worker count) exits before a listener is opened.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tally-server: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!(
        listen = %config.listen,
        workers = config.workers,
        backlog = config.backlog,
        log_file = %config.log_file.display(),
        "Starting tally-server"
    );

    let server = Server::bind(&config)?;
    info!(address = %server.local_addr(), "Accepting connections");

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger())?;

    server.run()?;
    info!("Server stopped");
    Ok(())
}
