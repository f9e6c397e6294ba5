//! rsp-server: Runtime Server Protocol server
//!
//! Lets tooling discover, create, launch and stop application servers over a
//! line-delimited JSON-RPC connection.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use rsp_server::config::{self, Config};
use rsp_server::protocol::{RspServer, SERVER_NAME};
use rsp_server::session::Session;

/// How long blocked reads (stdin) may delay process exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runtime Server Protocol server.
///
/// Discovers server installations, manages server handles and drives their
/// launch lifecycle on behalf of connected tooling clients.
#[derive(Parser, Debug)]
#[command(name = "rsp-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// TCP port to listen on (0 picks a free port), overriding the config
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve a single client on stdin/stdout instead of TCP
    #[arg(long)]
    stdio: bool,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the session and serves clients until shutdown.
async fn run(cfg: Config, stdio: bool) -> std::io::Result<()> {
    let session = Arc::new(Session::from_config(&cfg).await);
    let server = RspServer::new(session);

    if stdio {
        info!("Serving a single client on stdio");
        return server.serve_stdio().await;
    }

    let addr = format!("{}:{}", cfg.listen.host, cfg.listen.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;

    // Clients and launch scripts read the bound address from stdout
    println!("{SERVER_NAME} listening on {local}");

    server.serve(listener).await
}

/// Entry point for the rsp-server binary.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config_or_default(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nLoaded from: {}", default_path.display());
                    eprintln!("Fix it based on config/example-config.json");
                }
            }
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        cfg.listen.port = port;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting {SERVER_NAME}"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    let result = runtime.block_on(run(cfg, args.stdio));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
