//! Huxley chat server daemon.
//!
//! Usage:
//!
//!   huxley-server [--port <port>] [--duration <seconds>] [--no-block]
//!
//! Options:
//!
//!   --port <port>        TCP port to bind (default: 8080)
//!   --duration <seconds> Run headless for N seconds then exit
//!   --no-block           Run headless until SIGINT/SIGTERM
//!
//! Environment:
//!
//!   HUXLEY_DB_PATH       Database file (default: huxley.db)
//!   HUXLEY_MASTER_KEY    Master key file (default: /etc/huxley/master.key)
//!   HUXLEY_SESSION_KEY   Sealed session key (default: /etc/huxley/session.key.enc)
//!   HUXLEY_WORKERS       Worker reactor count (default: hardware parallelism)

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use huxley_server::config::ServerConfig;
use huxley_server::server::HuxleyServer;
use huxley_shared::constants::DEFAULT_PORT;

enum RunMode {
    /// Wait for Enter on stdin.
    Interactive,
    /// Run headless for a fixed number of seconds.
    Duration(u64),
    /// Run headless until SIGINT/SIGTERM.
    UntilSignal,
}

struct CliArgs {
    port: u16,
    mode: RunMode,
}

impl CliArgs {
    /// Manual flag parsing; `Ok(None)` means `--help` was handled.
    fn parse(args: &[String]) -> Result<Option<Self>, String> {
        let mut cli = Self {
            port: DEFAULT_PORT,
            mode: RunMode::Interactive,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--port" => {
                    i += 1;
                    cli.port = args
                        .get(i)
                        .and_then(|v| v.parse().ok())
                        .ok_or("--port expects a port number")?;
                }
                "--duration" => {
                    i += 1;
                    let seconds = args
                        .get(i)
                        .and_then(|v| v.parse().ok())
                        .ok_or("--duration expects a number of seconds")?;
                    cli.mode = RunMode::Duration(seconds);
                }
                "--no-block" => {
                    cli.mode = RunMode::UntilSignal;
                }
                "--help" | "-h" => {
                    print_usage(&args[0]);
                    return Ok(None);
                }
                other => return Err(format!("Unknown argument: {other}")),
            }
            i += 1;
        }

        Ok(Some(cli))
    }
}

fn print_usage(prog: &str) {
    println!("Usage: {prog} [--port <port>] [--duration <seconds>] [--no-block]");
    println!("       --port <port>        TCP port to bind (default: {DEFAULT_PORT})");
    println!("       --duration <seconds> Run headless for N seconds then exit");
    println!("       --no-block           Run headless until SIGINT/SIGTERM");
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huxley_server=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match CliArgs::parse(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            print_usage(&args[0]);
            return ExitCode::FAILURE;
        }
    };

    let mut config = ServerConfig::from_env();
    config.port = cli.port;

    let mut server = HuxleyServer::new(config);
    if let Err(err) = server.start() {
        tracing::error!(error = %err, "server failed to start");
        return ExitCode::FAILURE;
    }

    match cli.mode {
        RunMode::Interactive => {
            println!(
                "Server running on port {}. Press Enter to stop.",
                server.port()
            );
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
        }
        RunMode::Duration(seconds) => {
            tracing::info!(seconds, port = server.port(), "running headless");
            std::thread::sleep(Duration::from_secs(seconds));
        }
        RunMode::UntilSignal => {
            let term = Arc::new(AtomicBool::new(false));
            for signal in [
                signal_hook::consts::SIGINT,
                signal_hook::consts::SIGTERM,
            ] {
                if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&term)) {
                    tracing::warn!(error = %err, signal, "failed to install signal handler");
                }
            }
            tracing::info!(port = server.port(), "running until SIGINT/SIGTERM");
            while !term.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    server.stop();
    ExitCode::SUCCESS
}
