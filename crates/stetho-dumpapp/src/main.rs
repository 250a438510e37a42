//! dumpapp CLI
//!
//! Runs a stetho dumpapp plugin inside an Android app and relays its stdio.
//! Option handling for the plugin itself happens inside the app, so every
//! argument after the local options is forwarded untouched.

use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};
use stetho_adb::{AdbEndpoint, DumpappSession, open_stetho_socket};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status for errors the user can act on
const EXIT_HUMAN_READABLE: u8 = 1;

/// Exit status for internal or protocol failures
const EXIT_INTERNAL: u8 = 2;

/// Stetho dumpapp client
#[derive(Parser, Debug)]
#[command(name = "dumpapp")]
#[command(about, long_about = None)]
#[command(disable_help_flag = true)]
#[command(after_help = "\
Examples:
  dumpapp -l                      List available plugins
  dumpapp -p com.example prefs    Run the prefs plugin in com.example
  ANDROID_SERIAL=emulator-5554 dumpapp hprof
")]
struct Cli {
    /// Target process (defaults to the only stetho-enabled process)
    #[arg(short = 'p', long, env = "STETHO_PROCESS")]
    process: Option<String>,

    /// Target device serial (defaults to any single device)
    #[arg(short = 's', long, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// adb server port (defaults to ADB_SERVER_SOCKET, ANDROID_ADB_SERVER_PORT or 5037)
    #[arg(long)]
    port: Option<u16>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    #[allow(dead_code)] // Handled by clap
    help: Option<bool>,

    /// Plugin name and arguments, forwarded to the app
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Log to stderr, quiet unless `RUST_LOG` asks for more.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stetho=warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let endpoint = match cli.port {
        Some(port) => AdbEndpoint::local(port),
        None => AdbEndpoint::from_env()?,
    };
    debug!("Using adb daemon at {}:{}", endpoint.host, endpoint.port);

    let conn = open_stetho_socket(cli.serial.as_deref(), cli.process.as_deref(), &endpoint).await?;

    let status = DumpappSession::new(conn)
        .run(
            &cli.command,
            &mut tokio::io::stdin(),
            &mut tokio::io::stdout(),
            &mut tokio::io::stderr(),
        )
        .await?;

    Ok(status)
}

/// Report `err` and pick the exit status for it.
fn report(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<stetho_adb::Error>() {
        Some(e) if e.is_human_readable() => {
            println!("{e}");
            EXIT_HUMAN_READABLE
        }
        _ => {
            eprintln!("{err:?}");
            EXIT_INTERNAL
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging();

    match run(cli).await {
        // The app's status is passed through as-is, including values that
        // don't fit in ExitCode
        Ok(status) => std::process::exit(status),
        Err(err) => ExitCode::from(report(&err)),
    }
}
