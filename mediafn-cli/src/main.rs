// mediafn-cli/src/main.rs
//
// Command-line invocation shell for the mediafn function core.
//
// Responsibilities include:
// - Parsing an event document (JSON file or stdin).
// - Building the core configuration from MEDIAFN_* environment variables.
// - Wiring a filesystem-backed object store for local runs.
// - Running the invocation coordinator and printing the structured result.
// - Mapping the outcome to a process exit code the caller can branch on.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediafn_core::{
    check_toolchain, handle_invocation, install_termination_handler, CoreConfig, InvocationEvent,
    LocalObjectStore,
};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code for retryable outcomes (EX_TEMPFAIL), so shell callers and
/// schedulers can distinguish "try again" from "give up".
const EXIT_RETRYABLE: i32 = 75;
const EXIT_FATAL: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mediafn: event-triggered media processing function",
    long_about = "Runs one media-processing event through the mediafn core: stage the \
                  referenced object, execute ffmpeg/ffprobe under a deadline, classify \
                  the result, and publish the artifact."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process one event document and print the function result as JSON
    Invoke(InvokeArgs),
    /// Verify the configured external toolchain is present and pinned
    Check,
}

#[derive(Parser, Debug)]
struct InvokeArgs {
    /// Path to the event JSON document; '-' or absent reads stdin
    #[arg(short, long, value_name = "FILE")]
    event: Option<PathBuf>,

    /// Root directory of the local object store
    #[arg(long, value_name = "DIR", env = "MEDIAFN_STORE_ROOT")]
    store_root: PathBuf,

    /// Total invocation budget in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 300)]
    budget_secs: u64,

    /// Pretty-print the response JSON
    #[arg(long)]
    pretty: bool,
}

fn main() {
    // A platform stop (SIGTERM/SIGINT) must take any running tool process
    // down with us rather than orphan it.
    install_termination_handler();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Invoke(args) => invoke(args),
        Commands::Check => check(),
    }
}

fn invoke(args: InvokeArgs) -> Result<i32> {
    let raw = read_event_document(args.event.as_deref())?;
    let event: InvocationEvent =
        serde_json::from_str(&raw).context("event document is not a valid invocation event")?;

    let config = CoreConfig::from_env().context("invalid MEDIAFN_* configuration")?;
    let store = LocalObjectStore::new(&args.store_root);

    let response = handle_invocation(
        &config,
        &store,
        &event,
        Duration::from_secs(args.budget_secs),
    );

    let json = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{json}");

    Ok(match response.outcome.as_str() {
        "success" => 0,
        "retryable" => EXIT_RETRYABLE,
        _ => EXIT_FATAL,
    })
}

fn read_event_document(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event document {}", path.display())),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read event document from stdin")?;
            Ok(raw)
        }
    }
}

fn check() -> Result<i32> {
    let config = CoreConfig::from_env().context("invalid MEDIAFN_* configuration")?;
    let versions = check_toolchain(&config).context("toolchain check failed")?;
    for version in versions {
        println!("{}: {}", version.tool, version.version_line);
    }
    Ok(0)
}
