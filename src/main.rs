//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest crawl engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sumi_harvest::config::load_config_with_hash;
use sumi_harvest::controller::{EnqueueRequest, ResumeRequest, SessionController};
use sumi_harvest::output::{
    print_chunk_report, print_session_list, print_status, to_json,
};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a resumable crawl-and-extract engine
///
/// Sumi-Harvest walks paginated listings page by page, extracts records with
/// per-site extractors, deduplicates them into a scoped store and checkpoints
/// after every page so an interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A resumable crawl-and-extract engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "harvest.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a crawl session (or continue the matching resumable one)
    Enqueue {
        /// First listing page to crawl
        source_url: String,

        /// Scope records are deduplicated within (e.g. a category key)
        #[arg(long)]
        scope: String,

        /// Extractor site id (resolved from the URL host when omitted)
        #[arg(long)]
        site: Option<String>,

        /// Pages per chunk
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Stop (paused) after this many processed pages
        #[arg(long)]
        max_pages: Option<u32>,

        /// Always create a new session instead of resuming a matching one
        #[arg(long)]
        fresh: bool,

        /// Continue a specific session id
        #[arg(long, conflicts_with = "fresh")]
        session: Option<i64>,

        /// Stop after one chunk instead of continuing automatically
        #[arg(long)]
        single_chunk: bool,

        /// Seconds to sleep between chunks
        #[arg(long)]
        delay: Option<u64>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resume a paused, failed or interrupted session
    Resume {
        session_id: i64,

        #[arg(long)]
        chunk_size: Option<u32>,

        /// Stop after one chunk instead of continuing automatically
        #[arg(long)]
        single_chunk: bool,

        #[arg(long)]
        delay: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Show the stored state of a session
    Status {
        session_id: i64,

        #[arg(long)]
        json: bool,
    },

    /// List resumable sessions
    List {
        #[arg(long)]
        json: bool,
    },

    /// Ask a running session to pause after its current page
    Pause { session_id: i64 },

    /// Cancel a session for good
    Cancel { session_id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let controller = SessionController::from_config(&config)?;

    match cli.command {
        Command::Enqueue {
            source_url,
            scope,
            site,
            chunk_size,
            max_pages,
            fresh,
            session,
            single_chunk,
            delay,
            json,
        } => {
            let mut request = EnqueueRequest::new(source_url, scope);
            request.site_id = site;
            request.chunk_size = chunk_size;
            request.max_pages = max_pages;
            request.resume = !fresh;
            request.session_id = session;
            request.auto_continue = single_chunk.then_some(false);
            request.inter_chunk_delay_seconds = delay;

            let response = controller.enqueue(request)?;
            tracing::info!("{}", response.message);
            run_to_stop(&controller, response.session_id, json).await?;
        }
        Command::Resume {
            session_id,
            chunk_size,
            single_chunk,
            delay,
            json,
        } => {
            let request = ResumeRequest {
                session_id,
                chunk_size,
                auto_continue: single_chunk.then_some(false),
                inter_chunk_delay_seconds: delay,
            };

            let response = controller.resume(request)?;
            tracing::info!("{}", response.message);
            run_to_stop(&controller, response.session_id, json).await?;
        }
        Command::Status { session_id, json } => {
            let report = controller.status(session_id)?;
            if json {
                println!("{}", to_json(&report)?);
            } else {
                print_status(&report);
            }
        }
        Command::List { json } => {
            let reports = controller.list_resumable()?;
            if json {
                println!("{}", to_json(&reports)?);
            } else {
                print_session_list(&reports);
            }
        }
        Command::Pause { session_id } => {
            let status = controller.pause(session_id)?;
            println!("Session {} is {}", session_id, status);
        }
        Command::Cancel { session_id } => {
            let status = controller.cancel(session_id)?;
            println!("Session {} is {}", session_id, status);
        }
    }

    Ok(())
}

/// Waits for a spawned session, pausing it cooperatively on Ctrl-C
///
/// An interrupted session stays resumable; `cancel` is the explicit way to
/// abandon one.
async fn run_to_stop<S>(
    controller: &SessionController<S>,
    session_id: i64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: sumi_harvest::storage::CheckpointStore + Send + 'static,
{
    let report = tokio::select! {
        report = controller.wait(session_id) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; pausing session {} after the current page", session_id);
            controller.pause(session_id)?;
            controller.wait(session_id).await?
        }
    };

    let Some(report) = report else {
        return Ok(());
    };

    if json {
        println!("{}", to_json(&report)?);
    } else {
        print_chunk_report(&report);
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
