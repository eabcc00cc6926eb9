//! drive: Browse a drive mirrored from a fixture-backed remote.
//!
//! Uses the same drive-core engine a live client would, with an in-memory
//! remote seeded from a JSON fixture and optional replayed change events.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use drive_cli::{Config, Session, render};
use drive_core::{EngineEvent, EngineOptions, StarTarget, ToggleOutcome, normalize_browse_path};

#[derive(Parser, Debug)]
#[command(name = "drive")]
#[command(about = "Browse a drive mirrored from a fixture-backed remote")]
struct Args {
    /// JSON fixture with the remote's records (defaults to $DRIVE_FIXTURE)
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// JSONL change events to replay after the session starts
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Thumbnail size requested for blob URLs
    #[arg(long, default_value = "100x100")]
    thumb_size: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the directory tree
    Tree,
    /// Print the path index, newest first
    Paths,
    /// List a directory
    Browse {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Search file names
    Search { query: String },
    /// List starred directories and files
    Starred,
    /// Create a directory
    Mkdir { parent: String, name: String },
    /// Toggle the star on a directory or file path
    Star { path: String },
    /// Print the blob URL of a file
    Url {
        path: String,
        /// Request the thumbnail variant
        #[arg(long)]
        thumb: bool,
    },
    /// Print records dropped by the validator
    Diagnostics,
    /// Replay events one at a time, printing engine events as JSON lines
    Watch {
        /// Delay between replayed events
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,drive_core=debug"
    } else {
        "info,drive_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env(args.fixture.as_deref(), args.events.as_deref())?;
    let options = EngineOptions {
        thumb_size: args.thumb_size,
        ..EngineOptions::default()
    };
    let mut session = Session::open(&config, options).await?;

    if let Command::Watch { interval_ms } = args.command {
        return watch(session, Duration::from_millis(interval_ms)).await;
    }

    let applied = session.replay_all().await;
    if applied > 0 {
        info!("Replayed {} event(s)", applied);
    }
    run(&session, args.command).await
}

async fn run(session: &Session, command: Command) -> Result<()> {
    let engine = &session.engine;
    match command {
        Command::Tree => {
            let tree = engine.tree().context("Directory tree is unavailable")?;
            print!("{}", render::tree(&tree));
        }
        Command::Paths => print!("{}", render::paths(&engine.path_index())),
        Command::Browse { path } => {
            let listing = engine
                .browse(&path)
                .ok_or_else(|| anyhow!("No such directory: {}", normalize_browse_path(&path)))?;
            print!("{}", render::listing(&listing));
        }
        Command::Search { query } => print!("{}", render::hits(&engine.search(&query))),
        Command::Starred => print!("{}", render::starred(&engine.starred())),
        Command::Mkdir { parent, name } => {
            let parent_path = normalize_browse_path(&parent);
            let parent = engine
                .resolve_by_full_path(&parent_path)
                .ok_or_else(|| anyhow!("No such directory: {}", parent_path))?;
            let created = engine.create_directory(&name, &parent.id).await?;
            engine.process_pending().await;
            let full_path = engine
                .path_index()
                .get(&created.id)
                .map(|entry| entry.full_path.clone())
                .unwrap_or_else(|| format!("{}{}/", parent_path, created.name));
            println!("{}\t{}", full_path, created.id);
        }
        Command::Star { path } => {
            let target = star_target(session, &path)?;
            let outcome = engine.toggle_star(&target).await?;
            engine.process_pending().await;
            match outcome {
                ToggleOutcome::Committed(starred) => println!("{}\tstarred={}", path, starred),
                ToggleOutcome::Reverted(starred) => {
                    bail!("Star change for {} was rejected (starred={})", path, starred)
                }
                ToggleOutcome::Ignored => println!("{}\tbusy", path),
            }
        }
        Command::Url { path, thumb } => {
            let file = session
                .find_file(&path)
                .ok_or_else(|| anyhow!("No such file: {}", path))?;
            println!("{}", engine.blob_url(&file, thumb)?);
        }
        Command::Diagnostics => print!("{}", render::diagnostics(&engine.diagnostics().entries())),
        Command::Watch { .. } => bail!("watch replays events itself"),
    }
    Ok(())
}

fn star_target(session: &Session, path: &str) -> Result<StarTarget> {
    if let Some(directory) = session
        .engine
        .resolve_by_full_path(&normalize_browse_path(path))
        .filter(|directory| !directory.id.is_empty())
    {
        return Ok(StarTarget::from(&directory));
    }
    session
        .find_file(path)
        .map(|file| StarTarget::from(&file))
        .ok_or_else(|| anyhow!("No such directory or file: {}", path))
}

async fn watch(mut session: Session, interval: Duration) -> Result<()> {
    let _printer = session.engine.events().subscribe(|event: EngineEvent| {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{}", line);
        }
    });

    let remote = std::sync::Arc::clone(&session.remote);
    let replay = std::mem::take(&mut session.replay);
    let total = replay.len();
    let mut publisher = tokio::spawn(async move {
        for item in replay {
            tokio::time::sleep(interval).await;
            remote.publish(item.collection, item.event);
        }
    });

    info!("Watching {} replay event(s). Press Ctrl+C to stop.", total);

    // Main event loop
    let finished = loop {
        tokio::select! {
            Some(collection) = session.engine.process_next() => {
                debug!("Applied event on {}", collection);
            }

            result = &mut publisher => {
                result.context("Replay task failed")?;
                break true;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                publisher.abort();
                break false;
            }
        }
    };

    if finished {
        let applied = session.engine.process_pending().await;
        debug!("Applied {} trailing event(s)", applied);
        info!("Replay finished");
    }
    Ok(())
}
