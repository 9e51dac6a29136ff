mod api;
mod app;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod notify;
mod query;

use app::{Action, App};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "prodman")]
#[command(about = "Command-line client for the production company management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/prodman/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base url, overrides the config file
  #[arg(long)]
  api_url: Option<String>,

  /// Keep the query cache in memory for this run only
  #[arg(long)]
  no_cache: bool,

  /// Increase log verbosity (-v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// List records
  List {
    entity: String,
    /// Filter as key=value, repeatable
    #[arg(short, long = "filter")]
    filter: Vec<String>,
    #[arg(long)]
    json: bool,
  },
  /// Show one record
  Get {
    entity: String,
    id: i64,
    #[arg(long)]
    json: bool,
  },
  /// Show aggregate statistics
  Stats { entity: String },
  /// Create a record from a JSON payload
  Create {
    entity: String,
    #[arg(short, long)]
    data: String,
  },
  /// Update fields of a record from a JSON payload
  Update {
    entity: String,
    id: i64,
    #[arg(short, long)]
    data: String,
  },
  /// Delete a record
  Delete { entity: String, id: i64 },
  /// Keep a list on screen, refreshing it until Ctrl-C
  Watch {
    entity: String,
    #[arg(short, long = "filter")]
    filter: Vec<String>,
    /// Seconds between refreshes
    #[arg(long, default_value_t = 5)]
    interval: u64,
  },
  /// Clear the local cache
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override API url if specified on command line
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let persist = config.cache.persist && !args.no_cache;
  let app = App::new(config, persist)?;

  let (entity, action) = match args.command {
    CliCommand::Logout => return app.logout(),
    CliCommand::List {
      entity,
      filter,
      json,
    } => (
      entity,
      Action::List {
        filters: commands::parse_filters(&filter)?,
        json,
      },
    ),
    CliCommand::Get { entity, id, json } => (entity, Action::Get { id, json }),
    CliCommand::Stats { entity } => (entity, Action::Stats),
    CliCommand::Create { entity, data } => (entity, Action::Create { data }),
    CliCommand::Update { entity, id, data } => (entity, Action::Update { id, data }),
    CliCommand::Delete { entity, id } => (entity, Action::Delete { id }),
    CliCommand::Watch {
      entity,
      filter,
      interval,
    } => (
      entity,
      Action::Watch {
        filters: commands::parse_filters(&filter)?,
        interval: Duration::from_secs(interval.max(1)),
      },
    ),
  };

  let entity = commands::resolve_entity(&entity)?;
  // Background refetches and settlements finish before exit, even on error
  let succeeded = app.execute(entity, action).await?;

  if !succeeded {
    drop(log_guard);
    std::process::exit(1);
  }
  Ok(())
}
