mod agent;
mod app;
mod backend;
mod cache;
mod cli;
mod commands;
mod config;
mod connectivity;
mod coordinator;
mod db;
mod error;
mod event;
mod logging;
mod net;
mod notify;
mod queue;
mod remote;
mod router;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::logging::LogTarget;

#[derive(Parser, Debug)]
#[command(name = "postlane")]
#[command(about = "Offline-resilient message delivery with a durable outbound queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/postlane/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a message, queueing it if delivery fails
  Send { message: String },
  /// Drain the queue now and wait for the result
  Sync,
  /// List queued messages
  Pending,
  /// Route one request through the cache and print the result
  Fetch {
    /// Absolute URL or a path relative to cache.origin
    url: String,
    /// HTTP method (default: GET, or POST with a body)
    #[arg(short = 'X', long)]
    method: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Manage cache generations
  Cache {
    #[command(subcommand)]
    action: cli::CacheAction,
  },
  /// Run the agent with an interactive console
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // The console owns stdout, so the long-running agent logs to a file
  let log_dir = config
    .database_path()?
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let target = match args.command {
    Command::Run => LogTarget::File(&log_dir),
    _ => LogTarget::Stderr,
  };
  let _guard = logging::init(target)?;

  match args.command {
    Command::Send { message } => cli::send(&config, &message).await,
    Command::Sync => cli::sync(&config).await,
    Command::Pending => cli::pending(&config),
    Command::Fetch {
      url,
      method,
      navigate,
      body,
    } => cli::fetch(&config, &url, method.as_deref(), navigate, body.as_deref()).await,
    Command::Cache { action } => cli::cache(&config, action).await,
    Command::Run => {
      let mut app = app::App::new(config)?;
      app.run().await
    }
  }
}
