//! One-shot commands.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tokio::sync::broadcast::error::RecvError;

use crate::agent::{Agent, SendOutcome};
use crate::app::{print_delivery, resolve_url};
use crate::config::Config;
use crate::net::{Request, RequestMode};

pub async fn send(config: &Config, message: &str) -> Result<()> {
  let agent = Agent::from_config(config)?;

  match agent.send(message).await? {
    SendOutcome::Delivered => println!("+ sent \"{}\"", message),
    SendOutcome::Queued { id, reason } => {
      println!("~ queued \"{}\" as {} ({})", message, id, reason);
      println!("  run `postlane sync` or `postlane run` to retry");
    }
  }
  Ok(())
}

/// Drain the queue once, printing events until the drain settles.
pub async fn sync(config: &Config) -> Result<()> {
  let agent = Agent::from_config(config)?;
  let mut events = agent.subscribe();

  agent.force_sync();
  let idle = agent.coordinator().wait_idle();
  tokio::pin!(idle);

  loop {
    tokio::select! {
      biased;
      event = events.recv() => match event {
        Ok(event) => print_delivery(&event),
        Err(RecvError::Lagged(skipped)) => println!("! {} events skipped", skipped),
        Err(RecvError::Closed) => break,
      },
      _ = &mut idle => break,
    }
  }
  while let Ok(event) = events.try_recv() {
    print_delivery(&event);
  }

  let remaining = agent.queue_len()?;
  if remaining > 0 {
    println!("= {} message(s) still pending", remaining);
  }
  Ok(())
}

pub fn pending(config: &Config) -> Result<()> {
  let agent = Agent::from_config(config)?;
  let messages = agent.pending()?;

  println!("{} pending message(s)", messages.len());
  for (i, msg) in messages.iter().enumerate() {
    println!(
      "{:>4}. {:<6} {} \"{}\"",
      i + 1,
      msg.id,
      msg.created_at.to_rfc3339(),
      msg.payload
    );
  }
  Ok(())
}

pub async fn fetch(
  config: &Config,
  target: &str,
  method: Option<&str>,
  navigate: bool,
  body: Option<&str>,
) -> Result<()> {
  let agent = Agent::from_config(config)?;
  let url = resolve_url(&config.cache.origin, target)?;

  let mut request = match body {
    Some(body) => {
      let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| eyre!("Request body is not JSON: {}", e))?;
      Request::post_json(url, &value)
    }
    None => Request::get(url),
  };
  if let Some(method) = method {
    request.method = Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|_| eyre!("Invalid HTTP method: {}", method))?;
  }
  if navigate {
    request.mode = RequestMode::Navigate;
  }

  let result = agent.fetch(request).await;
  println!(
    "{} [{}] {}",
    result.data.status,
    result.source.as_str(),
    result.data.header("content-type").unwrap_or("-")
  );
  if let Some(cached_at) = result.cached_at {
    println!("cached at {}", cached_at.to_rfc3339());
  }
  println!("{}", result.data.body_text());
  Ok(())
}

#[derive(Debug, Clone, Copy, clap::Subcommand)]
pub enum CacheAction {
  /// Fetch the precache list into the configured generation
  Install,
  /// Serve the configured generation and delete all others
  Activate,
  /// Delete every cached generation
  Purge,
  /// Show cached generations
  Status,
}

pub async fn cache(config: &Config, action: CacheAction) -> Result<()> {
  let agent = Agent::from_config(config)?;
  let router = agent.router();

  match action {
    CacheAction::Install => {
      let count = router.install().await?;
      println!("installed {} ({} entries)", router.configured_generation(), count);
    }
    CacheAction::Activate => {
      let removed = router.activate()?;
      println!(
        "activated {} ({} old entries removed)",
        router.configured_generation(),
        removed
      );
    }
    CacheAction::Purge => {
      let removed = router.purge()?;
      println!("purged {} entries", removed);
    }
    CacheAction::Status => {
      let status = router.status()?;
      println!("configured {}", status.configured);
      println!("serving    {}", status.serving);
      for (generation, entries) in status.generations {
        println!("  {:<24} {} entries", generation, entries);
      }
    }
  }
  Ok(())
}
