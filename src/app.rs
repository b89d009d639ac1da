use crate::agent::{Agent, SendOutcome};
use crate::commands::{self, ConsoleCommand, COMMANDS};
use crate::config::Config;
use crate::connectivity::{NetworkState, Visibility};
use crate::event::{Event, EventHandler};
use crate::net::Request;
use crate::notify::DeliveryEvent;
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

/// Long-running console around the agent
pub struct App {
  agent: Arc<Agent>,

  /// Application configuration
  config: Config,

  /// Set while a connectivity probe is running
  probing: Arc<AtomicBool>,

  /// Sends still between delivery attempt and enqueue
  sends: JoinSet<()>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let agent = Agent::from_config(&config)?;
    Ok(Self::with_agent(config, agent))
  }

  fn with_agent(config: Config, agent: Agent) -> Self {
    Self {
      agent: Arc::new(agent),
      config,
      probing: Arc::new(AtomicBool::new(false)),
      sends: JoinSet::new(),
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Subscribe before anything can trigger a drain
    let mut events = EventHandler::new(self.config.probe_interval(), self.agent.subscribe());

    if let Err(e) = self.agent.prepare_cache().await {
      warn!(error = %e, "Starting without a fresh cache generation");
      println!("! {}", e);
    }

    println!(
      "postlane: delivering to {} (type `help` for commands)",
      self.config.delivery.endpoint
    );
    self.report_pending();

    // Main loop
    while !self.should_quit {
      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }

    self.finish().await;
    info!("Console closed");
    Ok(())
  }

  /// Wait for in-flight sends so every message ends up delivered or queued.
  async fn finish(&mut self) {
    if !self.sends.is_empty() {
      println!("~ waiting for {} send(s) to settle", self.sends.len());
    }
    while let Some(result) = self.sends.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Send task failed");
      }
    }
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Line(line) => match commands::parse(&line) {
        Ok(Some(cmd)) => self.execute(cmd),
        Ok(None) => {}
        Err(msg) => println!("! {}", msg),
      },
      Event::InputClosed => self.should_quit = true,
      Event::Tick => {
        while self.sends.try_join_next().is_some() {}
        self.probe();
      }
      Event::Delivery(event) => print_delivery(&event),
    }
  }

  fn execute(&mut self, cmd: ConsoleCommand) {
    match cmd {
      ConsoleCommand::Send(message) => {
        let agent = Arc::clone(&self.agent);
        self.sends.spawn(async move {
          match agent.send(&message).await {
            Ok(SendOutcome::Delivered) => println!("+ sent \"{}\"", message),
            Ok(SendOutcome::Queued { id, reason }) => {
              println!("~ queued \"{}\" as {} ({}); will retry on reconnect", message, id, reason)
            }
            Err(e) => println!("! message lost: {}", e),
          }
        });
      }
      ConsoleCommand::Sync => {
        let outcome = self.agent.force_sync();
        println!("~ forced sync: {:?}", outcome);
      }
      ConsoleCommand::Pending => self.report_pending(),
      ConsoleCommand::Visible => {
        self.agent.set_visibility(Visibility::Visible);
        println!("~ visible");
      }
      ConsoleCommand::Hidden => {
        self.agent.set_visibility(Visibility::Hidden);
        println!("~ hidden");
      }
      ConsoleCommand::Online => {
        self.agent.force_network(Some(NetworkState::Online));
        println!("~ network pinned online");
      }
      ConsoleCommand::Offline => {
        self.agent.force_network(Some(NetworkState::Offline));
        println!("~ network pinned offline");
      }
      ConsoleCommand::Auto => {
        self.agent.force_network(None);
        println!("~ probing network every {}s", self.config.connectivity.interval_secs);
        self.probe();
      }
      ConsoleCommand::Fetch(target) => self.route(&target, false),
      ConsoleCommand::Open(target) => self.route(&target, true),
      ConsoleCommand::Status => self.report_status(),
      ConsoleCommand::Help => {
        for cmd in COMMANDS {
          println!("  {:<16} {}", cmd.usage, cmd.description);
        }
      }
      ConsoleCommand::Quit => self.should_quit = true,
    }
  }

  /// Run one connectivity probe in the background, skipping the tick if the
  /// previous probe has not answered yet.
  fn probe(&self) {
    if self.probing.swap(true, Ordering::SeqCst) {
      return;
    }
    let agent = Arc::clone(&self.agent);
    let probing = Arc::clone(&self.probing);
    tokio::spawn(async move {
      if let Some(trigger) = agent.check_connectivity().await {
        println!("~ {}: syncing", trigger);
      }
      probing.store(false, Ordering::SeqCst);
    });
  }

  fn route(&self, target: &str, navigate: bool) {
    let url = match resolve_url(&self.config.cache.origin, target) {
      Ok(url) => url,
      Err(e) => {
        println!("! {}", e);
        return;
      }
    };
    let request = if navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };

    let agent = Arc::clone(&self.agent);
    tokio::spawn(async move {
      let url = request.url.clone();
      let result = agent.fetch(request).await;
      let marker = if result.data.is_success() { '=' } else { '!' };
      println!(
        "{} {} {} [{}] {} bytes",
        marker,
        result.data.status,
        url,
        result.source.as_str(),
        result.data.body.len()
      );
    });
  }

  fn report_pending(&self) {
    match self.agent.pending() {
      Ok(messages) if messages.is_empty() => println!("= no pending messages"),
      Ok(messages) => {
        println!("= {} pending message(s)", messages.len());
        for (i, msg) in messages.iter().enumerate() {
          println!(
            "  {}. {} \"{}\" ({})",
            i + 1,
            msg.id,
            msg.payload,
            msg.created_at.format("%H:%M:%S")
          );
        }
      }
      Err(e) => println!("! could not read queue: {}", e),
    }
  }

  fn report_status(&self) {
    let network = match self.agent.network() {
      Some(NetworkState::Online) => "online",
      Some(NetworkState::Offline) => "offline",
      None => "unknown",
    };
    println!("  network     {}", network);
    println!("  visibility  {:?}", self.agent.visibility());
    println!("  sync        {:?}", self.agent.coordinator().phase());
    println!("  registered  {}", self.agent.coordinator().is_armed());
    match self.agent.queue_len() {
      Ok(n) => println!("  queued      {}", n),
      Err(e) => println!("  queued      ? ({})", e),
    }
    match self.agent.router().status() {
      Ok(status) => println!("  cache       {} (configured {})", status.serving, status.configured),
      Err(e) => println!("  cache       ? ({})", e),
    }
  }
}

/// Accept absolute URLs or paths relative to the cache origin.
pub fn resolve_url(origin: &str, target: &str) -> Result<Url> {
  match Url::parse(target) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(origin)?.join(target)?),
    Err(e) => Err(e.into()),
  }
}

pub fn print_delivery(event: &DeliveryEvent) {
  let marker = match event {
    DeliveryEvent::Started { .. } => '~',
    DeliveryEvent::Success { .. } => '+',
    DeliveryEvent::Error { .. } => '!',
  };
  println!("{} {}", marker, event);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::Parts;
  use crate::net::Response;
  use crate::queue::{QueueStore, SqliteQueueStore};
  use crate::testing::{memory_db, payloads, Outcome, ScriptedFetcher, ScriptedRemote, StubBackend};
  use tokio::sync::Semaphore;

  #[tokio::test]
  async fn test_closing_input_waits_for_in_flight_send() {
    let gate = Arc::new(Semaphore::new(0));
    let remote = ScriptedRemote::gated(gate.clone()).on("important", Outcome::Unreachable);
    let db = memory_db();
    let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::new(db.clone()));
    let parts = Parts {
      db,
      store: store.clone(),
      remote: Arc::new(remote),
      fetcher: Arc::new(ScriptedFetcher::new()),
      backend: Arc::new(StubBackend::new(Response::text(200, "{}"))),
      probe_url: Url::parse("http://localhost:8080/health").unwrap(),
    };
    let config = Config::default();
    let agent = Agent::new(&config, parts).unwrap();
    let mut app = App::with_agent(config, agent);

    app.handle_event(Event::Line("send important".into()));
    app.handle_event(Event::InputClosed);
    assert!(app.should_quit);
    assert!(store.is_empty().unwrap());

    // Delivery is still pending when the console shuts down
    gate.add_permits(1);
    app.finish().await;

    assert_eq!(payloads(store.as_ref()), vec!["important"]);
    assert!(app.agent.coordinator().is_armed());
  }

  #[test]
  fn test_resolve_url() {
    let origin = "http://localhost:8080";
    assert_eq!(
      resolve_url(origin, "/app.js").unwrap().as_str(),
      "http://localhost:8080/app.js"
    );
    assert_eq!(
      resolve_url(origin, "https://example.com/x").unwrap().as_str(),
      "https://example.com/x"
    );
    assert!(resolve_url(origin, "http://[bad").is_err());
  }
}
