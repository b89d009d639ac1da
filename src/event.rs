use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::notify::DeliveryEvent;

/// Console events
#[derive(Debug)]
pub enum Event {
  /// A line typed on stdin
  Line(String),
  /// Stdin reached end of file
  InputClosed,
  /// Periodic tick for connectivity probing
  Tick,
  /// Delivery lifecycle event from the agent
  Delivery(DeliveryEvent),
}

/// Event handler that merges stdin lines, a tick timer and delivery events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration, mut deliveries: broadcast::Receiver<DeliveryEvent>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn stdin reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if input_tx.send(Event::Line(line)).is_err() {
              break;
            }
          }
          Ok(None) => {
            let _ = input_tx.send(Event::InputClosed);
            break;
          }
          Err(e) => {
            warn!(error = %e, "Failed to read stdin");
            let _ = input_tx.send(Event::InputClosed);
            break;
          }
        }
      }
    });

    // Spawn ticker
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Forward delivery events
    tokio::spawn(async move {
      loop {
        match deliveries.recv().await {
          Ok(event) => {
            if tx.send(Event::Delivery(event)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Console fell behind on delivery events");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
