//! Decides when drains run: serializes them and coalesces triggers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::worker::DeliveryWorker;

/// Why a drain was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  ConnectivityRestored,
  ExplicitForce,
  VisibilityForeground,
}

impl fmt::Display for SyncTrigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SyncTrigger::ConnectivityRestored => "connectivity-restored",
      SyncTrigger::ExplicitForce => "explicit-force",
      SyncTrigger::VisibilityForeground => "visibility-foreground",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Draining,
}

/// What a trigger did to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
  /// Was idle; a drain starts now
  StartDrain,
  /// Was draining; one more drain will follow
  FollowUpScheduled,
  /// A follow-up was already pending; absorbed into it
  AlreadyScheduled,
}

/// Pure state machine behind [`SyncCoordinator`].
#[derive(Debug)]
struct TriggerMachine {
  phase: Phase,
  follow_up: bool,
}

impl TriggerMachine {
  fn new() -> Self {
    Self {
      phase: Phase::Idle,
      follow_up: false,
    }
  }

  fn on_trigger(&mut self) -> TriggerOutcome {
    match self.phase {
      Phase::Idle => {
        self.phase = Phase::Draining;
        TriggerOutcome::StartDrain
      }
      Phase::Draining if self.follow_up => TriggerOutcome::AlreadyScheduled,
      Phase::Draining => {
        self.follow_up = true;
        TriggerOutcome::FollowUpScheduled
      }
    }
  }

  /// Returns true when another drain must run immediately.
  fn on_drain_complete(&mut self) -> bool {
    if self.follow_up {
      self.follow_up = false;
      true
    } else {
      self.phase = Phase::Idle;
      false
    }
  }
}

struct Inner {
  machine: Mutex<TriggerMachine>,
  worker: DeliveryWorker,
  armed: AtomicBool,
  phase_tx: watch::Sender<Phase>,
}

impl Inner {
  fn machine(&self) -> MutexGuard<'_, TriggerMachine> {
    // The machine holds two plain fields; a panic mid-update cannot tear them
    self.machine.lock().unwrap_or_else(|e| e.into_inner())
  }

  async fn run(&self) {
    let mut round = 1;
    loop {
      debug!(round, "Drain starting");
      self.worker.drain().await;

      let again = {
        let mut machine = self.machine();
        let again = machine.on_drain_complete();
        if !again {
          self.phase_tx.send_replace(Phase::Idle);
        }
        again
      };

      if !again {
        break;
      }
      round += 1;
    }
  }
}

/// Runs the delivery worker in response to triggers.
///
/// Drains never overlap. Any number of triggers arriving during a drain
/// collapse into a single follow-up drain, so no trigger is lost.
#[derive(Clone)]
pub struct SyncCoordinator {
  inner: Arc<Inner>,
}

impl SyncCoordinator {
  pub fn new(worker: DeliveryWorker) -> Self {
    let (phase_tx, _) = watch::channel(Phase::Idle);
    Self {
      inner: Arc::new(Inner {
        machine: Mutex::new(TriggerMachine::new()),
        worker,
        armed: AtomicBool::new(false),
        phase_tx,
      }),
    }
  }

  /// Request a drain. Must be called from within a tokio runtime.
  pub fn trigger(&self, trigger: SyncTrigger) -> TriggerOutcome {
    let outcome = {
      let mut machine = self.inner.machine();
      let outcome = machine.on_trigger();
      if outcome == TriggerOutcome::StartDrain {
        self.inner.phase_tx.send_replace(Phase::Draining);
      }
      outcome
    };

    info!(%trigger, ?outcome, "Sync triggered");

    if outcome == TriggerOutcome::StartDrain {
      let inner = Arc::clone(&self.inner);
      tokio::spawn(async move { inner.run().await });
    }
    outcome
  }

  pub fn phase(&self) -> Phase {
    *self.inner.phase_tx.borrow()
  }

  /// Resolves once no drain is running or scheduled.
  pub async fn wait_idle(&self) {
    let mut rx = self.inner.phase_tx.subscribe();
    // The sender lives as long as `self`, so this cannot fail
    let _ = rx.wait_for(|phase| *phase == Phase::Idle).await;
  }

  /// Register a one-shot sync for the next observed connectivity.
  pub fn arm(&self) {
    if !self.inner.armed.swap(true, Ordering::SeqCst) {
      info!("Background sync registered");
    }
  }

  pub fn is_armed(&self) -> bool {
    self.inner.armed.load(Ordering::SeqCst)
  }

  /// Consume the registration, returning whether one was pending.
  pub fn take_armed(&self) -> bool {
    self.inner.armed.swap(false, Ordering::SeqCst)
  }
}
