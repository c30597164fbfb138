//! Task Scheduler
//!
//! Owns every background timer: periodic maintenance (rate-limit cleanup,
//! stats broadcast, recovery snapshots) and the single round timer. Timers
//! never touch game state; they send an [`EngineCommand`] and the engine
//! runs it in order with everything else.
//!
//! Periodic tasks skip missed ticks and only tick again after the previous
//! command was accepted, so a task never overlaps itself.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::core::time::Millis;
use crate::game::events::TimerRequest;
use crate::network::engine::EngineCommand;

/// Background task owner.
#[derive(Debug)]
pub struct Scheduler {
    commands: mpsc::Sender<EngineCommand>,
    periodic: Vec<JoinHandle<()>>,
    round_timer: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler feeding `commands`.
    pub fn new(commands: mpsc::Sender<EngineCommand>) -> Self {
        Self {
            commands,
            periodic: Vec::new(),
            round_timer: None,
        }
    }

    /// Send `make()` every `period`, starting one period from now.
    pub fn every(&mut self, period: Duration, make: fn() -> EngineCommand) {
        let tx = self.commands.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(make()).await.is_err() {
                    break;
                }
            }
        });
        self.periodic.push(handle);
    }

    /// Arm the round timer, replacing any pending one.
    pub fn arm(&mut self, request: TimerRequest, now: Millis) {
        let (at, command) = match request {
            TimerRequest::EndRound { round, at } => (at, EngineCommand::RoundDeadline { round }),
            TimerRequest::StartRound { after_round, at } => {
                (at, EngineCommand::StartNextRound { after_round })
            }
        };
        let delay = Duration::from_millis(at.saturating_sub(now));
        debug!(?request, delay_ms = delay.as_millis() as u64, "round timer armed");

        if let Some(previous) = self.round_timer.take() {
            previous.abort();
        }
        let tx = self.commands.clone();
        self.round_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command).await;
        }));
    }

    /// Cancel the pending round timer.
    pub fn cancel_round_timer(&mut self) {
        if let Some(timer) = self.round_timer.take() {
            timer.abort();
        }
    }

    /// Cancel everything.
    pub fn shutdown(&mut self) {
        self.cancel_round_timer();
        for task in self.periodic.drain(..) {
            task.abort();
        }
    }

    /// Tasks that have not finished.
    pub fn active_tasks(&self) -> usize {
        self.periodic
            .iter()
            .chain(self.round_timer.iter())
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
