use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::interpreter::SequenceOutcome;
use crate::logger;
use crate::types::{AnchorRef, EngineStatus, Mode, SlotOutcome};

/// Something that happened inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TaskStarted { task: String, steps: usize },
    StepStarted { task: String, index: usize, label: String },
    StepSucceeded { task: String, index: usize, label: String },
    StepFailed {
        task: String,
        index: usize,
        label: String,
        anchor: Option<AnchorRef>,
        attempts: u32,
        /// Set for configuration defects, `None` for a plain miss.
        reason: Option<String>,
        optional: bool,
    },
    SequenceFinished { task: String, outcome: SequenceOutcome },
    SlotProcessed { slot: u32, outcome: SlotOutcome },
    PassFinished { pass: u64, marched: u32, slots_visited: u32, elapsed: Duration },
    ModeChanged { from: Mode, to: Mode },
    TriggerSeen { task: String, index: usize },
    DeviceLost { reason: String },
    DeviceRestored { waited: Duration },
}

pub trait Observer: Send {
    fn on_event(&mut self, event: &Event);
}

/// Narrates events through the global logger. Steps of the rally task go
/// under the `slots` prefix, every other task under `idle`.
pub struct LogObserver {
    rally_task: String,
}

impl LogObserver {
    pub fn new(rally_task: &str) -> Self {
        logger::register_prefix("engine", logger::COLOR_BLUE);
        logger::register_prefix("slots", logger::COLOR_GREEN);
        logger::register_prefix("idle", logger::COLOR_MAGENTA);
        logger::register_prefix("supervisor", logger::COLOR_BLUE);
        LogObserver { rally_task: rally_task.to_string() }
    }

    fn prefix_for(&self, task: &str) -> &'static str {
        if task == self.rally_task { "slots" } else { "idle" }
    }
}

impl Observer for LogObserver {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::TaskStarted { task, steps } => {
                logger::info_p(self.prefix_for(task), &format!("{}: starting ({} steps)", task, steps));
            }
            Event::StepStarted { .. } => {}
            Event::StepSucceeded { task, index, label } => {
                logger::info_p(self.prefix_for(task), &format!("{} #{} {}: ok", task, index + 1, label));
            }
            Event::StepFailed { task, index, label, anchor, attempts, reason, optional } => {
                let what = match (anchor, reason) {
                    (_, Some(reason)) => reason.clone(),
                    (Some(anchor), None) => format!("{} not found after {} attempt(s)", anchor, attempts),
                    (None, None) => "device input failed".to_string(),
                };
                if *optional {
                    logger::warn_p(self.prefix_for(task), &format!("{} #{} {}: {} (optional, continuing)", task, index + 1, label, what));
                } else {
                    logger::error_p(self.prefix_for(task), &format!("{} #{} {}: {}", task, index + 1, label, what));
                }
            }
            Event::SequenceFinished { task, outcome } => {
                let msg = format!("{}: {}", task, outcome);
                if outcome.succeeded() {
                    logger::info_p(self.prefix_for(task), &msg);
                } else {
                    logger::warn_p(self.prefix_for(task), &msg);
                }
            }
            Event::SlotProcessed { slot, outcome } => {
                logger::info_p("slots", &format!("slot {}: {}", slot, outcome));
            }
            Event::PassFinished { pass, marched, slots_visited, elapsed } => {
                logger::info_p(
                    "slots",
                    &format!("pass {} done: {} marched, {} slots visited in {:.1}s", pass, marched, slots_visited, elapsed.as_secs_f64()),
                );
            }
            Event::ModeChanged { from, to } => {
                logger::info_p("engine", &format!("mode {} -> {}", from, to));
            }
            Event::TriggerSeen { task, index } => {
                logger::info_p("idle", &format!("new rally spotted, abandoning {} at step {}", task, index + 1));
            }
            Event::DeviceLost { reason } => {
                logger::error_p("supervisor", &format!("device lost: {}", reason));
            }
            Event::DeviceRestored { waited } => {
                logger::info_p("supervisor", &format!("device back after {:.0}s, restarting", waited.as_secs_f64()));
            }
        }
    }
}

/// Keeps the shared dashboard status current.
pub struct StatusObserver {
    status: Arc<Mutex<EngineStatus>>,
}

impl StatusObserver {
    pub fn new(status: Arc<Mutex<EngineStatus>>) -> Self {
        Self { status }
    }
}

impl Observer for StatusObserver {
    fn on_event(&mut self, event: &Event) {
        let mut s = self.status.lock().unwrap();
        match event {
            Event::TaskStarted { task, .. } => s.current_task = Some(task.clone()),
            Event::SequenceFinished { .. } => s.current_task = None,
            Event::StepFailed { task, label, optional: false, .. } => {
                s.last_error = Some(format!("{}: {}", task, label));
            }
            Event::SlotProcessed { slot, outcome } => {
                s.push_outcome(*slot, *outcome);
                if *outcome == SlotOutcome::Marched {
                    s.marched_total += 1;
                }
            }
            Event::PassFinished { pass, .. } => s.passes = *pass,
            Event::ModeChanged { to, .. } => s.mode = *to,
            Event::DeviceLost { reason } => {
                s.device_online = false;
                s.last_error = Some(reason.clone());
            }
            Event::DeviceRestored { .. } => {
                s.device_online = true;
                s.mode = Mode::Hunting;
            }
            _ => {}
        }
    }
}

/// Forwards every event to each inner observer in order.
pub struct Fanout(pub Vec<Box<dyn Observer>>);

impl Observer for Fanout {
    fn on_event(&mut self, event: &Event) {
        for o in &mut self.0 {
            o.on_event(event);
        }
    }
}
