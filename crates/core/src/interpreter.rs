//! Runs declarative sequences against the device.
//!
//! A missing anchor fails its step, and a failed step that is not optional
//! aborts the rest of the sequence: later steps would act on the wrong
//! screen. Only a lost device escapes as an error.

use std::fmt;

use crate::device::Device;
use crate::error::DeviceError;
use crate::logger;
use crate::observer::Event;
use crate::probe::{probe, ProbeOutcome};
use crate::rig::Rig;
use crate::step::{AnchorStep, ClickAction, Hook, Sequence, Step, Swipe};
use crate::types::{AnchorRef, Point};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    Completed,
    /// The success anchor showed up after step `after`.
    EarlyExit { after: usize },
    Failed { index: usize, label: String },
    /// The boundary check asked to stop before step `index`.
    Interrupted { index: usize },
}

impl SequenceOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, SequenceOutcome::Completed | SequenceOutcome::EarlyExit { .. })
    }
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceOutcome::Completed => write!(f, "completed"),
            SequenceOutcome::EarlyExit { after } => write!(f, "success anchor seen after step {}", after + 1),
            SequenceOutcome::Failed { index, label } => write!(f, "failed at step {} ({})", index + 1, label),
            SequenceOutcome::Interrupted { index } => write!(f, "interrupted before step {}", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Done,
    Failed { anchor: Option<AnchorRef>, attempts: u32, reason: Option<String> },
}

impl StepOutcome {
    fn input_failed() -> Self {
        StepOutcome::Failed { anchor: None, attempts: 0, reason: None }
    }
}

/// Send one input, retrying once on a transient failure. `Ok(false)` means
/// both tries failed.
fn input<F>(rig: &mut Rig, what: &str, send: F) -> Result<bool, DeviceError>
where
    F: Fn(&mut dyn Device) -> Result<(), DeviceError>,
{
    for attempt in 1..=2 {
        match send(rig.device.as_mut()) {
            Ok(()) => return Ok(true),
            Err(DeviceError::Io(msg)) => {
                logger::warn_p("engine", &format!("{} failed (try {}): {}", what, attempt, msg));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

pub fn tap(rig: &mut Rig, at: Point) -> Result<bool, DeviceError> {
    input(rig, &format!("tap{}", at), |d| d.tap(at))
}

/// Swipe, then wait out its settle time.
pub fn swipe(rig: &mut Rig, s: &Swipe) -> Result<bool, DeviceError> {
    if !input(rig, "swipe", |d| d.swipe(s.from, s.to, s.duration))? {
        return Ok(false);
    }
    rig.sleep(s.settle);
    Ok(true)
}

fn run_hook(rig: &mut Rig, hook: &Hook) -> Result<bool, DeviceError> {
    match hook {
        Hook::Scroll(s) => swipe(rig, s),
        Hook::Wait(d) => {
            rig.sleep(*d);
            Ok(true)
        }
    }
}

fn run_anchor(rig: &mut Rig, s: &AnchorStep) -> Result<StepOutcome, DeviceError> {
    rig.sleep(s.initial_delay);
    if let Some(h) = &s.before {
        if !run_hook(rig, h)? {
            return Ok(StepOutcome::input_failed());
        }
    }

    let detection = match probe(rig, &s.anchor, s.probe)? {
        ProbeOutcome::Found(d) => d,
        ProbeOutcome::Missed { attempts } => {
            return Ok(StepOutcome::Failed { anchor: Some(s.anchor.clone()), attempts, reason: None });
        }
        ProbeOutcome::Unusable(e) => {
            return Ok(StepOutcome::Failed { anchor: Some(s.anchor.clone()), attempts: 1, reason: Some(e.to_string()) });
        }
    };

    let at = detection.click_point(s.offset, s.force);
    rig.sleep(s.post_detection_delay);

    let (scroll_first, after) = match s.action {
        ClickAction::ScrollThenClick => (s.after.as_ref(), None),
        ClickAction::Click => (None, s.after.as_ref()),
    };
    if let Some(h) = scroll_first {
        if !run_hook(rig, h)? {
            return Ok(StepOutcome::input_failed());
        }
    }
    if !tap(rig, at)? {
        return Ok(StepOutcome::input_failed());
    }
    rig.sleep(s.click_delay);
    if let Some(h) = after {
        if !run_hook(rig, h)? {
            return Ok(StepOutcome::input_failed());
        }
    }
    Ok(StepOutcome::Done)
}

/// Execute one step. Coordinate, scroll and wait steps never look at the
/// screen.
pub fn run_step(rig: &mut Rig, step: &Step) -> Result<StepOutcome, DeviceError> {
    match step {
        Step::AnchorMatch(s) => run_anchor(rig, s),
        Step::Coordinate(s) => {
            if !tap(rig, s.point)? {
                return Ok(StepOutcome::input_failed());
            }
            rig.sleep(s.click_delay);
            Ok(StepOutcome::Done)
        }
        Step::Scroll(s) => Ok(if swipe(rig, &s.swipe)? { StepOutcome::Done } else { StepOutcome::input_failed() }),
        Step::Wait(s) => {
            rig.sleep(s.duration);
            Ok(StepOutcome::Done)
        }
    }
}

/// Run one step and report it, as step `index` of `task`. Returns whether it
/// succeeded.
pub fn run_reported(rig: &mut Rig, task: &str, index: usize, step: &Step) -> Result<bool, DeviceError> {
    let label = step.label().to_string();
    rig.emit(Event::StepStarted { task: task.to_string(), index, label: label.clone() });
    match run_step(rig, step)? {
        StepOutcome::Done => {
            rig.emit(Event::StepSucceeded { task: task.to_string(), index, label });
            Ok(true)
        }
        StepOutcome::Failed { anchor, attempts, reason } => {
            let optional = step.is_optional();
            rig.emit(Event::StepFailed { task: task.to_string(), index, label, anchor, attempts, reason, optional });
            Ok(false)
        }
    }
}

pub fn run_sequence(rig: &mut Rig, seq: &Sequence) -> Result<SequenceOutcome, DeviceError> {
    run_sequence_with(rig, seq, |_, _| Ok(false))
}

/// Run `seq`, asking `interrupt` at every step boundary (before each step
/// and after the last) whether to stop.
pub fn run_sequence_with<G>(rig: &mut Rig, seq: &Sequence, interrupt: G) -> Result<SequenceOutcome, DeviceError>
where
    G: FnMut(&mut Rig, usize) -> Result<bool, DeviceError>,
{
    rig.emit(Event::TaskStarted { task: seq.task.clone(), steps: seq.steps.len() });
    let outcome = run_steps(rig, seq, interrupt)?;
    rig.emit(Event::SequenceFinished { task: seq.task.clone(), outcome: outcome.clone() });
    Ok(outcome)
}

fn run_steps<G>(rig: &mut Rig, seq: &Sequence, mut interrupt: G) -> Result<SequenceOutcome, DeviceError>
where
    G: FnMut(&mut Rig, usize) -> Result<bool, DeviceError>,
{
    for (index, step) in seq.steps.iter().enumerate() {
        if index > 0 {
            let settle = if seq.steps[index - 1].uses_active_wait() {
                rig.timing.active_settle
            } else {
                rig.timing.step_settle
            };
            rig.sleep(settle);
        }
        if interrupt(rig, index)? {
            return Ok(SequenceOutcome::Interrupted { index });
        }

        if !run_reported(rig, &seq.task, index, step)? {
            if step.is_optional() {
                continue;
            }
            return Ok(SequenceOutcome::Failed { index, label: step.label().to_string() });
        }

        if let Some(success) = &seq.success {
            match probe(rig, &success.anchor, success.probe)? {
                ProbeOutcome::Found(_) => return Ok(SequenceOutcome::EarlyExit { after: index }),
                ProbeOutcome::Missed { .. } => {}
                ProbeOutcome::Unusable(e) => {
                    logger::warn_p("engine", &format!("{}: success anchor unusable: {}", seq.task, e));
                }
            }
        }
    }
    if interrupt(rig, seq.steps.len())? {
        return Ok(SequenceOutcome::Interrupted { index: seq.steps.len() });
    }
    Ok(SequenceOutcome::Completed)
}
