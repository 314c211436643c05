//! The queue-slot state machine: one pass over the rally list.
//!
//! Per slot: NAVIGATE (unless already on the list) -> SCROLL (slots past the
//! always-visible ones) -> DETECT -> JOIN -> DEPLOY -> MARCH.

use std::time::Duration;

use crate::catalog::RallyPlan;
use crate::error::DeviceError;
use crate::interpreter::{run_reported, run_sequence, swipe, tap};
use crate::logger;
use crate::observer::Event;
use crate::probe::{probe, ProbeOutcome};
use crate::rig::Rig;
use crate::scheduler::RunContext;
use crate::step::Step;
use crate::types::SlotOutcome;

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub outcomes: Vec<(u32, SlotOutcome)>,
    pub marched: u32,
    /// Slot 1 of the first pass found nothing: there is no rally to join.
    pub queue_empty: bool,
    /// The list could not be opened.
    pub aborted: bool,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn slots_visited(&self) -> u32 {
        self.outcomes.len() as u32
    }
}

/// The join, deploy and march controls as runnable steps.
struct Controls {
    join: Step,
    deploy: Step,
    march: Step,
}

impl Controls {
    fn new(plan: &RallyPlan) -> Self {
        Self {
            join: Step::AnchorMatch(plan.join.clone()),
            deploy: Step::AnchorMatch(plan.deploy.clone()),
            march: Step::AnchorMatch(plan.march.clone()),
        }
    }
}

fn back(rig: &mut Rig, times: u32) -> Result<(), DeviceError> {
    match rig.device.press_back(times, rig.clock.as_ref(), rig.timing.back_pause) {
        Err(DeviceError::Io(msg)) => {
            logger::warn_p("slots", &format!("back x{} failed: {}", times, msg));
            Ok(())
        }
        other => other,
    }
}

/// SCROLL, DETECT, JOIN, DEPLOY and MARCH for one slot, assuming the list
/// is on screen.
pub fn process_slot(rig: &mut Rig, plan: &RallyPlan, slot: u32) -> Result<SlotOutcome, DeviceError> {
    process_with(rig, plan, &Controls::new(plan), slot)
}

fn process_with(rig: &mut Rig, plan: &RallyPlan, controls: &Controls, slot: u32) -> Result<SlotOutcome, DeviceError> {
    let layout = &plan.layout;
    if layout.needs_scroll(slot) {
        let Some(cal) = plan.calibration.entry(slot) else {
            logger::error_p("slots", &format!("slot {}: no scroll calibration", slot));
            return Ok(SlotOutcome::Error);
        };
        let drag = cal.swipe(layout.scroll_settle);
        for _ in 0..cal.scroll_count {
            if !swipe(rig, &drag)? {
                return Ok(SlotOutcome::Error);
            }
        }
    }

    let detection = match probe(rig, &plan.slot.anchor, plan.slot.probe)? {
        ProbeOutcome::Found(d) => d,
        ProbeOutcome::Missed { .. } => return Ok(SlotOutcome::Refresh),
        ProbeOutcome::Unusable(e) => {
            logger::error_p("slots", &format!("slot {}: {}", slot, e));
            return Ok(SlotOutcome::Error);
        }
    };
    let at = detection.click_point(layout.tap_offset(slot), None);
    rig.sleep(plan.slot.post_detection_delay);
    if !tap(rig, at)? {
        return Ok(SlotOutcome::Error);
    }
    rig.sleep(layout.tap_settle);

    if !run_reported(rig, &plan.task, 0, &controls.join)? {
        return Ok(SlotOutcome::NoRally);
    }
    if !run_reported(rig, &plan.task, 1, &controls.deploy)? {
        return Ok(SlotOutcome::Next);
    }
    if !run_reported(rig, &plan.task, 2, &controls.march)? {
        return Ok(SlotOutcome::Error);
    }
    Ok(SlotOutcome::Marched)
}

/// Walk slots `1..=slot_count` once, in order.
pub fn run_pass(rig: &mut Rig, plan: &RallyPlan, ctx: &mut RunContext) -> Result<PassReport, DeviceError> {
    let started = rig.clock.now();
    let controls = Controls::new(plan);
    let back_out = plan.layout.back_out_presses;
    let mut report = PassReport::default();

    for slot in 1..=plan.layout.slot_count {
        if ctx.on_list {
            ctx.on_list = false;
        } else if !run_sequence(rig, &plan.open_list)?.succeeded() {
            back(rig, back_out)?;
            report.aborted = true;
            break;
        }

        let outcome = process_with(rig, plan, &controls, slot)?;
        rig.emit(Event::SlotProcessed { slot, outcome });
        report.outcomes.push((slot, outcome));

        match outcome {
            SlotOutcome::Marched => {
                report.marched += 1;
                ctx.marched_total += 1;
            }
            SlotOutcome::Next => {
                back(rig, 1)?;
                ctx.on_list = true;
            }
            SlotOutcome::NoRally | SlotOutcome::Error => back(rig, back_out)?,
            SlotOutcome::Refresh => {
                back(rig, back_out)?;
                report.queue_empty = slot == 1 && ctx.first_pass;
                break;
            }
        }
    }

    if ctx.on_list {
        back(rig, back_out)?;
        ctx.on_list = false;
    }
    ctx.first_pass = false;
    ctx.passes += 1;
    report.elapsed = rig.clock.now() - started;
    rig.emit(Event::PassFinished {
        pass: ctx.passes,
        marched: report.marched,
        slots_visited: report.slots_visited(),
        elapsed: report.elapsed,
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_rally, Calibration, ScrollCalibration};
    use crate::testing::{Action, Harness};
    use crate::types::Point;
    use std::path::Path;

    const RALLY: &str = r#"{
        "open_list": [
            { "type": "template", "name": "alliance", "template_file": "01_alianca.png", "click_delay": 0 },
            { "type": "template", "name": "battle", "template_file": "02_batalha.png", "click_delay": 0 }
        ],
        "slot": { "type": "template", "template_file": "03_fila.png" },
        "join": { "type": "template", "template_file": "04_juntar.png", "click_delay": 0 },
        "deploy": { "type": "template", "template_file": "05_tropas.png", "click_delay": 0 },
        "march": { "type": "template", "template_file": "06_marchar.png", "click_delay": 0 },
        "layout": { "scroll_settle": 0, "tap_settle": 0 }
    }"#;

    fn plan() -> RallyPlan {
        let mut plan = parse_rally("entrar_rallys", Path::new("rally.json"), RALLY).unwrap();
        plan.calibration = Calibration::new((4..=9).map(|slot| {
            let cal = ScrollCalibration {
                scroll_count: slot - 3,
                row_height: 230,
                scroll_duration: Duration::from_millis(1000),
                start_y: 800,
                center_x: 1200,
            };
            (slot, cal)
        }));
        plan
    }

    fn harness() -> Harness {
        let h = Harness::instant();
        h.matcher.present("01_alianca.png");
        h.matcher.present("02_batalha.png");
        h
    }

    #[test]
    fn fixed_slots_never_scroll() {
        let mut h = harness();
        h.matcher.present("03_fila.png");
        let plan = plan();
        for slot in 1..=3 {
            process_slot(&mut h.rig, &plan, slot).unwrap();
        }
        assert!(h.device.swipes().is_empty());
    }

    #[test]
    fn scrolled_slot_swipes_calibrated_count_before_detecting() {
        let mut h = harness();
        h.matcher.present("03_fila.png");
        process_slot(&mut h.rig, &plan(), 5).unwrap();

        let actions = h.device.actions();
        let drag = Action::Swipe(Point::new(1200, 800), Point::new(1200, 570), Duration::from_millis(1000));
        assert_eq!(&actions[..3], &[drag.clone(), drag, Action::Capture]);
        assert_eq!(h.device.swipes().len(), 2);
    }

    #[test]
    fn slot_tap_uses_layout_offset() {
        let mut h = harness();
        h.matcher.present("03_fila.png");
        let plan = plan();
        process_slot(&mut h.rig, &plan, 2).unwrap();
        process_slot(&mut h.rig, &plan, 6).unwrap();
        // default box center is (120, 110)
        assert_eq!(h.device.taps(), vec![Point::new(120, 470), Point::new(120, 760)]);
    }

    #[test]
    fn outcomes_follow_first_missing_control() {
        let plan = plan();
        let cases = [
            (&[][..], SlotOutcome::Refresh),
            (&["03_fila.png"][..], SlotOutcome::NoRally),
            (&["03_fila.png", "04_juntar.png"][..], SlotOutcome::Next),
            (&["03_fila.png", "04_juntar.png", "05_tropas.png"][..], SlotOutcome::Error),
            (&["03_fila.png", "04_juntar.png", "05_tropas.png", "06_marchar.png"][..], SlotOutcome::Marched),
        ];
        for (present, expected) in cases {
            let mut h = harness();
            for f in present {
                h.matcher.present(f);
            }
            assert_eq!(process_slot(&mut h.rig, &plan, 1).unwrap(), expected, "{present:?}");
        }
    }

    #[test]
    fn refresh_on_first_slot_of_first_pass_means_empty_queue() {
        let mut h = harness();
        let mut ctx = RunContext::fresh();
        let report = run_pass(&mut h.rig, &plan(), &mut ctx).unwrap();
        assert!(report.queue_empty);
        assert_eq!(report.outcomes, vec![(1, SlotOutcome::Refresh)]);
        assert!(!ctx.first_pass);

        let report = run_pass(&mut h.rig, &plan(), &mut ctx).unwrap();
        assert!(!report.queue_empty);
    }

    #[test]
    fn refresh_later_in_pass_ends_it_without_empty_queue() {
        let mut h = harness();
        h.matcher.script("03_fila.png", &[true, true]);
        h.matcher.present("04_juntar.png");
        h.matcher.present("05_tropas.png");
        h.matcher.present("06_marchar.png");
        let mut ctx = RunContext::fresh();
        let report = run_pass(&mut h.rig, &plan(), &mut ctx).unwrap();
        assert_eq!(
            report.outcomes,
            vec![(1, SlotOutcome::Marched), (2, SlotOutcome::Marched), (3, SlotOutcome::Refresh)]
        );
        assert_eq!(report.marched, 2);
        assert_eq!(ctx.marched_total, 2);
        assert!(!report.queue_empty);
        assert_eq!(ctx.passes, 1);
    }

    #[test]
    fn next_skips_navigation_for_following_slot() {
        let mut h = harness();
        h.matcher.script("03_fila.png", &[true, true]);
        h.matcher.present("04_juntar.png");
        // slot 1 NEXT, slot 2 MARCHED without reopening the list, slot 3 REFRESH
        h.matcher.script_then("05_tropas.png", &[false], true);
        h.matcher.present("06_marchar.png");
        let mut ctx = RunContext::fresh();
        run_pass(&mut h.rig, &plan(), &mut ctx).unwrap();

        assert_eq!(h.matcher.calls("01_alianca.png"), 2);
        assert_eq!(h.device.backs(), vec![1, 5]);
        assert!(!ctx.on_list);
    }

    #[test]
    fn failed_navigation_aborts_pass_and_backs_out() {
        let mut h = Harness::instant();
        h.matcher.present("01_alianca.png");
        let mut ctx = RunContext::fresh();
        let report = run_pass(&mut h.rig, &plan(), &mut ctx).unwrap();
        assert!(report.aborted);
        assert!(report.outcomes.is_empty());
        assert_eq!(h.device.backs(), vec![5]);
        assert_eq!(h.matcher.calls("03_fila.png"), 0);
    }

    #[test]
    fn missing_calibration_is_an_error_outcome() {
        let mut h = harness();
        h.matcher.present("03_fila.png");
        let mut plan = plan();
        plan.calibration = Calibration::default();
        assert_eq!(process_slot(&mut h.rig, &plan, 4).unwrap(), SlotOutcome::Error);
        assert_eq!(h.device.captures(), 0);
    }

    #[test]
    fn back_out_pauses_on_the_engine_clock() {
        let mut h = Harness::new();
        back(&mut h.rig, 5).unwrap();
        assert_eq!(h.device.backs(), vec![5]);
        assert_eq!(h.clock.sleeps(), vec![h.rig.timing.back_pause; 4]);
    }
}
