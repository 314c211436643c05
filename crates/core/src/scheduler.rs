//! Mode scheduler: hunt for rallies, or run idle tasks until one appears.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::Catalog;
use crate::error::DeviceError;
use crate::interpreter::{run_sequence_with, SequenceOutcome};
use crate::logger;
use crate::observer::Event;
use crate::probe::{probe, ProbeOutcome};
use crate::rig::Rig;
use crate::settings::IdleTask;
use crate::slots::{self, PassReport};
use crate::step::ProbeMode;
use crate::types::{AnchorRef, Mode};

/// Mutable state of one run. Only the scheduler and the slot machine write
/// it; the supervisor replaces it wholesale on restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub mode: Mode,
    /// No pass has completed since the run (re)started or since leaving IDLE.
    pub first_pass: bool,
    /// The rally list is already on screen; skip NAVIGATE once.
    pub on_list: bool,
    pub passes: u64,
    pub marched_total: u64,
}

impl RunContext {
    pub fn fresh() -> Self {
        Self { mode: Mode::Hunting, first_pass: true, on_list: false, passes: 0, marched_total: 0 }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::fresh()
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Pass(PassReport),
    /// Idle rotation ran to the end without a trigger.
    Rotation,
    /// The trigger appeared and idle work was dropped.
    Preempted,
}

pub struct Scheduler<'a> {
    catalog: &'a Catalog,
    rotation: Vec<IdleTask>,
    trigger: AnchorRef,
}

fn switch(rig: &mut Rig, ctx: &mut RunContext, to: Mode) {
    if ctx.mode != to {
        rig.emit(Event::ModeChanged { from: ctx.mode, to });
        ctx.mode = to;
    }
    if to == Mode::Hunting {
        ctx.first_pass = true;
        ctx.on_list = false;
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(catalog: &'a Catalog, rotation: Vec<IdleTask>, trigger: AnchorRef) -> Self {
        Self { catalog, rotation, trigger }
    }

    fn trigger_visible(&self, rig: &mut Rig) -> Result<bool, DeviceError> {
        Ok(match probe(rig, &self.trigger, ProbeMode::single())? {
            ProbeOutcome::Found(_) => true,
            ProbeOutcome::Missed { .. } => false,
            ProbeOutcome::Unusable(e) => {
                logger::warn_p("idle", &format!("trigger anchor unusable: {}", e));
                false
            }
        })
    }

    /// One full hunting pass, or one idle rotation.
    pub fn tick(&self, rig: &mut Rig, ctx: &mut RunContext) -> Result<Tick, DeviceError> {
        match ctx.mode {
            Mode::Hunting => {
                let report = slots::run_pass(rig, self.catalog.rally(), ctx)?;
                if report.queue_empty {
                    switch(rig, ctx, Mode::Idle);
                } else {
                    rig.sleep(rig.timing.pass_cooldown);
                }
                Ok(Tick::Pass(report))
            }
            Mode::Idle => self.rotate(rig, ctx),
        }
    }

    fn rotate(&self, rig: &mut Rig, ctx: &mut RunContext) -> Result<Tick, DeviceError> {
        for entry in &self.rotation {
            let seq = match self.catalog.sequence(&entry.task) {
                Ok(seq) => seq,
                Err(e) => {
                    logger::error_p("idle", &e.to_string());
                    continue;
                }
            };
            for _ in 0..entry.repeat {
                let outcome = run_sequence_with(rig, seq, |rig, _| self.trigger_visible(rig))?;
                if let SequenceOutcome::Interrupted { index } = outcome {
                    rig.emit(Event::TriggerSeen { task: seq.task.clone(), index });
                    switch(rig, ctx, Mode::Hunting);
                    return Ok(Tick::Preempted);
                }
            }
        }
        rig.sleep(rig.timing.idle_cooldown);
        if self.trigger_visible(rig)? {
            rig.emit(Event::TriggerSeen { task: String::new(), index: 0 });
            switch(rig, ctx, Mode::Hunting);
            return Ok(Tick::Preempted);
        }
        Ok(Tick::Rotation)
    }

    /// Tick until `stop` is set. The flag is only looked at between ticks.
    pub fn run(&self, rig: &mut Rig, ctx: &mut RunContext, stop: &AtomicBool) -> Result<(), DeviceError> {
        while !stop.load(Ordering::SeqCst) {
            self.tick(rig, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_rally;
    use crate::step::parse_sequence;
    use crate::testing::Harness;
    use crate::types::Point;
    use std::path::Path;

    const RALLY: &str = r#"{
        "open_list": [{ "type": "template", "template_file": "01_alianca.png", "click_delay": 0 }],
        "slot": { "type": "template", "template_file": "03_fila.png" },
        "join": { "type": "template", "template_file": "04_juntar.png", "click_delay": 0 },
        "deploy": { "type": "template", "template_file": "05_tropas.png", "click_delay": 0 },
        "march": { "type": "template", "template_file": "06_marchar.png", "click_delay": 0 },
        "layout": { "slot_count": 3, "scroll_settle": 0, "tap_settle": 0 }
    }"#;

    fn catalog() -> Catalog {
        let rally = parse_rally("entrar_rallys", Path::new("rally.json"), RALLY).unwrap();
        let chest = parse_sequence(
            "pegar_bau",
            Path::new("pegar_bau/sequence.json"),
            r#"[
                { "type": "coords", "name": "open", "coordinates": [10, 10], "click_delay": 0 },
                { "type": "coords", "name": "collect", "coordinates": [20, 20], "click_delay": 0 },
                { "type": "coords", "name": "close", "coordinates": [30, 30], "click_delay": 0 }
            ]"#,
        )
        .unwrap();
        Catalog::from_parts("tasks", vec![chest], rally)
    }

    fn trigger() -> AnchorRef {
        AnchorRef::new("_global", "novo_rally.png")
    }

    fn rotation(repeat: u32) -> Vec<IdleTask> {
        vec![IdleTask { task: "pegar_bau".into(), repeat }]
    }

    fn idle_ctx() -> RunContext {
        RunContext { mode: Mode::Idle, first_pass: false, ..RunContext::fresh() }
    }

    #[test]
    fn empty_queue_on_first_pass_goes_idle() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(1), trigger());
        let mut h = Harness::instant();
        h.matcher.present("01_alianca.png");
        let mut ctx = RunContext::fresh();

        let tick = sched.tick(&mut h.rig, &mut ctx).unwrap();
        assert!(matches!(tick, Tick::Pass(ref r) if r.queue_empty));
        assert_eq!(ctx.mode, Mode::Idle);
        assert!(h.events().contains(&Event::ModeChanged { from: Mode::Hunting, to: Mode::Idle }));
    }

    #[test]
    fn refresh_after_first_pass_keeps_hunting() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(1), trigger());
        let mut h = Harness::instant();
        h.matcher.present("01_alianca.png");
        let mut ctx = RunContext { first_pass: false, ..RunContext::fresh() };

        sched.tick(&mut h.rig, &mut ctx).unwrap();
        assert_eq!(ctx.mode, Mode::Hunting);

        // REFRESH on slot 2 of a first pass does not go idle either
        h.matcher.script("03_fila.png", &[true]);
        let mut ctx = RunContext::fresh();
        sched.tick(&mut h.rig, &mut ctx).unwrap();
        assert_eq!(ctx.mode, Mode::Hunting);
    }

    #[test]
    fn trigger_mid_sequence_abandons_remaining_steps() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(3), trigger());
        let mut h = Harness::instant();
        // boundary checks: before "open", before "collect"
        h.matcher.script("novo_rally.png", &[false, true]);
        let mut ctx = idle_ctx();

        let tick = sched.tick(&mut h.rig, &mut ctx).unwrap();
        assert_eq!(tick, Tick::Preempted);
        assert_eq!(h.device.taps(), vec![Point::new(10, 10)]);
        assert_eq!(ctx.mode, Mode::Hunting);
        assert!(ctx.first_pass);
        assert!(h.events().contains(&Event::TriggerSeen { task: "pegar_bau".into(), index: 1 }));
    }

    #[test]
    fn rotation_repeats_tasks_then_stays_idle() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(2), trigger());
        let mut h = Harness::instant();
        let mut ctx = idle_ctx();

        assert_eq!(sched.tick(&mut h.rig, &mut ctx).unwrap(), Tick::Rotation);
        assert_eq!(h.device.taps().len(), 6);
        assert_eq!(ctx.mode, Mode::Idle);
        // 4 boundaries per run, twice, plus the check after the cooldown
        assert_eq!(h.matcher.calls("novo_rally.png"), 9);
    }

    #[test]
    fn trigger_after_cooldown_resumes_hunting() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(1), trigger());
        let mut h = Harness::instant();
        h.matcher.script("novo_rally.png", &[false, false, false, false, true]);
        let mut ctx = idle_ctx();

        assert_eq!(sched.tick(&mut h.rig, &mut ctx).unwrap(), Tick::Preempted);
        assert_eq!(h.device.taps().len(), 3);
        assert_eq!(ctx.mode, Mode::Hunting);
    }

    #[test]
    fn unknown_idle_task_is_skipped() {
        let catalog = catalog();
        let rotation = vec![IdleTask { task: "atacar_alvos".into(), repeat: 3 }, IdleTask { task: "pegar_bau".into(), repeat: 1 }];
        let sched = Scheduler::new(&catalog, rotation, trigger());
        let mut h = Harness::instant();
        let mut ctx = idle_ctx();
        assert_eq!(sched.tick(&mut h.rig, &mut ctx).unwrap(), Tick::Rotation);
        assert_eq!(h.device.taps().len(), 3);
    }

    #[test]
    fn run_returns_when_stopped() {
        let catalog = catalog();
        let sched = Scheduler::new(&catalog, rotation(1), trigger());
        let mut h = Harness::instant();
        let stop = AtomicBool::new(true);
        let mut ctx = RunContext::fresh();
        sched.run(&mut h.rig, &mut ctx, &stop).unwrap();
        assert_eq!(ctx.passes, 0);
        assert!(h.device.actions().is_empty());
    }
}
