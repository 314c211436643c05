//! Fixtures shared by the end-to-end scenarios.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use marcher_core::catalog::{parse_rally, Calibration, Catalog, RallyPlan, ScrollCalibration};
use marcher_core::observer::{Event, Fanout, Observer};
use marcher_core::settings::IdleTask;
use marcher_core::step::{parse_sequence, Sequence};
use marcher_core::testing::Harness;
use marcher_core::types::AnchorRef;

pub const RALLY_TASK: &str = "entrar_rallys";
pub const TRIGGER: &str = "novo_rally.png";

/// Rally plan with every pause at zero so virtual time only moves when a
/// probe or the scheduler asks it to.
pub const RALLY_JSON: &str = r#"{
    "open_list": [
        { "type": "template", "name": "alliance", "template_file": "01_alianca.png", "click_delay": 0 },
        { "type": "template", "name": "battle", "template_file": "02_batalha.png", "click_delay": 0 }
    ],
    "slot": { "type": "template", "template_file": "03_fila.png", "max_attempts": 2, "attempt_delay": 0.5 },
    "join": { "type": "template", "template_file": "04_juntar.png", "click_delay": 0 },
    "deploy": { "type": "template", "template_file": "05_tropas.png", "click_delay": 0 },
    "march": { "type": "template", "template_file": "06_marchar.png", "click_delay": 0 },
    "layout": { "scroll_settle": 0, "tap_settle": 0 }
}"#;

pub const CHEST_JSON: &str = r#"[
    { "type": "template", "name": "chest", "template_file": "bau.png", "click_delay": 0 },
    { "type": "template", "name": "collect", "template_file": "coletar.png", "max_attempts": 3, "click_delay": 0 },
    { "type": "template", "name": "close", "template_file": "fechar.png", "click_delay": 0 }
]"#;

pub const RALLY_CONTROLS: [&str; 6] =
    ["01_alianca.png", "02_batalha.png", "03_fila.png", "04_juntar.png", "05_tropas.png", "06_marchar.png"];

pub fn calibration_for(slot: u32) -> ScrollCalibration {
    ScrollCalibration {
        scroll_count: slot - 3,
        row_height: 230,
        scroll_duration: Duration::from_millis(1000),
        start_y: 800,
        center_x: 1200,
    }
}

pub fn rally_plan() -> RallyPlan {
    let mut plan = parse_rally(RALLY_TASK, Path::new("rally.json"), RALLY_JSON).unwrap();
    plan.calibration = Calibration::new((4..=9).map(|slot| (slot, calibration_for(slot))));
    plan
}

pub fn chest_sequence() -> Sequence {
    parse_sequence("pegar_bau", Path::new("sequence.json"), CHEST_JSON).unwrap()
}

pub fn catalog() -> Catalog {
    Catalog::from_parts("tasks", vec![chest_sequence()], rally_plan())
}

pub fn rotation() -> Vec<IdleTask> {
    vec![IdleTask { task: "pegar_bau".into(), repeat: 1 }]
}

pub fn trigger() -> AnchorRef {
    AnchorRef::new("_global", TRIGGER)
}

/// Harness with zero timing and every rally control on screen.
pub fn hunting_harness() -> Harness {
    let h = Harness::instant();
    for file in RALLY_CONTROLS {
        h.matcher.present(file);
    }
    h
}

/// Raises the stop flag once `passes` passes have finished.
pub struct StopAfterPasses {
    passes: u64,
    stop: Arc<AtomicBool>,
}

impl StopAfterPasses {
    pub fn new(passes: u64, stop: Arc<AtomicBool>) -> Self {
        Self { passes, stop }
    }
}

impl Observer for StopAfterPasses {
    fn on_event(&mut self, event: &Event) {
        if let Event::PassFinished { pass, .. } = event {
            if *pass >= self.passes {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Keep recording events and also stop after `passes` passes.
pub fn stop_after(h: &mut Harness, passes: u64) -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    h.rig.observer = Box::new(Fanout(vec![
        Box::new(h.observer.clone()),
        Box::new(StopAfterPasses::new(passes, Arc::clone(&stop))),
    ]));
    stop
}

/// The task tree shipped with the repository.
pub fn shipped_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}
