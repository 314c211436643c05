use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::AnchorRef;

/// One background task in the idle rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleTask {
    pub task: String,
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `adb -s` serial; `None` uses the only attached device.
    pub device_serial: Option<String>,
    pub adb_path: String,
    pub tasks_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub rally_task: String,
    pub idle_rotation: Vec<IdleTask>,
    /// Anchor whose appearance pre-empts idle work.
    pub trigger_anchor: AnchorRef,
    pub match_threshold: f32,
    pub pass_cooldown_ms: u64,
    pub idle_cooldown_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Pause between steps.
    pub step_settle_ms: u64,
    /// Pause between steps when the step used active-wait polling.
    pub active_settle_ms: u64,
    pub back_pause_ms: u64,
    /// Random +/- fraction applied to every sleep.
    pub jitter: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_serial: None,
            adb_path: "adb".into(),
            tasks_dir: PathBuf::from("tasks"),
            logs_dir: PathBuf::from("logs"),
            rally_task: "entrar_rallys".into(),
            idle_rotation: vec![
                IdleTask { task: "pegar_bau".into(), repeat: 1 },
                IdleTask { task: "pegar_recursos".into(), repeat: 1 },
                IdleTask { task: "atacar_alvos".into(), repeat: 3 },
            ],
            trigger_anchor: AnchorRef::new("_global", "novo_rally.png"),
            match_threshold: 0.8,
            pass_cooldown_ms: 2000,
            idle_cooldown_ms: 5000,
            reconnect_interval_ms: 5000,
            step_settle_ms: 500,
            active_settle_ms: 150,
            back_pause_ms: 300,
            jitter: 0.0,
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults for a missing or unreadable file.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }

    pub fn pass_cooldown(&self) -> Duration {
        Duration::from_millis(self.pass_cooldown_ms)
    }

    pub fn idle_cooldown(&self) -> Duration {
        Duration::from_millis(self.idle_cooldown_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn step_settle(&self) -> Duration {
        Duration::from_millis(self.step_settle_ms)
    }

    pub fn active_settle(&self) -> Duration {
        Duration::from_millis(self.active_settle_ms)
    }

    pub fn back_pause(&self) -> Duration {
        Duration::from_millis(self.back_pause_ms)
    }
}
