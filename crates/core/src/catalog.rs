//! Task catalog: every `tasks/<task>/sequence.json`, plus the rally plan and
//! its scroll calibration. Loaded and validated once at startup.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::settings::IdleTask;
use crate::step::{self, AnchorStep, RawStep, Sequence, Swipe};
use crate::types::Point;

pub const SEQUENCE_FILE: &str = "sequence.json";
pub const RALLY_FILE: &str = "rally.json";
pub const CALIBRATION_FILE: &str = "scroll_config.json";

/// How many times and how far to scroll before a slot becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollCalibration {
    pub scroll_count: u32,
    pub row_height: i32,
    pub scroll_duration: Duration,
    pub start_y: i32,
    pub center_x: i32,
}

impl ScrollCalibration {
    /// One row's worth of upward drag.
    pub fn swipe(&self, settle: Duration) -> Swipe {
        Swipe {
            from: Point::new(self.center_x, self.start_y),
            to: Point::new(self.center_x, self.start_y - self.row_height),
            duration: self.scroll_duration,
            settle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    slots: BTreeMap<u32, ScrollCalibration>,
}

impl Calibration {
    pub fn new(slots: impl IntoIterator<Item = (u32, ScrollCalibration)>) -> Self {
        Self { slots: slots.into_iter().collect() }
    }

    pub fn entry(&self, slot: u32) -> Option<&ScrollCalibration> {
        self.slots.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Deserialize)]
struct RawCalibration {
    #[serde(alias = "filas")]
    slots: BTreeMap<String, RawCalibrationEntry>,
}

#[derive(Deserialize)]
struct RawCalibrationEntry {
    #[serde(default, alias = "num_scrolls")]
    scroll_count: Option<u32>,
    #[serde(default = "default_row_height")]
    row_height: i32,
    #[serde(default = "default_scroll_duration")]
    scroll_duration: u64,
    #[serde(default = "default_start_y")]
    start_y: i32,
    #[serde(default = "default_center_x")]
    center_x: i32,
}

fn default_row_height() -> i32 {
    230
}
fn default_scroll_duration() -> u64 {
    1000
}
fn default_start_y() -> i32 {
    800
}
fn default_center_x() -> i32 {
    1200
}

/// Screen geometry of the rally list.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotLayout {
    pub slot_count: u32,
    /// Tap offset below the slot anchor for each always-visible slot.
    pub fixed_offsets: Vec<i32>,
    /// Tap offset for every slot reached by scrolling.
    pub scrolled_offset: i32,
    pub back_out_presses: u32,
    pub scroll_settle: Duration,
    pub tap_settle: Duration,
}

impl SlotLayout {
    pub fn fixed_slots(&self) -> u32 {
        self.fixed_offsets.len() as u32
    }

    pub fn needs_scroll(&self, slot: u32) -> bool {
        slot > self.fixed_slots()
    }

    pub fn tap_offset(&self, slot: u32) -> Point {
        let dy = slot
            .checked_sub(1)
            .and_then(|i| self.fixed_offsets.get(i as usize))
            .copied()
            .unwrap_or(self.scrolled_offset);
        Point::new(0, dy)
    }
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self {
            slot_count: 9,
            fixed_offsets: vec![140, 360, 590],
            scrolled_offset: 650,
            back_out_presses: 5,
            scroll_settle: Duration::from_millis(800),
            tap_settle: Duration::from_millis(1500),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawLayout {
    slot_count: u32,
    fixed_offsets: Vec<i32>,
    scrolled_offset: i32,
    back_out_presses: u32,
    scroll_settle: f64,
    tap_settle: f64,
}

impl Default for RawLayout {
    fn default() -> Self {
        let d = SlotLayout::default();
        Self {
            slot_count: d.slot_count,
            fixed_offsets: d.fixed_offsets,
            scrolled_offset: d.scrolled_offset,
            back_out_presses: d.back_out_presses,
            scroll_settle: d.scroll_settle.as_secs_f64(),
            tap_settle: d.tap_settle.as_secs_f64(),
        }
    }
}

/// Everything the slot machine needs: how to reach the list, the controls
/// inside a rally, and the list geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RallyPlan {
    pub task: String,
    pub open_list: Sequence,
    pub slot: AnchorStep,
    pub join: AnchorStep,
    pub deploy: AnchorStep,
    pub march: AnchorStep,
    pub layout: SlotLayout,
    pub calibration: Calibration,
}

#[derive(Deserialize)]
struct RawRally {
    open_list: Value,
    slot: Value,
    join: Value,
    deploy: Value,
    march: Value,
    #[serde(default)]
    layout: RawLayout,
}

#[derive(Debug)]
pub struct Catalog {
    root: PathBuf,
    sequences: HashMap<String, Sequence>,
    /// Task directories whose sequence failed to load, with the reason.
    skipped: Vec<(String, ConfigError)>,
    rally: RallyPlan,
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

fn parse_text(path: &Path, text: &str) -> Result<Value, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

fn anchor_step(task: &str, path: &Path, what: &str, value: Value) -> Result<AnchorStep, ConfigError> {
    step::check_kinds(task, &Value::Array(vec![value.clone()]))
        .map_err(|_| ConfigError::invalid(task, format!("{}: expected a template step", what)))?;
    let raw: RawStep = parse(path, value)?;
    step::resolve_anchor(task, what, raw)
}

/// Parse a `rally.json` body. Calibration is attached separately.
pub fn parse_rally(task: &str, path: &Path, text: &str) -> Result<RallyPlan, ConfigError> {
    let raw: RawRally = parse(path, parse_text(path, text)?)?;

    step::check_kinds(task, &raw.open_list)?;
    let open: Vec<RawStep> = parse(path, raw.open_list)?;
    let open_list = Sequence::new(task, step::resolve_steps(task, open)?);
    if open_list.steps.is_empty() {
        return Err(ConfigError::invalid(task, "open_list must not be empty"));
    }

    let l = raw.layout;
    if l.slot_count == 0 {
        return Err(ConfigError::invalid(task, "layout.slot_count must be >= 1"));
    }
    let layout = SlotLayout {
        slot_count: l.slot_count,
        fixed_offsets: l.fixed_offsets,
        scrolled_offset: l.scrolled_offset,
        back_out_presses: l.back_out_presses,
        scroll_settle: step::seconds(task, "layout", "scroll_settle", l.scroll_settle)?,
        tap_settle: step::seconds(task, "layout", "tap_settle", l.tap_settle)?,
    };

    Ok(RallyPlan {
        task: task.to_string(),
        open_list,
        slot: anchor_step(task, path, "slot", raw.slot)?,
        join: anchor_step(task, path, "join", raw.join)?,
        deploy: anchor_step(task, path, "deploy", raw.deploy)?,
        march: anchor_step(task, path, "march", raw.march)?,
        layout,
        calibration: Calibration::default(),
    })
}

/// Parse a `scroll_config.json` body and check it covers every scrolled slot.
pub fn parse_calibration(task: &str, path: &Path, text: &str, layout: &SlotLayout) -> Result<Calibration, ConfigError> {
    let raw: RawCalibration = parse(path, parse_text(path, text)?)?;
    let mut slots = BTreeMap::new();
    for (key, e) in raw.slots {
        let slot: u32 = key
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(task, format!("calibration key {:?} is not a slot number", key)))?;
        if e.row_height <= 0 {
            return Err(ConfigError::invalid(task, format!("slot {}: row_height must be > 0", slot)));
        }
        let fallback = slot.saturating_sub(layout.fixed_slots());
        slots.insert(
            slot,
            ScrollCalibration {
                scroll_count: e.scroll_count.unwrap_or(fallback),
                row_height: e.row_height,
                scroll_duration: Duration::from_millis(e.scroll_duration),
                start_y: e.start_y,
                center_x: e.center_x,
            },
        );
    }
    for slot in layout.fixed_slots() + 1..=layout.slot_count {
        if !slots.contains_key(&slot) {
            return Err(ConfigError::invalid(task, format!("no scroll calibration for slot {}", slot)));
        }
    }
    Ok(Calibration { slots })
}

impl Catalog {
    /// Load every task directory under `root`. `rally_task` must hold a
    /// rally plan and its calibration; a defect there fails the load. A bad
    /// `sequence.json` only takes its own task out of the catalog.
    pub fn load(root: &Path, rally_task: &str) -> Result<Catalog, ConfigError> {
        let entries = fs::read_dir(root).map_err(|source| ConfigError::Read { path: root.to_path_buf(), source })?;
        let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
        dirs.sort();

        let mut sequences = HashMap::new();
        let mut skipped = Vec::new();
        for dir in dirs {
            let file = dir.join(SEQUENCE_FILE);
            if !file.is_file() {
                continue;
            }
            let task = dir.file_name().unwrap_or_default().to_string_lossy().to_string();
            match read(&file).and_then(|text| step::parse_sequence(&task, &file, &text)) {
                Ok(seq) => {
                    sequences.insert(task, seq);
                }
                Err(e) => skipped.push((task, e)),
            }
        }

        let rally_dir = root.join(rally_task);
        let rally_path = rally_dir.join(RALLY_FILE);
        let mut rally = parse_rally(rally_task, &rally_path, &read(&rally_path)?)?;
        let cal_path = rally_dir.join(CALIBRATION_FILE);
        rally.calibration = parse_calibration(rally_task, &cal_path, &read(&cal_path)?, &rally.layout)?;

        Ok(Catalog { root: root.to_path_buf(), sequences, skipped, rally })
    }

    /// Assemble a catalog from already-built parts.
    pub fn from_parts(root: impl Into<PathBuf>, sequences: Vec<Sequence>, rally: RallyPlan) -> Self {
        let sequences = sequences.into_iter().map(|s| (s.task.clone(), s)).collect();
        Catalog { root: root.into(), sequences, skipped: Vec::new(), rally }
    }

    pub fn skipped(&self) -> &[(String, ConfigError)] {
        &self.skipped
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sequence(&self, task: &str) -> Result<&Sequence, ConfigError> {
        self.sequences.get(task).ok_or_else(|| ConfigError::MissingTask(task.to_string()))
    }

    pub fn rally(&self) -> &RallyPlan {
        &self.rally
    }

    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sequences.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every idle rotation entry must name a loaded task.
    pub fn check_rotation(&self, rotation: &[IdleTask]) -> Result<(), ConfigError> {
        for entry in rotation {
            self.sequence(&entry.task)?;
            if entry.repeat == 0 {
                return Err(ConfigError::invalid(&entry.task, "repeat must be >= 1"));
            }
        }
        Ok(())
    }
}
