//! Declarative step model.
//!
//! Sequence files keep the on-disk vocabulary of the recorder tool
//! (`template`, `coords`, `scroll`, `wait`, delays in seconds). They are
//! resolved here, once, into typed steps with every default filled in, so
//! the interpreter never looks at an optional field twice.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::types::{AnchorRef, Point};

// Generic swipe used when a scroll gives a direction but no coordinates
// (landscape 2400x1080).
const GENERIC_CENTER_X: i32 = 1200;
const GENERIC_LOW_Y: i32 = 864;
const GENERIC_HIGH_Y: i32 = 216;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swipe {
    pub from: Point,
    pub to: Point,
    pub duration: Duration,
    /// Pause after the gesture before anything looks at the screen.
    pub settle: Duration,
}

/// Action run before probing or after a successful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Scroll(Swipe),
    Wait(Duration),
}

/// How the probe spends its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// `attempts` captures, `delay` apart.
    Fixed { attempts: u32, delay: Duration },
    /// Poll every `interval` until found or `timeout` elapses.
    ActiveWait { timeout: Duration, interval: Duration },
}

impl ProbeMode {
    pub fn single() -> Self {
        ProbeMode::Fixed { attempts: 1, delay: Duration::ZERO }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ProbeMode::ActiveWait { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    Click,
    /// Run the post-match scroll first, then tap.
    ScrollThenClick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorStep {
    pub name: String,
    pub anchor: AnchorRef,
    pub action: ClickAction,
    pub probe: ProbeMode,
    pub initial_delay: Duration,
    pub offset: Point,
    pub force: Option<Point>,
    pub before: Option<Hook>,
    pub after: Option<Hook>,
    /// Settle time between detection and tap (slide-in animations).
    pub post_detection_delay: Duration,
    /// Pause after the tap.
    pub click_delay: Duration,
    /// A miss is logged and the sequence carries on.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateStep {
    pub name: String,
    pub point: Point,
    pub click_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollStep {
    pub name: String,
    pub swipe: Swipe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitStep {
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    AnchorMatch(AnchorStep),
    Coordinate(CoordinateStep),
    Scroll(ScrollStep),
    Wait(WaitStep),
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Step::AnchorMatch(s) => &s.name,
            Step::Coordinate(s) => &s.name,
            Step::Scroll(s) => &s.name,
            Step::Wait(s) => &s.name,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Step::AnchorMatch(s) if s.optional)
    }

    pub fn uses_active_wait(&self) -> bool {
        matches!(self, Step::AnchorMatch(s) if s.probe.is_active())
    }
}

/// Anchor that, once visible, ends its sequence early as a success.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessAnchor {
    pub anchor: AnchorRef,
    pub probe: ProbeMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub task: String,
    pub steps: Vec<Step>,
    pub success: Option<SuccessAnchor>,
}

impl Sequence {
    pub fn new(task: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { task: task.into(), steps, success: None }
    }
}

// -- on-disk records --

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum RawStep {
    #[serde(rename = "template")]
    Template(RawAnchorStep),
    #[serde(rename = "coords")]
    Coords(RawCoordStep),
    #[serde(rename = "scroll")]
    Scroll(RawScrollStep),
    #[serde(rename = "wait")]
    Wait(RawWaitStep),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAnchorStep {
    #[serde(default)]
    name: Option<String>,
    template_file: String,
    #[serde(default = "default_action")]
    action_on_found: String,
    #[serde(default)]
    click_offset: Option<Point>,
    #[serde(default)]
    force_click: Option<Point>,
    #[serde(default = "default_attempts")]
    max_attempts: u32,
    #[serde(default = "default_attempt_delay")]
    attempt_delay: f64,
    #[serde(default)]
    initial_delay: f64,
    #[serde(default)]
    wait_for_template: bool,
    #[serde(default)]
    wait_timeout: f64,
    #[serde(default = "default_wait_interval")]
    wait_interval: f64,
    #[serde(default)]
    post_detection_delay: f64,
    #[serde(default = "default_click_delay")]
    click_delay: f64,
    #[serde(default)]
    action_before_find: Option<RawHook>,
    #[serde(default)]
    action_after_find: Option<RawHook>,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCoordStep {
    #[serde(default)]
    name: Option<String>,
    coordinates: Point,
    #[serde(default = "default_click_delay")]
    click_delay: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScrollStep {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    swipe: RawSwipe,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWaitStep {
    #[serde(default)]
    name: Option<String>,
    duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawHook {
    #[serde(rename = "scroll")]
    Scroll(RawSwipe),
    #[serde(rename = "wait")]
    Wait { duration_seconds: f64 },
}

#[derive(Debug, Deserialize)]
struct RawSwipe {
    #[serde(default)]
    direction: Option<String>,
    #[serde(default = "default_swipe_ms")]
    duration_ms: u64,
    #[serde(default)]
    start_coords: Option<Point>,
    #[serde(default)]
    end_coords: Option<Point>,
    #[serde(default = "default_swipe_settle")]
    delay_after_scroll: f64,
}

#[derive(Debug, Deserialize)]
struct RawSuccess {
    template_file: String,
    #[serde(default = "default_attempts")]
    max_attempts: u32,
    #[serde(default = "default_success_delay")]
    attempt_delay: f64,
}

fn default_action() -> String {
    "click".into()
}
fn default_attempts() -> u32 {
    1
}
fn default_attempt_delay() -> f64 {
    1.0
}
fn default_wait_interval() -> f64 {
    0.2
}
fn default_click_delay() -> f64 {
    0.5
}
fn default_swipe_ms() -> u64 {
    500
}
fn default_swipe_settle() -> f64 {
    0.5
}
fn default_success_delay() -> f64 {
    0.5
}

// -- resolution --

pub(crate) fn seconds(task: &str, label: &str, field: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::invalid(task, format!("{}: {} must be >= 0, got {}", label, field, secs)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(task, format!("{}: {} out of range, got {}", label, field, secs)))
}

fn positive_seconds(task: &str, label: &str, field: &str, secs: f64) -> Result<Duration, ConfigError> {
    let d = seconds(task, label, field, secs)?;
    if d.is_zero() {
        return Err(ConfigError::invalid(task, format!("{}: {} must be > 0", label, field)));
    }
    Ok(d)
}

fn resolve_swipe(task: &str, label: &str, raw: RawSwipe, default_dir: &str) -> Result<Swipe, ConfigError> {
    let (from, to) = match (raw.start_coords, raw.end_coords) {
        (Some(from), Some(to)) => (from, to),
        (None, None) => {
            let up = (Point::new(GENERIC_CENTER_X, GENERIC_LOW_Y), Point::new(GENERIC_CENTER_X, GENERIC_HIGH_Y));
            match raw.direction.as_deref().unwrap_or(default_dir) {
                "up" => up,
                "down" => (up.1, up.0),
                other => {
                    return Err(ConfigError::invalid(task, format!("{}: unknown scroll direction {:?}", label, other)));
                }
            }
        }
        _ => {
            return Err(ConfigError::invalid(task, format!("{}: scroll needs both start_coords and end_coords", label)));
        }
    };
    Ok(Swipe {
        from,
        to,
        duration: Duration::from_millis(raw.duration_ms),
        settle: seconds(task, label, "delay_after_scroll", raw.delay_after_scroll)?,
    })
}

fn resolve_hook(task: &str, label: &str, raw: RawHook, default_dir: &str) -> Result<Hook, ConfigError> {
    match raw {
        RawHook::Scroll(s) => Ok(Hook::Scroll(resolve_swipe(task, label, s, default_dir)?)),
        RawHook::Wait { duration_seconds } => {
            Ok(Hook::Wait(positive_seconds(task, label, "duration_seconds", duration_seconds)?))
        }
    }
}

fn resolve_anchor_step(task: &str, label: String, raw: RawAnchorStep) -> Result<AnchorStep, ConfigError> {
    if raw.template_file.trim().is_empty() {
        return Err(ConfigError::invalid(task, format!("{}: empty template_file", label)));
    }
    let action = match raw.action_on_found.as_str() {
        "click" => ClickAction::Click,
        "scroll_then_click" => ClickAction::ScrollThenClick,
        other => {
            return Err(ConfigError::invalid(task, format!("{}: unknown action_on_found {:?}", label, other)));
        }
    };
    let probe = if raw.wait_for_template {
        ProbeMode::ActiveWait {
            timeout: positive_seconds(task, &label, "wait_timeout", raw.wait_timeout)?,
            interval: positive_seconds(task, &label, "wait_interval", raw.wait_interval)?,
        }
    } else {
        if raw.max_attempts == 0 {
            return Err(ConfigError::invalid(task, format!("{}: max_attempts must be >= 1", label)));
        }
        ProbeMode::Fixed {
            attempts: raw.max_attempts,
            delay: seconds(task, &label, "attempt_delay", raw.attempt_delay)?,
        }
    };
    let before = raw.action_before_find.map(|h| resolve_hook(task, &label, h, "up")).transpose()?;
    let after = raw.action_after_find.map(|h| resolve_hook(task, &label, h, "down")).transpose()?;
    if action == ClickAction::ScrollThenClick && !matches!(after, Some(Hook::Scroll(_))) {
        return Err(ConfigError::invalid(
            task,
            format!("{}: scroll_then_click needs a scroll in action_after_find", label),
        ));
    }

    Ok(AnchorStep {
        anchor: AnchorRef::new(task, raw.template_file),
        action,
        probe,
        initial_delay: seconds(task, &label, "initial_delay", raw.initial_delay)?,
        offset: raw.click_offset.unwrap_or_default(),
        force: raw.force_click,
        before,
        after,
        post_detection_delay: seconds(task, &label, "post_detection_delay", raw.post_detection_delay)?,
        click_delay: seconds(task, &label, "click_delay", raw.click_delay)?,
        optional: raw.optional,
        name: label,
    })
}

pub(crate) fn resolve_step(task: &str, index: usize, raw: RawStep) -> Result<Step, ConfigError> {
    let label = |name: Option<String>| name.filter(|n| !n.is_empty()).unwrap_or_else(|| format!("step {}", index + 1));
    Ok(match raw {
        RawStep::Template(s) => Step::AnchorMatch(resolve_anchor_step(task, label(s.name.clone()), s)?),
        RawStep::Coords(s) => {
            let name = label(s.name);
            Step::Coordinate(CoordinateStep {
                point: s.coordinates,
                click_delay: seconds(task, &name, "click_delay", s.click_delay)?,
                name,
            })
        }
        RawStep::Scroll(s) => {
            let name = label(s.name);
            Step::Scroll(ScrollStep { swipe: resolve_swipe(task, &name, s.swipe, "up")?, name })
        }
        RawStep::Wait(s) => {
            let name = label(s.name);
            Step::Wait(WaitStep {
                duration: positive_seconds(task, &name, "duration_seconds", s.duration_seconds)?,
                name,
            })
        }
    })
}

/// Resolve a single anchor step, e.g. one of the rally plan controls.
pub(crate) fn resolve_anchor(task: &str, what: &str, raw: RawStep) -> Result<AnchorStep, ConfigError> {
    match resolve_step(task, 0, raw)? {
        Step::AnchorMatch(mut s) => {
            if s.name == "step 1" {
                s.name = what.to_string();
            }
            Ok(s)
        }
        other => Err(ConfigError::invalid(task, format!("{} must be a template step, got {:?}", what, other.label()))),
    }
}

const STEP_KINDS: [&str; 4] = ["template", "coords", "scroll", "wait"];

/// Reject unknown step kinds by name before serde sees them, so the error
/// says which step is wrong instead of a generic variant mismatch.
pub(crate) fn check_kinds(task: &str, steps: &Value) -> Result<(), ConfigError> {
    let Some(list) = steps.as_array() else {
        return Err(ConfigError::invalid(task, "\"sequence\" must be a list"));
    };
    for (i, step) in list.iter().enumerate() {
        match step.get("type").and_then(Value::as_str) {
            Some(kind) if STEP_KINDS.contains(&kind) => {}
            Some(kind) => {
                return Err(ConfigError::invalid(task, format!("step {}: unknown type {:?}", i + 1, kind)));
            }
            None => return Err(ConfigError::invalid(task, format!("step {}: missing \"type\"", i + 1))),
        }
    }
    Ok(())
}

pub(crate) fn resolve_steps(task: &str, raw: Vec<RawStep>) -> Result<Vec<Step>, ConfigError> {
    raw.into_iter().enumerate().map(|(i, r)| resolve_step(task, i, r)).collect()
}

/// Parse a `sequence.json` body: either a bare step list or
/// `{ "sequence": [...], "success_image": {...} }`.
pub fn parse_sequence(task: &str, path: &Path, text: &str) -> Result<Sequence, ConfigError> {
    let parse_err = |source| ConfigError::Parse { path: path.to_path_buf(), source };
    let value: Value = serde_json::from_str(text).map_err(parse_err)?;

    let (steps, success) = match value {
        Value::Array(_) => (value, None),
        Value::Object(mut map) => {
            let steps = map
                .remove("sequence")
                .ok_or_else(|| ConfigError::invalid(task, "object form needs a \"sequence\" list"))?;
            (steps, map.remove("success_image").filter(|v| !v.is_null()))
        }
        _ => return Err(ConfigError::invalid(task, "expected a step list or an object with \"sequence\"")),
    };

    check_kinds(task, &steps)?;
    let raw: Vec<RawStep> = serde_json::from_value(steps).map_err(parse_err)?;
    let steps = resolve_steps(task, raw)?;

    let success = match success {
        Some(v) => {
            let raw: RawSuccess = serde_json::from_value(v).map_err(parse_err)?;
            if raw.max_attempts == 0 {
                return Err(ConfigError::invalid(task, "success_image: max_attempts must be >= 1"));
            }
            Some(SuccessAnchor {
                anchor: AnchorRef::new(task, raw.template_file),
                probe: ProbeMode::Fixed {
                    attempts: raw.max_attempts,
                    delay: seconds(task, "success_image", "attempt_delay", raw.attempt_delay)?,
                },
            })
        }
        None => None,
    };

    Ok(Sequence { task: task.to_string(), steps, success })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Sequence, ConfigError> {
        parse_sequence("pegar_bau", Path::new("tasks/pegar_bau/sequence.json"), text)
    }

    #[test]
    fn list_form_fills_defaults() {
        let seq = parse(r#"[
            { "type": "template", "name": "open chest", "template_file": "01_bau.png" },
            { "type": "coords", "coordinates": [640, 320] },
            { "type": "wait", "duration_seconds": 1.5 }
        ]"#)
        .unwrap();

        assert_eq!(seq.task, "pegar_bau");
        assert!(seq.success.is_none());
        let Step::AnchorMatch(a) = &seq.steps[0] else { panic!("expected anchor step") };
        assert_eq!(a.name, "open chest");
        assert_eq!(a.anchor, AnchorRef::new("pegar_bau", "01_bau.png"));
        assert_eq!(a.action, ClickAction::Click);
        assert_eq!(a.probe, ProbeMode::Fixed { attempts: 1, delay: Duration::from_secs(1) });
        assert_eq!(a.click_delay, Duration::from_millis(500));
        assert_eq!(a.offset, Point::default());
        assert!(!a.optional);

        assert_eq!(seq.steps[1].label(), "step 2");
        let Step::Coordinate(c) = &seq.steps[1] else { panic!("expected coords step") };
        assert_eq!(c.point, Point::new(640, 320));
        let Step::Wait(w) = &seq.steps[2] else { panic!("expected wait step") };
        assert_eq!(w.duration, Duration::from_millis(1500));
    }

    #[test]
    fn object_form_reads_success_anchor_and_hooks() {
        let seq = parse(r#"{
            "sequence": [{
                "type": "template",
                "template_file": "02_coletar.png",
                "wait_for_template": true,
                "wait_timeout": 4,
                "click_offset": [0, 30],
                "action_before_find": { "type": "wait", "duration_seconds": 0.25 },
                "action_after_find": { "type": "scroll", "start_coords": [1200, 800], "end_coords": [1200, 570], "duration_ms": 900 },
                "action_on_found": "scroll_then_click"
            }],
            "success_image": { "template_file": "ok.png", "max_attempts": 2 }
        }"#)
        .unwrap();

        let Step::AnchorMatch(a) = &seq.steps[0] else { panic!("expected anchor step") };
        assert_eq!(a.probe, ProbeMode::ActiveWait { timeout: Duration::from_secs(4), interval: Duration::from_millis(200) });
        assert!(seq.steps[0].uses_active_wait());
        assert_eq!(a.offset, Point::new(0, 30));
        assert_eq!(a.before, Some(Hook::Wait(Duration::from_millis(250))));
        assert_eq!(
            a.after,
            Some(Hook::Scroll(Swipe {
                from: Point::new(1200, 800),
                to: Point::new(1200, 570),
                duration: Duration::from_millis(900),
                settle: Duration::from_millis(500),
            }))
        );
        let success = seq.success.unwrap();
        assert_eq!(success.anchor.file, "ok.png");
        assert_eq!(success.probe, ProbeMode::Fixed { attempts: 2, delay: Duration::from_millis(500) });
    }

    #[test]
    fn direction_only_scroll_uses_generic_swipe() {
        let seq = parse(r#"[{ "type": "scroll", "direction": "down" }]"#).unwrap();
        let Step::Scroll(s) = &seq.steps[0] else { panic!("expected scroll step") };
        assert_eq!(s.swipe.from, Point::new(1200, 216));
        assert_eq!(s.swipe.to, Point::new(1200, 864));
    }

    #[test]
    fn unknown_kind_is_rejected_at_load() {
        let err = parse(r#"[{ "type": "wait", "duration_seconds": 1 }, { "type": "swipe_left" }]"#).unwrap_err();
        assert_eq!(err.to_string(), "pegar_bau: step 2: unknown type \"swipe_left\"");

        let err = parse(r#"[{ "type": "coords" }]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn invalid_values_are_rejected_at_load() {
        let cases = [
            r#"[{ "type": "template", "template_file": "a.png", "max_attempts": 0 }]"#,
            r#"[{ "type": "template", "template_file": "" }]"#,
            r#"[{ "type": "template", "template_file": "a.png", "action_on_found": "double_tap" }]"#,
            r#"[{ "type": "template", "template_file": "a.png", "action_on_found": "scroll_then_click" }]"#,
            r#"[{ "type": "template", "template_file": "a.png", "wait_for_template": true }]"#,
            r#"[{ "type": "wait", "duration_seconds": 0 }]"#,
            r#"[{ "type": "scroll", "start_coords": [1, 2] }]"#,
            r#"[{ "type": "template", "template_file": "a.png", "initial_delay": -1 }]"#,
            r#"[{ "type": "wait", "duration_seconds": 1e30 }]"#,
            r#"[{ "type": "template", "template_file": "a.png", "click_delay": 1e300 }]"#,
            r#"{ "steps": [] }"#,
        ];
        for text in cases {
            let err = parse(text).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{text}: {err}");
        }
    }
}
