use std::collections::VecDeque;
use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// One captured screen, reduced to greyscale before matching.
pub struct Frame {
    pub image: GrayImage,
}

impl Frame {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    /// Solid black frame, used by the stub device and the test fakes.
    pub fn blank(width: u32, height: u32) -> Self {
        Self { image: GrayImage::new(width, height) }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{})", self.width(), self.height())
    }
}

/// Screen coordinate in device pixels. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, by: Point) -> Self {
        Self { x: self.x + by.x, y: self.y + by.y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Anchor image addressed by task directory and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorRef {
    pub task: String,
    pub file: String,
}

impl AnchorRef {
    pub fn new(task: impl Into<String>, file: impl Into<String>) -> Self {
        Self { task: task.into(), file: file.into() }
    }
}

impl fmt::Display for AnchorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task, self.file)
    }
}

/// Where an anchor was found: top-left corner, template size and match score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl Detection {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + (self.width / 2) as i32,
            y: self.y + (self.height / 2) as i32,
        }
    }

    /// Tap target: a forced point wins, otherwise center plus offset.
    pub fn click_point(&self, offset: Point, force: Option<Point>) -> Point {
        force.unwrap_or_else(|| self.center().offset(offset))
    }
}

/// Process-wide control mode, owned by the scheduler's `RunContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Hunting,
    Idle,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Hunting => write!(f, "HUNTING"),
            Mode::Idle => write!(f, "IDLE"),
        }
    }
}

/// Result of processing one queue slot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Committed forces to the event.
    Marched,
    /// Slot exists but there was nothing to join.
    NoRally,
    /// Slot already used by this account.
    Next,
    /// Slot anchor not on screen: list exhausted or not loaded yet.
    Refresh,
    Error,
}

impl fmt::Display for SlotOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotOutcome::Marched => "MARCHED",
            SlotOutcome::NoRally => "NO_RALLY",
            SlotOutcome::Next => "NEXT",
            SlotOutcome::Refresh => "REFRESH",
            SlotOutcome::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Number of recent slot outcomes kept for display.
pub const RECENT_OUTCOMES: usize = 9;

/// Snapshot of the engine shared with the TUI.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub mode: Mode,
    pub device_online: bool,
    pub passes: u64,
    pub marched_total: u64,
    pub current_task: Option<String>,
    pub recent: VecDeque<(u32, SlotOutcome)>,
    pub last_error: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            mode: Mode::Hunting,
            device_online: true,
            passes: 0,
            marched_total: 0,
            current_task: None,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
            last_error: None,
        }
    }
}

impl EngineStatus {
    pub fn push_outcome(&mut self, slot: u32, outcome: SlotOutcome) {
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back((slot, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_point_prefers_force_over_offset() {
        let d = Detection { x: 100, y: 200, width: 40, height: 20, confidence: 0.9 };
        assert_eq!(d.center(), Point::new(120, 210));
        assert_eq!(d.click_point(Point::new(0, 140), None), Point::new(120, 350));
        assert_eq!(d.click_point(Point::new(0, 140), Some(Point::new(5, 6))), Point::new(5, 6));
    }

    #[test]
    fn point_reads_json_pair() {
        let p: Point = serde_json::from_str("[12, -3]").unwrap();
        assert_eq!(p, Point::new(12, -3));
        assert_eq!(serde_json::to_string(&p).unwrap(), "[12,-3]");
    }

    #[test]
    fn recent_outcomes_are_bounded() {
        let mut status = EngineStatus::default();
        for slot in 1..=12 {
            status.push_outcome(slot, SlotOutcome::NoRally);
        }
        assert_eq!(status.recent.len(), RECENT_OUTCOMES);
        assert_eq!(status.recent.front(), Some(&(4, SlotOutcome::NoRally)));
    }
}
