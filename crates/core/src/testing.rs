//! Scriptable stand-ins for the device, matcher, clock and observer.
//!
//! Every fake is a cheap handle over shared state: keep a clone, box the
//! other into a [`Rig`], and inspect what the engine did afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::device::Device;
use crate::error::{ConfigError, DeviceError};
use crate::observer::{Event, Observer};
use crate::rig::{Rig, Timing};
use crate::types::{AnchorRef, Detection, Frame, Point};
use crate::vision::Matcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Capture,
    Tap(Point),
    Swipe(Point, Point, Duration),
    Back(u32),
}

#[derive(Default)]
struct DeviceState {
    actions: Vec<Action>,
    offline: bool,
    taps_seen: usize,
    lose_on_tap: Option<usize>,
    tap_io_failures: u32,
    capture_io_failures: u32,
    polls_until_back: u32,
    polls: u32,
}

/// Records every input and fails on cue.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`th tap (1-based) reports the device as lost.
    pub fn lose_on_tap(&self, n: usize) {
        self.state.lock().unwrap().lose_on_tap = Some(n);
    }

    pub fn go_offline(&self) {
        self.state.lock().unwrap().offline = true;
    }

    /// While offline, report unavailable for `n` polls before coming back.
    pub fn polls_until_back(&self, n: u32) {
        self.state.lock().unwrap().polls_until_back = n;
    }

    pub fn fail_taps(&self, n: u32) {
        self.state.lock().unwrap().tap_io_failures = n;
    }

    pub fn fail_captures(&self, n: u32) {
        self.state.lock().unwrap().capture_io_failures = n;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.filter(|a| match a {
            Action::Tap(p) => Some(*p),
            _ => None,
        })
    }

    pub fn swipes(&self) -> Vec<(Point, Point, Duration)> {
        self.filter(|a| match a {
            Action::Swipe(f, t, d) => Some((*f, *t, *d)),
            _ => None,
        })
    }

    pub fn backs(&self) -> Vec<u32> {
        self.filter(|a| match a {
            Action::Back(n) => Some(*n),
            _ => None,
        })
    }

    pub fn captures(&self) -> usize {
        self.filter(|a| (*a == Action::Capture).then_some(())).len()
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().actions.clear();
    }

    fn filter<T>(&self, f: impl Fn(&Action) -> Option<T>) -> Vec<T> {
        self.state.lock().unwrap().actions.iter().filter_map(f).collect()
    }
}

fn lost() -> DeviceError {
    DeviceError::Unreachable("error: device offline".into())
}

impl Device for FakeDevice {
    fn capture(&mut self) -> Result<Frame, DeviceError> {
        let mut s = self.state.lock().unwrap();
        if s.offline {
            return Err(lost());
        }
        if s.capture_io_failures > 0 {
            s.capture_io_failures -= 1;
            return Err(DeviceError::Io("screencap returned no data".into()));
        }
        s.actions.push(Action::Capture);
        Ok(Frame::blank(8, 8))
    }

    fn tap(&mut self, at: Point) -> Result<(), DeviceError> {
        let mut s = self.state.lock().unwrap();
        if s.offline {
            return Err(lost());
        }
        s.taps_seen += 1;
        if s.lose_on_tap == Some(s.taps_seen) {
            s.offline = true;
            return Err(lost());
        }
        if s.tap_io_failures > 0 {
            s.tap_io_failures -= 1;
            return Err(DeviceError::Io("input tap exited 1".into()));
        }
        s.actions.push(Action::Tap(at));
        Ok(())
    }

    fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError> {
        let mut s = self.state.lock().unwrap();
        if s.offline {
            return Err(lost());
        }
        s.actions.push(Action::Swipe(from, to, duration));
        Ok(())
    }

    fn press_back(&mut self, times: u32, clock: &dyn Clock, pause: Duration) -> Result<(), DeviceError> {
        {
            let mut s = self.state.lock().unwrap();
            if s.offline {
                return Err(lost());
            }
            s.actions.push(Action::Back(times));
        }
        for _ in 1..times {
            clock.sleep(pause);
        }
        Ok(())
    }

    fn is_available(&mut self) -> bool {
        let mut s = self.state.lock().unwrap();
        s.polls += 1;
        if s.offline {
            if s.polls_until_back > 0 {
                s.polls_until_back -= 1;
                return false;
            }
            s.offline = false;
        }
        true
    }
}

enum Presence {
    Always,
    Script(VecDeque<bool>, bool),
    Broken,
}

#[derive(Default)]
struct MatcherState {
    rules: HashMap<String, Presence>,
    boxes: HashMap<String, Detection>,
    calls: HashMap<String, u32>,
}

/// Answers `locate` from per-anchor scripts, keyed by anchor file name.
/// Anchors without a rule are never found.
#[derive(Clone, Default)]
pub struct ScriptedMatcher {
    state: Arc<Mutex<MatcherState>>,
}

pub const DEFAULT_BOX: Detection = Detection { x: 100, y: 100, width: 40, height: 20, confidence: 0.95 };

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self, file: &str) {
        self.set(file, Presence::Always);
    }

    pub fn absent(&self, file: &str) {
        self.set(file, Presence::Script(VecDeque::new(), false));
    }

    /// One answer per call, then never found.
    pub fn script(&self, file: &str, answers: &[bool]) {
        self.script_then(file, answers, false);
    }

    pub fn script_then(&self, file: &str, answers: &[bool], then: bool) {
        self.set(file, Presence::Script(answers.iter().copied().collect(), then));
    }

    /// Loading the anchor fails.
    pub fn broken(&self, file: &str) {
        self.set(file, Presence::Broken);
    }

    /// Report detections of `file` at this box.
    pub fn at(&self, file: &str, x: i32, y: i32, width: u32, height: u32) {
        let d = Detection { x, y, width, height, confidence: 0.95 };
        self.state.lock().unwrap().boxes.insert(file.to_string(), d);
    }

    pub fn calls(&self, file: &str) -> u32 {
        self.state.lock().unwrap().calls.get(file).copied().unwrap_or(0)
    }

    fn set(&self, file: &str, p: Presence) {
        self.state.lock().unwrap().rules.insert(file.to_string(), p);
    }
}

impl Matcher for ScriptedMatcher {
    fn locate(&mut self, _frame: &Frame, anchor: &AnchorRef) -> Result<Option<Detection>, ConfigError> {
        let mut s = self.state.lock().unwrap();
        *s.calls.entry(anchor.file.clone()).or_default() += 1;
        let found = match s.rules.get_mut(&anchor.file) {
            None => false,
            Some(Presence::Always) => true,
            Some(Presence::Script(answers, then)) => answers.pop_front().unwrap_or(*then),
            Some(Presence::Broken) => {
                return Err(ConfigError::Anchor { path: anchor.to_string().into(), reason: "unreadable".into() });
            }
        };
        Ok(found.then(|| s.boxes.get(&anchor.file).copied().unwrap_or(DEFAULT_BOX)))
    }
}

struct ClockState {
    start: Instant,
    now: Instant,
    sleeps: Vec<Duration>,
}

/// Virtual time: sleeping advances it instantly.
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { state: Arc::new(Mutex::new(ClockState { start: now, now, sleeps: Vec::new() })) }
    }

    pub fn elapsed(&self) -> Duration {
        let s = self.state.lock().unwrap();
        s.now - s.start
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().now
    }

    fn sleep(&self, d: Duration) {
        let mut s = self.state.lock().unwrap();
        s.now += d;
        s.sleeps.push(d);
    }
}

/// Keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Observer for RecordingObserver {
    fn on_event(&mut self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// All four fakes wired into a [`Rig`].
pub struct Harness {
    pub device: FakeDevice,
    pub matcher: ScriptedMatcher,
    pub clock: ManualClock,
    pub observer: RecordingObserver,
    pub rig: Rig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timing(Timing::default())
    }

    pub fn with_timing(timing: Timing) -> Self {
        let (device, matcher, clock, observer) =
            (FakeDevice::new(), ScriptedMatcher::new(), ManualClock::new(), RecordingObserver::new());
        let rig = Rig {
            device: Box::new(device.clone()),
            matcher: Box::new(matcher.clone()),
            clock: Box::new(clock.clone()),
            observer: Box::new(observer.clone()),
            timing,
        };
        Harness { device, matcher, clock, observer, rig }
    }

    /// Timing with every pause at zero, so elapsed time is only what the
    /// steps themselves ask for.
    pub fn instant() -> Self {
        let zero = Duration::ZERO;
        Self::with_timing(Timing {
            step_settle: zero,
            active_settle: zero,
            pass_cooldown: zero,
            idle_cooldown: zero,
            reconnect_interval: zero,
            back_pause: zero,
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.observer.events()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
