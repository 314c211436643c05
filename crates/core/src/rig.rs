use std::time::Duration;

use crate::clock::Clock;
use crate::device::Device;
use crate::observer::{Event, Observer};
use crate::settings::Settings;
use crate::vision::Matcher;

/// Engine-wide pauses taken from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Between steps of a sequence.
    pub step_settle: Duration,
    /// Between steps when the previous one already waited for its anchor.
    pub active_settle: Duration,
    pub pass_cooldown: Duration,
    pub idle_cooldown: Duration,
    pub reconnect_interval: Duration,
    /// Between consecutive back presses.
    pub back_pause: Duration,
}

impl Timing {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            step_settle: s.step_settle(),
            active_settle: s.active_settle(),
            pass_cooldown: s.pass_cooldown(),
            idle_cooldown: s.idle_cooldown(),
            reconnect_interval: s.reconnect_interval(),
            back_pause: s.back_pause(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// The collaborators every engine layer works through.
pub struct Rig {
    pub device: Box<dyn Device>,
    pub matcher: Box<dyn Matcher>,
    pub clock: Box<dyn Clock>,
    pub observer: Box<dyn Observer>,
    pub timing: Timing,
}

impl Rig {
    pub fn emit(&mut self, event: Event) {
        self.observer.on_event(&event);
    }

    pub fn sleep(&self, d: Duration) {
        self.clock.sleep(d);
    }
}
