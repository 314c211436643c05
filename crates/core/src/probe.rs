//! One bounded search for an anchor on the live screen.

use crate::error::{ConfigError, DeviceError};
use crate::logger;
use crate::rig::Rig;
use crate::step::ProbeMode;
use crate::types::{AnchorRef, Detection};

#[derive(Debug)]
pub enum ProbeOutcome {
    Found(Detection),
    Missed { attempts: u32 },
    /// The anchor itself is broken. Retrying cannot help.
    Unusable(ConfigError),
}

enum Attempt {
    Hit(Detection),
    Miss,
    Broken(ConfigError),
}

/// Capture one frame and look for `anchor` in it. A transient capture
/// failure counts as a miss; only a lost device escapes.
fn attempt(rig: &mut Rig, anchor: &AnchorRef) -> Result<Attempt, DeviceError> {
    let frame = match rig.device.capture() {
        Ok(f) => f,
        Err(DeviceError::Io(msg)) => {
            logger::warn_p("probe", &format!("capture failed: {}", msg));
            return Ok(Attempt::Miss);
        }
        Err(e) => return Err(e),
    };
    Ok(match rig.matcher.locate(&frame, anchor) {
        Ok(Some(d)) => Attempt::Hit(d),
        Ok(None) => Attempt::Miss,
        Err(e) => Attempt::Broken(e),
    })
}

/// Search for `anchor` within the budget of `mode`.
///
/// Fixed mode sleeps the full delay between attempts. Active-wait polls at
/// its interval and returns as soon as the anchor shows up, giving up once
/// the timeout has elapsed.
pub fn probe(rig: &mut Rig, anchor: &AnchorRef, mode: ProbeMode) -> Result<ProbeOutcome, DeviceError> {
    match mode {
        ProbeMode::Fixed { attempts, delay } => {
            for n in 1..=attempts {
                match attempt(rig, anchor)? {
                    Attempt::Hit(d) => return Ok(ProbeOutcome::Found(d)),
                    Attempt::Broken(e) => return Ok(ProbeOutcome::Unusable(e)),
                    Attempt::Miss => {}
                }
                if n < attempts {
                    rig.sleep(delay);
                }
            }
            Ok(ProbeOutcome::Missed { attempts })
        }
        ProbeMode::ActiveWait { timeout, interval } => {
            let deadline = rig.clock.now() + timeout;
            let mut attempts = 0;
            loop {
                attempts += 1;
                match attempt(rig, anchor)? {
                    Attempt::Hit(d) => return Ok(ProbeOutcome::Found(d)),
                    Attempt::Broken(e) => return Ok(ProbeOutcome::Unusable(e)),
                    Attempt::Miss => {}
                }
                let now = rig.clock.now();
                if now >= deadline {
                    return Ok(ProbeOutcome::Missed { attempts });
                }
                rig.sleep(interval.min(deadline - now));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, Harness};
    use std::time::Duration;

    fn anchor() -> AnchorRef {
        AnchorRef::new("t", "a.png")
    }

    #[test]
    fn fixed_mode_spends_whole_budget_on_miss() {
        let mut h = Harness::new();
        h.matcher.absent("a.png");
        let mode = ProbeMode::Fixed { attempts: 3, delay: Duration::from_millis(400) };
        let out = probe(&mut h.rig, &anchor(), mode).unwrap();
        assert!(matches!(out, ProbeOutcome::Missed { attempts: 3 }));
        assert_eq!(h.matcher.calls("a.png"), 3);
        assert_eq!(h.clock.elapsed(), Duration::from_millis(800));
    }

    #[test]
    fn active_wait_returns_on_first_hit() {
        let mut h = Harness::new();
        h.matcher.script("a.png", &[false, false, true]);
        let mode = ProbeMode::ActiveWait { timeout: Duration::from_secs(5), interval: Duration::from_millis(200) };
        let out = probe(&mut h.rig, &anchor(), mode).unwrap();
        assert!(matches!(out, ProbeOutcome::Found(_)));
        assert_eq!(h.clock.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn active_wait_gives_up_at_timeout() {
        let mut h = Harness::new();
        h.matcher.absent("a.png");
        let mode = ProbeMode::ActiveWait { timeout: Duration::from_secs(1), interval: Duration::from_millis(200) };
        let out = probe(&mut h.rig, &anchor(), mode).unwrap();
        assert!(matches!(out, ProbeOutcome::Missed { attempts: 6 }));
        assert_eq!(h.clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn capture_hiccup_is_a_miss_but_lost_device_escapes() {
        let mut h = Harness::new();
        h.matcher.present("a.png");
        h.device.fail_captures(1);
        let out = probe(&mut h.rig, &anchor(), ProbeMode::Fixed { attempts: 2, delay: Duration::ZERO }).unwrap();
        assert!(matches!(out, ProbeOutcome::Found(_)));
        assert_eq!(h.device.actions(), vec![Action::Capture]);

        h.device.go_offline();
        let err = probe(&mut h.rig, &anchor(), ProbeMode::single()).unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn broken_anchor_is_not_retried() {
        let mut h = Harness::new();
        h.matcher.broken("a.png");
        let out = probe(&mut h.rig, &anchor(), ProbeMode::Fixed { attempts: 5, delay: Duration::ZERO }).unwrap();
        assert!(matches!(out, ProbeOutcome::Unusable(ConfigError::Anchor { .. })));
        assert_eq!(h.matcher.calls("a.png"), 1);
    }

    #[test]
    fn same_screen_gives_same_detection() {
        let mut h = Harness::new();
        h.matcher.present("a.png");
        let first = probe(&mut h.rig, &anchor(), ProbeMode::single()).unwrap();
        let second = probe(&mut h.rig, &anchor(), ProbeMode::single()).unwrap();
        match (first, second) {
            (ProbeOutcome::Found(a), ProbeOutcome::Found(b)) => assert_eq!(a, b),
            other => panic!("expected two detections, got {:?}", other),
        }
    }
}
