use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// Source of time for every timed wait in the engine.
///
/// All suspension points (retry intervals, settle delays, cooldowns,
/// reconnection polling) go through this so tests can run on virtual time.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

/// Wall clock. With a non-zero `jitter` ratio every sleep is stretched or
/// shortened by up to that fraction, so taps do not land on a fixed beat.
pub struct SystemClock {
    jitter: f64,
}

impl SystemClock {
    pub fn new(jitter: f64) -> Self {
        Self { jitter: jitter.clamp(0.0, 0.9) }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        if self.jitter > 0.0 {
            sleep_jitter(d.as_secs_f64(), self.jitter);
        } else {
            thread::sleep(d);
        }
    }
}

/// Sleep for `secs` seconds with +/-`ratio` random jitter.
pub fn sleep_jitter(secs: f64, ratio: f64) {
    let jitter = secs * ratio;
    let actual = secs + rand::thread_rng().gen_range(-jitter..jitter);
    thread::sleep(Duration::from_secs_f64(actual.max(0.01)));
}
