use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context;

use crate::error;
use crate::logger;
use crate::observer::Event;
use crate::rig::Rig;
use crate::scheduler::{RunContext, Scheduler};

/// Outermost loop: restarts the engine from a clean context whenever the
/// device drops off, and gives up on anything else.
pub struct Supervisor {
    ctx: RunContext,
    restarts: u32,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { ctx: RunContext::fresh(), restarts: 0 }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn run(&mut self, rig: &mut Rig, scheduler: &Scheduler, stop: &AtomicBool) -> anyhow::Result<()> {
        self.run_with(rig, stop, |rig, ctx, stop| scheduler.run(rig, ctx, stop).context("engine loop"))
    }

    /// Drive `body` with a fresh context until it returns `Ok`, the stop flag
    /// is raised while waiting for the device, or it fails for any reason
    /// other than a lost device.
    pub fn run_with<F>(&mut self, rig: &mut Rig, stop: &AtomicBool, mut body: F) -> anyhow::Result<()>
    where
        F: FnMut(&mut Rig, &mut RunContext, &AtomicBool) -> anyhow::Result<()>,
    {
        loop {
            self.ctx = RunContext::fresh();
            match body(rig, &mut self.ctx, stop) {
                Ok(()) => return Ok(()),
                Err(err) if error::is_unreachable(&err) => {
                    rig.emit(Event::DeviceLost { reason: format!("{:#}", err) });
                    if !wait_for_device(rig, stop) {
                        return Ok(());
                    }
                    self.restarts += 1;
                }
                Err(err) => {
                    logger::error_p("supervisor", &format!("fatal: {:#}", err));
                    return Err(err);
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll every reconnect interval. False if stopped first.
fn wait_for_device(rig: &mut Rig, stop: &AtomicBool) -> bool {
    let started: Instant = rig.clock.now();
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        rig.sleep(rig.timing.reconnect_interval);
        if rig.device.is_available() {
            let waited = rig.clock.now() - started;
            rig.emit(Event::DeviceRestored { waited });
            return true;
        }
    }
}
