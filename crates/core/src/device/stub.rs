use std::time::Duration;

use super::Device;
use crate::clock::Clock;
use crate::error::DeviceError;
use crate::logger;
use crate::types::{Frame, Point};

const STUB_WIDTH: u32 = 2400;
const STUB_HEIGHT: u32 = 1080;

/// Logs every call and shows a black screen. Nothing ever matches on it.
pub struct StubDevice {
    captures: u64,
}

impl StubDevice {
    pub fn new() -> Self {
        Self { captures: 0 }
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for StubDevice {
    fn capture(&mut self) -> Result<Frame, DeviceError> {
        self.captures += 1;
        logger::info_p("stub", &format!("capture() #{}", self.captures));
        Ok(Frame::blank(STUB_WIDTH, STUB_HEIGHT))
    }

    fn tap(&mut self, at: Point) -> Result<(), DeviceError> {
        logger::info_p("stub", &format!("tap{}", at));
        Ok(())
    }

    fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError> {
        logger::info_p("stub", &format!("swipe{} -> {} {}ms", from, to, duration.as_millis()));
        Ok(())
    }

    fn press_back(&mut self, times: u32, _clock: &dyn Clock, _pause: Duration) -> Result<(), DeviceError> {
        logger::info_p("stub", &format!("press_back({})", times));
        Ok(())
    }

    fn is_available(&mut self) -> bool {
        true
    }
}
