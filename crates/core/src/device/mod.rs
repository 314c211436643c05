pub mod adb;
pub mod stub;

use std::time::Duration;

use crate::clock::Clock;
use crate::error::DeviceError;
use crate::logger;
use crate::settings::Settings;
use crate::types::{Frame, Point};

/// Screen and input of one attached device.
///
/// Only one call is ever in flight: the engine owns the handle and drives it
/// from a single thread.
pub trait Device: Send {
    fn capture(&mut self) -> Result<Frame, DeviceError>;
    fn tap(&mut self, at: Point) -> Result<(), DeviceError>;
    fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError>;
    /// Press back `times` times, sleeping `pause` on `clock` between presses.
    fn press_back(&mut self, times: u32, clock: &dyn Clock, pause: Duration) -> Result<(), DeviceError>;
    /// Cheap reachability check used while waiting for reconnection.
    fn is_available(&mut self) -> bool;
}

/// Create the device backend selected by flags and settings.
pub fn create_device(settings: &Settings, force_stub: bool) -> Box<dyn Device> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubDevice::new());
    }
    logger::register_prefix("adb", logger::COLOR_GRAY);
    Box::new(adb::AdbDevice::new(&settings.adb_path, settings.device_serial.clone()))
}
