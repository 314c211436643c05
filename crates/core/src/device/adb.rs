use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use image::ImageFormat;
use regex::Regex;

use super::Device;
use crate::clock::Clock;
use crate::error::DeviceError;
use crate::logger;
use crate::types::{Frame, Point};

const KEYCODE_BACK: &str = "4";

/// Drives a device through the `adb` command line tool.
pub struct AdbDevice {
    adb: String,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(adb: &str, serial: Option<String>) -> Self {
        Self { adb: adb.to_string(), serial }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args);
        cmd
    }

    /// Run one adb invocation and return its stdout.
    fn run(&self, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        let output = self
            .command(args)
            .output()
            .map_err(|e| DeviceError::Io(format!("failed to execute {}: {}", self.adb, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify(&format!("adb {} exited with {}: {}", args.join(" "), output.status, stderr.trim())));
        }
        // `input` reports some failures on stdout with a zero exit code.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(lost) = shell_stdout_failure(args, &stdout) {
            return Err(lost);
        }
        Ok(output.stdout)
    }

    fn shell_input(&self, input: &[&str]) -> Result<(), DeviceError> {
        let mut args = vec!["shell", "input"];
        args.extend_from_slice(input);
        self.run(&args).map(|_| ())
    }
}

fn unreachable_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)no devices/emulators found|device offline|device '[^']*' not found|device not found|unauthorized|\bclosed\b")
            .ok()
    })
    .as_ref()
}

/// A `shell` command that exited 0 but printed a lost-device message.
fn shell_stdout_failure(args: &[&str], stdout: &str) -> Option<DeviceError> {
    let lost = args.first() == Some(&"shell") && unreachable_pattern().is_some_and(|re| re.is_match(stdout));
    lost.then(|| DeviceError::Unreachable(stdout.trim().to_string()))
}

/// Sort an adb failure message into lost-device vs. transient.
pub fn classify(message: &str) -> DeviceError {
    if unreachable_pattern().is_some_and(|re| re.is_match(message)) {
        DeviceError::Unreachable(message.to_string())
    } else {
        DeviceError::Io(message.to_string())
    }
}

/// True when `adb devices` output lists at least one ready device, or the
/// given serial when one is set.
pub fn lists_ready_device(devices_output: &str, serial: Option<&str>) -> bool {
    devices_output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            Some((parts.next()?, parts.next()?))
        })
        .any(|(id, state)| state == "device" && serial.map_or(true, |s| s == id))
}

impl Device for AdbDevice {
    fn capture(&mut self) -> Result<Frame, DeviceError> {
        let png = self.run(&["exec-out", "screencap", "-p"])?;
        if png.is_empty() {
            return Err(DeviceError::Io("screencap returned no data".into()));
        }
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| DeviceError::Io(format!("screencap decode: {}", e)))?;
        Ok(Frame::new(image.to_luma8()))
    }

    fn tap(&mut self, at: Point) -> Result<(), DeviceError> {
        self.shell_input(&["tap", &at.x.to_string(), &at.y.to_string()])
    }

    fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError> {
        self.shell_input(&[
            "swipe",
            &from.x.to_string(),
            &from.y.to_string(),
            &to.x.to_string(),
            &to.y.to_string(),
            &duration.as_millis().to_string(),
        ])
    }

    fn press_back(&mut self, times: u32, clock: &dyn Clock, pause: Duration) -> Result<(), DeviceError> {
        for i in 0..times {
            self.shell_input(&["keyevent", KEYCODE_BACK])?;
            if i + 1 < times {
                clock.sleep(pause);
            }
        }
        Ok(())
    }

    fn is_available(&mut self) -> bool {
        let output = match Command::new(&self.adb).arg("devices").output() {
            Ok(o) => o,
            Err(e) => {
                logger::warn_p("adb", &format!("adb devices failed: {}", e));
                return false;
            }
        };
        lists_ready_device(&String::from_utf8_lossy(&output.stdout), self.serial.as_deref())
    }
}
