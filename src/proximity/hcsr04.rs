//! HC-SR04 ranger on the Linux sysfs GPIO interface.

use super::{DistanceSensor, SensorError};

use log::{debug, warn};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Speed of sound in cm/s at room temperature.
const SPEED_OF_SOUND_CM_S: f64 = 34_300.0;

/// The sysfs node needs a moment after export before it becomes writable.
const EXPORT_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

/// One exported GPIO line. Unexported on drop.
#[derive(Debug)]
struct SysfsPin {
    pin: u32,
    value: File,
}

impl SysfsPin {
    fn export(pin: u32, direction: Direction) -> io::Result<Self> {
        let dir = PathBuf::from(GPIO_ROOT).join(format!("gpio{pin}"));
        if !dir.exists() {
            // EBUSY here means someone else exported it already, which is fine.
            if let Err(e) = fs::write(PathBuf::from(GPIO_ROOT).join("export"), pin.to_string()) {
                if e.raw_os_error() != Some(libc::EBUSY) {
                    return Err(e);
                }
            }
            thread::sleep(EXPORT_SETTLE);
        }

        let dir_value = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        fs::write(dir.join("direction"), dir_value)?;

        let value = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Out)
            .open(dir.join("value"))?;
        debug!("GPIO {} exported as {}", pin, dir_value);
        Ok(Self { pin, value })
    }

    fn set(&mut self, high: bool) -> io::Result<()> {
        self.value.seek(SeekFrom::Start(0))?;
        self.value.write_all(if high { b"1" } else { b"0" })
    }

    fn get(&mut self) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        self.value.seek(SeekFrom::Start(0))?;
        self.value.read_exact(&mut byte)?;
        Ok(byte[0] == b'1')
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if let Err(e) = fs::write(PathBuf::from(GPIO_ROOT).join("unexport"), self.pin.to_string()) {
            warn!("Could not unexport GPIO {}: {}", self.pin, e);
        }
    }
}

/// An HC-SR04 ultrasonic ranger wired to two GPIO lines.
#[derive(Debug)]
pub struct HcSr04 {
    trig: SysfsPin,
    echo: SysfsPin,
    echo_timeout: Duration,
}

impl HcSr04 {
    /// Export both pins and drive the trigger low.
    pub fn open(trig_pin: u32, echo_pin: u32, echo_timeout: Duration) -> Result<Self, SensorError> {
        let mut trig = SysfsPin::export(trig_pin, Direction::Out)?;
        let echo = SysfsPin::export(echo_pin, Direction::In)?;
        trig.set(false)?;
        Ok(Self {
            trig,
            echo,
            echo_timeout,
        })
    }

    /// Busy-wait until the echo line reads `level`, returning the instant it
    /// did.
    fn wait_for_echo(&mut self, level: bool, deadline: Instant) -> Result<Instant, SensorError> {
        loop {
            if self.echo.get()? == level {
                return Ok(Instant::now());
            }
            if Instant::now() >= deadline {
                return Err(SensorError::EchoTimeout);
            }
        }
    }
}

impl DistanceSensor for HcSr04 {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        self.trig.set(false)?;
        spin_sleep::sleep(Duration::from_micros(2));
        self.trig.set(true)?;
        spin_sleep::sleep(Duration::from_micros(10));
        self.trig.set(false)?;

        let deadline = Instant::now() + self.echo_timeout;
        let rise = self.wait_for_echo(true, deadline)?;
        let fall = self.wait_for_echo(false, rise + self.echo_timeout)?;

        Ok(echo_to_cm(fall - rise))
    }
}

/// Round-trip echo time to one-way distance.
fn echo_to_cm(echo: Duration) -> f64 {
    echo.as_secs_f64() * SPEED_OF_SOUND_CM_S / 2.0
}
