//! Local alarm indicator: a status LED plus a passive buzzer.
//!
//! Indicator calls are synchronous and best effort. Callers log and drop
//! the returned errors; a dead LED must never stop alert processing.

use crate::error::{NotifyError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub trait LocalIndicator: Send + Sync {
    /// Turns the alarm LED on or off.
    fn set_alarm(&self, on: bool) -> Result<()>;

    /// Plays the short attention chime on the buzzer. Blocks until done.
    fn chime(&self) -> Result<()>;

    /// Forces the buzzer off.
    fn silence(&self) -> Result<()>;

    fn kind(&self) -> &str;
}

/// Drives the LED and buzzer through the Linux sysfs GPIO interface.
pub struct SysfsGpioIndicator {
    root: PathBuf,
    led_pin: u32,
    buzzer_pin: u32,
}

impl SysfsGpioIndicator {
    pub const DEFAULT_ROOT: &'static str = "/sys/class/gpio";

    /// Exports both pins as outputs. Fails if the GPIO tree is unavailable.
    pub fn open(root: &Path, led_pin: u32, buzzer_pin: u32) -> Result<Self> {
        let indicator = Self {
            root: root.to_path_buf(),
            led_pin,
            buzzer_pin,
        };
        indicator.export(led_pin)?;
        indicator.export(buzzer_pin)?;
        Ok(indicator)
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: u32) -> Result<()> {
        if !self.pin_dir(pin).exists() {
            write_sysfs(&self.root.join("export"), &pin.to_string())?;
        }
        write_sysfs(&self.pin_dir(pin).join("direction"), "out")
    }

    fn write_pin(&self, pin: u32, high: bool) -> Result<()> {
        write_sysfs(
            &self.pin_dir(pin).join("value"),
            if high { "1" } else { "0" },
        )
    }

    /// Square wave on the buzzer pin by toggling it in software, which is
    /// what a passive buzzer needs to make a sound.
    fn tone(&self, freq_hz: u32, length: Duration) -> Result<()> {
        let period = Duration::from_secs_f64(1.0 / f64::from(freq_hz.max(1)));
        let half = period / 2;
        let end = Instant::now() + length;
        while Instant::now() < end {
            self.write_pin(self.buzzer_pin, true)?;
            thread::sleep(half);
            self.write_pin(self.buzzer_pin, false)?;
            thread::sleep(half);
        }
        Ok(())
    }
}

fn write_sysfs(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|source| NotifyError::Indicator {
        path: path.display().to_string(),
        source,
    })
}

impl LocalIndicator for SysfsGpioIndicator {
    fn set_alarm(&self, on: bool) -> Result<()> {
        self.write_pin(self.led_pin, on)
    }

    fn chime(&self) -> Result<()> {
        // Two-tone 900/1200 Hz pattern, twice
        for _ in 0..2 {
            self.tone(900, Duration::from_millis(200))?;
            thread::sleep(Duration::from_millis(60));
            self.tone(1200, Duration::from_millis(280))?;
            thread::sleep(Duration::from_millis(120));
        }
        self.silence()
    }

    fn silence(&self) -> Result<()> {
        self.write_pin(self.buzzer_pin, false)
    }

    fn kind(&self) -> &str {
        "gpio"
    }
}

/// Indicator for hosts without GPIO: reports changes through the log.
#[derive(Default)]
pub struct LogIndicator {
    alarm_on: AtomicBool,
}

impl LocalIndicator for LogIndicator {
    fn set_alarm(&self, on: bool) -> Result<()> {
        if self.alarm_on.swap(on, Ordering::Relaxed) != on {
            tracing::info!(alarm = on, "Local alarm indicator changed");
        }
        Ok(())
    }

    fn chime(&self) -> Result<()> {
        tracing::info!("Local alarm chime");
        Ok(())
    }

    fn silence(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &str {
        "log"
    }
}

pub struct NoopIndicator;

impl LocalIndicator for NoopIndicator {
    fn set_alarm(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn chime(&self) -> Result<()> {
        Ok(())
    }

    fn silence(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &str {
        "none"
    }
}
