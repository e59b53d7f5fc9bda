/*
    PiDrive

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    drive_config.rs

    Configuration structures for the drive, kernel and input subsystems.
    These are deserialized from the [drive], [kernel] and [input] tables of
    the configuration file.
*/

use std::path::PathBuf;

use anyhow::{bail, Error};
use serde_derive::Deserialize;

use crate::kernel::{systimer::SYSTIMER_TICK_CHANNEL, HZ};

pub const DEFAULT_DEVICE_NUMBER: u8 = 8;
pub const DEFAULT_RAM_SIZE: usize = 0x2000;
pub const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

fn _default_true() -> bool {
    true
}
fn _default_device_number() -> u8 {
    DEFAULT_DEVICE_NUMBER
}
fn _default_ram_size() -> usize {
    DEFAULT_RAM_SIZE
}
fn _default_tick_hz() -> u32 {
    HZ
}
fn _default_clock_hz() -> u32 {
    DEFAULT_CLOCK_HZ
}
fn _default_systimer_channel() -> usize {
    SYSTIMER_TICK_CHANNEL
}
fn _default_repeat_delay_ms() -> u32 {
    500
}
fn _default_repeat_rate_ms() -> u32 {
    100
}

#[derive(Clone, Debug, Deserialize)]
pub struct DriveConfiguration {
    #[serde(default = "_default_device_number")]
    pub device_number: u8,
    #[serde(default)]
    pub write_protect: bool,
    #[serde(default = "_default_ram_size")]
    pub ram_size: usize,
    #[serde(default)]
    pub rom: Option<PathBuf>,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl Default for DriveConfiguration {
    fn default() -> Self {
        Self {
            device_number: DEFAULT_DEVICE_NUMBER,
            write_protect: false,
            ram_size: DEFAULT_RAM_SIZE,
            rom: None,
            image: None,
        }
    }
}

impl DriveConfiguration {
    pub fn validate(&self) -> Result<(), Error> {
        if !(8..=11).contains(&self.device_number) {
            bail!("Device number {} out of range (8-11)", self.device_number);
        }
        if !self.ram_size.is_power_of_two() || self.ram_size > DEFAULT_RAM_SIZE {
            bail!(
                "RAM size {:#X} must be a power of two no larger than {:#X}",
                self.ram_size,
                DEFAULT_RAM_SIZE
            );
        }
        Ok(())
    }

    /// Value of the two device-number jumpers as seen on CIA port A.
    pub fn device_switches(&self) -> u8 {
        self.device_number.wrapping_sub(DEFAULT_DEVICE_NUMBER) & 0x03
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct KernelConfiguration {
    #[serde(default = "_default_tick_hz")]
    pub tick_hz: u32,
    #[serde(default = "_default_clock_hz")]
    pub clock_hz: u32,
    #[serde(default = "_default_systimer_channel")]
    pub systimer_channel: usize,
}

impl Default for KernelConfiguration {
    fn default() -> Self {
        Self {
            tick_hz: HZ,
            clock_hz: DEFAULT_CLOCK_HZ,
            systimer_channel: SYSTIMER_TICK_CHANNEL,
        }
    }
}

impl KernelConfiguration {
    pub fn validate(&self) -> Result<(), Error> {
        if self.tick_hz == 0 || self.tick_hz > self.clock_hz {
            bail!("Tick rate {} Hz invalid for a {} Hz timer", self.tick_hz, self.clock_hz);
        }
        if self.systimer_channel >= crate::kernel::hardware::SYSTIMER_CHANNELS {
            bail!("System timer channel {} out of range", self.systimer_channel);
        }
        Ok(())
    }

    /// Length of one tick in system timer counts.
    pub fn tick_period(&self) -> u32 {
        self.clock_hz / self.tick_hz
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ButtonConfiguration {
    pub pin: u32,
    pub key: u8,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InputConfiguration {
    #[serde(default = "_default_true")]
    pub repeat: bool,
    #[serde(default = "_default_repeat_delay_ms")]
    pub repeat_delay_ms: u32,
    #[serde(default = "_default_repeat_rate_ms")]
    pub repeat_rate_ms: u32,
    #[serde(default)]
    pub buttons: Vec<ButtonConfiguration>,
}

impl Default for InputConfiguration {
    fn default() -> Self {
        Self {
            repeat: true,
            repeat_delay_ms: _default_repeat_delay_ms(),
            repeat_rate_ms: _default_repeat_rate_ms(),
            buttons: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let drive: DriveConfiguration = toml::from_str("").unwrap();
        assert_eq!(drive.device_number, 8);
        assert_eq!(drive.ram_size, 0x2000);
        assert!(drive.validate().is_ok());

        let kernel: KernelConfiguration = toml::from_str("").unwrap();
        assert_eq!(kernel.tick_period(), 10_000);

        let input: InputConfiguration = toml::from_str("").unwrap();
        assert!(input.repeat);
        assert_eq!(input.repeat_delay_ms, 500);
    }

    #[test]
    fn test_device_number_validation() {
        let mut drive = DriveConfiguration::default();
        drive.device_number = 11;
        assert!(drive.validate().is_ok());
        assert_eq!(drive.device_switches(), 3);
        drive.device_number = 12;
        assert!(drive.validate().is_err());
        drive.device_number = 7;
        assert!(drive.validate().is_err());
    }

    #[test]
    fn test_buttons() {
        let input: InputConfiguration = toml::from_str(
            r#"
            repeat_rate_ms = 50
            buttons = [ { pin = 17, key = 1 }, { pin = 27, key = 2 } ]
            "#,
        )
        .unwrap();
        assert_eq!(input.repeat_rate_ms, 50);
        assert_eq!(input.buttons.len(), 2);
        assert_eq!(input.buttons[1].pin, 27);
    }
}
