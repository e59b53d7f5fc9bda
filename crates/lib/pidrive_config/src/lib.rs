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

    pidrive_config::lib.rs

    Routines to parse the configuration file and command line arguments.
*/

#[cfg(feature = "use_bpaf")]
mod bpaf_config;
mod coreconfig;

use std::path::{Path, PathBuf};

#[cfg(feature = "use_bpaf")]
pub use bpaf_config::CmdLineArgs;
#[cfg(feature = "use_bpaf")]
use bpaf_config::cli_args;

use cfg_if::cfg_if;
use pidrive_core::drive_config::{DriveConfiguration, InputConfiguration, KernelConfiguration};
use serde_derive::Deserialize;

/// Command line arguments stand-in when argument parsing is compiled out.
#[cfg(not(feature = "use_bpaf"))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    pub config_file: Option<PathBuf>,
    pub base_dir: Option<PathBuf>,
    pub trace: Option<PathBuf>,
    pub device_number: Option<u8>,
    pub image: Option<PathBuf>,
    pub rom: Option<PathBuf>,
    pub max_cycles: Option<u64>,
    pub write_protect: bool,
}

fn _default_basedir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize)]
pub struct Emulator {
    #[serde(default = "_default_basedir")]
    pub basedir: PathBuf,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            basedir: _default_basedir(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Headless {
    pub trace: Option<PathBuf>,
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub emulator: Emulator,
    #[serde(default)]
    pub drive: DriveConfiguration,
    #[serde(default)]
    pub kernel: KernelConfiguration,
    #[serde(default)]
    pub input: InputConfiguration,
    #[serde(default)]
    pub headless: Headless,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(basedir) = shell_args.base_dir {
            self.emulator.basedir = basedir;
        }
        if let Some(trace) = shell_args.trace {
            self.headless.trace = Some(trace);
        }
        if let Some(max_cycles) = shell_args.max_cycles {
            self.headless.max_cycles = Some(max_cycles);
        }
        if let Some(device_number) = shell_args.device_number {
            self.drive.device_number = device_number;
        }
        if let Some(image) = shell_args.image {
            self.drive.image = Some(image);
        }
        if let Some(rom) = shell_args.rom {
            self.drive.rom = Some(rom);
        }
        self.drive.write_protect |= shell_args.write_protect;
    }

    /// Resolve a configured path against the base directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.emulator.basedir.join(path)
    }
}

/// Parse a TOML configuration string, overlay command line arguments and validate the result.
pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);

    toml_args.drive.validate()?;
    toml_args.kernel.validate()?;
    Ok(toml_args)
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
///
/// A missing default configuration file is not an error; defaults are used instead. A missing
/// file named with `--config_file` is.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let toml_string = if let Some(configfile_path) = shell_args.config_file.as_ref() {
        std::fs::read_to_string(configfile_path)?
    }
    else if default_path.as_ref().exists() {
        std::fs::read_to_string(default_path)?
    }
    else {
        log::warn!(
            "Configuration file {} not found, using defaults",
            default_path.as_ref().display()
        );
        String::new()
    };

    read_config(toml_string, shell_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidrive_core::coreconfig::CoreConfig;

    const SAMPLE: &str = r#"
[emulator]
basedir = "/srv/pidrive"

[drive]
device_number = 9
image = "disks/work.d81"

[kernel]
tick_hz = 200

[input]
repeat_delay_ms = 250

[[input.buttons]]
pin = 17
key = 1

[headless]
max_cycles = 1000000
"#;

    #[test]
    fn test_read_config() {
        let config = read_config(SAMPLE, CmdLineArgs::default()).unwrap();
        assert_eq!(config.get_device_number(), 9);
        assert_eq!(config.get_kernel_config().tick_hz, 200);
        assert_eq!(config.get_kernel_config().tick_period(), 5_000);
        assert_eq!(config.get_input_config().repeat_delay_ms, 250);
        assert_eq!(config.get_input_config().buttons.len(), 1);
        assert_eq!(config.get_max_cycles(), Some(1_000_000));
        assert_eq!(config.get_trace_file(), None);
        assert_eq!(
            config.resolve_path(config.get_image_path().unwrap()),
            PathBuf::from("/srv/pidrive/disks/work.d81")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = read_config("", CmdLineArgs::default()).unwrap();
        assert_eq!(config.get_device_number(), 8);
        assert_eq!(config.get_base_dir(), PathBuf::from("."));
        assert!(!config.get_write_protect());
        assert!(config.get_rom_path().is_none());
    }

    #[test]
    fn test_command_line_overrides_file() {
        let args = CmdLineArgs {
            device_number: Some(11),
            trace: Some(PathBuf::from("boot.trace")),
            write_protect: true,
            max_cycles: Some(42),
            ..Default::default()
        };
        let config = read_config(SAMPLE, args).unwrap();
        assert_eq!(config.get_device_number(), 11);
        assert_eq!(config.get_trace_file(), Some(PathBuf::from("boot.trace")));
        assert!(config.get_write_protect());
        assert_eq!(config.get_max_cycles(), Some(42));
    }

    #[test]
    fn test_invalid_device_rejected() {
        let args = CmdLineArgs {
            device_number: Some(4),
            ..Default::default()
        };
        assert!(read_config("", args).is_err());
        assert!(read_config("[kernel]\ntick_hz = 0\n", CmdLineArgs::default()).is_err());
    }
}
