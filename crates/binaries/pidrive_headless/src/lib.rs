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

    lib.rs

    Headless front end: builds the kernel on the simulated board and a drive
    from configuration, then replays a bus trace against it.
*/

#![forbid(unsafe_code)]

pub mod trace;
pub mod watch;

use std::{fmt, path::Path, sync::Arc};

use anyhow::{Context, Error};
use crossbeam_channel::unbounded;

use pidrive_config::ConfigFileParams;
use pidrive_core::{
    bus::{MemoryBus, ROM_WINDOW_SIZE},
    coreconfig::CoreConfig,
    device_types::disk::{D81Image, DiskImageHandle},
    drive::{Drive, DriveCpu},
    iec::IecBus,
    input::KeyRepeater,
    kernel::{sim::SimulatedBoard, Kernel},
};

use crate::{
    trace::{parse_trace, TraceCpu},
    watch::StateWatcher,
};

/// Drive cycles per microsecond of simulated board time.
pub const CYCLES_PER_US: u64 = 2;
/// Cycles to run when no trace is given and no cycle limit is configured.
pub const DEFAULT_IDLE_CYCLES: u64 = 2_000_000;

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub ticks: u32,
    pub ops: usize,
    pub mismatches: usize,
    pub irq_edges: u64,
    pub key_events: usize,
    pub transitions: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycles, {} ticks, {} trace ops ({} mismatches), {} IRQs, {} key events, {} signal transitions",
            self.cycles, self.ticks, self.ops, self.mismatches, self.irq_edges, self.key_events, self.transitions
        )
    }
}

/// Run a trace against a freshly built drive and kernel on the simulated board.
pub fn run_session(
    config: &dyn CoreConfig,
    rom: Vec<u8>,
    image: Option<DiskImageHandle>,
    trace: &str,
) -> Result<RunSummary, Error> {
    let board = Arc::new(SimulatedBoard::new());
    let kernel = Kernel::new(board.clone(), config.get_kernel_config().clone());
    kernel.start();

    let (key_tx, key_rx) = unbounded();
    let keys = KeyRepeater::new(
        kernel.timers().clone(),
        key_tx,
        config.get_input_config(),
        config.get_kernel_config().tick_hz,
    );

    let mut drive = Drive::new(config.get_drive_config(), rom, IecBus::new())?;
    if let Some(image) = image {
        drive.insert(image);
    }

    let mut cpu = TraceCpu::new(parse_trace(trace)?, Some(keys));
    cpu.reset(&mut drive as &mut dyn MemoryBus);
    let idle = cpu.is_empty();
    let limit = config
        .get_max_cycles()
        .unwrap_or(if idle { DEFAULT_IDLE_CYCLES } else { u64::MAX });

    let mut watcher = StateWatcher::new(&drive);
    let mut summary = RunSummary::default();
    let mut half_us = 0;

    while summary.cycles < limit {
        if !idle && cpu.finished() {
            break;
        }
        let cycles = drive.run(&mut cpu, CYCLES_PER_US);
        summary.cycles += cycles;

        half_us += cycles;
        board.advance_us((half_us / CYCLES_PER_US) as u32);
        half_us %= CYCLES_PER_US;
        kernel.irq_entry();

        watcher.observe(&drive, summary.cycles);
        for event in key_rx.try_iter() {
            log::info!("INPUT: Key {} {}", event.key, event.kind);
            summary.key_events += 1;
        }
    }

    summary.ticks = kernel.ticks();
    summary.ops = cpu.executed();
    summary.mismatches = cpu.mismatches();
    summary.irq_edges = cpu.irq_edges();
    summary.transitions = watcher.transitions();
    summary.key_events += key_rx.try_iter().count();
    Ok(summary)
}

fn load_rom(config: &ConfigFileParams) -> Result<Vec<u8>, Error> {
    match config.get_rom_path() {
        Some(path) => {
            let path = config.resolve_path(path);
            std::fs::read(&path).with_context(|| format!("Reading ROM {}", path.display()))
        }
        None => {
            log::warn!("No ROM configured, using an empty ROM");
            Ok(vec![0xFF; ROM_WINDOW_SIZE])
        }
    }
}

fn load_image(config: &ConfigFileParams) -> Result<DiskImageHandle, Error> {
    let image = match config.get_image_path() {
        Some(path) => {
            let path = config.resolve_path(path);
            let data = std::fs::read(&path).with_context(|| format!("Reading disk image {}", path.display()))?;
            D81Image::new(data).with_context(|| format!("Loading disk image {}", path.display()))?
        }
        None => D81Image::blank(),
    };
    Ok(image.with_read_only(config.get_write_protect()).into_handle())
}

fn read_trace(config: &ConfigFileParams) -> Result<String, Error> {
    match config.get_trace_file() {
        Some(path) => {
            let path = config.resolve_path(path);
            std::fs::read_to_string(&path).with_context(|| format!("Reading trace {}", path.display()))
        }
        None => Ok(String::new()),
    }
}

pub fn run_config(config: &ConfigFileParams) -> Result<RunSummary, Error> {
    let rom = load_rom(config)?;
    let image = load_image(config)?;
    let trace = read_trace(config)?;
    run_session(config, rom, Some(image), &trace)
}

pub fn run() {
    env_logger::init();

    let config = match pidrive_config::read_config_file(Path::new("./pidrive.toml")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read configuration:\n{:#}", e);
            std::process::exit(1);
        }
    };

    match run_config(&config) {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            log::error!("Run failed: {:?}", e);
            eprintln!("Run failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidrive_config::{read_config, CmdLineArgs};

    fn config(toml: &str) -> ConfigFileParams {
        read_config(toml, CmdLineArgs::default()).unwrap()
    }

    fn blank() -> Option<DiskImageHandle> {
        Some(D81Image::blank().into_handle())
    }

    #[test]
    fn test_trace_checks_memory_map() {
        let trace = "W 0100 A5\nR 0100 A5\nR 3000 30\nW 8000 00\nR 8000 FF\n";
        let summary = run_session(&config(""), vec![0xFF; ROM_WINDOW_SIZE], blank(), trace).unwrap();
        assert_eq!(summary.ops, 5);
        assert_eq!(summary.mismatches, 0);

        let summary = run_session(&config(""), vec![0xFF; ROM_WINDOW_SIZE], blank(), "R 3000 31\n").unwrap();
        assert_eq!(summary.mismatches, 1);
    }

    #[test]
    fn test_motor_trace_reaches_ready() {
        // Motor and activity LED as outputs, motor on, then LED on.
        let trace = "W 4002 44\nW 4000 40\nC 250000\nR 4000 61\n";
        let summary = run_session(&config(""), vec![0xFF; ROM_WINDOW_SIZE], blank(), trace).unwrap();
        assert_eq!(summary.mismatches, 0);
        assert!(summary.transitions >= 3);
        assert!(summary.ticks > 0);
    }

    #[test]
    fn test_key_repeat_from_trace() {
        let trace = "P 5\nC 1300000\nU 5\n";
        let summary = run_session(&config(""), vec![0xFF; ROM_WINDOW_SIZE], blank(), trace).unwrap();
        // Press, repeats at 500 ms and 600 ms, release.
        assert_eq!(summary.key_events, 4);
        assert_eq!(summary.ticks, 65);
    }

    #[test]
    fn test_idle_run_honours_max_cycles() {
        let summary = run_session(
            &config("[headless]\nmax_cycles = 40000\n"),
            vec![0xFF; ROM_WINDOW_SIZE],
            None,
            "",
        )
        .unwrap();
        assert_eq!(summary.cycles, 40_000);
        assert_eq!(summary.ticks, 2);
    }

    #[test]
    fn test_bad_trace_is_an_error() {
        assert!(run_session(&config(""), vec![0xFF; ROM_WINDOW_SIZE], None, "W 4000\n").is_err());
    }
}
