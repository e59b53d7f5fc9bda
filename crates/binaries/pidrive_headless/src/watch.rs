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

    watch.rs

    Drive signal transition logging for the headless front end.
*/

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use pidrive_core::{
    drive::Drive,
    iec::{BusLines, IecLine},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum Signal {
    Led,
    PowerLed,
    Motor,
    Rdy,
    Irq,
    Atn,
    Clock,
    Data,
    Srq,
}

impl Signal {
    fn sample<L: BusLines>(self, drive: &Drive<L>) -> bool {
        match self {
            Signal::Led => drive.led(),
            Signal::PowerLed => drive.power_led(),
            Signal::Motor => drive.motor_asserted(),
            Signal::Rdy => drive.rdy_asserted(),
            Signal::Irq => drive.irq_asserted(),
            Signal::Atn => drive.bus().level(IecLine::Atn),
            Signal::Clock => drive.bus().level(IecLine::Clock),
            Signal::Data => drive.bus().level(IecLine::Data),
            Signal::Srq => drive.bus().level(IecLine::Srq),
        }
    }
}

/// Logs changes of the drive's externally visible signals.
pub struct StateWatcher {
    last: Vec<(Signal, bool)>,
    transitions: u64,
}

impl StateWatcher {
    pub fn new<L: BusLines>(drive: &Drive<L>) -> Self {
        Self {
            last: Signal::iter().map(|s| (s, s.sample(drive))).collect(),
            transitions: 0,
        }
    }

    pub fn observe<L: BusLines>(&mut self, drive: &Drive<L>, cycle: u64) {
        for (signal, level) in self.last.iter_mut() {
            let new_level = signal.sample(drive);
            if new_level != *level {
                log::info!("DRIVE: [{}] {} {} -> {}", cycle, signal, *level as u8, new_level as u8);
                *level = new_level;
                self.transitions += 1;
            }
        }
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn level(&self, signal: Signal) -> Option<bool> {
        self.last.iter().find(|(s, _)| *s == signal).map(|(_, level)| *level)
    }
}
