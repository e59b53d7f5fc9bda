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

    iec.rs

    The drive side of the Commodore serial bus: line levels, the port B
    interface with its ATN acknowledge logic, and the fast serial transceiver.
*/

use strum_macros::{Display, EnumIter};

pub const PORTB_DATA_IN: u8 = 0b0000_0001;
pub const PORTB_DATA_OUT: u8 = 0b0000_0010;
pub const PORTB_CLOCK_IN: u8 = 0b0000_0100;
pub const PORTB_CLOCK_OUT: u8 = 0b0000_1000;
pub const PORTB_ATNA_OUT: u8 = 0b0001_0000;
pub const PORTB_FAST_SER_DIR: u8 = 0b0010_0000;
pub const PORTB_WPAT: u8 = 0b0100_0000;
pub const PORTB_ATN_IN: u8 = 0b1000_0000;

/// Port B bits driven from the bus side.
pub const PORTB_BUS_INPUTS: u8 = PORTB_DATA_IN | PORTB_CLOCK_IN | PORTB_ATN_IN;

/// The open-collector lines of the Commodore serial bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum IecLine {
    Atn,
    Clock,
    Data,
    Srq,
}

impl IecLine {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Direction of the fast serial transceiver between the CIA's SP/CNT pins and the bus.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display)]
pub enum FastSerialDirection {
    #[default]
    In,
    Out,
}

/// The physical bus as seen from the drive.
///
/// Levels are electrical: `true` is high (released), `false` is low (asserted).
pub trait BusLines {
    /// Resolved level of `line` with every participant's contribution applied.
    fn level(&self, line: IecLine) -> bool;
    /// Set the drive's own contribution to `line`. Driving high releases the line.
    fn drive(&mut self, line: IecLine, level: bool);
}

/// Wired-AND model of the bus with one host and this drive attached.
#[derive(Clone, Debug)]
pub struct IecBus {
    host:  [bool; 4],
    drive: [bool; 4],
}

impl Default for IecBus {
    fn default() -> Self {
        Self {
            host:  [true; 4],
            drive: [true; 4],
        }
    }
}

impl IecBus {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_host_level(&mut self, line: IecLine, level: bool) {
        self.host[line.index()] = level;
    }

    pub fn host_level(&self, line: IecLine) -> bool {
        self.host[line.index()]
    }

    /// The drive's own contribution to `line`.
    pub fn drive_level(&self, line: IecLine) -> bool {
        self.drive[line.index()]
    }
}

impl BusLines for IecBus {
    fn level(&self, line: IecLine) -> bool {
        self.host[line.index()] && self.drive[line.index()]
    }

    fn drive(&mut self, line: IecLine, level: bool) {
        self.drive[line.index()] = level;
    }
}

/// Translates between CIA port B and the bus, including the ATN acknowledge logic
/// and the fast serial transceiver.
#[derive(Clone, Debug, Default)]
pub struct SerialBusAdapter {
    data_out: bool,
    clock_out: bool,
    atna_out: bool,
    fast_data: bool,
}

impl SerialBusAdapter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Release every line the drive could be holding.
    pub fn reset(&mut self, bus: &mut impl BusLines) {
        *self = Default::default();
        bus.drive(IecLine::Srq, true);
        self.refresh_outputs(bus);
    }

    /// Latch a new port B output value. DATA OUT, CLOCK OUT and ATNA are inverted
    /// onto the bus, so a high bit pulls the line low.
    pub fn port_b_out(&mut self, value: u8, bus: &mut impl BusLines) {
        self.data_out = value & PORTB_DATA_OUT != 0;
        self.clock_out = value & PORTB_CLOCK_OUT != 0;
        self.atna_out = value & PORTB_ATNA_OUT != 0;
        self.refresh_outputs(bus);
    }

    /// Recompute the drive's DATA and CLOCK contributions. DATA is also pulled while
    /// ATN and ATNA disagree, which acknowledges ATN in hardware.
    pub fn refresh_outputs(&self, bus: &mut impl BusLines) {
        let atn_asserted = !bus.level(IecLine::Atn);
        let pull_data = self.data_out || self.fast_data || (self.atna_out != atn_asserted);
        bus.drive(IecLine::Data, !pull_data);
        bus.drive(IecLine::Clock, !self.clock_out);
    }

    /// Bus state as read back on port B. Asserted lines read as 1.
    pub fn port_b_inputs(&self, bus: &impl BusLines) -> u8 {
        let mut value = 0;
        if !bus.level(IecLine::Data) {
            value |= PORTB_DATA_IN;
        }
        if !bus.level(IecLine::Clock) {
            value |= PORTB_CLOCK_IN;
        }
        if !bus.level(IecLine::Atn) {
            value |= PORTB_ATN_IN;
        }
        value
    }

    /// Fast serial output: SP drives DATA through an inverter, CNT drives SRQ directly.
    pub fn drive_fast_serial(&mut self, sp: bool, cnt: bool, bus: &mut impl BusLines) {
        self.fast_data = sp;
        bus.drive(IecLine::Srq, cnt);
        self.refresh_outputs(bus);
    }

    /// Fast serial input: release the transceiver's outputs and return the (SP, CNT)
    /// levels to present to the CIA. DATA arrives inverted, SRQ does not.
    pub fn sample_fast_serial(&mut self, bus: &mut impl BusLines) -> (bool, bool) {
        if self.fast_data {
            self.fast_data = false;
            self.refresh_outputs(bus);
        }
        bus.drive(IecLine::Srq, true);
        (!bus.level(IecLine::Data), bus.level(IecLine::Srq))
    }
}
