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

    devices::cia.rs

    Implements the MOS 8520 Complex Interface Adapter: two parallel ports,
    two interval timers, the serial shift register, the 24-bit event counter
    and the interrupt control register.
*/

use modular_bitfield::{bitfield, BitfieldSpecifier};
use strum_macros::Display;

pub const CIA_PRA: u8 = 0x00;
pub const CIA_PRB: u8 = 0x01;
pub const CIA_DDRA: u8 = 0x02;
pub const CIA_DDRB: u8 = 0x03;
pub const CIA_TALO: u8 = 0x04;
pub const CIA_TAHI: u8 = 0x05;
pub const CIA_TBLO: u8 = 0x06;
pub const CIA_TBHI: u8 = 0x07;
pub const CIA_TOD_LSB: u8 = 0x08;
pub const CIA_TOD_MID: u8 = 0x09;
pub const CIA_TOD_MSB: u8 = 0x0A;
pub const CIA_TOD_UNUSED: u8 = 0x0B;
pub const CIA_SDR: u8 = 0x0C;
pub const CIA_ICR: u8 = 0x0D;
pub const CIA_CRA: u8 = 0x0E;
pub const CIA_CRB: u8 = 0x0F;

pub const ICR_TIMER_A: u8 = 0b0000_0001;
pub const ICR_TIMER_B: u8 = 0b0000_0010;
pub const ICR_ALARM: u8 = 0b0000_0100;
pub const ICR_SERIAL: u8 = 0b0000_1000;
pub const ICR_FLAG: u8 = 0b0001_0000;
pub const ICR_SOURCES: u8 = 0b0001_1111;
/// On read: an enabled source is active. On write: set (1) or clear (0) the given mask bits.
pub const ICR_IR: u8 = 0b1000_0000;

const PB_TIMER_A: u8 = 0b0100_0000;
const PB_TIMER_B: u8 = 0b1000_0000;

const TOD_MASK: u32 = 0x00FF_FFFF;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, BitfieldSpecifier)]
pub enum RunMode {
    #[default]
    Continuous,
    OneShot,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, BitfieldSpecifier)]
pub enum SerialMode {
    #[default]
    Input,
    Output,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, BitfieldSpecifier)]
pub enum TimerBInput {
    #[default]
    Phi2,
    Cnt,
    TimerA,
    TimerACnt,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct ControlRegisterA {
    pub start: bool,
    pub pb_on: bool,
    pub toggle: bool,
    pub run_mode: RunMode,
    pub force_load: bool,
    pub count_cnt: bool,
    pub serial_mode: SerialMode,
    pub tod_in: bool,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct ControlRegisterB {
    pub start: bool,
    pub pb_on: bool,
    pub toggle: bool,
    pub run_mode: RunMode,
    pub force_load: bool,
    pub input: TimerBInput,
    pub alarm: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum CiaPortId {
    A,
    B,
}

/// Receives the effective output value of a port whenever it changes.
pub trait PortListener {
    fn on_port_out(&mut self, port: CiaPortId, value: u8);
}

impl<F: FnMut(CiaPortId, u8)> PortListener for F {
    fn on_port_out(&mut self, port: CiaPortId, value: u8) {
        self(port, value)
    }
}

/// One 8-bit parallel port. Pins configured as inputs float high unless the board
/// drives them through the input latch.
#[derive(Clone, Debug)]
pub struct CiaPort {
    pr:    u8,
    ddr:   u8,
    input: u8,
}

impl Default for CiaPort {
    fn default() -> Self {
        Self {
            pr:    0,
            ddr:   0,
            input: 0xFF,
        }
    }
}

impl CiaPort {
    /// Level of each pin as seen from outside the chip.
    pub fn output(&self) -> u8 {
        self.pr | !self.ddr
    }

    /// Value read back from the port register.
    pub fn read(&self) -> u8 {
        (self.pr & self.ddr) | (self.input & !self.ddr)
    }

    pub fn ddr(&self) -> u8 {
        self.ddr
    }

    pub fn input(&self) -> u8 {
        self.input
    }

    /// Drive the input latch bits in `mask` high or low.
    pub fn set_input(&mut self, mask: u8, level: bool) {
        if level {
            self.input |= mask;
        }
        else {
            self.input &= !mask;
        }
    }

    pub fn set_input_byte(&mut self, value: u8) {
        self.input = value;
    }
}

#[derive(Clone, Debug)]
pub struct CiaTimer {
    counter: u16,
    latch: u16,
    // Level of the PB output in toggle mode.
    toggle: bool,
    // High for the cycle following an underflow in pulse mode.
    pulse: bool,
}

impl Default for CiaTimer {
    fn default() -> Self {
        Self {
            counter: 0xFFFF,
            latch: 0xFFFF,
            toggle: false,
            pulse: false,
        }
    }
}

impl CiaTimer {
    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn latch(&self) -> u16 {
        self.latch
    }

    /// Count one event. Returns true on underflow, in which case the counter has been reloaded.
    fn count(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.latch;
            true
        }
        else {
            self.counter -= 1;
            false
        }
    }

    fn underflowed(&mut self) {
        self.toggle = !self.toggle;
        self.pulse = true;
    }

    fn pin(&self, toggle_mode: bool) -> bool {
        if toggle_mode {
            self.toggle
        }
        else {
            self.pulse
        }
    }
}

#[derive(Clone, Debug)]
struct SerialPort {
    sdr: u8,
    shift: u8,
    bits: u8,
    loaded: bool,
    sp_out: bool,
    cnt_out: bool,
    sp_in: bool,
    cnt_in: bool,
}

impl Default for SerialPort {
    fn default() -> Self {
        Self {
            sdr: 0,
            shift: 0,
            bits: 0,
            loaded: false,
            sp_out: true,
            cnt_out: true,
            sp_in: true,
            cnt_in: true,
        }
    }
}

/// The 8520 event counter, a 24-bit binary counter clocked by the TOD pin.
#[derive(Clone, Debug, Default)]
struct EventCounter {
    counter: u32,
    alarm: u32,
    latch: Option<u32>,
    halted: bool,
}

impl EventCounter {
    fn read(&mut self, reg: u8) -> u8 {
        match reg {
            CIA_TOD_MSB => {
                let latched = *self.latch.get_or_insert(self.counter);
                (latched >> 16) as u8
            }
            CIA_TOD_MID => (self.latch.unwrap_or(self.counter) >> 8) as u8,
            _ => self.latch.take().unwrap_or(self.counter) as u8,
        }
    }

    fn write(&mut self, reg: u8, value: u8, alarm: bool) {
        let shift = match reg {
            CIA_TOD_MSB => 16,
            CIA_TOD_MID => 8,
            _ => 0,
        };
        let target = if alarm { &mut self.alarm } else { &mut self.counter };
        *target = (*target & !(0xFF << shift)) | ((value as u32) << shift);
        if !alarm {
            // Writing the MSB stops the counter until the LSB is written.
            self.halted = reg == CIA_TOD_MSB || (self.halted && reg != CIA_TOD_LSB);
        }
    }
}

/// MOS 8520 Complex Interface Adapter.
pub struct Cia8520 {
    port_a: CiaPort,
    port_b: CiaPort,
    last_out_a: u8,
    last_out_b: u8,
    timer_a: CiaTimer,
    timer_b: CiaTimer,
    cra: ControlRegisterA,
    crb: ControlRegisterB,
    serial: SerialPort,
    tod: EventCounter,
    icr_data: u8,
    icr_mask: u8,
    irq: bool,
    flag: bool,
    cnt_edge: bool,
}

impl Default for Cia8520 {
    fn default() -> Self {
        let port_a = CiaPort::default();
        let port_b = CiaPort::default();
        Self {
            last_out_a: port_a.output(),
            last_out_b: port_b.output(),
            port_a,
            port_b,
            timer_a: Default::default(),
            timer_b: Default::default(),
            cra: ControlRegisterA::new(),
            crb: ControlRegisterB::new(),
            serial: Default::default(),
            tod: Default::default(),
            icr_data: 0,
            icr_mask: 0,
            irq: false,
            flag: true,
            cnt_edge: false,
        }
    }
}

impl Cia8520 {
    pub fn new() -> Self {
        Default::default()
    }

    /// Return to power-on state. Port listeners are not notified; the caller is expected to
    /// re-establish whatever state depends on port outputs.
    pub fn reset(&mut self) {
        log::debug!("CIA: Reset");
        *self = Default::default();
    }

    pub fn port_a(&self) -> &CiaPort {
        &self.port_a
    }

    pub fn port_a_mut(&mut self) -> &mut CiaPort {
        &mut self.port_a
    }

    pub fn port_b(&self) -> &CiaPort {
        &self.port_b
    }

    pub fn port_b_mut(&mut self) -> &mut CiaPort {
        &mut self.port_b
    }

    pub fn timer_a(&self) -> &CiaTimer {
        &self.timer_a
    }

    pub fn timer_b(&self) -> &CiaTimer {
        &self.timer_b
    }

    /// State of the /IRQ output.
    pub fn irq(&self) -> bool {
        self.irq
    }

    /// Effective output of port A as seen by the board.
    pub fn port_a_output(&self) -> u8 {
        self.port_a.output()
    }

    /// Effective output of port B, including timer outputs on PB6/PB7 when enabled.
    pub fn port_b_output(&self) -> u8 {
        let mut value = self.port_b.output();
        if self.cra.pb_on() {
            value = (value & !PB_TIMER_A) | if self.timer_a.pin(self.cra.toggle()) { PB_TIMER_A } else { 0 };
        }
        if self.crb.pb_on() {
            value = (value & !PB_TIMER_B) | if self.timer_b.pin(self.crb.toggle()) { PB_TIMER_B } else { 0 };
        }
        value
    }

    pub fn serial_mode(&self) -> SerialMode {
        self.cra.serial_mode()
    }

    /// Level of the SP pin. Released (high) when the serial port is an input.
    pub fn sp_output(&self) -> bool {
        match self.cra.serial_mode() {
            SerialMode::Output => self.serial.sp_out,
            SerialMode::Input => true,
        }
    }

    /// Level of the CNT pin. Released (high) when the serial port is an input.
    pub fn cnt_output(&self) -> bool {
        match self.cra.serial_mode() {
            SerialMode::Output => self.serial.cnt_out,
            SerialMode::Input => true,
        }
    }

    pub fn set_sp_input(&mut self, level: bool) {
        self.serial.sp_in = level;
    }

    /// Drive the CNT pin from outside. Rising edges clock the serial input register and
    /// count for timers configured to count CNT.
    pub fn set_cnt_input(&mut self, level: bool) {
        let rising = level && !self.serial.cnt_in;
        self.serial.cnt_in = level;
        if !rising {
            return;
        }
        self.cnt_edge = true;

        if self.cra.serial_mode() == SerialMode::Input {
            self.serial.shift = (self.serial.shift << 1) | self.serial.sp_in as u8;
            self.serial.bits += 1;
            if self.serial.bits == 8 {
                self.serial.sdr = self.serial.shift;
                self.serial.bits = 0;
                self.raise(ICR_SERIAL);
            }
        }
    }

    /// Drive the /FLAG input. A falling edge sets the FLAG interrupt source.
    pub fn set_flag(&mut self, level: bool) {
        if self.flag && !level {
            self.raise(ICR_FLAG);
        }
        self.flag = level;
    }

    /// Pulse the TOD input once.
    pub fn tod_pulse(&mut self) {
        if self.tod.halted {
            return;
        }
        self.tod.counter = (self.tod.counter + 1) & TOD_MASK;
        if self.tod.counter == self.tod.alarm {
            self.raise(ICR_ALARM);
        }
    }

    fn raise(&mut self, sources: u8) {
        self.icr_data |= sources;
        self.update_irq();
    }

    fn update_irq(&mut self) {
        if !self.irq && (self.icr_data & self.icr_mask & ICR_SOURCES) != 0 {
            self.icr_data |= ICR_IR;
            self.irq = true;
        }
    }

    fn notify_ports(&mut self, listener: &mut dyn PortListener) {
        let out_a = self.port_a_output();
        if out_a != self.last_out_a {
            self.last_out_a = out_a;
            listener.on_port_out(CiaPortId::A, out_a);
        }
        let out_b = self.port_b_output();
        if out_b != self.last_out_b {
            self.last_out_b = out_b;
            listener.on_port_out(CiaPortId::B, out_b);
        }
    }

    /// Read a register without side effects.
    pub fn peek(&self, reg: u8) -> u8 {
        match reg & 0x0F {
            CIA_PRA => self.port_a.read(),
            CIA_PRB => self.read_port_b(),
            CIA_DDRA => self.port_a.ddr,
            CIA_DDRB => self.port_b.ddr,
            CIA_TALO => self.timer_a.counter as u8,
            CIA_TAHI => (self.timer_a.counter >> 8) as u8,
            CIA_TBLO => self.timer_b.counter as u8,
            CIA_TBHI => (self.timer_b.counter >> 8) as u8,
            CIA_TOD_LSB => self.tod.latch.unwrap_or(self.tod.counter) as u8,
            CIA_TOD_MID => (self.tod.latch.unwrap_or(self.tod.counter) >> 8) as u8,
            CIA_TOD_MSB => (self.tod.latch.unwrap_or(self.tod.counter) >> 16) as u8,
            CIA_TOD_UNUSED => 0,
            CIA_SDR => self.serial.sdr,
            CIA_ICR => self.icr_data,
            CIA_CRA => self.cra.into_bytes()[0],
            _ => self.crb.into_bytes()[0],
        }
    }

    fn read_port_b(&self) -> u8 {
        let mut value = self.port_b.read();
        let timer_pins = self.port_b_output();
        if self.cra.pb_on() {
            value = (value & !PB_TIMER_A) | (timer_pins & PB_TIMER_A);
        }
        if self.crb.pb_on() {
            value = (value & !PB_TIMER_B) | (timer_pins & PB_TIMER_B);
        }
        value
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        let reg = reg & 0x0F;
        let value = match reg {
            CIA_TOD_LSB | CIA_TOD_MID | CIA_TOD_MSB => self.tod.read(reg),
            CIA_ICR => {
                let value = self.icr_data;
                self.icr_data = 0;
                self.irq = false;
                value
            }
            _ => self.peek(reg),
        };
        trace_io!("CIA: Read {:02X} from register {:X}", value, reg);
        value
    }

    pub fn write(&mut self, reg: u8, value: u8, listener: &mut dyn PortListener) {
        let reg = reg & 0x0F;
        trace_io!("CIA: Write {:02X} to register {:X}", value, reg);
        match reg {
            CIA_PRA => self.port_a.pr = value,
            CIA_PRB => self.port_b.pr = value,
            CIA_DDRA => self.port_a.ddr = value,
            CIA_DDRB => self.port_b.ddr = value,
            CIA_TALO => self.timer_a.latch = (self.timer_a.latch & 0xFF00) | value as u16,
            CIA_TAHI => {
                self.timer_a.latch = (self.timer_a.latch & 0x00FF) | ((value as u16) << 8);
                if !self.cra.start() {
                    self.timer_a.counter = self.timer_a.latch;
                }
            }
            CIA_TBLO => self.timer_b.latch = (self.timer_b.latch & 0xFF00) | value as u16,
            CIA_TBHI => {
                self.timer_b.latch = (self.timer_b.latch & 0x00FF) | ((value as u16) << 8);
                if !self.crb.start() {
                    self.timer_b.counter = self.timer_b.latch;
                }
            }
            CIA_TOD_LSB | CIA_TOD_MID | CIA_TOD_MSB => self.tod.write(reg, value, self.crb.alarm()),
            CIA_TOD_UNUSED => {}
            CIA_SDR => {
                self.serial.sdr = value;
                if self.cra.serial_mode() == SerialMode::Output {
                    self.serial.loaded = true;
                }
            }
            CIA_ICR => {
                if value & ICR_IR != 0 {
                    self.icr_mask |= value & ICR_SOURCES;
                }
                else {
                    self.icr_mask &= !(value & ICR_SOURCES);
                }
                self.update_irq();
            }
            CIA_CRA => self.write_cra(value),
            _ => self.write_crb(value),
        }
        self.notify_ports(listener);
    }

    fn write_cra(&mut self, value: u8) {
        let mut cra = ControlRegisterA::from_bytes([value]);
        if cra.force_load() {
            self.timer_a.counter = self.timer_a.latch;
            cra.set_force_load(false);
        }
        if cra.start() && !self.cra.start() {
            self.timer_a.toggle = true;
        }
        if cra.serial_mode() != self.cra.serial_mode() {
            self.serial.bits = 0;
            self.serial.loaded = false;
            self.serial.cnt_out = true;
            log::debug!("CIA: Serial port switched to {:?}", cra.serial_mode());
        }
        self.cra = cra;
    }

    fn write_crb(&mut self, value: u8) {
        let mut crb = ControlRegisterB::from_bytes([value]);
        if crb.force_load() {
            self.timer_b.counter = self.timer_b.latch;
            crb.set_force_load(false);
        }
        if crb.start() && !self.crb.start() {
            self.timer_b.toggle = true;
        }
        self.crb = crb;
    }

    /// Advance the chip by one phi2 cycle.
    pub fn execute(&mut self, listener: &mut dyn PortListener) {
        self.timer_a.pulse = false;
        self.timer_b.pulse = false;
        let cnt_edge = std::mem::take(&mut self.cnt_edge);

        let mut ta_underflow = false;
        if self.cra.start() && (!self.cra.count_cnt() || cnt_edge) && self.timer_a.count() {
            ta_underflow = true;
            self.timer_a.underflowed();
            if self.cra.run_mode() == RunMode::OneShot {
                self.cra.set_start(false);
            }
            if self.cra.serial_mode() == SerialMode::Output {
                self.clock_serial_output();
            }
            self.raise(ICR_TIMER_A);
        }

        if self.crb.start() {
            let counts = match self.crb.input() {
                TimerBInput::Phi2 => true,
                TimerBInput::Cnt => cnt_edge,
                TimerBInput::TimerA => ta_underflow,
                TimerBInput::TimerACnt => ta_underflow && self.serial.cnt_in,
            };
            if counts && self.timer_b.count() {
                self.timer_b.underflowed();
                if self.crb.run_mode() == RunMode::OneShot {
                    self.crb.set_start(false);
                }
                self.raise(ICR_TIMER_B);
            }
        }

        self.notify_ports(listener);
    }

    // Each bit takes two timer A underflows: CNT falls and the bit is presented on SP,
    // then CNT rises and the receiver latches it.
    fn clock_serial_output(&mut self) {
        let serial = &mut self.serial;
        if serial.bits == 0 {
            if !serial.loaded {
                return;
            }
            serial.shift = serial.sdr;
            serial.loaded = false;
            serial.bits = 8;
        }

        serial.cnt_out = !serial.cnt_out;
        if !serial.cnt_out {
            serial.sp_out = serial.shift & 0x80 != 0;
            serial.shift <<= 1;
        }
        else {
            serial.bits -= 1;
            if serial.bits == 0 {
                self.raise(ICR_SERIAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore() -> impl FnMut(CiaPortId, u8) {
        |_, _| {}
    }

    #[test]
    fn test_port_direction() {
        let mut cia = Cia8520::new();
        let mut outputs = Vec::new();
        {
            let mut listener = |port: CiaPortId, value: u8| outputs.push((port, value));
            cia.port_a_mut().set_input_byte(0b1010_1010);
            cia.write(CIA_PRA, 0b0000_1111, &mut listener);
            // All inputs still; output unchanged from the floating 0xFF.
            cia.write(CIA_DDRA, 0b0000_0011, &mut listener);
        }
        assert_eq!(cia.read(CIA_PRA), 0b1010_1011);
        assert_eq!(cia.port_a_output(), 0b1111_1111);
        assert!(outputs.is_empty());

        cia.write(CIA_PRA, 0b0000_1110, &mut |port: CiaPortId, value: u8| outputs.push((port, value)));
        assert_eq!(outputs, vec![(CiaPortId::A, 0b1111_1110)]);
    }

    #[test]
    fn test_listener_only_fires_on_change() {
        let mut cia = Cia8520::new();
        let mut count = 0;
        let mut listener = |_: CiaPortId, _: u8| count += 1;
        cia.write(CIA_DDRB, 0xFF, &mut listener);
        cia.write(CIA_PRB, 0x12, &mut listener);
        cia.write(CIA_PRB, 0x12, &mut listener);
        cia.write(CIA_PRB, 0x13, &mut listener);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_timer_a_one_shot_interrupt() {
        let mut cia = Cia8520::new();
        let mut listener = ignore();
        cia.write(CIA_ICR, ICR_IR | ICR_TIMER_A, &mut listener);
        cia.write(CIA_TALO, 3, &mut listener);
        cia.write(CIA_TAHI, 0, &mut listener);
        cia.write(CIA_CRA, 0b0000_1001, &mut listener);

        for _ in 0..3 {
            cia.execute(&mut listener);
        }
        assert!(!cia.irq());
        cia.execute(&mut listener);
        assert!(cia.irq());
        assert_eq!(cia.timer_a().counter(), 3);
        assert_eq!(cia.peek(CIA_CRA) & 0x01, 0);

        assert_eq!(cia.read(CIA_ICR), ICR_IR | ICR_TIMER_A);
        assert!(!cia.irq());
        assert_eq!(cia.read(CIA_ICR), 0);
    }

    #[test]
    fn test_masked_source_latches_without_irq() {
        let mut cia = Cia8520::new();
        cia.set_flag(false);
        assert!(!cia.irq());
        assert_eq!(cia.peek(CIA_ICR), ICR_FLAG);

        // Unmasking an already-latched source asserts IRQ.
        cia.write(CIA_ICR, ICR_IR | ICR_FLAG, &mut ignore());
        assert!(cia.irq());
    }

    #[test]
    fn test_flag_triggers_on_falling_edge_only() {
        let mut cia = Cia8520::new();
        cia.set_flag(true);
        assert_eq!(cia.peek(CIA_ICR), 0);
        cia.set_flag(false);
        cia.set_flag(false);
        assert_eq!(cia.read(CIA_ICR), ICR_FLAG);
        cia.set_flag(true);
        assert_eq!(cia.peek(CIA_ICR), 0);
    }

    #[test]
    fn test_timer_b_counts_timer_a() {
        let mut cia = Cia8520::new();
        let mut listener = ignore();
        cia.write(CIA_TALO, 1, &mut listener);
        cia.write(CIA_TAHI, 0, &mut listener);
        cia.write(CIA_TBLO, 2, &mut listener);
        cia.write(CIA_TBHI, 0, &mut listener);
        cia.write(CIA_CRB, 0b0100_0001, &mut listener);
        cia.write(CIA_CRA, 0b0000_0001, &mut listener);

        // Timer A underflows every second cycle; timer B underflows on A's third underflow.
        for _ in 0..5 {
            cia.execute(&mut listener);
        }
        assert_eq!(cia.peek(CIA_ICR) & ICR_TIMER_B, 0);
        cia.execute(&mut listener);
        assert_ne!(cia.peek(CIA_ICR) & ICR_TIMER_B, 0);
    }

    #[test]
    fn test_pb6_toggle_output() {
        let mut cia = Cia8520::new();
        let mut listener = ignore();
        cia.write(CIA_TALO, 0, &mut listener);
        cia.write(CIA_TAHI, 0, &mut listener);
        cia.write(CIA_DDRB, 0xFF, &mut listener);

        let mut seen = Vec::new();
        let mut record = |port: CiaPortId, value: u8| seen.push((port, value));
        cia.write(CIA_CRA, 0b0000_0111, &mut record);
        cia.execute(&mut record);
        cia.execute(&mut record);
        assert_eq!(
            seen,
            vec![(CiaPortId::B, 0b0100_0000), (CiaPortId::B, 0b0000_0000), (CiaPortId::B, 0b0100_0000)]
        );
    }

    #[test]
    fn test_serial_output_shifts_msb_first() {
        let mut cia = Cia8520::new();
        let mut listener = ignore();
        cia.write(CIA_TALO, 0, &mut listener);
        cia.write(CIA_TAHI, 0, &mut listener);
        cia.write(CIA_CRA, 0b0100_0001, &mut listener);
        assert!(cia.cnt_output());
        cia.write(CIA_SDR, 0b1010_0000, &mut listener);

        let mut bits = Vec::new();
        for _ in 0..16 {
            let cnt_before = cia.cnt_output();
            cia.execute(&mut listener);
            if cnt_before && !cia.cnt_output() {
                bits.push(cia.sp_output());
            }
        }
        assert_eq!(bits, vec![true, false, true, false, false, false, false, false]);
        assert!(cia.cnt_output());
        assert_ne!(cia.read(CIA_ICR) & ICR_SERIAL, 0);
    }

    #[test]
    fn test_serial_input_on_cnt_rising_edges() {
        let mut cia = Cia8520::new();
        for bit in [true, true, false, false, true, false, true, true] {
            cia.set_cnt_input(false);
            cia.set_sp_input(bit);
            cia.set_cnt_input(true);
        }
        assert_eq!(cia.read(CIA_SDR), 0b1100_1011);
        assert_ne!(cia.read(CIA_ICR) & ICR_SERIAL, 0);
        // Released pins while in input mode.
        assert!(cia.sp_output());
        assert!(cia.cnt_output());
    }

    #[test]
    fn test_event_counter_latch_and_alarm() {
        let mut cia = Cia8520::new();
        let mut listener = ignore();
        cia.write(CIA_CRB, 0x80, &mut listener);
        cia.write(CIA_TOD_LSB, 3, &mut listener);
        cia.write(CIA_CRB, 0x00, &mut listener);
        cia.write(CIA_ICR, ICR_IR | ICR_ALARM, &mut listener);

        cia.tod_pulse();
        cia.tod_pulse();
        assert_eq!(cia.read(CIA_TOD_MSB), 0);
        cia.tod_pulse();
        // Latched at 2 until the LSB is read.
        assert_eq!(cia.read(CIA_TOD_LSB), 2);
        assert_eq!(cia.read(CIA_TOD_LSB), 3);
        assert!(cia.irq());

        cia.write(CIA_TOD_MSB, 0, &mut listener);
        cia.tod_pulse();
        assert_eq!(cia.read(CIA_TOD_LSB), 3);
        cia.write(CIA_TOD_LSB, 0, &mut listener);
        cia.tod_pulse();
        assert_eq!(cia.read(CIA_TOD_LSB), 1);
    }
}
