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

    drive.rs

    The 1581 board: wires the CIA ports to the WD177x, the serial bus adapter
    and the motor/RDY logic, and steps every device in a fixed order.

    Port A: PA0 SIDE, PA1 /RDY, PA2 /MOTOR, PA3-4 device number, PA5 power LED,
    PA6 activity LED, PA7 /DISK CHANGE.
*/

use anyhow::Error;

use crate::{
    bus::{self, BusRegion, DriveMemory, MemoryBus},
    device_types::disk::DiskImageHandle,
    devices::{
        cia::{Cia8520, CiaPortId, PortListener},
        wd177x::Wd177x,
    },
    drive_config::DriveConfiguration,
    iec::{
        BusLines,
        FastSerialDirection,
        IecBus,
        IecLine,
        SerialBusAdapter,
        PORTB_ATNA_OUT,
        PORTB_BUS_INPUTS,
        PORTB_CLOCK_OUT,
        PORTB_DATA_OUT,
        PORTB_FAST_SER_DIR,
        PORTB_WPAT,
    },
};

pub const PORTA_SIDE: u8 = 0b0000_0001;
pub const PORTA_RDY: u8 = 0b0000_0010;
pub const PORTA_MOTOR: u8 = 0b0000_0100;
pub const PORTA_DEVICE: u8 = 0b0001_1000;
pub const PORTA_DEVICE_SHIFT: u8 = 3;
pub const PORTA_POWER_LED: u8 = 0b0010_0000;
pub const PORTA_ACT_LED: u8 = 0b0100_0000;
pub const PORTA_DISK_CHANGE: u8 = 0b1000_0000;

/// Updates between motor assertion and /RDY going low.
pub const RDY_DELAY: u32 = 250_000;
/// The WD177x runs at four times the CIA's clock.
pub const FDC_EXECUTES_PER_UPDATE: u32 = 4;

#[derive(Clone, Debug, Default)]
pub struct DriveState {
    pub led: bool,
    pub power_led: bool,
    pub fast_serial_direction: FastSerialDirection,
    pub rdy_delay_counter: u32,
}

/// Routes CIA port outputs to the rest of the board while the CIA is borrowed.
struct PortWiring<'a, L: BusLines> {
    fdc:    &'a mut Wd177x,
    serial: &'a mut SerialBusAdapter,
    bus:    &'a mut L,
    state:  &'a mut DriveState,
    /// New level for the /RDY input, applied once the CIA is released.
    rdy_request: Option<bool>,
}

impl<L: BusLines> PortWiring<'_, L> {
    fn port_a_out(&mut self, value: u8) {
        self.fdc.set_side(value & PORTA_SIDE != 0);

        let motor = value & PORTA_MOTOR == 0;
        if motor && !self.fdc.external_motor_asserted() {
            log::debug!("DRIVE: Motor on");
            self.fdc.assert_external_motor(true);
            self.state.rdy_delay_counter = RDY_DELAY;
            self.rdy_request = Some(true);
        }
        else if !motor {
            if self.fdc.external_motor_asserted() {
                log::debug!("DRIVE: Motor off");
                self.fdc.assert_external_motor(false);
            }
            self.state.rdy_delay_counter = 0;
            self.rdy_request = Some(true);
        }

        self.state.led = value & PORTA_ACT_LED != 0;
        self.state.power_led = value & PORTA_POWER_LED != 0;
    }

    fn port_b_out(&mut self, value: u8) {
        self.fdc.set_write_protect_pin(value & PORTB_WPAT != 0);

        let direction = if value & PORTB_FAST_SER_DIR != 0 {
            FastSerialDirection::Out
        }
        else {
            FastSerialDirection::In
        };
        if direction != self.state.fast_serial_direction {
            log::trace!("DRIVE: Fast serial direction {}", direction);
            self.state.fast_serial_direction = direction;
        }

        self.serial.port_b_out(value, &mut *self.bus);
    }
}

impl<L: BusLines> PortListener for PortWiring<'_, L> {
    fn on_port_out(&mut self, port: CiaPortId, value: u8) {
        match port {
            CiaPortId::A => self.port_a_out(value),
            CiaPortId::B => self.port_b_out(value),
        }
    }
}

/// The interface a 6502 core presents to [`Drive::run`].
pub trait DriveCpu {
    fn reset(&mut self, bus: &mut dyn MemoryBus);
    /// Execute one instruction and return the cycles it took.
    fn step(&mut self, bus: &mut dyn MemoryBus) -> u32;
    fn set_irq(&mut self, asserted: bool);
}

/// A 1581 board: memory, CIA, floppy controller and the serial bus interface.
pub struct Drive<L: BusLines = IecBus> {
    memory: DriveMemory,
    cia:    Cia8520,
    fdc:    Wd177x,
    serial: SerialBusAdapter,
    bus:    L,
    state:  DriveState,
    device_switches: u8,
}

impl<L: BusLines> Drive<L> {
    pub fn new(config: &DriveConfiguration, rom: Vec<u8>, bus: L) -> Result<Self, Error> {
        config.validate()?;
        let memory = DriveMemory::new(config.ram_size, rom)?;

        let mut drive = Self {
            memory,
            cia: Cia8520::new(),
            fdc: Wd177x::new(),
            serial: SerialBusAdapter::new(),
            bus,
            state: Default::default(),
            device_switches: config.device_switches(),
        };
        drive.reset();
        Ok(drive)
    }

    pub fn reset(&mut self) {
        log::debug!("DRIVE: Reset");
        self.state.fast_serial_direction = FastSerialDirection::In;
        self.state.rdy_delay_counter = 0;
        self.state.led = false;
        self.state.power_led = false;

        let disk_change = self.cia.port_a().input() & PORTA_DISK_CHANGE;
        self.cia.reset();
        self.fdc.reset();
        self.fdc.assert_external_motor(false);
        self.serial.reset(&mut self.bus);

        let port_b = self.cia.port_b_mut();
        port_b.set_input(PORTB_DATA_OUT | PORTB_CLOCK_OUT | PORTB_ATNA_OUT, true);

        let port_a = self.cia.port_a_mut();
        port_a.set_input_byte(!PORTA_DEVICE | ((self.device_switches << PORTA_DEVICE_SHIFT) & PORTA_DEVICE));
        port_a.set_input(PORTA_DISK_CHANGE, disk_change != 0);

        self.refresh_bus_inputs();
    }

    /// Advance the board by one CIA cycle.
    pub fn update(&mut self) {
        if self.state.rdy_delay_counter > 0 {
            self.state.rdy_delay_counter -= 1;
            if self.state.rdy_delay_counter == 0 {
                log::debug!("DRIVE: RDY asserted");
                self.cia.port_a_mut().set_input(PORTA_RDY, false);
            }
        }

        self.refresh_bus_inputs();
        self.with_wiring(|cia, wiring| cia.execute(wiring));

        match self.state.fast_serial_direction {
            FastSerialDirection::Out => {
                let (sp, cnt) = (self.cia.sp_output(), self.cia.cnt_output());
                self.serial.drive_fast_serial(sp, cnt, &mut self.bus);
            }
            FastSerialDirection::In => {
                let (sp, cnt) = self.serial.sample_fast_serial(&mut self.bus);
                self.cia.set_sp_input(sp);
                self.cia.set_cnt_input(cnt);
            }
        }

        for _ in 0..FDC_EXECUTES_PER_UPDATE {
            self.fdc.execute();
        }

        if self.fdc.take_step_pulse() && self.fdc.has_disk() && !self.disk_changed_cleared() {
            log::debug!("DRIVE: Disk change cleared");
            self.cia.port_a_mut().set_input(PORTA_DISK_CHANGE, true);
        }
    }

    /// Latch the bus lines into port B and the FLAG pin, and refresh the ATN acknowledge.
    pub fn refresh_bus_inputs(&mut self) {
        self.serial.refresh_outputs(&mut self.bus);
        let inputs = self.serial.port_b_inputs(&self.bus);
        let port_b = self.cia.port_b_mut();
        port_b.set_input(PORTB_BUS_INPUTS, false);
        port_b.set_input(inputs, true);

        let atn = self.bus.level(IecLine::Atn);
        self.cia.set_flag(atn);
    }

    /// Run the CPU for at least `cycles` cycles, calling [`Drive::update`] once per cycle.
    /// Returns the number of cycles actually run.
    pub fn run(&mut self, cpu: &mut dyn DriveCpu, cycles: u64) -> u64 {
        let mut elapsed = 0u64;
        while elapsed < cycles {
            cpu.set_irq(self.irq_asserted());
            let step = cpu.step(self).max(1);
            for _ in 0..step {
                self.update();
            }
            elapsed += step as u64;
        }
        elapsed
    }

    pub fn insert(&mut self, image: DiskImageHandle) {
        self.cia.port_a_mut().set_input(PORTA_DISK_CHANGE, false);
        self.fdc.insert(image);
    }

    pub fn eject(&mut self) -> Option<DiskImageHandle> {
        self.cia.port_a_mut().set_input(PORTA_DISK_CHANGE, false);
        self.fdc.eject()
    }

    pub fn led(&self) -> bool {
        self.state.led
    }

    pub fn power_led(&self) -> bool {
        self.state.power_led
    }

    pub fn motor_asserted(&self) -> bool {
        self.fdc.external_motor_asserted()
    }

    pub fn irq_asserted(&self) -> bool {
        self.cia.irq()
    }

    /// /RDY is low.
    pub fn rdy_asserted(&self) -> bool {
        self.cia.port_a().input() & PORTA_RDY == 0
    }

    /// /DISK CHANGE is low.
    pub fn disk_change_asserted(&self) -> bool {
        !self.disk_changed_cleared()
    }

    pub fn fast_serial_direction(&self) -> FastSerialDirection {
        self.state.fast_serial_direction
    }

    pub fn rdy_delay_counter(&self) -> u32 {
        self.state.rdy_delay_counter
    }

    pub fn state(&self) -> &DriveState {
        &self.state
    }

    pub fn cia(&self) -> &Cia8520 {
        &self.cia
    }

    pub fn fdc(&self) -> &Wd177x {
        &self.fdc
    }

    pub fn memory(&self) -> &DriveMemory {
        &self.memory
    }

    pub fn bus(&self) -> &L {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut L {
        &mut self.bus
    }

    fn disk_changed_cleared(&self) -> bool {
        self.cia.port_a().input() & PORTA_DISK_CHANGE != 0
    }

    fn with_wiring<R>(&mut self, f: impl FnOnce(&mut Cia8520, &mut PortWiring<L>) -> R) -> R {
        let mut wiring = PortWiring {
            fdc: &mut self.fdc,
            serial: &mut self.serial,
            bus: &mut self.bus,
            state: &mut self.state,
            rdy_request: None,
        };
        let result = f(&mut self.cia, &mut wiring);
        if let Some(level) = wiring.rdy_request {
            self.cia.port_a_mut().set_input(PORTA_RDY, level);
        }
        result
    }
}

impl<L: BusLines> MemoryBus for Drive<L> {
    fn read(&mut self, address: u16) -> u8 {
        match bus::decode(address) {
            BusRegion::Ram(offset) => self.memory.read_ram(offset),
            BusRegion::OpenBus(value) => value,
            BusRegion::Cia(reg) => self.cia.read(reg),
            BusRegion::Fdc(reg) => self.fdc.read(reg),
            BusRegion::Rom(offset) => self.memory.read_rom(offset),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match bus::decode(address) {
            BusRegion::Ram(offset) => self.memory.write_ram(offset, value),
            BusRegion::Cia(reg) => self.with_wiring(|cia, wiring| cia.write(reg, value, wiring)),
            BusRegion::Fdc(reg) => self.fdc.write(reg, value),
            BusRegion::OpenBus(_) | BusRegion::Rom(_) => {
                log::trace!("DRIVE: Write {:02X} to unwritable address {:04X} ignored", value, address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::D81Image,
        devices::cia::{CIA_CRA, CIA_DDRA, CIA_DDRB, CIA_PRA, CIA_PRB},
        iec::PORTB_DATA_IN,
    };

    const CIA: u16 = 0x4000;

    fn drive() -> Drive {
        Drive::new(&DriveConfiguration::default(), vec![0xEA; 0x8000], IecBus::new()).unwrap()
    }

    fn motor_on(drive: &mut Drive) {
        drive.write(CIA + CIA_DDRA as u16, PORTA_MOTOR | PORTA_ACT_LED | PORTA_SIDE);
        drive.write(CIA + CIA_PRA as u16, 0);
    }

    #[test]
    fn test_reset_state() {
        let drive = drive();
        assert_eq!(drive.fast_serial_direction(), FastSerialDirection::In);
        assert!(!drive.rdy_asserted());
        assert!(!drive.motor_asserted());
        assert_eq!(drive.rdy_delay_counter(), 0);
        let pb = drive.cia().port_b().input();
        assert_eq!(pb & (PORTB_DATA_OUT | PORTB_CLOCK_OUT | PORTB_ATNA_OUT), 0x1A);
    }

    #[test]
    fn test_device_switches() {
        let config = DriveConfiguration {
            device_number: 10,
            ..Default::default()
        };
        let drive = Drive::new(&config, vec![0; 0x8000], IecBus::new()).unwrap();
        assert_eq!((drive.cia().port_a().input() & PORTA_DEVICE) >> PORTA_DEVICE_SHIFT, 2);
    }

    #[test]
    fn test_memory_map() {
        let mut drive = drive();
        drive.write(0x0123, 0x55);
        assert_eq!(drive.read(0x0123), 0x55);
        assert_eq!(drive.read(0x2ABC), 0x2A);
        drive.write(0x9000, 0x00);
        assert_eq!(drive.read(0x9000), 0xEA);
    }

    #[test]
    fn test_rdy_delay() {
        let mut drive = drive();
        motor_on(&mut drive);
        assert!(drive.motor_asserted());
        assert_eq!(drive.rdy_delay_counter(), RDY_DELAY);

        for _ in 0..RDY_DELAY - 1 {
            drive.update();
        }
        assert!(!drive.rdy_asserted());
        drive.update();
        assert!(drive.rdy_asserted());
        assert_eq!(drive.rdy_delay_counter(), 0);

        drive.update();
        assert!(drive.rdy_asserted());
    }

    #[test]
    fn test_motor_off_cancels_spin_up() {
        let mut drive = drive();
        motor_on(&mut drive);
        for _ in 0..100 {
            drive.update();
        }
        drive.write(CIA + CIA_PRA as u16, PORTA_MOTOR);
        assert!(!drive.motor_asserted());
        assert_eq!(drive.rdy_delay_counter(), 0);
        for _ in 0..RDY_DELAY {
            drive.update();
        }
        assert!(!drive.rdy_asserted());
    }

    #[test]
    fn test_motor_high_releases_rdy_while_stopped() {
        let mut drive = drive();
        drive.write(CIA + CIA_DDRA as u16, PORTA_MOTOR);
        drive.state.rdy_delay_counter = 7;
        drive.cia.port_a_mut().set_input(PORTA_RDY, false);
        assert!(!drive.motor_asserted());

        drive.write(CIA + CIA_PRA as u16, PORTA_MOTOR);
        assert_eq!(drive.rdy_delay_counter(), 0);
        assert!(!drive.rdy_asserted());
        assert!(!drive.motor_asserted());
    }

    #[test]
    fn test_led_and_side() {
        let mut drive = drive();
        drive.write(CIA + CIA_DDRA as u16, PORTA_ACT_LED | PORTA_SIDE | PORTA_MOTOR);
        drive.write(CIA + CIA_PRA as u16, PORTA_ACT_LED | PORTA_MOTOR);
        assert!(drive.led());
        assert_eq!(drive.fdc().side(), 0);
        drive.write(CIA + CIA_PRA as u16, PORTA_SIDE | PORTA_MOTOR);
        assert!(!drive.led());
        assert_eq!(drive.fdc().side(), 1);
    }

    #[test]
    fn test_insert_sets_disk_change() {
        let mut drive = drive();
        drive.insert(D81Image::blank().into_handle());
        assert!(drive.disk_change_asserted());
        assert_eq!(drive.read(CIA + CIA_PRA as u16) & PORTA_DISK_CHANGE, 0);
    }

    #[test]
    fn test_atn_reaches_port_b_and_flag() {
        let mut drive = drive();
        drive.bus_mut().set_host_level(IecLine::Atn, false);
        drive.update();
        let pb = drive.read(CIA + CIA_PRB as u16);
        assert_ne!(pb & crate::iec::PORTB_ATN_IN, 0);
        // ATN is acknowledged on DATA until the firmware sets ATNA.
        assert_ne!(pb & PORTB_DATA_IN, 0);
        assert!(!drive.bus().level(IecLine::Data));
    }

    #[test]
    fn test_fast_serial_direction() {
        let mut drive = drive();
        drive.write(CIA + CIA_PRB as u16, PORTB_FAST_SER_DIR);
        drive.write(
            CIA + CIA_DDRB as u16,
            PORTB_FAST_SER_DIR | PORTB_DATA_OUT | PORTB_CLOCK_OUT | PORTB_ATNA_OUT,
        );
        assert_eq!(drive.fast_serial_direction(), FastSerialDirection::Out);

        // Serial port output mode with SP idle low puts DATA high through the inverter.
        drive.write(CIA + CIA_CRA as u16, 0x40);
        drive.update();
        assert_eq!(drive.bus().level(IecLine::Data), !drive.cia().sp_output());
        assert_eq!(drive.bus().level(IecLine::Srq), drive.cia().cnt_output());

        drive.write(CIA + CIA_PRB as u16, 0);
        assert_eq!(drive.fast_serial_direction(), FastSerialDirection::In);
        drive.update();
        assert!(drive.bus().drive_level(IecLine::Srq));
    }
}
