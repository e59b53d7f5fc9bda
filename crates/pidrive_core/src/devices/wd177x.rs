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

    devices::wd177x.rs

    Implements the Western Digital WD1772 floppy disk controller as used in
    the 1581: the four command types, spin-up and motor timeout, step timing,
    and sector transfers against a mounted disk image.
*/

use strum_macros::Display;

use crate::device_types::disk::{DiskGeometry, DiskImageHandle};

macro_rules! read_lock_opt {
    ($arc_lock:expr) => {{
        match $arc_lock.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("WD177X: Failed to acquire disk image read lock");
                return None;
            }
        }
    }};
}

macro_rules! write_lock_opt {
    ($arc_lock:expr) => {{
        match $arc_lock.try_write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("WD177X: Failed to acquire disk image write lock");
                return None;
            }
        }
    }};
}

pub const WD_STATUS_REGISTER: u8 = 0;
pub const WD_COMMAND_REGISTER: u8 = 0;
pub const WD_TRACK_REGISTER: u8 = 1;
pub const WD_SECTOR_REGISTER: u8 = 2;
pub const WD_DATA_REGISTER: u8 = 3;

pub const STATUS_BUSY: u8 = 0b0000_0001;
/// Type I: index pulse. Type II/III: data request.
pub const STATUS_INDEX: u8 = 0b0000_0010;
pub const STATUS_DRQ: u8 = 0b0000_0010;
/// Type I: head at track 0. Type II/III: lost data.
pub const STATUS_TRACK0: u8 = 0b0000_0100;
pub const STATUS_LOST_DATA: u8 = 0b0000_0100;
pub const STATUS_CRC_ERROR: u8 = 0b0000_1000;
/// Type I: seek error. Type II/III: record not found.
pub const STATUS_SEEK_ERROR: u8 = 0b0001_0000;
pub const STATUS_RNF: u8 = 0b0001_0000;
/// Type I: spin-up complete. Type II/III: record type (deleted data mark).
pub const STATUS_SPIN_UP: u8 = 0b0010_0000;
pub const STATUS_WRITE_PROTECT: u8 = 0b0100_0000;
pub const STATUS_MOTOR_ON: u8 = 0b1000_0000;

const FLAG_UPDATE: u8 = 0b0001_0000;
const FLAG_MULTI: u8 = 0b0001_0000;
const FLAG_SPIN_UP_DISABLE: u8 = 0b0000_1000;
const FLAG_VERIFY: u8 = 0b0000_0100;
const FLAG_SETTLE: u8 = 0b0000_0100;
const STEP_RATE_MASK: u8 = 0b0000_0011;

const FORCE_INT_INDEX: u8 = 0b0000_0100;
const FORCE_INT_IMMEDIATE: u8 = 0b0000_1000;

/// The controller runs from an 8MHz clock; `execute` advances one clock.
pub const WD_CLOCK_HZ: u32 = 8_000_000;
pub const CYCLES_PER_MS: u32 = WD_CLOCK_HZ / 1000;
/// 300 RPM.
pub const REVOLUTION_CYCLES: u32 = 200 * CYCLES_PER_MS;
pub const INDEX_PULSE_CYCLES: u32 = 4 * CYCLES_PER_MS;
/// One MFM byte at 250 kbit/s.
pub const BYTE_CYCLES: u32 = 256;
pub const TRACK_BYTES: usize = 6250;
pub const MAX_CYLINDER: u8 = 83;

const STEP_RATES_MS: [u32; 4] = [6, 12, 20, 30];
const SETTLE_MS: u32 = 30;
const SPIN_UP_INDEX_PULSES: u8 = 6;
const MOTOR_OFF_REVOLUTIONS: u8 = 9;
const RNF_REVOLUTIONS: u32 = 5;

const MARK_SYNC: u8 = 0xA1;
const MARK_ID: u8 = 0xFE;
const MARK_DATA: u8 = 0xFB;
// Write track control bytes.
const WT_SYNC: u8 = 0xF5;
const WT_CRC: u8 = 0xF7;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Command {
    Restore,
    Seek,
    Step,
    StepIn,
    StepOut,
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
    ForceInterrupt,
}

impl Command {
    pub fn decode(byte: u8) -> Self {
        match byte >> 4 {
            0x0 => Command::Restore,
            0x1 => Command::Seek,
            0x2 | 0x3 => Command::Step,
            0x4 | 0x5 => Command::StepIn,
            0x6 | 0x7 => Command::StepOut,
            0x8 | 0x9 => Command::ReadSector,
            0xA | 0xB => Command::WriteSector,
            0xC => Command::ReadAddress,
            0xD => Command::ForceInterrupt,
            0xE => Command::ReadTrack,
            _ => Command::WriteTrack,
        }
    }

    pub fn is_type_i(self) -> bool {
        matches!(
            self,
            Command::Restore | Command::Seek | Command::Step | Command::StepIn | Command::StepOut
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Operation {
    Idle,
    SpinUp,
    Seek,
    StepDone,
    Verify { found: bool },
    Settle,
    SectorSearch { found: bool },
    IdSearch { slot: Option<u8> },
    ReadData,
    WriteData,
    WaitIndex,
    WriteTrack,
}

/// CRC-16/CCITT as used for MFM address and data fields.
pub fn crc16(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Western Digital WD1772 floppy disk controller.
pub struct Wd177x {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    command: Command,
    command_byte: u8,
    type_i_status: bool,
    op: Operation,
    delay: Option<u32>,

    head_cylinder: u8,
    step_in: bool,
    step_pulse: bool,
    side: u8,
    motor_on: bool,
    external_motor: bool,
    wprt_level: bool,
    spin_up_count: u8,
    spin_up_done: bool,
    idle_revolutions: u8,
    rotation: u32,
    index: bool,
    index_interrupt: bool,

    intrq: bool,
    drq: bool,
    buffer: Vec<u8>,
    buffer_pos: usize,

    image: Option<DiskImageHandle>,
}

impl Default for Wd177x {
    fn default() -> Self {
        Self {
            status: 0,
            track: 0,
            sector: 1,
            data: 0,
            command: Command::Restore,
            command_byte: 0,
            type_i_status: true,
            op: Operation::Idle,
            delay: None,

            head_cylinder: 0,
            step_in: true,
            step_pulse: false,
            side: 0,
            motor_on: false,
            external_motor: false,
            wprt_level: true,
            spin_up_count: 0,
            spin_up_done: false,
            idle_revolutions: 0,
            rotation: 0,
            index: true,
            index_interrupt: false,

            intrq: false,
            drq: false,
            buffer: Vec::new(),
            buffer_pos: 0,

            image: None,
        }
    }
}

impl Wd177x {
    pub fn new() -> Self {
        Default::default()
    }

    /// Master reset. The inserted disk, head position and the external pins survive.
    pub fn reset(&mut self) {
        log::debug!("WD177X: Reset");
        let image = self.image.take();
        let head_cylinder = self.head_cylinder;
        let side = self.side;
        let external_motor = self.external_motor;
        let wprt_level = self.wprt_level;
        *self = Default::default();
        self.image = image;
        self.head_cylinder = head_cylinder;
        self.side = side;
        self.external_motor = external_motor;
        self.wprt_level = wprt_level;
    }

    pub fn insert(&mut self, image: DiskImageHandle) {
        log::debug!("WD177X: Disk inserted");
        self.image = Some(image);
    }

    pub fn eject(&mut self) -> Option<DiskImageHandle> {
        log::debug!("WD177X: Disk ejected");
        self.image.take()
    }

    pub fn has_disk(&self) -> bool {
        self.image.is_some()
    }

    pub fn busy(&self) -> bool {
        self.status & STATUS_BUSY != 0
    }

    pub fn intrq(&self) -> bool {
        self.intrq
    }

    pub fn drq(&self) -> bool {
        self.drq
    }

    /// State of the MO output.
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    pub fn head_cylinder(&self) -> u8 {
        self.head_cylinder
    }

    pub fn side(&self) -> u8 {
        self.side
    }

    pub fn track_register(&self) -> u8 {
        self.track
    }

    pub fn sector_register(&self) -> u8 {
        self.sector
    }

    /// SIDE select input. High selects the second head.
    pub fn set_side(&mut self, high: bool) {
        self.side = high as u8;
    }

    /// /WPRT input. Active low.
    pub fn set_write_protect_pin(&mut self, level: bool) {
        self.wprt_level = level;
    }

    /// The drive's own motor line, independent of the controller's MO output.
    pub fn assert_external_motor(&mut self, asserted: bool) {
        self.external_motor = asserted;
    }

    pub fn external_motor_asserted(&self) -> bool {
        self.external_motor
    }

    pub fn write_protected(&self) -> bool {
        !self.wprt_level || self.image_read_only().unwrap_or(false)
    }

    /// Returns true once for each step pulse issued since the last call.
    pub fn take_step_pulse(&mut self) -> bool {
        std::mem::take(&mut self.step_pulse)
    }

    fn spinning(&self) -> bool {
        (self.motor_on || self.external_motor) && self.image.is_some()
    }

    fn index_pulse(&self) -> bool {
        self.spinning() && self.index
    }

    fn image_read_only(&self) -> Option<bool> {
        let image = self.image.as_ref()?;
        Some(read_lock_opt!(image).read_only())
    }

    fn geometry(&self) -> Option<DiskGeometry> {
        let image = self.image.as_ref()?;
        Some(read_lock_opt!(image).geometry())
    }

    fn read_sector(&self, sector: u8, buf: &mut [u8]) -> Option<()> {
        let image = self.image.as_ref()?;
        let result = read_lock_opt!(image).read_sector(self.head_cylinder, self.side, sector, buf);
        result
            .map_err(|e| log::warn!("WD177X: Read of sector {} failed: {}", sector, e))
            .ok()
    }

    fn write_sector(&self, sector: u8, data: &[u8]) -> Option<()> {
        let image = self.image.as_ref()?;
        let result = write_lock_opt!(image).write_sector(self.head_cylinder, self.side, sector, data);
        result
            .map_err(|e| log::warn!("WD177X: Write of sector {} failed: {}", sector, e))
            .ok()
    }

    /// Current status register value, without side effects.
    pub fn status(&self) -> u8 {
        if self.type_i_status {
            let mut status = self.status & (STATUS_BUSY | STATUS_CRC_ERROR | STATUS_SEEK_ERROR);
            if self.index_pulse() {
                status |= STATUS_INDEX;
            }
            if self.head_cylinder == 0 {
                status |= STATUS_TRACK0;
            }
            if self.spin_up_done {
                status |= STATUS_SPIN_UP;
            }
            if self.write_protected() {
                status |= STATUS_WRITE_PROTECT;
            }
            if self.motor_on {
                status |= STATUS_MOTOR_ON;
            }
            status
        }
        else {
            let mut status = self.status & !(STATUS_DRQ | STATUS_MOTOR_ON);
            if self.drq {
                status |= STATUS_DRQ;
            }
            if self.motor_on {
                status |= STATUS_MOTOR_ON;
            }
            status
        }
    }

    pub fn peek(&self, reg: u8) -> u8 {
        match reg & 0x03 {
            WD_STATUS_REGISTER => self.status(),
            WD_TRACK_REGISTER => self.track,
            WD_SECTOR_REGISTER => self.sector,
            _ => self.data,
        }
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        let value = self.peek(reg);
        match reg & 0x03 {
            WD_STATUS_REGISTER => {
                if !self.index_interrupt {
                    self.intrq = false;
                }
            }
            WD_DATA_REGISTER => self.drq = false,
            _ => {}
        }
        trace_io!("WD177X: Read {:02X} from register {}", value, reg & 0x03);
        value
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        trace_io!("WD177X: Write {:02X} to register {}", value, reg & 0x03);
        match reg & 0x03 {
            WD_COMMAND_REGISTER => self.write_command(value),
            WD_TRACK_REGISTER if !self.busy() => self.track = value,
            WD_SECTOR_REGISTER if !self.busy() => self.sector = value,
            WD_DATA_REGISTER => {
                self.data = value;
                self.drq = false;
            }
            _ => log::debug!("WD177X: Register {} write ignored while busy", reg & 0x03),
        }
    }

    fn write_command(&mut self, value: u8) {
        let command = Command::decode(value);
        if command == Command::ForceInterrupt {
            self.force_interrupt(value);
            return;
        }
        if self.busy() {
            log::debug!("WD177X: Command {:02X} ignored while busy", value);
            return;
        }

        log::debug!(
            "WD177X: Command {} ({:02X}) c:{} t:{} s:{} d:{}",
            command,
            value,
            self.head_cylinder,
            self.track,
            self.sector,
            self.data
        );
        self.command = command;
        self.command_byte = value;
        self.type_i_status = command.is_type_i();
        self.status = STATUS_BUSY;
        self.intrq = false;
        self.drq = false;
        self.idle_revolutions = 0;

        let spin_up = value & FLAG_SPIN_UP_DISABLE == 0 && !self.motor_on;
        self.motor_on = true;
        if spin_up {
            self.spin_up_done = false;
            self.spin_up_count = 0;
            self.op = Operation::SpinUp;
            self.delay = None;
        }
        else {
            self.spin_up_done = true;
            self.begin_command();
        }
    }

    fn force_interrupt(&mut self, value: u8) {
        log::debug!("WD177X: Force interrupt ({:02X}), busy: {}", value, self.busy());
        if self.busy() {
            self.status &= !STATUS_BUSY;
        }
        else {
            self.status = 0;
            self.type_i_status = true;
        }
        self.op = Operation::Idle;
        self.delay = None;
        self.drq = false;
        self.index_interrupt = value & FORCE_INT_INDEX != 0;
        self.intrq = value & FORCE_INT_IMMEDIATE != 0;
    }

    fn complete(&mut self, status: u8) {
        log::trace!("WD177X: {} complete, status bits {:02X}", self.command, status);
        self.status = (self.status & !STATUS_BUSY) | status;
        self.op = Operation::Idle;
        self.delay = None;
        self.intrq = true;
        self.idle_revolutions = 0;
    }

    fn step_rate(&self) -> u32 {
        STEP_RATES_MS[(self.command_byte & STEP_RATE_MASK) as usize] * CYCLES_PER_MS
    }

    fn begin_command(&mut self) {
        match self.command {
            Command::Restore => {
                self.track = 0xFF;
                self.data = 0;
                self.op = Operation::Seek;
                self.delay = Some(1);
            }
            Command::Seek => {
                self.op = Operation::Seek;
                self.delay = Some(1);
            }
            Command::Step | Command::StepIn | Command::StepOut => {
                match self.command {
                    Command::StepIn => self.step_in = true,
                    Command::StepOut => self.step_in = false,
                    _ => {}
                }
                if self.command_byte & FLAG_UPDATE != 0 {
                    self.track = if self.step_in {
                        self.track.wrapping_add(1)
                    }
                    else {
                        self.track.wrapping_sub(1)
                    };
                }
                self.pulse_step();
                self.op = Operation::StepDone;
                self.delay = Some(self.step_rate());
            }
            _ => {
                if self.command_byte & FLAG_SETTLE != 0 {
                    self.op = Operation::Settle;
                    self.delay = Some(SETTLE_MS * CYCLES_PER_MS);
                }
                else {
                    self.begin_transfer();
                }
            }
        }
    }

    fn pulse_step(&mut self) {
        if self.step_in {
            if self.head_cylinder < MAX_CYLINDER {
                self.head_cylinder += 1;
            }
        }
        else if self.head_cylinder > 0 {
            self.head_cylinder -= 1;
        }
        self.step_pulse = true;
    }

    fn seek_step(&mut self) {
        if self.command == Command::Restore && self.head_cylinder == 0 {
            self.track = 0;
            self.begin_verify();
            return;
        }
        if self.track == self.data {
            self.begin_verify();
            return;
        }
        self.step_in = self.data > self.track;
        self.track = if self.step_in {
            self.track.wrapping_add(1)
        }
        else {
            self.track.wrapping_sub(1)
        };
        self.pulse_step();
        self.delay = Some(self.step_rate());
    }

    fn begin_verify(&mut self) {
        if self.command_byte & FLAG_VERIFY == 0 {
            self.complete(0);
            return;
        }
        let found = self
            .geometry()
            .map(|geometry| self.track == self.head_cylinder && self.head_cylinder < geometry.cylinders)
            .unwrap_or(false);
        self.op = Operation::Verify { found };
        self.delay = Some(if found {
            SETTLE_MS * CYCLES_PER_MS
        }
        else {
            RNF_REVOLUTIONS * REVOLUTION_CYCLES
        });
    }

    fn begin_transfer(&mut self) {
        match self.command {
            Command::WriteSector | Command::WriteTrack if self.write_protected() => {
                log::debug!("WD177X: {} refused, disk is write protected", self.command);
                self.complete(STATUS_WRITE_PROTECT);
            }
            Command::ReadSector | Command::WriteSector => self.search_sector(),
            Command::ReadAddress => self.search_id(),
            _ => {
                self.op = Operation::WaitIndex;
                self.delay = None;
            }
        }
    }

    /// Rotational offset of a sector's ID field from the index hole.
    fn slot_position(geometry: &DiskGeometry, slot: u8) -> u32 {
        INDEX_PULSE_CYCLES + slot as u32 * ((REVOLUTION_CYCLES - INDEX_PULSE_CYCLES) / geometry.sectors_per_track as u32)
    }

    fn cycles_until(&self, position: u32) -> u32 {
        ((position + REVOLUTION_CYCLES - self.rotation) % REVOLUTION_CYCLES).max(1)
    }

    fn search_sector(&mut self) {
        let position = self.geometry().and_then(|geometry| {
            if self.track == self.head_cylinder && geometry.contains(self.head_cylinder, self.side, self.sector) {
                Some(Self::slot_position(&geometry, self.sector - geometry.first_sector))
            }
            else {
                None
            }
        });
        match position {
            Some(position) => {
                self.op = Operation::SectorSearch { found: true };
                self.delay = Some(self.cycles_until(position));
            }
            None => {
                self.op = Operation::SectorSearch { found: false };
                self.delay = Some(RNF_REVOLUTIONS * REVOLUTION_CYCLES);
            }
        }
    }

    fn next_slot(&self, geometry: &DiskGeometry) -> u8 {
        let spt = geometry.sectors_per_track as u32;
        let span = (REVOLUTION_CYCLES - INDEX_PULSE_CYCLES) / spt;
        let passed = self.rotation.saturating_sub(INDEX_PULSE_CYCLES) / span;
        ((passed + 1) % spt) as u8
    }

    fn search_id(&mut self) {
        match self.geometry() {
            Some(geometry) if self.head_cylinder < geometry.cylinders && self.side < geometry.heads => {
                let slot = self.next_slot(&geometry);
                self.op = Operation::IdSearch { slot: Some(slot) };
                self.delay = Some(self.cycles_until(Self::slot_position(&geometry, slot)));
            }
            _ => {
                self.op = Operation::IdSearch { slot: None };
                self.delay = Some(RNF_REVOLUTIONS * REVOLUTION_CYCLES);
            }
        }
    }

    fn id_field(&self, geometry: &DiskGeometry, sector: u8) -> [u8; 6] {
        let id = [self.head_cylinder, self.side, sector, geometry.size_code()];
        let crc = crc16(0xFFFF, &[MARK_SYNC, MARK_SYNC, MARK_SYNC, MARK_ID]);
        let crc = crc16(crc, &id);
        [id[0], id[1], id[2], id[3], (crc >> 8) as u8, crc as u8]
    }

    fn start_read(&mut self, data: Vec<u8>) {
        self.buffer = data;
        self.buffer_pos = 0;
        self.op = Operation::ReadData;
        self.delay = Some(BYTE_CYCLES);
    }

    fn build_track(&self) -> Vec<u8> {
        let mut track = vec![0x4E; 60];
        if let Some(geometry) = self.geometry() {
            if self.head_cylinder < geometry.cylinders && self.side < geometry.heads {
                let mut sector_buf = vec![0; geometry.sector_size];
                for slot in 0..geometry.sectors_per_track {
                    let sector = geometry.first_sector + slot;
                    track.extend_from_slice(&[0x00; 12]);
                    track.extend_from_slice(&[MARK_SYNC, MARK_SYNC, MARK_SYNC, MARK_ID]);
                    track.extend_from_slice(&self.id_field(&geometry, sector));
                    track.extend_from_slice(&[0x4E; 22]);
                    track.extend_from_slice(&[0x00; 12]);
                    track.extend_from_slice(&[MARK_SYNC, MARK_SYNC, MARK_SYNC, MARK_DATA]);
                    if self.read_sector(sector, &mut sector_buf).is_none() {
                        sector_buf.fill(0);
                    }
                    let crc = crc16(0xFFFF, &[MARK_SYNC, MARK_SYNC, MARK_SYNC, MARK_DATA]);
                    let crc = crc16(crc, &sector_buf);
                    track.extend_from_slice(&sector_buf);
                    track.extend_from_slice(&[(crc >> 8) as u8, crc as u8]);
                    track.extend_from_slice(&[0x4E; 24]);
                }
            }
        }
        track.resize(TRACK_BYTES, 0x4E);
        track
    }

    /// Write the sectors described by a raw write-track byte stream to the image.
    fn format_track(&mut self) {
        let Some(geometry) = self.geometry()
        else {
            return;
        };
        let stream = std::mem::take(&mut self.buffer);
        let sync = [WT_SYNC, WT_SYNC, WT_SYNC];
        let mut written = 0;
        let mut i = 0;

        while i + 8 <= stream.len() {
            if stream[i..i + 3] != sync || stream[i + 3] != MARK_ID {
                i += 1;
                continue;
            }
            let sector = stream[i + 6];
            let size = 128usize << (stream[i + 7] & 0x03);
            i += 8;

            let Some(offset) = stream[i..]
                .windows(4)
                .position(|w| w[..3] == sync && w[3] == MARK_DATA)
            else {
                break;
            };
            let start = i + offset + 4;
            if start + size > stream.len() {
                break;
            }
            if size == geometry.sector_size {
                if self.write_sector(sector, &stream[start..start + size]).is_some() {
                    written += 1;
                }
            }
            else {
                log::warn!("WD177X: Write track sector {} has unsupported size {}", sector, size);
            }
            i = start + size;
            if stream.get(i) == Some(&WT_CRC) {
                i += 1;
            }
        }
        log::debug!(
            "WD177X: Formatted c:{} h:{}, {} sectors written",
            self.head_cylinder,
            self.side,
            written
        );
    }

    /// Advance the controller by one clock.
    pub fn execute(&mut self) {
        if self.rotate() {
            self.on_index();
        }

        if let Some(delay) = self.delay {
            if delay > 1 {
                self.delay = Some(delay - 1);
            }
            else {
                self.delay = None;
                self.advance();
            }
        }
    }

    // Returns true on the leading edge of an index pulse.
    fn rotate(&mut self) -> bool {
        if !self.spinning() {
            // A hole parked under the sensor is not an edge once the disk turns.
            self.index = self.rotation < INDEX_PULSE_CYCLES;
            return false;
        }
        self.rotation += 1;
        if self.rotation >= REVOLUTION_CYCLES {
            self.rotation = 0;
        }
        let index = self.rotation < INDEX_PULSE_CYCLES;
        let edge = index && !self.index;
        self.index = index;
        edge
    }

    fn on_index(&mut self) {
        if self.index_interrupt {
            self.intrq = true;
        }
        match self.op {
            Operation::SpinUp => {
                self.spin_up_count += 1;
                if self.spin_up_count >= SPIN_UP_INDEX_PULSES {
                    log::trace!("WD177X: Spin-up complete");
                    self.spin_up_done = true;
                    self.begin_command();
                }
            }
            Operation::WaitIndex => match self.command {
                Command::ReadTrack => {
                    let track = self.build_track();
                    self.start_read(track);
                }
                _ => {
                    self.buffer.clear();
                    self.drq = true;
                    self.op = Operation::WriteTrack;
                    self.delay = Some(3 * BYTE_CYCLES);
                }
            },
            Operation::Idle if self.motor_on => {
                self.idle_revolutions += 1;
                if self.idle_revolutions >= MOTOR_OFF_REVOLUTIONS {
                    log::debug!("WD177X: Motor off after {} idle revolutions", MOTOR_OFF_REVOLUTIONS);
                    self.motor_on = false;
                }
            }
            _ => {}
        }
    }

    fn advance(&mut self) {
        match self.op {
            Operation::Seek => self.seek_step(),
            Operation::StepDone => self.begin_verify(),
            Operation::Verify { found } => self.complete(if found { 0 } else { STATUS_SEEK_ERROR }),
            Operation::Settle => self.begin_transfer(),
            Operation::SectorSearch { found: false } | Operation::IdSearch { slot: None } => {
                log::debug!(
                    "WD177X: Record not found c:{} h:{} t:{} s:{}",
                    self.head_cylinder,
                    self.side,
                    self.track,
                    self.sector
                );
                self.complete(STATUS_RNF);
            }
            Operation::SectorSearch { found: true } => self.sector_found(),
            Operation::IdSearch { slot: Some(slot) } => {
                let Some(geometry) = self.geometry()
                else {
                    self.complete(STATUS_RNF);
                    return;
                };
                let id = self.id_field(&geometry, geometry.first_sector + slot);
                self.sector = self.head_cylinder;
                self.start_read(id.to_vec());
            }
            Operation::ReadData => self.read_data(),
            Operation::WriteData => self.write_data(),
            Operation::WriteTrack => self.write_track(),
            Operation::Idle | Operation::SpinUp | Operation::WaitIndex => {}
        }
    }

    fn sector_found(&mut self) {
        let Some(geometry) = self.geometry()
        else {
            self.complete(STATUS_RNF);
            return;
        };
        match self.command {
            Command::ReadSector => {
                let mut data = vec![0; geometry.sector_size];
                if self.read_sector(self.sector, &mut data).is_some() {
                    self.start_read(data);
                }
                else {
                    self.complete(STATUS_RNF);
                }
            }
            _ => {
                self.buffer.clear();
                self.drq = true;
                self.op = Operation::WriteData;
                self.delay = Some(2 * BYTE_CYCLES);
            }
        }
    }

    fn read_data(&mut self) {
        if self.buffer_pos < self.buffer.len() {
            if self.drq {
                self.status |= STATUS_LOST_DATA;
            }
            self.data = self.buffer[self.buffer_pos];
            self.buffer_pos += 1;
            self.drq = true;
            self.delay = Some(BYTE_CYCLES);
            return;
        }

        if self.command == Command::ReadSector && self.command_byte & FLAG_MULTI != 0 {
            self.sector = self.sector.wrapping_add(1);
            self.search_sector();
        }
        else {
            self.complete(0);
        }
    }

    // Take the byte the CPU supplied, or record lost data if it did not keep up.
    fn accept_byte(&mut self) -> bool {
        if self.drq {
            if self.buffer.is_empty() {
                self.drq = false;
                self.complete(STATUS_LOST_DATA);
                return false;
            }
            self.status |= STATUS_LOST_DATA;
            self.buffer.push(0);
        }
        else {
            self.buffer.push(self.data);
        }
        true
    }

    fn write_data(&mut self) {
        if !self.accept_byte() {
            return;
        }
        let Some(geometry) = self.geometry()
        else {
            self.complete(STATUS_RNF);
            return;
        };
        if self.buffer.len() < geometry.sector_size {
            self.drq = true;
            self.delay = Some(BYTE_CYCLES);
            return;
        }

        let data = std::mem::take(&mut self.buffer);
        if self.write_sector(self.sector, &data).is_none() {
            self.complete(STATUS_RNF);
        }
        else if self.command_byte & FLAG_MULTI != 0 {
            self.sector = self.sector.wrapping_add(1);
            self.search_sector();
        }
        else {
            self.complete(0);
        }
    }

    fn write_track(&mut self) {
        if !self.accept_byte() {
            return;
        }
        if self.buffer.len() < TRACK_BYTES {
            self.drq = true;
            self.delay = Some(BYTE_CYCLES);
            return;
        }
        self.format_track();
        self.complete(0);
    }
}
