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

    bus::mod.rs

    Address decoding for the drive's 6502 bus and the RAM/ROM backing it.

    The map is: RAM at 0000-1FFF, unmapped open bus at 2000-3FFF, the 8520 CIA
    at 4000-5FFF, the WD177x at 6000-7FFF and ROM at 8000-FFFF.
*/

use anyhow::{bail, Error};
use strum_macros::Display;

pub const RAM_WINDOW_SIZE: usize = 0x2000;
pub const ROM_WINDOW_SIZE: usize = 0x8000;

pub const RAM_BASE: u16 = 0x0000;
pub const OPEN_BUS_BASE: u16 = 0x2000;
pub const CIA_BASE: u16 = 0x4000;
pub const FDC_BASE: u16 = 0x6000;
pub const ROM_BASE: u16 = 0x8000;

pub const CIA_REGISTER_MASK: u16 = 0x000F;
pub const FDC_REGISTER_MASK: u16 = 0x0003;

const REGION_MASK: u16 = 0x6000;

/// Where an address lands on the drive's bus. Register and offset values are already
/// reduced to the device's mirror.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum BusRegion {
    Ram(u16),
    /// Unmapped; reads return the contained value, the high byte of the address.
    OpenBus(u8),
    Cia(u8),
    Fdc(u8),
    Rom(u16),
}

/// Decode a 16-bit drive address. Every address maps to exactly one region.
pub fn decode(address: u16) -> BusRegion {
    if address >= ROM_BASE {
        return BusRegion::Rom(address - ROM_BASE);
    }
    match address & REGION_MASK {
        RAM_BASE => BusRegion::Ram(address),
        OPEN_BUS_BASE => BusRegion::OpenBus((address >> 8) as u8),
        CIA_BASE => BusRegion::Cia((address & CIA_REGISTER_MASK) as u8),
        _ => BusRegion::Fdc((address & FDC_REGISTER_MASK) as u8),
    }
}

/// CPU-side view of a memory bus.
pub trait MemoryBus {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);
}

/// RAM and ROM backing the drive's memory map.
///
/// RAM may be smaller than its window, in which case it mirrors. The ROM image must be a
/// power of two no larger than the ROM window and mirrors likewise.
pub struct DriveMemory {
    ram:      Vec<u8>,
    ram_mask: usize,
    rom:      Vec<u8>,
    rom_mask: usize,
}

impl DriveMemory {
    pub fn new(ram_size: usize, rom: Vec<u8>) -> Result<Self, Error> {
        if !ram_size.is_power_of_two() || ram_size > RAM_WINDOW_SIZE {
            bail!("Invalid RAM size: {:#X}", ram_size);
        }
        if !rom.len().is_power_of_two() || rom.len() > ROM_WINDOW_SIZE {
            bail!("Invalid ROM size: {:#X}", rom.len());
        }
        log::debug!("BUS: {:#X} bytes RAM, {:#X} bytes ROM", ram_size, rom.len());
        Ok(Self {
            ram: vec![0; ram_size],
            ram_mask: ram_size - 1,
            rom_mask: rom.len() - 1,
            rom,
        })
    }

    pub fn read_ram(&self, offset: u16) -> u8 {
        self.ram[offset as usize & self.ram_mask]
    }

    pub fn write_ram(&mut self, offset: u16, value: u8) {
        self.ram[offset as usize & self.ram_mask] = value;
    }

    pub fn read_rom(&self, offset: u16) -> u8 {
        self.rom[offset as usize & self.rom_mask]
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn clear_ram(&mut self) {
        self.ram.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_regions() {
        assert_eq!(decode(0x0000), BusRegion::Ram(0x0000));
        assert_eq!(decode(0x1FFF), BusRegion::Ram(0x1FFF));
        assert_eq!(decode(0x2000), BusRegion::OpenBus(0x20));
        assert_eq!(decode(0x3000), BusRegion::OpenBus(0x30));
        assert_eq!(decode(0x3FFF), BusRegion::OpenBus(0x3F));
        assert_eq!(decode(0x4000), BusRegion::Cia(0));
        assert_eq!(decode(0x401D), BusRegion::Cia(0x0D));
        assert_eq!(decode(0x5FFF), BusRegion::Cia(0x0F));
        assert_eq!(decode(0x6000), BusRegion::Fdc(0));
        assert_eq!(decode(0x7FFE), BusRegion::Fdc(2));
        assert_eq!(decode(0x8000), BusRegion::Rom(0));
        assert_eq!(decode(0xFFFF), BusRegion::Rom(0x7FFF));
    }

    #[test]
    fn test_memory_mirrors() {
        let mut rom = vec![0; 0x4000];
        rom[0x10] = 0x77;
        let mut memory = DriveMemory::new(0x800, rom).unwrap();
        memory.write_ram(0x0801, 0x55);
        assert_eq!(memory.read_ram(0x0001), 0x55);
        assert_eq!(memory.read_rom(0x4010), 0x77);
    }

    #[test]
    fn test_memory_rejects_bad_sizes() {
        assert!(DriveMemory::new(0x3000, vec![0; 0x8000]).is_err());
        assert!(DriveMemory::new(0x2000, vec![0; 0x7000]).is_err());
        assert!(DriveMemory::new(0x2000, vec![0; 0x10000]).is_err());
    }
}
