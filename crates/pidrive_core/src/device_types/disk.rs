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

    device_types::disk.rs

    Disk image abstraction used by the floppy controller, and an in-memory
    D81 image implementation.
*/

use std::{
    error::Error,
    fmt::{self, Display},
    sync::{Arc, RwLock},
};

use anyhow::bail;

/// Physical layout of a disk image, in the terms the floppy controller sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u8,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
    /// Sector number of the first sector on each track as written in its ID field.
    pub first_sector: u8,
}

impl DiskGeometry {
    /// The WD177x size code (`N`) of a sector: 0 = 128 bytes, 1 = 256, 2 = 512, 3 = 1024.
    pub fn size_code(&self) -> u8 {
        (self.sector_size / 128).trailing_zeros() as u8
    }

    pub fn total_bytes(&self) -> usize {
        self.cylinders as usize * self.heads as usize * self.sectors_per_track as usize * self.sector_size
    }

    pub fn contains(&self, cylinder: u8, head: u8, sector: u8) -> bool {
        cylinder < self.cylinders
            && head < self.heads
            && sector >= self.first_sector
            && sector - self.first_sector < self.sectors_per_track
    }
}

/// 3.5" 800K format used by the 1581: 80 cylinders, 2 sides, 10 x 512 byte sectors numbered from 1.
pub const D81_GEOMETRY: DiskGeometry = DiskGeometry {
    cylinders: 80,
    heads: 2,
    sectors_per_track: 10,
    sector_size: 512,
    first_sector: 1,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    InvalidAddress { cylinder: u8, head: u8, sector: u8 },
    WriteProtected,
    BufferSize { expected: usize, actual: usize },
}

impl Error for DiskError {}
impl Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiskError::InvalidAddress { cylinder, head, sector } => {
                write!(f, "No sector at c:{} h:{} s:{}", cylinder, head, sector)
            }
            DiskError::WriteProtected => write!(f, "Disk is write protected"),
            DiskError::BufferSize { expected, actual } => {
                write!(f, "Sector buffer is {} bytes, expected {}", actual, expected)
            }
        }
    }
}

/// Sector-level access to a mounted disk image.
pub trait DiskImage: Send + Sync {
    fn geometry(&self) -> DiskGeometry;
    fn read_only(&self) -> bool;
    fn read_sector(&self, cylinder: u8, head: u8, sector: u8, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write_sector(&mut self, cylinder: u8, head: u8, sector: u8, data: &[u8]) -> Result<(), DiskError>;
}

/// A disk image shared between the floppy controller and whoever inserted it.
pub type DiskImageHandle = Arc<RwLock<dyn DiskImage>>;

/// A flat, sector-ordered D81 image held in memory.
pub struct D81Image {
    data: Vec<u8>,
    read_only: bool,
    dirty: bool,
}

impl D81Image {
    pub const SIZE: usize = 819_200;

    pub fn new(data: Vec<u8>) -> Result<Self, anyhow::Error> {
        if data.len() != Self::SIZE {
            bail!("D81 image must be {} bytes, got {}", Self::SIZE, data.len());
        }
        Ok(Self {
            data,
            read_only: false,
            dirty: false,
        })
    }

    /// A freshly zeroed image.
    pub fn blank() -> Self {
        Self {
            data: vec![0; Self::SIZE],
            read_only: false,
            dirty: false,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_handle(self) -> DiskImageHandle {
        Arc::new(RwLock::new(self))
    }

    fn sector_offset(&self, cylinder: u8, head: u8, sector: u8) -> Result<usize, DiskError> {
        if !D81_GEOMETRY.contains(cylinder, head, sector) {
            return Err(DiskError::InvalidAddress { cylinder, head, sector });
        }
        let track = cylinder as usize * D81_GEOMETRY.heads as usize + head as usize;
        let index = track * D81_GEOMETRY.sectors_per_track as usize + (sector - D81_GEOMETRY.first_sector) as usize;
        Ok(index * D81_GEOMETRY.sector_size)
    }
}

impl DiskImage for D81Image {
    fn geometry(&self) -> DiskGeometry {
        D81_GEOMETRY
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn read_sector(&self, cylinder: u8, head: u8, sector: u8, buf: &mut [u8]) -> Result<(), DiskError> {
        let offset = self.sector_offset(cylinder, head, sector)?;
        if buf.len() != D81_GEOMETRY.sector_size {
            return Err(DiskError::BufferSize {
                expected: D81_GEOMETRY.sector_size,
                actual: buf.len(),
            });
        }
        buf.copy_from_slice(&self.data[offset..offset + D81_GEOMETRY.sector_size]);
        Ok(())
    }

    fn write_sector(&mut self, cylinder: u8, head: u8, sector: u8, data: &[u8]) -> Result<(), DiskError> {
        if self.read_only {
            return Err(DiskError::WriteProtected);
        }
        let offset = self.sector_offset(cylinder, head, sector)?;
        if data.len() != D81_GEOMETRY.sector_size {
            return Err(DiskError::BufferSize {
                expected: D81_GEOMETRY.sector_size,
                actual: data.len(),
            });
        }
        self.data[offset..offset + D81_GEOMETRY.sector_size].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(D81_GEOMETRY.total_bytes(), D81Image::SIZE);
        assert_eq!(D81_GEOMETRY.size_code(), 2);
        assert!(D81_GEOMETRY.contains(79, 1, 10));
        assert!(!D81_GEOMETRY.contains(79, 1, 0));
        assert!(!D81_GEOMETRY.contains(80, 0, 1));
        assert!(!D81_GEOMETRY.contains(0, 2, 1));
    }

    #[test]
    fn test_sector_layout() {
        let mut data = vec![0; D81Image::SIZE];
        // Cylinder 1, head 1, sector 3 lands in logical sector (1 * 2 + 1) * 10 + 2 = 32.
        data[32 * 512] = 0xA5;
        let image = D81Image::new(data).unwrap();

        let mut buf = [0u8; 512];
        image.read_sector(1, 1, 3, &mut buf).unwrap();
        assert_eq!(buf[0], 0xA5);
    }

    #[test]
    fn test_bad_size_rejected() {
        assert!(D81Image::new(vec![0; 1000]).is_err());
    }

    #[test]
    fn test_write_protect() {
        let mut image = D81Image::blank().with_read_only(true);
        assert_eq!(image.write_sector(0, 0, 1, &[0; 512]), Err(DiskError::WriteProtected));
        assert!(!image.is_dirty());

        let mut image = D81Image::blank();
        image.write_sector(39, 0, 10, &[0x42; 512]).unwrap();
        assert!(image.is_dirty());
        let mut buf = [0u8; 512];
        image.read_sector(39, 0, 10, &mut buf).unwrap();
        assert_eq!(buf, [0x42; 512]);
    }

    #[test]
    fn test_invalid_address() {
        let image = D81Image::blank();
        let mut buf = [0u8; 512];
        assert!(matches!(
            image.read_sector(0, 0, 11, &mut buf),
            Err(DiskError::InvalidAddress { sector: 11, .. })
        ));
    }
}
