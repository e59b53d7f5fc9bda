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

    kernel::hardware.rs

    Register-level interfaces to the board's interrupt controller and system
    timer, and the memory barriers used around accesses to them.
*/

use std::sync::atomic::{fence, Ordering};

use strum_macros::{Display, EnumIter};

/// Total number of interrupt lines addressable through the controller.
pub const IRQ_LINES: usize = 72;
pub const IRQS_PER_BANK: usize = 32;
pub const BASIC_IRQS: usize = 8;

/// Number of compare channels on the free-running system timer.
pub const SYSTIMER_CHANNELS: usize = 4;

/// The interrupt controller reports pending lines through three status words.
///
/// `Pending1` covers lines 0..=31, `Pending2` covers 32..=63 and `Basic` covers
/// the eight board-local lines 64..=71.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum IrqBank {
    Pending1,
    Pending2,
    Basic,
}

impl IrqBank {
    /// Banks in dispatch order.
    pub const ALL: [IrqBank; 3] = [IrqBank::Pending1, IrqBank::Pending2, IrqBank::Basic];

    pub fn index(self) -> usize {
        match self {
            IrqBank::Pending1 => 0,
            IrqBank::Pending2 => 1,
            IrqBank::Basic => 2,
        }
    }

    pub fn base_line(self) -> usize {
        self.index() * IRQS_PER_BANK
    }

    pub fn line_count(self) -> usize {
        match self {
            IrqBank::Basic => BASIC_IRQS,
            _ => IRQS_PER_BANK,
        }
    }

    /// Mask of the bits in this bank that correspond to real lines.
    pub fn valid_mask(self) -> u32 {
        match self {
            IrqBank::Basic => (1 << BASIC_IRQS) - 1,
            _ => u32::MAX,
        }
    }

    /// Split a line number into its bank and bit position. Panics if `line` is out of range.
    pub fn for_line(line: usize) -> (IrqBank, u32) {
        assert!(line < IRQ_LINES, "IRQ: line {} out of range", line);
        let bank = IrqBank::ALL[line / IRQS_PER_BANK];
        (bank, (line % IRQS_PER_BANK) as u32)
    }
}

/// Register-level access to the board's interrupt controller.
pub trait InterruptHardware: Send + Sync {
    /// Returns the pending-and-enabled bits of `bank`.
    fn read_pending(&self, bank: IrqBank) -> u32;
    /// Enable the lines set in `mask`. Bits that are clear are unaffected.
    fn enable(&self, bank: IrqBank, mask: u32);
    /// Disable the lines set in `mask`. Bits that are clear are unaffected.
    fn disable(&self, bank: IrqBank, mask: u32);
}

/// Register-level access to the free-running 1MHz system timer.
pub trait SystemTimerHardware: Send + Sync {
    /// Low 32 bits of the free-running counter.
    fn counter(&self) -> u32;
    fn compare(&self, channel: usize) -> u32;
    fn set_compare(&self, channel: usize, value: u32);
    /// Clear the match flag for `channel`, dropping its interrupt request.
    fn acknowledge(&self, channel: usize);
}

/// Interrupt line raised by a system timer compare channel.
pub fn systimer_irq_line(channel: usize) -> usize {
    assert!(channel < SYSTIMER_CHANNELS, "SYSTIMER: channel {} out of range", channel);
    channel
}

/// Complete all outstanding memory accesses before continuing.
///
/// The host build has no separate DSB and DMB, so both barriers are a full fence.
#[inline]
pub fn data_sync_barrier() {
    fence(Ordering::SeqCst);
}

/// Order memory accesses on either side of the barrier.
#[inline]
pub fn data_memory_barrier() {
    fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barriers_publish_writes_to_other_threads() {
        use std::sync::{
            atomic::{AtomicBool, AtomicU32},
            Arc,
        };

        let value = Arc::new(AtomicU32::new(0));
        let ready = Arc::new(AtomicBool::new(false));
        let writer = {
            let (value, ready) = (value.clone(), ready.clone());
            std::thread::spawn(move || {
                value.store(0x1581, Ordering::Relaxed);
                data_sync_barrier();
                ready.store(true, Ordering::Relaxed);
            })
        };
        writer.join().unwrap();
        assert!(ready.load(Ordering::Relaxed));
        data_memory_barrier();
        assert_eq!(value.load(Ordering::Relaxed), 0x1581);
    }

    #[test]
    fn test_line_to_bank() {
        assert_eq!(IrqBank::for_line(0), (IrqBank::Pending1, 0));
        assert_eq!(IrqBank::for_line(31), (IrqBank::Pending1, 31));
        assert_eq!(IrqBank::for_line(32), (IrqBank::Pending2, 0));
        assert_eq!(IrqBank::for_line(64), (IrqBank::Basic, 0));
        assert_eq!(IrqBank::for_line(71), (IrqBank::Basic, 7));
    }

    #[test]
    #[should_panic]
    fn test_line_out_of_range() {
        IrqBank::for_line(IRQ_LINES);
    }

    #[test]
    fn test_bank_extents_cover_all_lines() {
        let total: usize = IrqBank::ALL.iter().map(|bank| bank.line_count()).sum();
        assert_eq!(total, IRQ_LINES);
        assert_eq!(IrqBank::Basic.valid_mask(), 0xFF);
    }
}
