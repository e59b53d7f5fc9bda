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

    kernel::sim.rs

    A simulated board providing the interrupt controller and system timer
    register interfaces, used when running on a host and in tests.
*/

use std::sync::atomic::{AtomicU32, Ordering};

use crate::kernel::hardware::{
    systimer_irq_line,
    InterruptHardware,
    IrqBank,
    SystemTimerHardware,
    SYSTIMER_CHANNELS,
};

/// An in-memory stand-in for the board's interrupt controller and system timer.
///
/// Raw pending state is tracked separately from the enable masks, so a line raised while
/// disabled becomes visible to `read_pending` as soon as it is enabled, just like the real
/// controller. The counter only moves when the host calls [`SimulatedBoard::advance_us`].
pub struct SimulatedBoard {
    raw_pending: [AtomicU32; 3],
    enabled:     [AtomicU32; 3],
    counter:     AtomicU32,
    compare:     [AtomicU32; SYSTIMER_CHANNELS],
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self {
            raw_pending: Default::default(),
            enabled:     Default::default(),
            counter:     AtomicU32::new(0),
            compare:     Default::default(),
        }
    }
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Default::default()
    }

    /// Start the free-running counter at `value`.
    pub fn with_counter(value: u32) -> Self {
        let board = Self::new();
        board.counter.store(value, Ordering::Release);
        board
    }

    /// Latch an interrupt request on `line`.
    pub fn raise(&self, line: usize) {
        let (bank, bit) = IrqBank::for_line(line);
        self.raw_pending[bank.index()].fetch_or(1 << bit, Ordering::AcqRel);
    }

    /// Drop an interrupt request on `line`.
    pub fn lower(&self, line: usize) {
        let (bank, bit) = IrqBank::for_line(line);
        self.raw_pending[bank.index()].fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    pub fn raw_pending(&self, bank: IrqBank) -> u32 {
        self.raw_pending[bank.index()].load(Ordering::Acquire)
    }

    pub fn enabled_mask(&self, bank: IrqBank) -> u32 {
        self.enabled[bank.index()].load(Ordering::Acquire)
    }

    pub fn is_enabled(&self, line: usize) -> bool {
        let (bank, bit) = IrqBank::for_line(line);
        self.enabled_mask(bank) & (1 << bit) != 0
    }

    /// Advance the free-running counter by `us` microseconds. Any compare channel whose value
    /// is passed over, or landed on, raises its interrupt line.
    pub fn advance_us(&self, us: u32) {
        if us == 0 {
            return;
        }
        let old = self.counter.load(Ordering::Acquire);
        let new = old.wrapping_add(us);

        for channel in 0..SYSTIMER_CHANNELS {
            let compare = self.compare[channel].load(Ordering::Acquire);
            // Distance from the tick after `old` to the compare value, modulo 2^32.
            if compare.wrapping_sub(old).wrapping_sub(1) < us {
                self.raise(systimer_irq_line(channel));
            }
        }
        self.counter.store(new, Ordering::Release);
    }
}

impl InterruptHardware for SimulatedBoard {
    fn read_pending(&self, bank: IrqBank) -> u32 {
        self.raw_pending(bank) & self.enabled_mask(bank) & bank.valid_mask()
    }

    fn enable(&self, bank: IrqBank, mask: u32) {
        self.enabled[bank.index()].fetch_or(mask & bank.valid_mask(), Ordering::AcqRel);
    }

    fn disable(&self, bank: IrqBank, mask: u32) {
        self.enabled[bank.index()].fetch_and(!mask, Ordering::AcqRel);
    }
}

impl SystemTimerHardware for SimulatedBoard {
    fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    fn compare(&self, channel: usize) -> u32 {
        self.compare[channel].load(Ordering::Acquire)
    }

    fn set_compare(&self, channel: usize, value: u32) {
        self.compare[channel].store(value, Ordering::Release);
    }

    fn acknowledge(&self, channel: usize) {
        self.lower(systimer_irq_line(channel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_masked_by_enable() {
        let board = SimulatedBoard::new();
        board.raise(40);
        assert_eq!(board.read_pending(IrqBank::Pending2), 0);
        board.enable(IrqBank::Pending2, 1 << 8);
        assert_eq!(board.read_pending(IrqBank::Pending2), 1 << 8);
        board.disable(IrqBank::Pending2, 1 << 8);
        assert_eq!(board.read_pending(IrqBank::Pending2), 0);
    }

    #[test]
    fn test_compare_match_raises_line() {
        let board = SimulatedBoard::new();
        board.set_compare(3, 100);
        board.advance_us(99);
        assert_eq!(board.raw_pending(IrqBank::Pending1) & (1 << 3), 0);
        board.advance_us(1);
        assert_ne!(board.raw_pending(IrqBank::Pending1) & (1 << 3), 0);
        board.acknowledge(3);
        assert_eq!(board.raw_pending(IrqBank::Pending1) & (1 << 3), 0);
    }

    #[test]
    fn test_compare_match_across_wrap() {
        let board = SimulatedBoard::with_counter(u32::MAX - 5);
        board.set_compare(1, 4);
        board.advance_us(9);
        assert_eq!(board.raw_pending(IrqBank::Pending1) & (1 << 1), 0);
        board.advance_us(1);
        assert_ne!(board.raw_pending(IrqBank::Pending1) & (1 << 1), 0);
        assert_eq!(board.counter(), 4);
    }
}
