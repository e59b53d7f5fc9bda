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

    kernel::systimer.rs

    Generates the kernel tick from the system timer, re-arming the compare
    channel relative to the previous match so ticks do not drift.
*/

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crate::kernel::{hardware::SystemTimerHardware, timer::KernelTimers};

/// Compare channel used for the kernel tick. Channels 0 and 2 belong to the GPU firmware.
pub const SYSTIMER_TICK_CHANNEL: usize = 3;

/// Drives the kernel tick from a compare channel of the free-running system timer.
pub struct SystemTimer {
    hw: Arc<dyn SystemTimerHardware>,
    timers: Arc<KernelTimers>,
    channel: usize,
    period: u32,
    tick_hz: u32,
    uptime_secs: AtomicU32,
    drift_corrections: AtomicU32,
}

impl SystemTimer {
    /// `period` is the tick length in counter units (microseconds on the real board).
    pub fn new(
        hw: Arc<dyn SystemTimerHardware>,
        timers: Arc<KernelTimers>,
        channel: usize,
        period: u32,
        tick_hz: u32,
    ) -> Self {
        assert!(period > 0, "SYSTIMER: tick period must be non-zero");
        assert!(tick_hz > 0, "SYSTIMER: tick rate must be non-zero");
        Self {
            hw,
            timers,
            channel,
            period,
            tick_hz,
            uptime_secs: AtomicU32::new(0),
            drift_corrections: AtomicU32::new(0),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Program the first compare match one period from now.
    pub fn arm(&self) {
        let next = self.hw.counter().wrapping_add(self.period);
        self.hw.set_compare(self.channel, next);
        log::debug!(
            "SYSTIMER: Armed channel {} for {} ({} ticks/s)",
            self.channel,
            next,
            self.tick_hz
        );
    }

    pub fn uptime_secs(&self) -> u32 {
        self.uptime_secs.load(Ordering::Acquire)
    }

    /// Number of times the compare value had already been passed when re-armed.
    pub fn drift_corrections(&self) -> u32 {
        self.drift_corrections.load(Ordering::Relaxed)
    }

    /// Compare-match interrupt handler.
    pub fn handle_interrupt(&self) {
        let mut compare = self.hw.compare(self.channel).wrapping_add(self.period);
        self.hw.set_compare(self.channel, compare);

        let now = self.hw.counter();
        if (compare.wrapping_sub(now) as i32) <= 0 {
            // The next match is already behind us; restart the period from now.
            compare = now.wrapping_add(self.period);
            self.hw.set_compare(self.channel, compare);
            self.drift_corrections.fetch_add(1, Ordering::Relaxed);
            log::debug!("SYSTIMER: Missed tick, compare reset to {}", compare);
        }
        self.hw.acknowledge(self.channel);

        let ticks = self.timers.advance();
        if ticks % self.tick_hz == 0 {
            self.uptime_secs.fetch_add(1, Ordering::AcqRel);
        }
        self.timers.poll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{
        hardware::{InterruptHardware, IrqBank},
        sim::SimulatedBoard,
    };

    fn setup(start: u32) -> (Arc<SimulatedBoard>, Arc<KernelTimers>, SystemTimer) {
        let board = Arc::new(SimulatedBoard::with_counter(start));
        let timers = Arc::new(KernelTimers::new());
        let systimer = SystemTimer::new(board.clone(), timers.clone(), SYSTIMER_TICK_CHANNEL, 10_000, 100);
        (board, timers, systimer)
    }

    fn tick_pending(board: &SimulatedBoard) -> bool {
        board.raw_pending(IrqBank::Pending1) & (1 << SYSTIMER_TICK_CHANNEL) != 0
    }

    #[test]
    fn test_rearm_is_drift_free() {
        let (board, timers, systimer) = setup(0);
        board.enable(IrqBank::Pending1, 1 << SYSTIMER_TICK_CHANNEL);
        systimer.arm();

        // Service each match a little late; the schedule must not slip.
        board.advance_us(250);
        for tick in 1..=5u32 {
            board.advance_us(10_000);
            assert!(tick_pending(&board));
            systimer.handle_interrupt();
            assert!(!tick_pending(&board));
            assert_eq!(board.compare(SYSTIMER_TICK_CHANNEL), (tick + 1) * 10_000);
        }
        assert_eq!(timers.ticks(), 5);
        assert_eq!(systimer.drift_corrections(), 0);
    }

    #[test]
    fn test_missed_period_resets_from_now() {
        let (board, timers, systimer) = setup(0);
        systimer.arm();

        board.advance_us(25_000);
        systimer.handle_interrupt();
        assert_eq!(board.compare(SYSTIMER_TICK_CHANNEL), 35_000);
        assert_eq!(systimer.drift_corrections(), 1);
        assert_eq!(timers.ticks(), 1);
    }

    #[test]
    fn test_uptime_counts_seconds() {
        let (board, _timers, systimer) = setup(u32::MAX - 500_000);
        systimer.arm();
        for _ in 0..250 {
            board.advance_us(10_000);
            systimer.handle_interrupt();
        }
        assert_eq!(systimer.uptime_secs(), 2);
    }
}
