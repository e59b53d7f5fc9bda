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

    kernel::mod.rs

    The kernel runtime for the drive firmware: interrupt dispatch, the system
    tick and kernel timers.
*/

pub mod hardware;
pub mod interrupt;
pub mod sim;
pub mod spinlock;
pub mod systimer;
pub mod timer;

use std::sync::Arc;

use crate::{
    drive_config::KernelConfiguration,
    kernel::{
        hardware::{systimer_irq_line, InterruptHardware, SystemTimerHardware},
        interrupt::InterruptController,
        systimer::SystemTimer,
        timer::KernelTimers,
    },
};

/// Default kernel tick rate.
pub const HZ: u32 = 100;

/// Convert milliseconds to kernel ticks at `tick_hz`, rounding up so that any non-zero
/// interval is at least one tick.
pub fn ms_to_ticks(ms: u32, tick_hz: u32) -> u32 {
    (ms as u64 * tick_hz as u64).div_ceil(1000).min(u32::MAX as u64) as u32
}

/// The kernel runtime: interrupt dispatch, the system tick and the kernel timer table.
///
/// Construct once at startup and share by reference. Interrupt entry from the vector
/// table (or the host's simulated equivalent) calls [`Kernel::irq_entry`].
pub struct Kernel {
    interrupts: InterruptController,
    timers: Arc<KernelTimers>,
    systimer: Arc<SystemTimer>,
    config: KernelConfiguration,
}

impl Kernel {
    pub fn new<B>(board: Arc<B>, config: KernelConfiguration) -> Self
    where
        B: InterruptHardware + SystemTimerHardware + 'static,
    {
        let timers = Arc::new(KernelTimers::new());
        let systimer = Arc::new(SystemTimer::new(
            board.clone(),
            timers.clone(),
            config.systimer_channel,
            config.tick_period(),
            config.tick_hz,
        ));
        Self {
            interrupts: InterruptController::new(board),
            timers,
            systimer,
            config,
        }
    }

    /// Arm the system tick and attach its interrupt handler.
    pub fn start(&self) {
        let systimer = self.systimer.clone();
        self.systimer.arm();
        self.interrupts
            .connect(systimer_irq_line(self.systimer.channel()), move || systimer.handle_interrupt());
        log::info!(
            "KERNEL: Started, {} Hz tick, period {} counter units",
            self.config.tick_hz,
            self.systimer.period()
        );
    }

    /// IRQ vector body.
    pub fn irq_entry(&self) {
        self.interrupts.dispatch();
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    pub fn timers(&self) -> &Arc<KernelTimers> {
        &self.timers
    }

    pub fn systimer(&self) -> &SystemTimer {
        &self.systimer
    }

    pub fn config(&self) -> &KernelConfiguration {
        &self.config
    }

    pub fn ticks(&self) -> u32 {
        self.timers.ticks()
    }

    pub fn uptime_secs(&self) -> u32 {
        self.systimer.uptime_secs()
    }

    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.config.tick_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sim::SimulatedBoard;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(500, HZ), 50);
        assert_eq!(ms_to_ticks(15, HZ), 2);
        assert_eq!(ms_to_ticks(9, HZ), 1);
        assert_eq!(ms_to_ticks(0, HZ), 0);
        assert_eq!(ms_to_ticks(u32::MAX, 1000), u32::MAX);
    }

    #[test]
    fn test_kernel_tick_drives_timers() {
        let board = Arc::new(SimulatedBoard::new());
        let kernel = Kernel::new(board.clone(), KernelConfiguration::default());
        kernel.start();

        let fired_at = Arc::new(AtomicU32::new(0));
        let inner = fired_at.clone();
        let timers = Arc::downgrade(kernel.timers());
        kernel.timers().start_timer(
            kernel.ms_to_ticks(50),
            move |_, _| {
                if let Some(timers) = timers.upgrade() {
                    inner.store(timers.ticks(), Ordering::Relaxed);
                }
            },
            0,
        );

        for _ in 0..10 {
            board.advance_us(10_000);
            kernel.irq_entry();
        }
        assert_eq!(kernel.ticks(), 10);
        assert_eq!(fired_at.load(Ordering::Relaxed), 5);
        assert_eq!(kernel.uptime_secs(), 0);
    }
}
