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

    kernel::timer.rs

    Implements the kernel's table of one-shot software timers, advanced by the
    system tick.
*/

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::kernel::spinlock::SpinLock;

/// Size of the kernel timer table.
pub const KERNEL_TIMERS: usize = 20;

pub type KernelTimerHandler = Box<dyn FnOnce(KernelTimerHandle, usize) + Send>;

/// Identifies a started kernel timer. Always non-zero; the slot index plus one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelTimerHandle(NonZeroUsize);

impl KernelTimerHandle {
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }

    fn from_slot(slot: usize) -> Self {
        Self(NonZeroUsize::MIN.saturating_add(slot))
    }

    fn slot(self) -> usize {
        self.0.get() - 1
    }
}

#[derive(Default)]
struct TimerSlot {
    active:     bool,
    elapses_at: u32,
    param:      usize,
    handler:    Option<KernelTimerHandler>,
}

/// Fixed-capacity one-shot timers driven by the kernel tick.
///
/// Expiry is checked with signed wrap-around arithmetic, so a timer started shortly before
/// the tick counter wraps still fires after exactly `delay` ticks. A slot is freed before
/// its handler is called and the table lock is not held while the handler runs, so handlers
/// may start or cancel timers (including re-arming themselves).
pub struct KernelTimers {
    ticks: AtomicU32,
    slots: SpinLock<[TimerSlot; KERNEL_TIMERS]>,
}

impl Default for KernelTimers {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl KernelTimers {
    pub fn new() -> Self {
        Default::default()
    }

    /// Create the table with the tick counter preset to `ticks`.
    pub fn starting_at(ticks: u32) -> Self {
        Self {
            ticks: AtomicU32::new(ticks),
            slots: SpinLock::new(std::array::from_fn(|_| TimerSlot::default())),
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Arm a one-shot timer that calls `handler(handle, param)` once `delay` ticks have elapsed.
    ///
    /// Returns `None` if every slot is in use.
    pub fn start_timer<F>(&self, delay: u32, handler: F, param: usize) -> Option<KernelTimerHandle>
    where
        F: FnOnce(KernelTimerHandle, usize) + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let Some(index) = slots.iter().position(|slot| !slot.active)
        else {
            drop(slots);
            log::warn!("KTIMER: System limit of {} kernel timers exceeded", KERNEL_TIMERS);
            return None;
        };

        slots[index] = TimerSlot {
            active: true,
            elapses_at: self.ticks().wrapping_add(delay),
            param,
            handler: Some(Box::new(handler)),
        };
        Some(KernelTimerHandle::from_slot(index))
    }

    /// Deactivate a timer. Cancelling a timer that already fired or was cancelled does nothing.
    ///
    /// Panics if the handle does not name a slot in the table.
    pub fn cancel_timer(&self, handle: KernelTimerHandle) {
        let index = handle.slot();
        assert!(
            index < KERNEL_TIMERS,
            "KTIMER: handle {} out of range",
            handle.as_raw()
        );
        let old_handler = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[index];
            slot.active = false;
            slot.handler.take()
        };
        drop(old_handler);
    }

    /// True if the timer named by `handle` has not yet fired or been cancelled.
    pub fn pending(&self, handle: KernelTimerHandle) -> bool {
        let index = handle.slot();
        index < KERNEL_TIMERS && self.slots.lock()[index].active
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.active).count()
    }

    /// Advance the tick counter by one and return the new count.
    pub fn advance(&self) -> u32 {
        self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Advance the tick counter by one, then fire any timers that have come due.
    pub fn tick(&self) -> u32 {
        let ticks = self.advance();
        self.poll();
        ticks
    }

    /// Fire every active timer whose deadline is at or before the current tick.
    pub fn poll(&self) {
        let now = self.ticks();
        for index in 0..KERNEL_TIMERS {
            let expired = {
                let mut slots = self.slots.lock();
                let slot = &mut slots[index];
                if slot.active && (slot.elapses_at.wrapping_sub(now) as i32) <= 0 {
                    slot.active = false;
                    slot.handler.take().map(|handler| (handler, slot.param))
                }
                else {
                    None
                }
            };

            if let Some((handler, param)) = expired {
                log::trace!("KTIMER: Timer {} fired at tick {}", index + 1, now);
                handler(KernelTimerHandle::from_slot(index), param);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Arc};

    fn fire_counter() -> (Arc<AtomicUsize>, impl FnOnce(KernelTimerHandle, usize) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_, _| {
            inner.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_handles_are_slot_plus_one() {
        let timers = KernelTimers::new();
        let first = timers.start_timer(10, |_, _| {}, 0).unwrap();
        let second = timers.start_timer(10, |_, _| {}, 0).unwrap();
        assert_eq!(first.as_raw(), 1);
        assert_eq!(second.as_raw(), 2);
        assert_eq!(KernelTimerHandle::from_raw(0), None);
    }

    #[test]
    fn test_fires_once_at_deadline() {
        let timers = KernelTimers::starting_at(100);
        let (count, handler) = fire_counter();
        let handle = timers.start_timer(8, handler, 0).unwrap();

        for _ in 0..7 {
            timers.tick();
        }
        assert_eq!(timers.ticks(), 107);
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(timers.pending(handle));

        timers.tick();
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!timers.pending(handle));

        for _ in 0..50 {
            timers.tick();
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_handler_receives_handle_and_param() {
        let timers = KernelTimers::new();
        let seen = Arc::new(SpinLock::new(None));
        let inner = seen.clone();
        let handle = timers
            .start_timer(1, move |handle, param| *inner.lock() = Some((handle, param)), 0xBEEF)
            .unwrap();
        timers.tick();
        assert_eq!(*seen.lock(), Some((handle, 0xBEEF)));
    }

    #[test]
    fn test_zero_delay_fires_on_next_poll() {
        let timers = KernelTimers::new();
        let (count, handler) = fire_counter();
        timers.start_timer(0, handler, 0).unwrap();
        timers.poll();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fires_across_wrap() {
        let timers = KernelTimers::starting_at(u32::MAX - 2);
        let (count, handler) = fire_counter();
        timers.start_timer(5, handler, 0).unwrap();

        for _ in 0..4 {
            timers.tick();
        }
        assert_eq!(timers.ticks(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 0);

        timers.tick();
        assert_eq!(timers.ticks(), 2);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_exhaustion() {
        let timers = KernelTimers::new();
        for i in 0..KERNEL_TIMERS {
            assert!(timers.start_timer(100, |_, _| {}, i).is_some());
        }
        assert_eq!(timers.active_count(), KERNEL_TIMERS);
        assert!(timers.start_timer(100, |_, _| {}, 0).is_none());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let timers = KernelTimers::new();
        let (count, handler) = fire_counter();
        let handle = timers.start_timer(2, handler, 0).unwrap();

        timers.cancel_timer(handle);
        timers.cancel_timer(handle);
        assert!(!timers.pending(handle));

        timers.tick();
        timers.tick();
        timers.tick();
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn test_handler_can_rearm() {
        let timers = Arc::new(KernelTimers::new());
        let count = Arc::new(AtomicUsize::new(0));

        fn arm(timers: &Arc<KernelTimers>, count: &Arc<AtomicUsize>) {
            let inner_timers = Arc::downgrade(timers);
            let inner_count = count.clone();
            timers.start_timer(
                3,
                move |_, _| {
                    if inner_count.fetch_add(1, Ordering::Relaxed) < 2 {
                        if let Some(timers) = inner_timers.upgrade() {
                            arm(&timers, &inner_count);
                        }
                    }
                },
                0,
            );
        }

        arm(&timers, &count);
        for _ in 0..30 {
            timers.tick();
        }
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn test_slot_is_free_while_handler_runs() {
        let timers = Arc::new(KernelTimers::new());
        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let inner_timers = Arc::downgrade(&timers);
        let inner_observed = observed.clone();
        timers.start_timer(
            1,
            move |_, _| {
                if let Some(timers) = inner_timers.upgrade() {
                    inner_observed.store(timers.active_count(), Ordering::Relaxed);
                }
            },
            0,
        );
        timers.tick();
        assert_eq!(observed.load(Ordering::Relaxed), 0);
    }
}
