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

    kernel::interrupt.rs

    Implements the interrupt controller front end: per-line handler registration
    and dispatch of pending lines in priority order.
*/

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crate::kernel::{
    hardware::{data_memory_barrier, data_sync_barrier, InterruptHardware, IrqBank, IRQ_LINES},
    spinlock::SpinLock,
};

pub type IrqHandler = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct IrqSlot {
    handler:    Option<IrqHandler>,
    // Bumped on every connect/disconnect so a handler taken out for servicing is not
    // put back over a newer registration.
    generation: u32,
    in_service: bool,
}

/// Routes hardware interrupt lines to registered handlers.
///
/// At most one handler is registered per line. Dispatch walks the three pending banks in
/// order and services set bits in ascending line order. A line that is pending with no
/// handler attached is disabled so it cannot storm.
pub struct InterruptController {
    hw:        Arc<dyn InterruptHardware>,
    slots:     SpinLock<Vec<IrqSlot>>,
    unhandled: AtomicU32,
}

impl InterruptController {
    pub fn new(hw: Arc<dyn InterruptHardware>) -> Self {
        let mut slots = Vec::with_capacity(IRQ_LINES);
        slots.resize_with(IRQ_LINES, IrqSlot::default);
        Self {
            hw,
            slots: SpinLock::new(slots),
            unhandled: AtomicU32::new(0),
        }
    }

    /// Register `handler` for `line` and enable the line.
    ///
    /// Panics if the line is out of range or already has a handler.
    pub fn connect<F>(&self, line: usize, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        assert!(line < IRQ_LINES, "IRQ: line {} out of range", line);
        {
            let mut slots = self.slots.lock();
            let slot = &mut slots[line];
            assert!(
                slot.handler.is_none() && !slot.in_service,
                "IRQ: line {} already connected",
                line
            );
            slot.handler = Some(Box::new(handler));
            slot.generation = slot.generation.wrapping_add(1);
        }
        log::debug!("IRQ: Connected handler to line {}", line);
        self.enable(line);
    }

    /// Disable `line` and drop its handler. Disconnecting an unconnected line is a no-op
    /// apart from the disable.
    pub fn disconnect(&self, line: usize) {
        assert!(line < IRQ_LINES, "IRQ: line {} out of range", line);
        self.disable(line);
        let old_handler = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[line];
            slot.generation = slot.generation.wrapping_add(1);
            slot.in_service = false;
            slot.handler.take()
        };
        if old_handler.is_some() {
            log::debug!("IRQ: Disconnected handler from line {}", line);
        }
    }

    pub fn is_connected(&self, line: usize) -> bool {
        assert!(line < IRQ_LINES, "IRQ: line {} out of range", line);
        let slots = self.slots.lock();
        slots[line].handler.is_some() || slots[line].in_service
    }

    pub fn enable(&self, line: usize) {
        let (bank, bit) = IrqBank::for_line(line);
        data_sync_barrier();
        self.hw.enable(bank, 1 << bit);
        data_memory_barrier();
    }

    pub fn disable(&self, line: usize) {
        let (bank, bit) = IrqBank::for_line(line);
        data_sync_barrier();
        self.hw.disable(bank, 1 << bit);
        data_memory_barrier();
    }

    /// Number of lines that were disabled because they fired with no handler attached.
    pub fn unhandled_count(&self) -> u32 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Service every pending, enabled line. This is the body of the IRQ vector.
    pub fn dispatch(&self) {
        for bank in IrqBank::ALL {
            data_sync_barrier();
            let mut pending = self.hw.read_pending(bank) & bank.valid_mask();
            data_memory_barrier();

            while pending != 0 {
                let bit = pending.trailing_zeros() as usize;
                pending &= pending - 1;
                self.service(bank.base_line() + bit);
            }
        }
    }

    fn service(&self, line: usize) {
        let (handler, generation) = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[line];
            if slot.in_service {
                // Already running further up the stack.
                return;
            }
            let handler = slot.handler.take();
            slot.in_service = handler.is_some();
            (handler, slot.generation)
        };

        match handler {
            Some(mut handler) => {
                handler();
                let mut slots = self.slots.lock();
                let slot = &mut slots[line];
                if slot.generation == generation {
                    slot.handler = Some(handler);
                    slot.in_service = false;
                }
            }
            None => {
                log::warn!("IRQ: Line {} pending with no handler; disabling", line);
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                self.disable(line);
            }
        }
    }
}
