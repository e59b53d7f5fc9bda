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

    input.rs

    Front panel input: GPIO access, button debouncing and key repeat, all
    driven from kernel timers.
*/

use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use strum_macros::Display;

use crate::{
    drive_config::{ButtonConfiguration, InputConfiguration},
    kernel::{
        ms_to_ticks,
        spinlock::SpinLock,
        timer::{KernelTimerHandle, KernelTimers},
    },
};

/// Ticks between button samples.
pub const BUTTON_POLL_TICKS: u32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum PinFunction {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

/// GPIO block of the host board. Methods take `&self` as they map onto device registers
/// that may be touched from interrupt context.
pub trait GpioPins: Send + Sync {
    fn set_function(&self, pin: u32, function: PinFunction);
    fn set(&self, pin: u32);
    fn clear(&self, pin: u32);
    fn read(&self, pin: u32) -> bool;
    fn enable_edge_detect(&self, pin: u32, rising: bool, falling: bool);
    /// Clear the pin's edge-detect status, returning whether an edge had been latched.
    fn clear_edge_detect(&self, pin: u32) -> bool;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum KeyEventKind {
    Press,
    Repeat,
    Release,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key:  u8,
    pub kind: KeyEventKind,
}

#[derive(Default)]
struct RepeatState {
    held: Option<u8>,
    timer: Option<KernelTimerHandle>,
    generation: usize,
}

struct RepeatShared {
    timers: Arc<KernelTimers>,
    events: Sender<KeyEvent>,
    repeat: bool,
    delay_ticks: u32,
    rate_ticks: u32,
    state: SpinLock<RepeatState>,
}

impl RepeatShared {
    fn send(&self, key: u8, kind: KeyEventKind) {
        if self.events.send(KeyEvent { key, kind }).is_err() {
            log::trace!("INPUT: Key event {} for key {} dropped, receiver gone", kind, key);
        }
    }

    /// Arm a repeat timer. The current generation rides along as the timer parameter so a
    /// stale expiry can be recognized and ignored.
    fn arm(shared: &Arc<Self>, delay: u32) {
        let generation = shared.state.lock().generation;
        let weak: Weak<Self> = Arc::downgrade(shared);
        let handle = shared.timers.start_timer(
            delay,
            move |_, param| {
                if let Some(shared) = weak.upgrade() {
                    RepeatShared::fire(&shared, param);
                }
            },
            generation,
        );

        match handle {
            Some(handle) => {
                let mut state = shared.state.lock();
                if state.generation == generation {
                    state.timer = Some(handle);
                }
            }
            None => log::warn!("INPUT: No kernel timer free, key repeat disabled for this press"),
        }
    }

    fn fire(shared: &Arc<Self>, generation: usize) {
        let key = {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            match state.held {
                Some(key) => key,
                None => return,
            }
        };
        shared.send(key, KeyEventKind::Repeat);
        Self::arm(shared, shared.rate_ticks);
    }

    /// Forget the held key and return its timer, if any, for the caller to cancel.
    fn release(&self) -> Option<KernelTimerHandle> {
        let mut state = self.state.lock();
        state.held = None;
        state.generation = state.generation.wrapping_add(1);
        state.timer.take()
    }
}

/// Turns key down/up transitions into press, repeat and release events.
///
/// Repeats are produced by kernel timers, so events may be sent from interrupt context.
/// Only the most recently pressed key repeats.
#[derive(Clone)]
pub struct KeyRepeater {
    shared: Arc<RepeatShared>,
}

impl KeyRepeater {
    pub fn new(timers: Arc<KernelTimers>, events: Sender<KeyEvent>, config: &InputConfiguration, tick_hz: u32) -> Self {
        let delay_ticks = ms_to_ticks(config.repeat_delay_ms, tick_hz).max(1);
        let rate_ticks = ms_to_ticks(config.repeat_rate_ms, tick_hz).max(1);
        log::debug!(
            "INPUT: Key repeat {} delay {} ticks rate {} ticks",
            if config.repeat { "on" } else { "off" },
            delay_ticks,
            rate_ticks
        );
        Self {
            shared: Arc::new(RepeatShared {
                timers,
                events,
                repeat: config.repeat,
                delay_ticks,
                rate_ticks,
                state: SpinLock::new(Default::default()),
            }),
        }
    }

    pub fn key_down(&self, key: u8) {
        if let Some(handle) = self.shared.release() {
            self.shared.timers.cancel_timer(handle);
        }
        self.shared.state.lock().held = Some(key);
        self.shared.send(key, KeyEventKind::Press);
        if self.shared.repeat {
            RepeatShared::arm(&self.shared, self.shared.delay_ticks);
        }
    }

    pub fn key_up(&self, key: u8) {
        if self.held() == Some(key) {
            if let Some(handle) = self.shared.release() {
                self.shared.timers.cancel_timer(handle);
            }
        }
        self.shared.send(key, KeyEventKind::Release);
    }

    pub fn held(&self) -> Option<u8> {
        self.shared.state.lock().held
    }

    pub fn delay_ticks(&self) -> u32 {
        self.shared.delay_ticks
    }

    pub fn rate_ticks(&self) -> u32 {
        self.shared.rate_ticks
    }
}

#[derive(Copy, Clone, Default)]
struct ButtonSample {
    last: bool,
    stable: bool,
}

#[derive(Default)]
struct PollState {
    running: bool,
    timer: Option<KernelTimerHandle>,
    samples: Vec<ButtonSample>,
}

struct PollShared {
    gpio: Arc<dyn GpioPins>,
    timers: Arc<KernelTimers>,
    repeater: KeyRepeater,
    buttons: Vec<ButtonConfiguration>,
    state: SpinLock<PollState>,
}

impl PollShared {
    fn arm(shared: &Arc<Self>) {
        let weak = Arc::downgrade(shared);
        let handle = shared.timers.start_timer(
            BUTTON_POLL_TICKS,
            move |_, _| {
                if let Some(shared) = weak.upgrade() {
                    PollShared::fire(&shared);
                }
            },
            0,
        );
        if handle.is_none() {
            log::warn!("INPUT: No kernel timer free, button polling stopped");
        }
        let mut state = shared.state.lock();
        state.timer = handle;
        state.running &= handle.is_some();
    }

    fn fire(shared: &Arc<Self>) {
        // Buttons pull their pin low when pressed.
        let levels: Vec<bool> = shared.buttons.iter().map(|b| !shared.gpio.read(b.pin)).collect();

        let mut changes = Vec::new();
        {
            let mut state = shared.state.lock();
            state.timer = None;
            if !state.running {
                return;
            }
            for (index, (sample, pressed)) in state.samples.iter_mut().zip(levels).enumerate() {
                if pressed == sample.last && pressed != sample.stable {
                    sample.stable = pressed;
                    changes.push((shared.buttons[index].key, pressed));
                }
                sample.last = pressed;
            }
        }

        for (key, pressed) in changes {
            if pressed {
                shared.repeater.key_down(key);
            }
            else {
                shared.repeater.key_up(key);
            }
        }
        Self::arm(shared);
    }
}

/// Samples the configured buttons every tick from a self re-arming kernel timer and feeds
/// debounced transitions to a [`KeyRepeater`]. A level must be seen on two consecutive
/// samples before it is accepted.
pub struct ButtonPoller {
    shared: Arc<PollShared>,
}

impl ButtonPoller {
    pub fn new(
        gpio: Arc<dyn GpioPins>,
        timers: Arc<KernelTimers>,
        repeater: KeyRepeater,
        buttons: Vec<ButtonConfiguration>,
    ) -> Self {
        let samples = vec![ButtonSample::default(); buttons.len()];
        Self {
            shared: Arc::new(PollShared {
                gpio,
                timers,
                repeater,
                buttons,
                state: SpinLock::new(PollState {
                    samples,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn start(&self) {
        for button in &self.shared.buttons {
            self.shared.gpio.set_function(button.pin, PinFunction::Input);
        }
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }
        log::debug!("INPUT: Polling {} buttons", self.shared.buttons.len());
        PollShared::arm(&self.shared);
    }

    pub fn stop(&self) {
        let timer = {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.timer.take()
        };
        if let Some(handle) = timer {
            self.shared.timers.cancel_timer(handle);
        }
    }

    pub fn running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Debounced state of each configured button, in configuration order.
    pub fn pressed(&self) -> Vec<bool> {
        self.shared.state.lock().samples.iter().map(|s| s.stable).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct SimGpio {
        levels: AtomicU32,
    }

    impl SimGpio {
        fn new() -> Self {
            Self {
                levels: AtomicU32::new(u32::MAX),
            }
        }
    }

    impl GpioPins for SimGpio {
        fn set_function(&self, _pin: u32, _function: PinFunction) {}
        fn set(&self, pin: u32) {
            self.levels.fetch_or(1 << pin, Ordering::SeqCst);
        }
        fn clear(&self, pin: u32) {
            self.levels.fetch_and(!(1 << pin), Ordering::SeqCst);
        }
        fn read(&self, pin: u32) -> bool {
            self.levels.load(Ordering::SeqCst) & (1 << pin) != 0
        }
        fn enable_edge_detect(&self, _pin: u32, _rising: bool, _falling: bool) {}
        fn clear_edge_detect(&self, _pin: u32) -> bool {
            false
        }
    }

    fn repeater() -> (Arc<KernelTimers>, KeyRepeater, Receiver<KeyEvent>) {
        let timers = Arc::new(KernelTimers::new());
        let (tx, rx) = unbounded();
        let repeater = KeyRepeater::new(timers.clone(), tx, &InputConfiguration::default(), 100);
        (timers, repeater, rx)
    }

    fn drain(rx: &Receiver<KeyEvent>) -> Vec<KeyEventKind> {
        rx.try_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_repeat_timing() {
        let (timers, repeater, rx) = repeater();
        assert_eq!(repeater.delay_ticks(), 50);
        assert_eq!(repeater.rate_ticks(), 10);

        repeater.key_down(3);
        assert_eq!(drain(&rx), vec![KeyEventKind::Press]);

        for _ in 0..49 {
            timers.tick();
        }
        assert!(drain(&rx).is_empty());
        timers.tick();
        assert_eq!(drain(&rx), vec![KeyEventKind::Repeat]);

        for _ in 0..20 {
            timers.tick();
        }
        assert_eq!(drain(&rx), vec![KeyEventKind::Repeat, KeyEventKind::Repeat]);
        assert_eq!(timers.active_count(), 1);

        repeater.key_up(3);
        assert_eq!(drain(&rx), vec![KeyEventKind::Release]);
        assert_eq!(timers.active_count(), 0);
        for _ in 0..100 {
            timers.tick();
        }
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_new_key_takes_over_repeat() {
        let (timers, repeater, rx) = repeater();
        repeater.key_down(1);
        repeater.key_down(2);
        assert_eq!(timers.active_count(), 1);
        for _ in 0..50 {
            timers.tick();
        }
        let events: Vec<KeyEvent> = rx.try_iter().collect();
        assert_eq!(events.last(), Some(&KeyEvent { key: 2, kind: KeyEventKind::Repeat }));
        assert_eq!(events.iter().filter(|e| e.kind == KeyEventKind::Repeat).count(), 1);
    }

    #[test]
    fn test_repeat_tolerates_timer_exhaustion() {
        let (timers, repeater, rx) = repeater();
        let mut handles = Vec::new();
        while let Some(handle) = timers.start_timer(1000, |_, _| {}, 0) {
            handles.push(handle);
        }
        repeater.key_down(7);
        assert_eq!(drain(&rx), vec![KeyEventKind::Press]);
        for _ in 0..100 {
            timers.tick();
        }
        assert!(drain(&rx).is_empty());
        repeater.key_up(7);
        assert_eq!(drain(&rx), vec![KeyEventKind::Release]);
    }

    #[test]
    fn test_button_debounce() {
        let (timers, repeater, rx) = repeater();
        let gpio = Arc::new(SimGpio::new());
        let buttons = vec![ButtonConfiguration { pin: 4, key: 9 }];
        let poller = ButtonPoller::new(gpio.clone(), timers.clone(), repeater, buttons);
        poller.start();
        assert!(poller.running());

        // A single low sample is a glitch.
        gpio.clear(4);
        timers.tick();
        gpio.set(4);
        timers.tick();
        timers.tick();
        assert!(drain(&rx).is_empty());

        gpio.clear(4);
        timers.tick();
        assert!(drain(&rx).is_empty());
        timers.tick();
        assert_eq!(drain(&rx), vec![KeyEventKind::Press]);
        assert_eq!(poller.pressed(), vec![true]);

        gpio.set(4);
        timers.tick();
        timers.tick();
        assert_eq!(drain(&rx), vec![KeyEventKind::Release]);

        poller.stop();
        assert!(!poller.running());
        assert_eq!(timers.active_count(), 0);
    }
}
