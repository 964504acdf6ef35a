// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Pin-routing service using direct PAC register access.
//!
//! Peripheral drivers name the physical pin they need and the alternate
//! function it must carry; this module enables the port clock and programs
//! the mux. `Output` and `Input` cover the few pins driven as plain GPIO.
//!
//! Example:
//! ```no_run
//! gpio::peripheral(PinId::new('A', 11), 10, Pull::None);
//! let led = gpio::Output::new(PinId::new('B', 7), false);
//! ```

use stm32f7xx_hal::pac;

const GPIO_BASE: usize = 0x4002_0000;
const GPIO_BANK_STRIDE: usize = 0x400;

/// One physical pin, identified by port letter and pin number.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinId {
    bank: u8,
    pin: u8,
}

impl PinId {
    /// `port` is `'A'`..=`'K'`, `pin` is 0..=15.
    pub const fn new(port: char, pin: u8) -> Self {
        Self {
            bank: port as u8 - b'A',
            pin,
        }
    }
}

/// Pull resistor configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pull {
    None,
    Up,
    Down,
}

impl Pull {
    fn bits(self) -> u32 {
        match self {
            Pull::None => 0,
            Pull::Up => 1,
            Pull::Down => 2,
        }
    }
}

// All banks share the GPIOA register layout.
fn regs(id: PinId) -> &'static pac::gpioa::RegisterBlock {
    let base = GPIO_BASE + GPIO_BANK_STRIDE * id.bank as usize;
    unsafe { &*(base as *const pac::gpioa::RegisterBlock) }
}

fn enable_bank_clock(id: PinId) {
    let rcc = unsafe { &*pac::RCC::ptr() };
    rcc.ahb1enr
        .modify(|r, w| unsafe { w.bits(r.bits() | (1 << id.bank)) });
}

// MODER values.
const MODE_INPUT: u32 = 0;
const MODE_OUTPUT: u32 = 1;
const MODE_ALTERNATE: u32 = 2;

fn set_mode(id: PinId, mode: u32) {
    let shift = 2 * id.pin as u32;
    regs(id)
        .moder
        .modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | (mode << shift)) });
}

fn set_pull(id: PinId, pull: Pull) {
    let shift = 2 * id.pin as u32;
    regs(id)
        .pupdr
        .modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | (pull.bits() << shift)) });
}

fn set_high_speed(id: PinId) {
    let shift = 2 * id.pin as u32;
    regs(id)
        .ospeedr
        .modify(|r, w| unsafe { w.bits(r.bits() | (0b11 << shift)) });
}

/// Route a pin to an alternate function.
pub fn peripheral(id: PinId, af: u8, pull: Pull) {
    enable_bank_clock(id);
    set_pull(id, pull);
    set_high_speed(id);
    let gpio = regs(id);
    if id.pin < 8 {
        let shift = 4 * id.pin as u32;
        gpio.afrl
            .modify(|r, w| unsafe { w.bits((r.bits() & !(0xF << shift)) | ((af as u32) << shift)) });
    } else {
        let shift = 4 * (id.pin as u32 - 8);
        gpio.afrh
            .modify(|r, w| unsafe { w.bits((r.bits() & !(0xF << shift)) | ((af as u32) << shift)) });
    }
    // Mode last, so the pin switches over fully configured
    set_mode(id, MODE_ALTERNATE);
}

/// A pin driven as a push-pull output.
pub struct Output {
    id: PinId,
}

impl Output {
    pub fn new(id: PinId, initial_high: bool) -> Self {
        enable_bank_clock(id);
        let out = Self { id };
        out.set(initial_high);
        set_mode(id, MODE_OUTPUT);
        out
    }

    /// Drive the pin through the set/reset register (atomic, no read-back).
    pub fn set(&self, high: bool) {
        let bit = if high {
            1 << self.id.pin
        } else {
            1 << (self.id.pin + 16)
        };
        regs(self.id).bsrr.write(|w| unsafe { w.bits(bit) });
    }

    pub fn toggle(&self) {
        let high = regs(self.id).odr.read().bits() & (1 << self.id.pin) != 0;
        self.set(!high);
    }
}

/// A pin sampled as an input.
pub struct Input {
    id: PinId,
}

impl Input {
    pub fn new(id: PinId, pull: Pull) -> Self {
        enable_bank_clock(id);
        set_pull(id, pull);
        set_mode(id, MODE_INPUT);
        Self { id }
    }

    pub fn is_high(&self) -> bool {
        regs(self.id).idr.read().bits() & (1 << self.id.pin) != 0
    }
}
