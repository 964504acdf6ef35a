// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Analog sampling on ADC1 using direct PAC register access.
//!
//! Single-channel, software-triggered conversions. `start` kicks off a
//! conversion and `try_read` polls it non-blocking, so a cooperative task can
//! yield between the two; `read` chains them for callers that can afford to
//! spin.
//!
//! Example:
//! ```no_run
//! let mut adc = Adc::adc1(dp.ADC1);
//! let value = adc.read(3);
//! ```

use core::convert::Infallible;

use nb::block;
use stm32f7xx_hal::pac;

/// ADC1 configured for 12-bit, right-aligned, software-triggered conversions.
pub struct Adc {
    adc: pac::ADC1,
}

impl Adc {
    pub fn adc1(adc: pac::ADC1) -> Self {
        let rcc = unsafe { &*pac::RCC::ptr() };
        rcc.apb2enr.modify(|_, w| w.adc1en().set_bit());

        // ADC prescaler: PCLK2 / 4
        let common = unsafe { &*pac::ADC_COMMON::ptr() };
        common.ccr.modify(|_, w| w.adcpre().div4());

        // Power off to configure
        adc.cr2.modify(|_, w| w.adon().clear_bit());
        adc.cr1.modify(|_, w| w.res().bits(0b00));
        adc.cr2.modify(|_, w| {
            w.cont().clear_bit();
            w.align().right();
            w.exten().disabled();
            w
        });
        // Longest sample time on channels 0-9 for stability
        adc.smpr2.modify(|_, w| unsafe { w.bits(0x3FFF_FFFF) });
        // Sequence length = 1 conversion
        adc.sqr1.modify(|_, w| w.l().bits(0));
        adc.cr2.modify(|_, w| w.adon().set_bit());

        Self { adc }
    }

    /// Start a conversion on the given channel.
    pub fn start(&mut self, channel: u8) {
        self.adc
            .sqr3
            .modify(|_, w| unsafe { w.sq1().bits(channel & 0x1F) });
        self.adc.cr2.modify(|_, w| w.swstart().set_bit());
    }

    /// Poll the conversion started by [`start`](Self::start).
    pub fn try_read(&mut self) -> nb::Result<u16, Infallible> {
        if self.adc.sr.read().eoc().bit_is_clear() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.adc.dr.read().data().bits())
    }

    /// Convert one channel, spinning until the result is ready.
    pub fn read(&mut self, channel: u8) -> u16 {
        self.start(channel);
        match block!(self.try_read()) {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }

    pub fn free(self) -> pac::ADC1 {
        self.adc
    }
}
