// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Serial Peripheral Interface (SPI) stub.
//!
//! `SpiBus` wraps a configured HAL SPI instance with 8-bit words; `ChipSelect`
//! is an active-low GPIO output for manual CS control.

use stm32f7xx_hal::{
    gpio::{self, Output, PinState, PushPull},
    prelude::*,
    spi::{self, Enabled, Spi},
};

/// Wrapper around an enabled HAL SPI instance (8-bit words).
pub struct SpiBus<I, P> {
    spi: Spi<I, P, Enabled<u8>>,
}

impl<I, P> SpiBus<I, P>
where
    I: spi::Instance,
    P: spi::Pins<I>,
{
    pub fn new(spi: Spi<I, P, Enabled<u8>>) -> Self {
        Self { spi }
    }

    /// Perform a blocking, full-duplex transfer of one byte.
    pub fn transfer_byte(&mut self, byte: u8) -> Result<u8, spi::Error> {
        let mut tmp = [byte];
        self.spi.transfer(&mut tmp)?;
        Ok(tmp[0])
    }

    /// Transfer a byte buffer in-place.
    pub fn transfer(&mut self, buf: &mut [u8]) -> Result<(), spi::Error> {
        self.spi.transfer(buf)?;
        Ok(())
    }

    pub fn free(self) -> Spi<I, P, Enabled<u8>> {
        self.spi
    }
}

/// Manual chip-select line, active-low, generic over any GPIO pin.
pub struct ChipSelect<const P: char, const N: u8> {
    pin: gpio::Pin<P, N, Output<PushPull>>,
}

impl<const P: char, const N: u8> ChipSelect<P, N> {
    /// Create an active-low chip select, initially deasserted.
    pub fn active_low<MODE>(pin: gpio::Pin<P, N, MODE>) -> Self {
        let mut pin = pin.into_push_pull_output();
        pin.set_state(PinState::High);
        Self { pin }
    }

    /// Assert the chip select.
    #[inline]
    pub fn select(&mut self) {
        self.pin.set_low();
    }

    /// Deassert the chip select.
    #[inline]
    pub fn deselect(&mut self) {
        self.pin.set_high();
    }

    /// Run `f` with the chip selected; deasserts even on an error result.
    pub fn with_selected<T, E>(&mut self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        self.select();
        let result = f();
        self.deselect();
        result
    }

    pub fn free(self) -> gpio::Pin<P, N, Output<PushPull>> {
        self.pin
    }
}
