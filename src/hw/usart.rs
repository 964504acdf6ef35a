// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Debug-terminal output over a USART.
//!
//! Note: When using `writeln!`, be sure to include `\r` (CR) in the format
//! string to ensure correct line endings on the terminal.
//!
//! To access the terminal on the host machine, connect to the debug USB port
//! and use
//! ```
//! $ screen /dev/tty.usbmodem* <baud_rate>
//! ```

use core::fmt;
use nb::block;

use stm32f7xx_hal::{
    prelude::*,
    serial::{Instance, Pins, Serial, Tx},
};

pub struct DebugPort<U: Instance> {
    tx: Tx<U>,
}

impl<U: Instance> DebugPort<U> {
    pub fn new<PINS: Pins<U>>(serial: Serial<U, PINS>) -> Self {
        let (tx, _rx) = serial.split();
        Self { tx }
    }

    #[inline]
    pub fn write_byte(&mut self, b: u8) {
        let _ = block!(self.tx.write(b));
    }

    pub fn write_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.write_byte(b);
        }
    }

    /// Write string and CRLF terminator.
    #[inline]
    pub fn println(&mut self, s: &str) {
        self.write_str(s);
        self.write_str("\r\n");
    }

    /// Block until the hardware TX drain is flushed.
    #[inline]
    pub fn flush(&mut self) {
        let _ = block!(self.tx.flush());
    }
}

// `core::fmt::Write` so `write!` / `writeln!` work on the port.
impl<U: Instance> fmt::Write for DebugPort<U> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        DebugPort::write_str(self, s);
        Ok(())
    }
}
