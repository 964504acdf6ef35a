// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Gantry Firmware
//!
//! Hardware peripheral layer for the Gantry motion-control platform, written in Rust,
//! targeting an STM32F7 MCU.
//!
//! ## Crate Structure
//!
//! | Module | Purpose |
//! | ------ | -------- |
//! | [`hw::usb`] | USB OTG full-speed device-controller driver (serial-over-USB transport) |
//! | [`hw::gpio`] | Pin-routing service and register-level in/out pins |
//! | [`hw::adc`] | Single-channel analog sampling |
//! | [`hw::spi`], [`hw::usart`] | SPI bus stub and debug-terminal output |
//!
//! The USB driver is the transport for the command link: raw control/bulk
//! packets in, raw packets out, nothing interpreted. Descriptors, enumeration
//! and message framing live in the link layer above this crate.
//!
//! The GPIO/ADC/SPI/USART modules are thin register-level services and only
//! compile for the `thumbv7em-none-eabihf` firmware target. The USB driver
//! core is written against a register-bus trait, so its unit tests run on the
//! host against a simulated controller:
//!
//! ```bash
//! cargo test
//! ```
//!
//! ## License
//!
//! Licensed under the **MIT License**.
//! See the `LICENSE` file in the repository root for full terms.
//!
//! © 2025–2026 Christopher Liu

#![no_std]

#[cfg(test)]
extern crate std;

pub mod hw;
