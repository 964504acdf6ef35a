#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod adc;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod gpio;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod spi;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod usart;
pub mod usb;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use adc::Adc;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use spi::{ChipSelect, SpiBus};
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use usart::DebugPort;
pub use usb::{Interrupted, UsbOtg, WakeFlags};
