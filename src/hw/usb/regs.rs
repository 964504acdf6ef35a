// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! OTG_FS register map and controller access.
//!
//! The driver core never dereferences raw pointers. It addresses registers by
//! their byte offset inside the OTG_FS register file through [`OtgBus`], and
//! finds per-endpoint register sets in a compile-time table. [`OtgFs`] is the
//! on-hardware implementation; tests substitute a simulated controller.

/// Number of bytes in the chip unique-id region.
pub const CHIP_UID_LEN: usize = 12;

// Global OTG registers.
pub(crate) const GOTGCTL: usize = 0x000;
pub(crate) const GAHBCFG: usize = 0x008;
pub(crate) const GUSBCFG: usize = 0x00C;
pub(crate) const GRSTCTL: usize = 0x010;
pub(crate) const GINTSTS: usize = 0x014;
pub(crate) const GINTMSK: usize = 0x018;
pub(crate) const GRXSTSR: usize = 0x01C;
pub(crate) const GRXSTSP: usize = 0x020;
pub(crate) const GRXFSIZ: usize = 0x024;
pub(crate) const DIEPTXF0: usize = 0x028;
pub(crate) const GCCFG: usize = 0x038;

// Device-mode registers.
pub(crate) const DCFG: usize = 0x800;
pub(crate) const DCTL: usize = 0x804;
pub(crate) const DIEPMSK: usize = 0x810;
pub(crate) const DAINT: usize = 0x818;
pub(crate) const DAINTMSK: usize = 0x81C;

/// Dedicated tx FIFO size register for IN endpoints 1..=3.
pub(crate) const fn dieptxf(ep: u8) -> usize {
    0x100 + 4 * ep as usize
}

/// Register set of one IN endpoint.
pub(crate) struct EpIn {
    pub ctl: usize,
    pub int: usize,
    pub tsiz: usize,
    pub fifo: usize,
}

/// Register set of one OUT endpoint.
pub(crate) struct EpOut {
    pub ctl: usize,
    pub tsiz: usize,
}

const fn ep_in(n: usize) -> EpIn {
    EpIn {
        ctl: 0x900 + 0x20 * n,
        int: 0x908 + 0x20 * n,
        tsiz: 0x910 + 0x20 * n,
        fifo: 0x1000 + 0x1000 * n,
    }
}

const fn ep_out(n: usize) -> EpOut {
    EpOut {
        ctl: 0xB00 + 0x20 * n,
        tsiz: 0xB10 + 0x20 * n,
    }
}

pub(crate) const EP_IN: [EpIn; 4] = [ep_in(0), ep_in(1), ep_in(2), ep_in(3)];
pub(crate) const EP_OUT: [EpOut; 4] = [ep_out(0), ep_out(1), ep_out(2), ep_out(3)];

// GINTSTS / GINTMSK
pub(crate) const RXFLVL: u32 = 1 << 4;
pub(crate) const IEPINT: u32 = 1 << 18;

// GRXSTSR / GRXSTSP fields
pub(crate) const GRX_EPNUM_MASK: u32 = 0xF;
pub(crate) const GRX_BCNT_SHIFT: u32 = 4;
pub(crate) const GRX_BCNT_MASK: u32 = 0x7FF << GRX_BCNT_SHIFT;
pub(crate) const GRX_PKTSTS_SHIFT: u32 = 17;
pub(crate) const GRX_PKTSTS_MASK: u32 = 0xF << GRX_PKTSTS_SHIFT;

// GRXSTS packet-status classes, device mode.
pub(crate) const PKTSTS_GLOBAL_OUT_NAK: u32 = 1;
pub(crate) const PKTSTS_OUT_DATA: u32 = 2;
pub(crate) const PKTSTS_OUT_DONE: u32 = 3;
pub(crate) const PKTSTS_SETUP_DONE: u32 = 4;
pub(crate) const PKTSTS_SETUP_DATA: u32 = 6;

// GRSTCTL
pub(crate) const GRSTCTL_TXFFLSH: u32 = 1 << 5;
pub(crate) const GRSTCTL_TXFNUM_SHIFT: u32 = 6;
pub(crate) const GRSTCTL_AHBIDL: u32 = 1 << 31;

// GUSBCFG
pub(crate) const GUSBCFG_PHYSEL: u32 = 1 << 6;
pub(crate) const GUSBCFG_TRDT_SHIFT: u32 = 10;
pub(crate) const GUSBCFG_FDMOD: u32 = 1 << 30;

// GCCFG
pub(crate) const GCCFG_PWRDWN: u32 = 1 << 16;
pub(crate) const GCCFG_NOVBUSSENS: u32 = 1 << 21;

// GOTGCTL
pub(crate) const GOTGCTL_BVALOEN: u32 = 1 << 6;
pub(crate) const GOTGCTL_BVALOVAL: u32 = 1 << 7;

// GAHBCFG
pub(crate) const GAHBCFG_GINT: u32 = 1 << 0;

// DCFG
pub(crate) const DCFG_DSPD_FULL: u32 = 3;
pub(crate) const DCFG_DAD_SHIFT: u32 = 4;
pub(crate) const DCFG_DAD_MASK: u32 = 0x7F << DCFG_DAD_SHIFT;

// DIEPINT / DIEPMSK
pub(crate) const DIEPINT_XFRC: u32 = 1 << 0;

// DIEPCTL / DOEPCTL
pub(crate) const EPCTL_USBAEP: u32 = 1 << 15;
pub(crate) const EPCTL_NAKSTS: u32 = 1 << 17;
pub(crate) const EPCTL_EPTYP_SHIFT: u32 = 18;
pub(crate) const EPCTL_STALL: u32 = 1 << 21;
pub(crate) const EPCTL_TXFNUM_SHIFT: u32 = 22;
pub(crate) const EPCTL_CNAK: u32 = 1 << 26;
pub(crate) const EPCTL_SNAK: u32 = 1 << 27;
pub(crate) const EPCTL_SD0PID: u32 = 1 << 28;
pub(crate) const EPCTL_EPDIS: u32 = 1 << 30;
pub(crate) const EPCTL_EPENA: u32 = 1 << 31;

pub(crate) const EPTYP_BULK: u32 = 2;
pub(crate) const EPTYP_INTERRUPT: u32 = 3;

// DIEPTSIZ / DOEPTSIZ
pub(crate) const TSIZ_PKTCNT_SHIFT: u32 = 19;
pub(crate) const TSIZ_STUPCNT_SHIFT: u32 = 29;

/// Access to the OTG_FS controller and its platform plumbing.
///
/// Offsets are byte offsets inside the OTG_FS register file. Disabling the
/// controller's interrupt line is the driver's only mutual-exclusion
/// mechanism against [`super::UsbOtg::on_interrupt`]; `irq_disable` must take
/// effect before it returns.
pub trait OtgBus {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);

    /// Mask the controller interrupt line.
    fn irq_disable(&self);
    /// Unmask the controller interrupt line.
    fn irq_enable(&self);

    /// Enable the peripheral clock feeding the controller.
    fn enable_clock(&self);
    /// Route the controller's physical pins to the USB alternate function.
    fn route_pins(&self);
    /// Read the chip unique-id region.
    fn unique_id(&self) -> [u8; CHIP_UID_LEN];

    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let v = self.read(offset);
        self.write(offset, f(v));
    }
}

impl<T: OtgBus> OtgBus for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }
    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
    fn irq_disable(&self) {
        (**self).irq_disable()
    }
    fn irq_enable(&self) {
        (**self).irq_enable()
    }
    fn enable_clock(&self) {
        (**self).enable_clock()
    }
    fn route_pins(&self) {
        (**self).route_pins()
    }
    fn unique_id(&self) -> [u8; CHIP_UID_LEN] {
        (**self).unique_id()
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hardware {
    use cortex_m::peripheral::NVIC;
    use stm32f7xx_hal::pac;

    use super::{OtgBus, CHIP_UID_LEN};
    use crate::hw::gpio::{self, PinId, Pull};

    const OTG_FS_BASE: usize = 0x5000_0000;

    #[cfg(feature = "stm32f446")]
    const UID_BASE: usize = 0x1FFF_7A10;
    #[cfg(not(feature = "stm32f446"))]
    const UID_BASE: usize = 0x1FF0_F420;

    const IRQ_PRIORITY: u8 = 1;

    /// The OTG_FS controller on real hardware.
    pub struct OtgFs {
        _priv: (),
    }

    impl OtgFs {
        /// Claim the OTG_FS peripheral.
        ///
        /// Programs the interrupt priority. The controller itself (including
        /// the PA11/PA12 pin routing) is brought up by
        /// [`crate::hw::usb::UsbOtg::init`]; the caller still has to bind the
        /// `OTG_FS` interrupt vector to `on_interrupt`.
        pub fn take(
            _global: pac::OTG_FS_GLOBAL,
            _device: pac::OTG_FS_DEVICE,
            nvic: &mut NVIC,
        ) -> Self {
            // Four priority bits are implemented on the F7
            unsafe { nvic.set_priority(pac::Interrupt::OTG_FS, IRQ_PRIORITY << 4) };
            OtgFs { _priv: () }
        }
    }

    impl OtgBus for OtgFs {
        fn read(&self, offset: usize) -> u32 {
            unsafe { core::ptr::read_volatile((OTG_FS_BASE + offset) as *const u32) }
        }

        fn write(&self, offset: usize, value: u32) {
            unsafe { core::ptr::write_volatile((OTG_FS_BASE + offset) as *mut u32, value) }
        }

        fn irq_disable(&self) {
            NVIC::mask(pac::Interrupt::OTG_FS);
        }

        fn irq_enable(&self) {
            unsafe { NVIC::unmask(pac::Interrupt::OTG_FS) };
        }

        fn enable_clock(&self) {
            let rcc = unsafe { &*pac::RCC::ptr() };
            rcc.ahb2enr.modify(|_, w| w.otgfsen().set_bit());
        }

        fn route_pins(&self) {
            gpio::peripheral(PinId::new('A', 11), 10, Pull::None);
            gpio::peripheral(PinId::new('A', 12), 10, Pull::None);
        }

        fn unique_id(&self) -> [u8; CHIP_UID_LEN] {
            let mut id = [0u8; CHIP_UID_LEN];
            for (i, b) in id.iter_mut().enumerate() {
                *b = unsafe { core::ptr::read_volatile((UID_BASE + i) as *const u8) };
            }
            id
        }
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use hardware::OtgFs;
