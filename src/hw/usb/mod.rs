// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! USB OTG full-speed device-controller driver (CDC-ACM endpoint profile).
//!
//! Non-blocking packet transport between the link layer and the OTG_FS
//! controller. Every call either completes immediately, reports
//! [`nb::Error::WouldBlock`] after arming the matching interrupt source, or
//! reports [`Interrupted`] on the control endpoint when an incoming request
//! preempts an outgoing response. Nothing here sleeps: the caller's
//! cooperative scheduler yields on `WouldBlock` and retries once the matching
//! [`WakeFlags`] flag has been set by [`UsbOtg::on_interrupt`].
//!
//! Two contexts touch the controller - link-layer tasks through the public
//! API, and the interrupt handler through `on_interrupt`. Each API call masks
//! the controller's single interrupt line for its duration; that is the only
//! lock. Callers must keep at most one request in flight per endpoint per
//! direction.
//!
//! This layer transports raw control/bulk packets and interprets none of
//! them; descriptors and enumeration live in the link layer. The two bounded
//! hardware handshakes (endpoint-disable acknowledgment, tx FIFO flush) are
//! busy-waited; a handshake that never completes is a firmware-fatal
//! condition left to the external watchdog.
//!
//! On hardware:
//!
//! ```ignore
//! static WAKE: WakeFlags = WakeFlags::new();
//!
//! let bus = OtgFs::take(dp.OTG_FS_GLOBAL, dp.OTG_FS_DEVICE, &mut cp.NVIC);
//! let usb = UsbOtg::init(bus, &WAKE);
//!
//! #[interrupt]
//! fn OTG_FS() {
//!     // resolve the shared driver handle, then:
//!     usb.on_interrupt();
//! }
//! ```

mod fifo;
pub mod regs;
#[cfg(test)]
mod sim;

use core::sync::atomic::{AtomicBool, Ordering};

pub use regs::OtgBus;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use regs::OtgFs;
use regs::*;

/// Control endpoint.
pub const EP0: u8 = 0;
/// CDC-ACM notification (interrupt IN) endpoint.
pub const EP_ACM: u8 = 1;
/// Bulk OUT endpoint (host to device).
pub const EP_BULK_OUT: u8 = 2;
/// Bulk IN endpoint (device to host).
pub const EP_BULK_IN: u8 = 3;

/// Max packet sizes, fixed at build time.
pub const EP0_SIZE: usize = 16;
pub const EP_ACM_SIZE: usize = 8;
pub const EP_BULK_OUT_SIZE: usize = 64;
pub const EP_BULK_IN_SIZE: usize = 64;

// DIEPCTL0/DOEPCTL0 MPSIZ encoding for a 16-byte control endpoint.
const EP0_MPSIZ_16: u32 = 2;

/// A control transfer was preempted by a newly arrived request. The caller
/// must abandon its pending control-endpoint operation and start over.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Interrupted;

/// One pending-or-not wake flag per blocked logical endpoint task.
///
/// [`UsbOtg::on_interrupt`] is the producer; a blocked task consumes its flag
/// in its poll loop and retries the call that reported `WouldBlock`. No
/// payload, no queue depth.
pub struct WakeFlags {
    ep0: AtomicBool,
    bulk_out: AtomicBool,
    bulk_in: AtomicBool,
}

impl WakeFlags {
    pub const fn new() -> Self {
        Self {
            ep0: AtomicBool::new(false),
            bulk_out: AtomicBool::new(false),
            bulk_in: AtomicBool::new(false),
        }
    }

    pub fn notify_ep0(&self) {
        self.ep0.store(true, Ordering::Release);
    }

    pub fn notify_bulk_out(&self) {
        self.bulk_out.store(true, Ordering::Release);
    }

    pub fn notify_bulk_in(&self) {
        self.bulk_in.store(true, Ordering::Release);
    }

    /// Consume the control-endpoint wake flag.
    pub fn take_ep0(&self) -> bool {
        self.ep0.swap(false, Ordering::Acquire)
    }

    /// Consume the bulk-OUT wake flag.
    pub fn take_bulk_out(&self) -> bool {
        self.bulk_out.swap(false, Ordering::Acquire)
    }

    /// Consume the bulk-IN wake flag.
    pub fn take_bulk_in(&self) -> bool {
        self.bulk_in.swap(false, Ordering::Acquire)
    }
}

impl Default for WakeFlags {
    fn default() -> Self {
        Self::new()
    }
}

const SERIAL_CHARS: usize = 2 * CHIP_UID_LEN;
const USB_DT_STRING: u8 = 3;

/// USB string descriptor carrying the device serial number.
pub struct SerialNumber {
    raw: [u8; 2 + 2 * SERIAL_CHARS],
}

impl SerialNumber {
    const PLACEHOLDER: &'static [u8; SERIAL_CHARS] = b"0123456789ABCDEF01234567";

    fn placeholder() -> Self {
        Self::from_chars(Self::PLACEHOLDER)
    }

    /// Hex-encode the chip unique id, high nibble first per byte.
    fn from_unique_id(uid: &[u8; CHIP_UID_LEN]) -> Self {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut chars = [0u8; SERIAL_CHARS];
        for (i, b) in uid.iter().enumerate() {
            chars[2 * i] = HEX[(*b >> 4) as usize];
            chars[2 * i + 1] = HEX[(*b & 0xF) as usize];
        }
        Self::from_chars(&chars)
    }

    fn from_chars(chars: &[u8; SERIAL_CHARS]) -> Self {
        let mut raw = [0u8; 2 + 2 * SERIAL_CHARS];
        raw[0] = raw.len() as u8;
        raw[1] = USB_DT_STRING;
        for (i, c) in chars.iter().enumerate() {
            // UTF-16LE code units; the high byte stays zero
            raw[2 + 2 * i] = *c;
        }
        Self { raw }
    }

    /// Complete string-descriptor image (bLength, bDescriptorType, UTF-16LE).
    pub fn descriptor(&self) -> &[u8] {
        &self.raw
    }
}

/// Device context for the OTG_FS controller.
pub struct UsbOtg<'a, B: OtgBus> {
    bus: B,
    wake: &'a WakeFlags,
    serial: SerialNumber,
}

/// Re-enables the controller interrupt line on every exit path.
struct IrqGuard<'b, B: OtgBus>(&'b B);

impl<B: OtgBus> Drop for IrqGuard<'_, B> {
    fn drop(&mut self) {
        self.0.irq_enable();
    }
}

impl<'a, B: OtgBus> UsbOtg<'a, B> {
    fn lock(&self) -> IrqGuard<'_, B> {
        self.bus.irq_disable();
        IrqGuard(&self.bus)
    }

    /// Bring up the controller in full-speed device mode.
    ///
    /// Enables the peripheral clock, waits for the internal bus to go idle,
    /// selects device mode on the internal PHY, partitions the packet memory,
    /// programs the control endpoint, unmasks the two interrupt sources the
    /// driver uses, and powers the transceiver.
    pub fn init(bus: B, wake: &'a WakeFlags) -> Self {
        let serial = if cfg!(feature = "chipid-serial") {
            SerialNumber::from_unique_id(&bus.unique_id())
        } else {
            SerialNumber::placeholder()
        };

        bus.enable_clock();
        while bus.read(GRSTCTL) & GRSTCTL_AHBIDL == 0 {}

        // Full-speed device mode on the internal PHY
        bus.write(
            GUSBCFG,
            GUSBCFG_FDMOD | GUSBCFG_PHYSEL | (6 << GUSBCFG_TRDT_SHIFT),
        );
        bus.modify(DCFG, |v| v | DCFG_DSPD_FULL);
        #[cfg(feature = "stm32f446")]
        bus.write(GOTGCTL, GOTGCTL_BVALOEN | GOTGCTL_BVALOVAL);
        #[cfg(not(feature = "stm32f446"))]
        bus.modify(GCCFG, |v| v | GCCFG_NOVBUSSENS);

        bus.route_pins();

        fifo::configure(&bus);

        // Configure and enable ep0
        bus.write(EP_IN[0].ctl, EP0_MPSIZ_16 | EPCTL_SNAK);
        bus.write(
            EP_OUT[0].tsiz,
            64 | (1 << TSIZ_STUPCNT_SHIFT) | (1 << TSIZ_PKTCNT_SHIFT),
        );
        bus.write(EP_OUT[0].ctl, EP0_MPSIZ_16 | EPCTL_EPENA | EPCTL_CNAK);

        // Unmask exactly the two sources the driver services
        bus.write(DIEPMSK, DIEPINT_XFRC);
        bus.write(GINTMSK, RXFLVL | IEPINT);
        bus.write(GAHBCFG, GAHBCFG_GINT);
        bus.irq_enable();

        // Power the transceiver and release the soft disconnect
        bus.modify(GCCFG, |v| v | GCCFG_PWRDWN);
        bus.write(DCTL, 0);

        Self { bus, wake, serial }
    }

    /// Read one packet from the bulk OUT endpoint.
    pub fn read_bulk_out(&self, buf: &mut [u8]) -> nb::Result<usize, Interrupted> {
        let _irq = self.lock();
        match fifo::peek_rx_queue(&self.bus, EP_BULK_OUT) {
            None => {
                // Wait for a packet
                self.bus.modify(GINTMSK, |v| v | RXFLVL);
                Err(nb::Error::WouldBlock)
            }
            Some(_) => Ok(fifo::read_packet(&self.bus, buf)),
        }
    }

    /// Queue one packet on the bulk IN endpoint.
    ///
    /// Until `set_configure` has enabled the endpoint, data is silently
    /// discarded and reported as sent so callers can't deadlock during the
    /// pre-enumeration window.
    pub fn send_bulk_in(&self, data: &[u8]) -> nb::Result<usize, Interrupted> {
        let _irq = self.lock();
        let ctl = self.bus.read(EP_IN[EP_BULK_IN as usize].ctl);
        if ctl & EPCTL_USBAEP == 0 {
            // Endpoint not enabled - discard data
            return Ok(data.len());
        }
        if ctl & EPCTL_EPENA != 0 {
            // Wait for space to transmit
            self.bus.modify(DAINTMSK, |v| v | (1 << EP_BULK_IN));
            return Err(nb::Error::WouldBlock);
        }
        Ok(fifo::write_packet(&self.bus, EP_BULK_IN, data))
    }

    /// Read one data packet from the control endpoint.
    pub fn read_ep0(&self, buf: &mut [u8]) -> nb::Result<usize, Interrupted> {
        let _irq = self.lock();
        let grx = match fifo::peek_rx_queue(&self.bus, EP0) {
            None => {
                self.bus.modify(GINTMSK, |v| v | RXFLVL);
                return Err(nb::Error::WouldBlock);
            }
            Some(grx) => grx,
        };
        if (grx & GRX_PKTSTS_MASK) >> GRX_PKTSTS_SHIFT != PKTSTS_OUT_DATA {
            // A new setup packet preempts the transfer in progress
            return Err(nb::Error::Other(Interrupted));
        }
        Ok(fifo::read_packet(&self.bus, buf))
    }

    /// Wait for a setup packet on the control endpoint, discarding anything
    /// queued ahead of it.
    ///
    /// A response still pending from a superseded request must never reach
    /// the host once a new request has begun, so a stale IN transfer is torn
    /// down first: disable the IN side, wait for the acknowledgment, then
    /// flush the tx FIFO and wait for the flush to finish.
    pub fn read_ep0_setup(&self, buf: &mut [u8]) -> nb::Result<usize, Interrupted> {
        let _irq = self.lock();
        loop {
            let grx = match fifo::peek_rx_queue(&self.bus, EP0) {
                None => {
                    self.bus.modify(GINTMSK, |v| v | RXFLVL);
                    return Err(nb::Error::WouldBlock);
                }
                Some(grx) => grx,
            };
            if (grx & GRX_PKTSTS_MASK) >> GRX_PKTSTS_SHIFT == PKTSTS_SETUP_DATA {
                break;
            }
            // Discard other packets
            fifo::read_packet(&self.bus, &mut []);
        }
        let ctl = self.bus.read(EP_IN[0].ctl);
        if ctl & EPCTL_EPENA != 0 {
            // Flush any pending tx packets
            self.bus.write(EP_IN[0].ctl, ctl | EPCTL_EPDIS | EPCTL_SNAK);
            while self.bus.read(EP_IN[0].ctl) & EPCTL_EPENA != 0 {}
            self.bus.write(GRSTCTL, GRSTCTL_TXFFLSH);
            while self.bus.read(GRSTCTL) & GRSTCTL_TXFFLSH != 0 {}
        }
        Ok(fifo::read_packet(&self.bus, buf))
    }

    /// Queue one response packet on the control endpoint.
    pub fn send_ep0(&self, data: &[u8]) -> nb::Result<usize, Interrupted> {
        let _irq = self.lock();
        if fifo::peek_rx_queue(&self.bus, EP0).is_some() {
            // An incoming request preempts the outgoing response
            return Err(nb::Error::Other(Interrupted));
        }
        if self.bus.read(EP_IN[0].ctl) & EPCTL_EPENA != 0 {
            // Wait for space to transmit
            self.bus.modify(GINTMSK, |v| v | RXFLVL);
            self.bus.modify(DAINTMSK, |v| v | (1 << EP0));
            return Err(nb::Error::WouldBlock);
        }
        Ok(fifo::write_packet(&self.bus, EP0, data))
    }

    /// Stall the control endpoint and wake its task.
    pub fn stall_ep0(&self) {
        let _irq = self.lock();
        self.bus.modify(EP_IN[0].ctl, |v| v | EPCTL_STALL);
        self.wake.notify_ep0();
    }

    /// Latch the device address assigned by the host and queue the
    /// zero-length status response.
    pub fn set_address(&self, addr: u8) {
        self.bus.modify(DCFG, |v| {
            (v & !DCFG_DAD_MASK) | ((addr as u32) << DCFG_DAD_SHIFT)
        });
        let _ = self.send_ep0(&[]);
        self.wake.notify_ep0();
    }

    /// Program the class endpoints once the host selects a configuration.
    ///
    /// Resets each endpoint to the DATA0 toggle state. Bulk IN additionally
    /// gets the disable-and-flush treatment so a configuration change never
    /// leaks a stale packet.
    pub fn set_configure(&self) {
        let _irq = self.lock();

        // Configure and enable the notification endpoint
        let acm = &EP_IN[EP_ACM as usize];
        self.bus
            .write(acm.tsiz, EP_ACM_SIZE as u32 | (1 << TSIZ_PKTCNT_SHIFT));
        self.bus.write(
            acm.ctl,
            EPCTL_SNAK
                | EPCTL_USBAEP
                | (EPTYP_INTERRUPT << EPCTL_EPTYP_SHIFT)
                | EPCTL_SD0PID
                | ((EP_ACM as u32) << EPCTL_TXFNUM_SHIFT)
                | EP_ACM_SIZE as u32,
        );

        // Configure and enable bulk OUT
        let out = &EP_OUT[EP_BULK_OUT as usize];
        self.bus
            .write(out.tsiz, EP_BULK_OUT_SIZE as u32 | (1 << TSIZ_PKTCNT_SHIFT));
        self.bus.write(
            out.ctl,
            EPCTL_CNAK
                | EPCTL_USBAEP
                | EPCTL_EPENA
                | (EPTYP_BULK << EPCTL_EPTYP_SHIFT)
                | EPCTL_SD0PID
                | EP_BULK_OUT_SIZE as u32,
        );

        // Configure bulk IN and flush its tx FIFO for a clean start
        let bin = &EP_IN[EP_BULK_IN as usize];
        self.bus
            .write(bin.tsiz, EP_BULK_IN_SIZE as u32 | (1 << TSIZ_PKTCNT_SHIFT));
        self.bus.write(
            bin.ctl,
            EPCTL_SNAK
                | EPCTL_EPDIS
                | EPCTL_USBAEP
                | (EPTYP_BULK << EPCTL_EPTYP_SHIFT)
                | EPCTL_SD0PID
                | ((EP_BULK_IN as u32) << EPCTL_TXFNUM_SHIFT)
                | EP_BULK_IN_SIZE as u32,
        );
        while self.bus.read(bin.ctl) & EPCTL_EPENA != 0 {}
        self.bus.write(
            GRSTCTL,
            ((EP_BULK_IN as u32) << GRSTCTL_TXFNUM_SHIFT) | GRSTCTL_TXFFLSH,
        );
        while self.bus.read(GRSTCTL) & GRSTCTL_TXFFLSH != 0 {}
    }

    /// String descriptor carrying the device serial number.
    pub fn serial_descriptor(&self) -> &[u8] {
        self.serial.descriptor()
    }

    /// Service the controller interrupt.
    ///
    /// Masks each source that fired and wakes the matching endpoint task. No
    /// data moves here; the woken task retries through the public API. The
    /// rx source stays asserted until the queue drains, so it must be masked
    /// before returning or it would re-trigger immediately.
    pub fn on_interrupt(&self) {
        let sts = self.bus.read(GINTSTS);
        if sts & RXFLVL != 0 {
            // Received data - mask the source and notify the owner of the
            // head entry
            self.bus.modify(GINTMSK, |v| v & !RXFLVL);
            let grx = self.bus.read(GRXSTSR);
            if grx & GRX_EPNUM_MASK == EP0 as u32 {
                self.wake.notify_ep0();
            } else {
                self.wake.notify_bulk_out();
            }
        }
        if sts & IEPINT != 0 {
            // Transmit complete - mask exactly the endpoint bits that fired
            let daint = self.bus.read(DAINT);
            self.bus.modify(DAINTMSK, |v| v & !daint);
            if daint & (1 << EP0) != 0 {
                self.wake.notify_ep0();
            }
            if daint & (1 << EP_BULK_IN) != 0 {
                self.wake.notify_bulk_in();
            }
        }
    }
}
