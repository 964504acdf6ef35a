// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Packet-memory layout and the word-level packet transfer engine.
//!
//! The controller multiplexes every OUT endpoint over a single receive-status
//! queue backed by a single receive FIFO. Whoever starts consuming a queue
//! entry must consume it to the end, in whole 32-bit units, or the queue
//! pointer desynchronizes for every later reader.

use super::regs::*;
use super::{EP0, EP_ACM, EP_BULK_IN, EP_BULK_OUT, EP_BULK_OUT_SIZE};

/// Words reserved for the shared rx FIFO: setup/status slots, the largest OUT
/// packet in words plus its status entry, and transfer-complete margin
/// (the controller manual's recommended sizing).
const RX_FIFO_WORDS: u32 = (4 * 1 + 6) + 4 * ((EP_BULK_OUT_SIZE as u32 / 4) + 1) + 2 * 1;

/// Words in each tx FIFO window.
const TX_FIFO_WORDS: u32 = 0x10;

// The rx window plus the three tx windows must fit the 320-word packet memory.
const _: () = assert!(RX_FIFO_WORDS + 3 * TX_FIFO_WORDS <= 320);

/// Byte offset of the shared rx FIFO window.
const RX_FIFO: usize = EP_IN[0].fifo;

/// Partition the controller's packet memory: the rx window first, then one tx
/// window per IN-capable endpoint in a fixed order.
pub(super) fn configure<B: OtgBus>(bus: &B) {
    bus.write(GRXFSIZ, RX_FIFO_WORDS);

    let mut fpos = RX_FIFO_WORDS;
    bus.write(DIEPTXF0, fpos | (TX_FIFO_WORDS << 16));
    fpos += TX_FIFO_WORDS;

    bus.write(dieptxf(EP_ACM), fpos | (TX_FIFO_WORDS << 16));
    fpos += TX_FIFO_WORDS;

    bus.write(dieptxf(EP_BULK_IN), fpos | (TX_FIFO_WORDS << 16));
}

/// Push one packet into an IN endpoint's tx FIFO window.
///
/// Programs the transfer size and packet count, marks the endpoint enabled
/// and not NAKing, then stores the payload in 4-byte units, zero-padding the
/// final partial unit. Always reports the full length; there are no partial
/// writes.
pub(super) fn write_packet<B: OtgBus>(bus: &B, ep: u8, data: &[u8]) -> usize {
    let regs = &EP_IN[ep as usize];
    bus.write(regs.int, DIEPINT_XFRC);
    bus.write(regs.tsiz, data.len() as u32 | (1 << TSIZ_PKTCNT_SHIFT));
    bus.modify(regs.ctl, |ctl| ctl | EPCTL_EPENA | EPCTL_CNAK);

    let mut units = data.chunks_exact(4);
    for unit in units.by_ref() {
        bus.write(regs.fifo, u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]));
    }
    let tail = units.remainder();
    if !tail.is_empty() {
        let mut unit = [0u8; 4];
        unit[..tail.len()].copy_from_slice(tail);
        bus.write(regs.fifo, u32::from_le_bytes(unit));
    }
    data.len()
}

/// Pop the rx queue's head entry and copy its payload out of the FIFO.
///
/// Copies up to `dest.len()` bytes (an empty slice is a valid discard sink),
/// then drains the rest of the entry in whole units so the queue pointer
/// stays aligned with the next entry. Re-arms the originating OUT endpoint
/// if the controller disabled it or left it NAKing. Returns the bytes
/// delivered to `dest`.
pub(super) fn read_packet<B: OtgBus>(bus: &B, dest: &mut [u8]) -> usize {
    let grx = bus.read(GRXSTSP);
    let bcnt = ((grx & GRX_BCNT_MASK) >> GRX_BCNT_SHIFT) as usize;
    let xfer = bcnt.min(dest.len());

    let mut off = 0;
    while off + 4 <= xfer {
        dest[off..off + 4].copy_from_slice(&bus.read(RX_FIFO).to_le_bytes());
        off += 4;
    }
    if off < xfer {
        let unit = bus.read(RX_FIFO).to_le_bytes();
        dest[off..xfer].copy_from_slice(&unit[..xfer - off]);
    }
    // Entries occupy whole units; drain whatever the destination didn't cover
    for _ in 0..bcnt.div_ceil(4) - xfer.div_ceil(4) {
        bus.read(RX_FIFO);
    }

    // Reenable packet reception if the controller disabled it
    let out = &EP_OUT[(grx & GRX_EPNUM_MASK) as usize];
    let ctl = bus.read(out.ctl);
    if ctl & EPCTL_EPENA == 0 || ctl & EPCTL_NAKSTS != 0 {
        bus.write(out.tsiz, EP_BULK_OUT_SIZE as u32 | (1 << TSIZ_PKTCNT_SHIFT));
        bus.write(out.ctl, ctl | EPCTL_EPENA | EPCTL_CNAK);
    }
    xfer
}

/// Non-destructively decide whether the rx queue's next entry belongs to `ep`.
///
/// A genuine data/setup entry for the other valid endpoint is left queued for
/// that endpoint's own caller. Entries with an unrecognized endpoint/status
/// combination are popped outright; recognized informational entries are
/// drained through [`read_packet`]. Returns the raw status word of an entry
/// ready for `ep`, or `None` when nothing is ready for it.
pub(super) fn peek_rx_queue<B: OtgBus>(bus: &B, ep: u8) -> Option<u32> {
    loop {
        if bus.read(GINTSTS) & RXFLVL == 0 {
            // Queue empty
            return None;
        }
        let grx = bus.read(GRXSTSR);
        let grx_ep = (grx & GRX_EPNUM_MASK) as u8;
        let pktsts = (grx & GRX_PKTSTS_MASK) >> GRX_PKTSTS_SHIFT;
        let valid_ep = grx_ep == EP0 || grx_ep == EP_BULK_OUT;
        if valid_ep && (pktsts == PKTSTS_OUT_DATA || pktsts == PKTSTS_SETUP_DATA) {
            // A packet is ready; foreign entries stay queued for their owner
            if grx_ep != ep {
                return None;
            }
            return Some(grx);
        }
        if !valid_ep
            || !matches!(
                pktsts,
                PKTSTS_GLOBAL_OUT_NAK | PKTSTS_OUT_DONE | PKTSTS_SETUP_DONE
            )
        {
            // Bogus entry - just pop it
            bus.read(GRXSTSP);
            continue;
        }
        // Informational entry - drain it
        read_packet(bus, &mut []);
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::SimOtg;
    use super::*;

    #[test]
    fn layout_is_deterministic() {
        let sim = SimOtg::new();
        configure(&sim);
        assert_eq!(sim.reg(GRXFSIZ), 80);
        assert_eq!(sim.reg(DIEPTXF0), 80 | (0x10 << 16));
        assert_eq!(sim.reg(dieptxf(EP_ACM)), 96 | (0x10 << 16));
        assert_eq!(sim.reg(dieptxf(EP_BULK_IN)), 112 | (0x10 << 16));
    }

    #[test]
    fn write_pads_final_unit_without_reporting_it() {
        let sim = SimOtg::new();
        let sent = write_packet(&sim, EP_BULK_IN, &[0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(sent, 5);
        assert_eq!(sim.tx_words(EP_BULK_IN), [0x4433_2211, 0x0000_0055]);
    }

    #[test]
    fn short_destination_still_drains_whole_entry() {
        let sim = SimOtg::new();
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DATA, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DATA, &[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 4];
        assert_eq!(read_packet(&sim, &mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);

        // The first entry's unread units are gone; the second starts clean.
        assert_eq!(read_packet(&sim, &mut buf), 4);
        assert_eq!(buf, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn discard_sink_advances_past_entire_entry() {
        let sim = SimOtg::new();
        sim.push_rx(EP0, PKTSTS_OUT_DATA, &[9, 9, 9, 9, 9]);
        sim.push_rx(EP0, PKTSTS_OUT_DATA, &[1, 2]);

        assert_eq!(read_packet(&sim, &mut []), 0);
        let mut buf = [0u8; 8];
        assert_eq!(read_packet(&sim, &mut buf), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn read_rearms_a_disabled_out_endpoint() {
        let sim = SimOtg::new();
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DATA, &[1, 2, 3, 4]);
        // Controller dropped EPENA after filling its packet buffer.
        sim.set_reg(EP_OUT[EP_BULK_OUT as usize].ctl, EPCTL_USBAEP);

        let mut buf = [0u8; 4];
        read_packet(&sim, &mut buf);

        let ctl = sim.reg(EP_OUT[EP_BULK_OUT as usize].ctl);
        assert_ne!(ctl & EPCTL_EPENA, 0);
        assert_ne!(ctl & EPCTL_CNAK, 0);
        assert_eq!(
            sim.reg(EP_OUT[EP_BULK_OUT as usize].tsiz),
            EP_BULK_OUT_SIZE as u32 | (1 << TSIZ_PKTCNT_SHIFT)
        );
    }

    #[test]
    fn peek_leaves_foreign_entries_for_their_owner() {
        let sim = SimOtg::new();
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DATA, &[7, 7, 7, 7]);

        assert_eq!(peek_rx_queue(&sim, EP0), None);
        assert_eq!(sim.rx_pending(), 1);

        let grx = peek_rx_queue(&sim, EP_BULK_OUT).unwrap();
        assert_eq!(grx & GRX_EPNUM_MASK, EP_BULK_OUT as u32);
        // Still not popped; popping is the reader's job.
        assert_eq!(sim.rx_pending(), 1);
    }

    #[test]
    fn peek_discards_bogus_and_informational_entries() {
        let sim = SimOtg::new();
        // Invalid endpoint, then invalid status class, then an informational
        // entry carrying payload words, then real data.
        sim.push_rx(5, PKTSTS_OUT_DATA, &[]);
        sim.push_rx(EP0, 7, &[]);
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DONE, &[0, 0, 0, 0]);
        sim.push_rx(EP_BULK_OUT, PKTSTS_OUT_DATA, &[4, 3, 2, 1]);

        assert!(peek_rx_queue(&sim, EP_BULK_OUT).is_some());
        let mut buf = [0u8; 4];
        assert_eq!(read_packet(&sim, &mut buf), 4);
        assert_eq!(buf, [4, 3, 2, 1]);
        assert_eq!(sim.rx_pending(), 0);
    }
}
