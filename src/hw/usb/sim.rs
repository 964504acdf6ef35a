// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Simulated OTG_FS controller for host-side unit tests.
//!
//! Models the controller behavior the driver depends on: a receive-status
//! queue with peek (`GRXSTSR`) and pop (`GRXSTSP`) semantics backed by one
//! shared payload word stream (so an entry that isn't fully drained skews
//! every later read), endpoint disables and FIFO flushes that complete
//! immediately, an always-idle AHB, and per-endpoint capture of transmitted
//! words. Writes that sequence hardware handshakes are recorded in an ordered
//! event log.

use core::cell::RefCell;

use std::collections::VecDeque;
use std::vec::Vec;

use super::regs::*;

const REG_WORDS: usize = 0x1000 / 4;

/// Hardware handshakes observed by the simulator, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An IN endpoint disable was requested (and acknowledged).
    EpDisable(u8),
    /// A tx FIFO flush was requested (and completed).
    TxFlush(u8),
}

struct State {
    regs: [u32; REG_WORDS],
    queue: VecDeque<u32>,
    stream: VecDeque<u32>,
    tx: [Vec<u32>; 4],
    events: Vec<Event>,
    irq_masked: bool,
    pins_routed: bool,
    routed_after_mode_select: bool,
    routed_before_fifo_setup: bool,
}

pub struct SimOtg {
    state: RefCell<State>,
}

impl SimOtg {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                regs: [0; REG_WORDS],
                queue: VecDeque::new(),
                stream: VecDeque::new(),
                tx: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
                events: Vec::new(),
                irq_masked: false,
                pins_routed: false,
                routed_after_mode_select: false,
                routed_before_fifo_setup: false,
            }),
        }
    }

    /// Queue a receive-status entry; its payload words go onto the shared
    /// stream.
    pub fn push_rx(&self, ep: u8, pktsts: u32, data: &[u8]) {
        let status =
            ep as u32 | ((data.len() as u32) << GRX_BCNT_SHIFT) | (pktsts << GRX_PKTSTS_SHIFT);
        let mut st = self.state.borrow_mut();
        st.queue.push_back(status);
        for unit in data.chunks(4) {
            let mut w = [0u8; 4];
            w[..unit.len()].copy_from_slice(unit);
            st.stream.push_back(u32::from_le_bytes(w));
        }
    }

    /// Raw register peek, no side effects.
    pub fn reg(&self, offset: usize) -> u32 {
        self.state.borrow().regs[offset / 4]
    }

    /// Raw register poke, no side effects.
    pub fn set_reg(&self, offset: usize, value: u32) {
        self.state.borrow_mut().regs[offset / 4] = value;
    }

    /// Entries still on the receive-status queue.
    pub fn rx_pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Payload words not yet read out of the shared rx stream.
    pub fn stream_words(&self) -> usize {
        self.state.borrow().stream.len()
    }

    /// Words stored into an IN endpoint's tx window.
    pub fn tx_words(&self, ep: u8) -> Vec<u32> {
        self.state.borrow().tx[ep as usize].clone()
    }

    pub fn clear_tx(&self, ep: u8) {
        self.state.borrow_mut().tx[ep as usize].clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Whether the controller interrupt line is currently masked.
    pub fn irq_masked(&self) -> bool {
        self.state.borrow().irq_masked
    }

    /// Whether the pin-routing hook has been invoked.
    pub fn pins_routed(&self) -> bool {
        self.state.borrow().pins_routed
    }

    /// Whether device mode was already selected when the pins were routed.
    pub fn routed_after_mode_select(&self) -> bool {
        self.state.borrow().routed_after_mode_select
    }

    /// Whether the packet memory was still unpartitioned when the pins were
    /// routed.
    pub fn routed_before_fifo_setup(&self) -> bool {
        self.state.borrow().routed_before_fifo_setup
    }
}

fn is_in_ctl(offset: usize) -> bool {
    (0x900..0x9A0).contains(&offset) && (offset - 0x900) % 0x20 == 0
}

impl OtgBus for SimOtg {
    fn read(&self, offset: usize) -> u32 {
        let mut st = self.state.borrow_mut();
        match offset {
            GINTSTS => {
                let mut v = st.regs[GINTSTS / 4];
                if !st.queue.is_empty() {
                    v |= RXFLVL;
                }
                if st.regs[DAINT / 4] & st.regs[DAINTMSK / 4] != 0 {
                    v |= IEPINT;
                }
                v
            }
            GRXSTSR => st.queue.front().copied().unwrap_or(0),
            GRXSTSP => st.queue.pop_front().unwrap_or(0),
            GRSTCTL => st.regs[GRSTCTL / 4] | GRSTCTL_AHBIDL,
            off if off >= 0x1000 => st.stream.pop_front().unwrap_or(0),
            off => st.regs[off / 4],
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut st = self.state.borrow_mut();
        match offset {
            off if off >= 0x1000 => {
                let ep = (off - 0x1000) / 0x1000;
                st.tx[ep].push(value);
            }
            GRSTCTL => {
                let mut v = value;
                if v & GRSTCTL_TXFFLSH != 0 {
                    let fnum = ((v >> GRSTCTL_TXFNUM_SHIFT) & 0x1F) as u8;
                    st.events.push(Event::TxFlush(fnum));
                    // Flush completes immediately
                    v &= !GRSTCTL_TXFFLSH;
                }
                st.regs[GRSTCTL / 4] = v;
            }
            off if is_in_ctl(off) => {
                let mut v = value;
                if v & EPCTL_EPDIS != 0 {
                    // Disable is acknowledged immediately
                    let ep = ((off - 0x900) / 0x20) as u8;
                    st.events.push(Event::EpDisable(ep));
                    v &= !(EPCTL_EPDIS | EPCTL_EPENA);
                }
                st.regs[off / 4] = v;
            }
            off => st.regs[off / 4] = value,
        }
    }

    fn irq_disable(&self) {
        self.state.borrow_mut().irq_masked = true;
    }

    fn irq_enable(&self) {
        self.state.borrow_mut().irq_masked = false;
    }

    fn enable_clock(&self) {}

    fn route_pins(&self) {
        let mut st = self.state.borrow_mut();
        st.pins_routed = true;
        st.routed_after_mode_select = st.regs[GUSBCFG / 4] & GUSBCFG_FDMOD != 0;
        st.routed_before_fifo_setup = st.regs[GRXFSIZ / 4] == 0;
    }

    fn unique_id(&self) -> [u8; CHIP_UID_LEN] {
        [
            0xAB, 0x01, 0xF2, 0x00, 0x10, 0x20, 0x30, 0x40, 0x55, 0x66, 0x77, 0x88,
        ]
    }
}
