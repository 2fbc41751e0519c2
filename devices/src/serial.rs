// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A 16550-compatible UART: the classic 8-byte register window
//! (RBR/THR, IER, IIR/FCR, LCR, MCR, LSR, MSR, SCR), an input FIFO, and
//! level-triggered RX/TX-empty interrupt assertion.
//!
//! The register-window layout follows the standard 16550 programming
//! model; the input-FIFO-plus-level-IRQ device shape (raise on data
//! ready, drop once drained) follows the general pattern in
//! `examples/original_source/emulators/serial/imx_serial.c`'s
//! `imx_set_rdirq`/`_imx_reg_urxd0`, adapted to the 16550's own register
//! numbering rather than the i.MX UART's.

use std::collections::VecDeque;

use crate::bus::{BusAccessInfo, BusDevice};

const RBR_THR: u64 = 0;
const IER: u64 = 1;
const IIR_FCR: u64 = 2;
const LCR: u64 = 3;
const MCR: u64 = 4;
const LSR: u64 = 5;
const MSR: u64 = 6;
const SCR: u64 = 7;

const IER_RDA: u8 = 0x01;
const IER_THRE: u8 = 0x02;

const IIR_NONE: u8 = 0x01;
const IIR_THRE: u8 = 0x02;
const IIR_RDA: u8 = 0x04;

const LCR_DLAB: u8 = 0x80;

const LSR_DATA_READY: u8 = 0x01;
const LSR_THRE: u8 = 0x20;
const LSR_TEMT: u8 = 0x40;

const FIFO_SIZE: usize = 256;

/// Where transmitted bytes go: an embedder reads them via `drain_out`.
pub struct Serial {
    input: VecDeque<u8>,
    out: VecDeque<u8>,
    ier: u8,
    lcr: u8,
    mcr: u8,
    scr: u8,
    divisor: u16,
    irq_level: bool,
}

impl Default for Serial {
    fn default() -> Self {
        Serial {
            input: VecDeque::new(),
            out: VecDeque::new(),
            ier: 0,
            lcr: 0,
            mcr: 0,
            scr: 0,
            divisor: 12, // 9600 baud at a 115200 base clock
            irq_level: false,
        }
    }
}

impl Serial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues guest-inbound bytes (e.g. from a host console), asserting
    /// the RX-available interrupt if enabled.
    pub fn queue_input(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.input.len() < FIFO_SIZE {
                self.input.push_back(b);
            }
        }
        self.update_irq();
    }

    /// Drains bytes the guest has written to THR, for the embedder to
    /// forward to a host console.
    pub fn drain_out(&mut self) -> Vec<u8> {
        self.out.drain(..).collect()
    }

    pub fn irq_level(&self) -> bool {
        self.irq_level
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    fn lsr(&self) -> u8 {
        let mut lsr = LSR_THRE | LSR_TEMT;
        if !self.input.is_empty() {
            lsr |= LSR_DATA_READY;
        }
        lsr
    }

    fn update_irq(&mut self) {
        let rda_pending = self.ier & IER_RDA != 0 && !self.input.is_empty();
        let thre_pending = self.ier & IER_THRE != 0;
        self.irq_level = rda_pending || thre_pending;
    }

    fn iir(&self) -> u8 {
        if self.ier & IER_RDA != 0 && !self.input.is_empty() {
            IIR_RDA
        } else if self.ier & IER_THRE != 0 {
            IIR_THRE
        } else {
            IIR_NONE
        }
    }

    fn read_reg(&mut self, offset: u64) -> u8 {
        match offset {
            RBR_THR if self.dlab() => self.divisor as u8,
            RBR_THR => self.input.pop_front().unwrap_or(0),
            IER if self.dlab() => (self.divisor >> 8) as u8,
            IER => self.ier,
            IIR_FCR => self.iir(),
            LCR => self.lcr,
            MCR => self.mcr,
            LSR => self.lsr(),
            MSR => 0,
            SCR => self.scr,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u8) {
        match offset {
            RBR_THR if self.dlab() => self.divisor = (self.divisor & 0xff00) | value as u16,
            RBR_THR => self.out.push_back(value),
            IER if self.dlab() => self.divisor = (self.divisor & 0x00ff) | ((value as u16) << 8),
            IER => self.ier = value,
            IIR_FCR => {} // FIFO control is write-only and not modeled beyond the single queue
            LCR => self.lcr = value,
            MCR => self.mcr = value,
            SCR => self.scr = value,
            _ => {}
        }
        self.update_irq();
    }
}

impl BusDevice for Serial {
    fn debug_label(&self) -> String {
        "serial".to_string()
    }

    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]) {
        if data.len() != 1 {
            return;
        }
        data[0] = self.read_reg(info.offset);
    }

    fn write(&mut self, info: BusAccessInfo, data: &[u8]) {
        if data.len() != 1 {
            return;
        }
        self.write_reg(info.offset, data[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_input_is_readable_through_rbr() {
        let mut serial = Serial::new();
        serial.queue_input(b"hi");
        assert_eq!(serial.read_reg(LSR) & LSR_DATA_READY, LSR_DATA_READY);
        assert_eq!(serial.read_reg(RBR_THR), b'h');
        assert_eq!(serial.read_reg(RBR_THR), b'i');
        assert_eq!(serial.read_reg(LSR) & LSR_DATA_READY, 0);
    }

    #[test]
    fn writes_to_thr_are_drained_as_output() {
        let mut serial = Serial::new();
        serial.write_reg(RBR_THR, b'A');
        serial.write_reg(RBR_THR, b'B');
        assert_eq!(serial.drain_out(), vec![b'A', b'B']);
    }

    #[test]
    fn rda_interrupt_asserts_only_when_enabled_and_data_pending() {
        let mut serial = Serial::new();
        serial.queue_input(b"x");
        assert!(!serial.irq_level());
        serial.write_reg(IER, IER_RDA);
        assert!(serial.irq_level());
        serial.read_reg(RBR_THR);
        serial.update_irq();
        assert!(!serial.irq_level());
    }

    #[test]
    fn divisor_latch_roundtrips_through_dlab() {
        let mut serial = Serial::new();
        serial.write_reg(LCR, LCR_DLAB);
        serial.write_reg(RBR_THR, 0x01);
        serial.write_reg(IER, 0x00);
        serial.write_reg(LCR, 0);
        assert_eq!(serial.divisor, 0x0001);
    }
}
