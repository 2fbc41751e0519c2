// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulates the virtual devices this core's guests see: the MMIO bus,
//! the LAPIC/IOAPIC interrupt fabric, the HPET timer, a VirtIO split
//! ring plus virtio-input, PS/2 keyboard and mouse, CMOS/RTC, and a
//! 16550 UART.

mod bus;
mod cmos;
mod hpet;
pub mod irqchip;
mod ps2;
mod serial;
pub mod virtio;

pub use self::bus::{Bus, BusAccessInfo, BusDevice, BusRange, BusType, Error as BusError};
pub use self::cmos::{Cmos, RtcTime};
pub use self::hpet::{Hpet, TimerFired};
pub use self::irqchip::{IoApic, IpiEffect, IrqFabric, LocalApic};
pub use self::ps2::{Ps2Keyboard, Ps2Mouse};
pub use self::serial::Serial;
