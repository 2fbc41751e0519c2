// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generic vCPU/VM trait contracts plus the ARM32 register-bank and
//! hypercall emulator that implement them for this core's trap-and-emulate
//! guests. The trait shapes mirror the teacher's hardware-assisted
//! `Vcpu`/`Vm` split; unlike the teacher, `run()` here dispatches into pure
//! software emulation instead of a KVM/WHPX ioctl.

pub mod arm32;
pub mod hypercall;
pub mod psci;

use std::fmt;

/// Destination chip an interrupt line ("GSI") is wired through on its way
/// to a vCPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IrqSourceChip {
    Lapic,
    Ioapic,
}

/// Where an interrupt originates before it reaches the routing table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IrqSource {
    Irqchip { chip: IrqSourceChip, pin: u32 },
    Msi { address: u64, data: u32 },
}

/// One row of the GSI routing table: which chip/pin (or MSI doorbell) a
/// given global system interrupt number is wired to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct IrqRoute {
    pub gsi: u32,
    pub source: IrqSource,
}

impl IrqRoute {
    pub fn ioapic_irq_route(irq_num: u32) -> IrqRoute {
        IrqRoute {
            gsi: irq_num,
            source: IrqSource::Irqchip {
                chip: IrqSourceChip::Ioapic,
                pin: irq_num,
            },
        }
    }
}

/// Reasons `Vcpu::run` returns control to the embedder. A strict subset of
/// the teacher's `VcpuExit` relevant to a software trap-and-emulate core:
/// there is no ioctl-level `Unknown`/`FailEntry`/`InternalError` since this
/// vCPU never actually enters a hardware guest mode.
#[derive(Debug)]
pub enum VcpuExit<'a> {
    /// The vCPU decoded and fully emulated a hypercall instruction itself;
    /// nothing further is required of the embedder.
    Hypercall,
    /// An MMIO-mapped address was read; the embedder fills in the slice
    /// before the next `run()`.
    MmioRead(u64, &'a mut [u8]),
    /// An MMIO-mapped address was written with the given bytes.
    MmioWrite(u64, &'a [u8]),
    /// The vCPU executed WFI/WFE and is waiting for an interrupt.
    WaitForInterrupt,
    /// The guest requested a shutdown (PSCI `SYSTEM_OFF`/`SYSTEM_RESET`).
    Shutdown,
}

/// Per-module error type. `#[sorted]` keeps variants alphabetical the way
/// the teacher's crates do (see `devices::virtio::input::InputError`).
#[remain::sorted]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SPSR has no meaning in mode {0:?}")]
    NoSpsrForMode(arm32::Mode),
    #[error("hypercall decode failed: {0}")]
    UnpredictableHypercall(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for IrqSourceChip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IrqSourceChip::Lapic => write!(f, "LAPIC"),
            IrqSourceChip::Ioapic => write!(f, "IOAPIC"),
        }
    }
}

/// A single virtual CPU. Generic over the register-bank type so the same
/// trait can in principle host non-ARM banks; this core only implements
/// `arm32::Arm32Vcpu`.
pub trait Vcpu: Send {
    /// Runs the vCPU until it traps out to the embedder or executes a
    /// hypercall it can fully service itself.
    fn run(&mut self) -> Result<VcpuExit>;

    /// Requests that the next `run()` returns promptly, used to interrupt
    /// a vCPU parked in `WaitForInterrupt`.
    fn request_interrupt_window(&mut self);
}

/// A collection of vCPUs plus the interrupt routing table wired between
/// them and the irqchips owned by the embedder.
pub trait Vm {
    type Vcpu: Vcpu;

    fn create_vcpu(&mut self, id: usize) -> Result<Self::Vcpu>;

    /// Replaces the GSI routing table wholesale, mirroring the teacher's
    /// `set_gsi_routing` convention.
    fn set_gsi_routing(&mut self, routes: &[IrqRoute]) -> Result<()>;
}
