// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The interrupt fabric: one `LocalApic` per vCPU plus a shared `IoApic`,
//! wired together the way `hypervisor::IrqRoute`/`IrqSource` describe.

mod ioapic;
mod lapic;

pub use ioapic::{IoApic, Redirect, IOAPIC_BASE, IOAPIC_MMIO_SIZE, NUM_PINS};
pub use lapic::{IpiEffect, LocalApic, LAPIC_BASE, LAPIC_MMIO_SIZE};

use hypervisor::IrqRoute;

/// Routes a GSI raised at the IOAPIC through to the destination LAPICs,
/// following the `IrqRoute` table an embedder builds via
/// `hypervisor::ioapic_irq_route`.
pub struct IrqFabric {
    pub ioapic: IoApic,
    pub lapics: Vec<LocalApic>,
    routes: Vec<IrqRoute>,
}

impl IrqFabric {
    pub fn new(num_vcpus: usize) -> Self {
        IrqFabric {
            ioapic: IoApic::new(0),
            lapics: (0..num_vcpus).map(|i| LocalApic::new(i as u32)).collect(),
            routes: Vec::new(),
        }
    }

    pub fn set_routes(&mut self, routes: Vec<IrqRoute>) {
        self.routes = routes;
    }

    pub fn routes(&self) -> &[IrqRoute] {
        &self.routes
    }

    /// Raises `gsi` and delivers it to every targeted LAPIC, returning the
    /// vectors actually made pending.
    pub fn raise_gsi(&mut self, gsi: u32, level: bool) -> Vec<u8> {
        let mut delivered = Vec::new();
        let Some(redirect) = self.ioapic.set_irq(gsi as usize, level) else {
            return delivered;
        };
        for lapic in self.lapics.iter_mut() {
            let targeted = if redirect.logical_dest {
                lapic.id() & redirect.dest as u32 != 0
            } else {
                lapic.id() == redirect.dest as u32
            };
            if targeted && lapic.set_irq(redirect.vector, redirect.level_triggered) {
                delivered.push(redirect.vector);
            }
        }
        delivered
    }

    /// Notifies the IOAPIC that `vcpu`'s LAPIC finished servicing
    /// `vector`, redelivering if the line is still asserted.
    pub fn eoi(&mut self, vcpu: usize, vector: u8) {
        if let Some(lapic) = self.lapics.get_mut(vcpu) {
            if let Some((v, level_triggered)) = lapic.eoi() {
                if level_triggered {
                    if let Some(redirect) = self.ioapic.eoi_broadcast(v) {
                        for target in self.lapics.iter_mut() {
                            if target.id() == redirect.dest as u32 {
                                target.set_irq(redirect.vector, true);
                            }
                        }
                    }
                }
            }
        }
    }
}
