// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! PSCI 0.2 function dispatch for the SMC hypercall.
//!
//! `cpu_vcpu_hypercall_arm.c`'s SMC handler delegates to
//! `emulate_psci_call`, which wasn't in the retrieved source set; this
//! implements the subset of PSCI function IDs the spec's SMC path needs
//! to resolve (`r0` holds the function ID per the PSCI calling
//! convention, `r1`-`r3` the arguments, and the return value is written
//! back into `r0`).

use crate::arm32::Arm32Bank;

pub const PSCI_SUCCESS: i32 = 0;
pub const PSCI_NOT_SUPPORTED: i32 = -1;
pub const PSCI_INVALID_PARAMETERS: i32 = -2;
pub const PSCI_DENIED: i32 = -3;
pub const PSCI_ALREADY_ON: i32 = -4;

pub const PSCI_VERSION: u32 = 0x8400_0000;
pub const CPU_SUSPEND: u32 = 0x8400_0001;
pub const CPU_OFF: u32 = 0x8400_0002;
pub const CPU_ON: u32 = 0x8400_0003;
pub const SYSTEM_OFF: u32 = 0x8400_0008;
pub const SYSTEM_RESET: u32 = 0x8400_0009;

/// What the embedder should do as a result of a PSCI call, beyond the
/// return-code writeback this function always performs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PsciEffect {
    None,
    TurnOnVcpu { target_cpu: u32, entry_point: u32 },
    TurnOffVcpu,
    SystemReset,
    SystemOff,
}

/// Dispatches the PSCI function named by `bank.reg_read(0)`, writes the
/// PSCI status code back into r0, and returns it (the hypercall emulator
/// treats a nonzero return as SMC failure the way `cpu_vcpu_hypercall_arm.c`
/// does).
pub fn dispatch(bank: &mut Arm32Bank) -> i32 {
    let (rc, _effect) = dispatch_with_effect(bank);
    rc
}

pub fn dispatch_with_effect(bank: &mut Arm32Bank) -> (i32, PsciEffect) {
    let function_id = bank.reg_read(0);
    let (rc, effect) = match function_id {
        PSCI_VERSION => (0x0002_0000u32 as i32, PsciEffect::None), // version 2.0
        CPU_ON => {
            let target_cpu = bank.reg_read(1);
            let entry_point = bank.reg_read(2);
            (PSCI_SUCCESS, PsciEffect::TurnOnVcpu { target_cpu, entry_point })
        }
        CPU_OFF => (PSCI_SUCCESS, PsciEffect::TurnOffVcpu),
        CPU_SUSPEND => (PSCI_SUCCESS, PsciEffect::None),
        SYSTEM_RESET => (PSCI_SUCCESS, PsciEffect::SystemReset),
        SYSTEM_OFF => (PSCI_SUCCESS, PsciEffect::SystemOff),
        _ => (PSCI_NOT_SUPPORTED, PsciEffect::None),
    };
    bank.reg_write(0, rc as u32);
    (rc, effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_id_is_not_supported() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.reg_write(0, 0x8400_00ff);
        let (rc, effect) = dispatch_with_effect(&mut bank);
        assert_eq!(rc, PSCI_NOT_SUPPORTED);
        assert_eq!(effect, PsciEffect::None);
        assert_eq!(bank.reg_read(0) as i32, PSCI_NOT_SUPPORTED);
    }

    #[test]
    fn cpu_on_reports_target_and_entry() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.reg_write(0, CPU_ON);
        bank.reg_write(1, 1);
        bank.reg_write(2, 0x8000_0000);
        let (rc, effect) = dispatch_with_effect(&mut bank);
        assert_eq!(rc, PSCI_SUCCESS);
        assert_eq!(
            effect,
            PsciEffect::TurnOnVcpu {
                target_cpu: 1,
                entry_point: 0x8000_0000
            }
        );
    }
}
