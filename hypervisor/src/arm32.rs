// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! ARM32 mode-banked register file.
//!
//! ARM32 privilege modes each keep their own shadow copy of `sp`/`lr` (and,
//! for FIQ, `r8`-`r12` too) so a mode switch does not have to spill the
//! live register file to memory. This mirrors the Xvisor vCPU register
//! bank: `regs` holds the architectural view the vCPU's current mode sees
//! (r0-r12, sp, lr, pc, cpsr) and `banks` holds every other mode's shadow
//! copy, kept in sync by `save`/`restore` on every mode transition.

use crate::Error;
use crate::Result;

pub const GPR_COUNT: usize = 13;
pub const FIQ_BANK_COUNT: usize = 5;

pub const CPSR_MODE_MASK: u32 = 0x0000_001f;
pub const CPSR_THUMB_MASK: u32 = 1 << 5;
pub const CPSR_FIQ_DISABLED: u32 = 1 << 6;
pub const CPSR_IRQ_DISABLED: u32 = 1 << 7;
pub const CPSR_ASYNC_ABORT_DISABLED: u32 = 1 << 8;
pub const CPSR_CARRY_MASK: u32 = 1 << 29;
pub const CPSR_COND_ZERO_MASK: u32 = 1 << 30;

/// Bits a guest's MSR `c` field is allowed to touch: mode, Thumb state,
/// and the three interrupt-mask bits. Everything else (the `f` field's
/// NZCVQ flags and reserved state) is user-bank.
pub const CPSR_PRIVBITS_MASK: u32 = CPSR_MODE_MASK
    | CPSR_THUMB_MASK
    | CPSR_FIQ_DISABLED
    | CPSR_IRQ_DISABLED
    | CPSR_ASYNC_ABORT_DISABLED;
pub const CPSR_USERBITS_MASK: u32 = !CPSR_PRIVBITS_MASK;
pub const CPSR_ALLBITS_MASK: u32 = 0xffff_ffff;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    User,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
    System,
    Monitor,
}

impl Mode {
    pub fn from_cpsr(cpsr: u32) -> Option<Mode> {
        Some(match cpsr & CPSR_MODE_MASK {
            0x10 => Mode::User,
            0x11 => Mode::Fiq,
            0x12 => Mode::Irq,
            0x13 => Mode::Supervisor,
            0x17 => Mode::Abort,
            0x1b => Mode::Undefined,
            0x1f => Mode::System,
            0x16 => Mode::Monitor,
            _ => return None,
        })
    }

    pub fn to_cpsr_bits(self) -> u32 {
        match self {
            Mode::User => 0x10,
            Mode::Fiq => 0x11,
            Mode::Irq => 0x12,
            Mode::Supervisor => 0x13,
            Mode::Abort => 0x17,
            Mode::Undefined => 0x1b,
            Mode::System => 0x1f,
            Mode::Monitor => 0x16,
        }
    }

    fn has_own_spsr(self) -> bool {
        !matches!(self, Mode::User | Mode::System)
    }
}

/// The architectural register file as the vCPU's current mode sees it:
/// r0-r12, sp, lr, pc and cpsr. `cpsr`'s privileged bits mirror
/// `SuperRegs::cpsr`; callers read/write the combined view through
/// `cpsr_retrieve`/`cpsr_update` rather than this field directly.
#[derive(Debug, Copy, Clone, Default)]
pub struct UserRegs {
    pub gpr: [u32; GPR_COUNT],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

/// Shadow copies for every mode other than the live one, plus the
/// privileged half of cpsr and each mode's SPSR.
#[derive(Debug, Copy, Clone, Default)]
pub struct SuperRegs {
    pub cpsr: u32,

    pub gpr_usr: [u32; FIQ_BANK_COUNT],
    pub gpr_fiq: [u32; FIQ_BANK_COUNT],

    pub sp_usr: u32,
    pub lr_usr: u32,

    pub sp_svc: u32,
    pub lr_svc: u32,
    pub spsr_svc: u32,

    pub sp_mon: u32,
    pub lr_mon: u32,
    pub spsr_mon: u32,

    pub sp_abt: u32,
    pub lr_abt: u32,
    pub spsr_abt: u32,

    pub sp_und: u32,
    pub lr_und: u32,
    pub spsr_und: u32,

    pub sp_irq: u32,
    pub lr_irq: u32,
    pub spsr_irq: u32,

    pub sp_fiq: u32,
    pub lr_fiq: u32,
    pub spsr_fiq: u32,
}

/// Narrow CP15 mirror this core's hypercall emulator needs: a feature
/// bitmap and the mode it last synced against. Full CP15 (MMU control,
/// cache maintenance, ASID) is out of scope.
#[derive(Debug, Copy, Clone, Default)]
pub struct Cp15State {
    pub features: u64,
    last_synced_mode: Option<Mode>,
}

impl Cp15State {
    /// Called from `cpsr_update` on every mode change, mirroring
    /// `cpu_vcpu_cp15_sync_cpsr`.
    pub fn sync_cpsr(&mut self, mode: Mode) {
        self.last_synced_mode = Some(mode);
    }

    pub fn last_synced_mode(&self) -> Option<Mode> {
        self.last_synced_mode
    }
}

/// A single ARM32 vCPU's banked register file.
#[derive(Debug, Copy, Clone, Default)]
pub struct Arm32Bank {
    pub regs: UserRegs,
    pub sregs: SuperRegs,
    pub cp15: Cp15State,
}

impl Arm32Bank {
    pub fn current_mode(&self) -> Mode {
        Mode::from_cpsr(self.sregs.cpsr).unwrap_or(Mode::User)
    }

    /// Combined CPSR the guest sees: user bits from the live register
    /// file, privileged bits from the shadow copy.
    pub fn cpsr_retrieve(&self) -> u32 {
        ((self.regs.cpsr & CPSR_USERBITS_MASK) | (self.sregs.cpsr & CPSR_PRIVBITS_MASK))
            & CPSR_ALLBITS_MASK
    }

    /// Applies `new_cpsr & mask` to both halves of the CPSR, saving and
    /// restoring banked registers and re-syncing CP15 across a mode
    /// change, in that order (save happens before the new privileged bits
    /// are committed so the switch reads the mode it is leaving).
    pub fn cpsr_update(&mut self, new_cpsr: u32, mask: u32) {
        let old_cpsr = self.cpsr_retrieve();
        let new_cpsr = new_cpsr & mask;
        let mode_changed = (old_cpsr & CPSR_MODE_MASK) != (new_cpsr & CPSR_MODE_MASK);

        if mode_changed {
            self.banked_regs_save();
        }

        self.sregs.cpsr = (self.sregs.cpsr & !CPSR_PRIVBITS_MASK) | (new_cpsr & CPSR_PRIVBITS_MASK);
        self.regs.cpsr = (self.regs.cpsr & !CPSR_USERBITS_MASK) | (new_cpsr & CPSR_USERBITS_MASK);

        if mode_changed {
            self.banked_regs_restore();
            let mode = self.current_mode();
            self.cp15.sync_cpsr(mode);
        }
    }

    /// Spills r8-r12 (FIQ only), sp and lr from the live register file
    /// into the shadow bank for `current_mode()`.
    fn banked_regs_save(&mut self) {
        let mode = self.current_mode();
        let gpr8_12 = [
            self.regs.gpr[8],
            self.regs.gpr[9],
            self.regs.gpr[10],
            self.regs.gpr[11],
            self.regs.gpr[12],
        ];
        match mode {
            Mode::Fiq => {
                self.sregs.gpr_fiq = gpr8_12;
                self.sregs.sp_fiq = self.regs.sp;
                self.sregs.lr_fiq = self.regs.lr;
            }
            Mode::User | Mode::System => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_usr = self.regs.sp;
                self.sregs.lr_usr = self.regs.lr;
            }
            Mode::Abort => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_abt = self.regs.sp;
                self.sregs.lr_abt = self.regs.lr;
            }
            Mode::Undefined => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_und = self.regs.sp;
                self.sregs.lr_und = self.regs.lr;
            }
            Mode::Monitor => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_mon = self.regs.sp;
                self.sregs.lr_mon = self.regs.lr;
            }
            Mode::Supervisor => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_svc = self.regs.sp;
                self.sregs.lr_svc = self.regs.lr;
            }
            Mode::Irq => {
                self.sregs.gpr_usr = gpr8_12;
                self.sregs.sp_irq = self.regs.sp;
                self.sregs.lr_irq = self.regs.lr;
            }
        }
    }

    /// Loads r8-r12, sp and lr for `current_mode()` back into the live
    /// register file. Mirror image of `banked_regs_save`.
    fn banked_regs_restore(&mut self) {
        let mode = self.current_mode();
        let (gpr8_12, sp, lr) = match mode {
            Mode::Fiq => (self.sregs.gpr_fiq, self.sregs.sp_fiq, self.sregs.lr_fiq),
            Mode::User | Mode::System => (self.sregs.gpr_usr, self.sregs.sp_usr, self.sregs.lr_usr),
            Mode::Abort => (self.sregs.gpr_usr, self.sregs.sp_abt, self.sregs.lr_abt),
            Mode::Undefined => (self.sregs.gpr_usr, self.sregs.sp_und, self.sregs.lr_und),
            Mode::Monitor => (self.sregs.gpr_usr, self.sregs.sp_mon, self.sregs.lr_mon),
            Mode::Supervisor => (self.sregs.gpr_usr, self.sregs.sp_svc, self.sregs.lr_svc),
            Mode::Irq => (self.sregs.gpr_usr, self.sregs.sp_irq, self.sregs.lr_irq),
        };
        self.regs.gpr[8..13].copy_from_slice(&gpr8_12);
        self.regs.sp = sp;
        self.regs.lr = lr;
    }

    pub fn spsr_retrieve(&self) -> Result<u32> {
        let mode = self.current_mode();
        Ok(match mode {
            Mode::Abort => self.sregs.spsr_abt,
            Mode::Undefined => self.sregs.spsr_und,
            Mode::Monitor => self.sregs.spsr_mon,
            Mode::Supervisor => self.sregs.spsr_svc,
            Mode::Irq => self.sregs.spsr_irq,
            Mode::Fiq => self.sregs.spsr_fiq,
            Mode::User | Mode::System => return Err(Error::NoSpsrForMode(mode)),
        })
    }

    pub fn spsr_update(&mut self, new_spsr: u32) -> Result<()> {
        let new_spsr = new_spsr & CPSR_ALLBITS_MASK;
        let mode = self.current_mode();
        match mode {
            Mode::Abort => self.sregs.spsr_abt = new_spsr,
            Mode::Undefined => self.sregs.spsr_und = new_spsr,
            Mode::Monitor => self.sregs.spsr_mon = new_spsr,
            Mode::Supervisor => self.sregs.spsr_svc = new_spsr,
            Mode::Irq => self.sregs.spsr_irq = new_spsr,
            Mode::Fiq => self.sregs.spsr_fiq = new_spsr,
            Mode::User | Mode::System => return Err(Error::NoSpsrForMode(mode)),
        }
        Ok(())
    }

    /// Reads register `n` (0-15) as the current mode sees it.
    pub fn reg_read(&self, reg_num: u32) -> u32 {
        match reg_num {
            0..=12 => self.regs.gpr[reg_num as usize],
            13 => self.regs.sp,
            14 => self.regs.lr,
            15 => self.regs.pc,
            _ => 0,
        }
    }

    /// Writes register `n` (0-15), updating the matching shadow bank for
    /// r8-r12/sp/lr so a later mode switch restores the value just
    /// written rather than a stale one.
    pub fn reg_write(&mut self, reg_num: u32, val: u32) {
        let curmode = self.current_mode();
        match reg_num {
            0..=7 => self.regs.gpr[reg_num as usize] = val,
            8..=12 => {
                self.regs.gpr[reg_num as usize] = val;
                let idx = (reg_num - 8) as usize;
                if curmode == Mode::Fiq {
                    self.sregs.gpr_fiq[idx] = val;
                } else {
                    self.sregs.gpr_usr[idx] = val;
                }
            }
            13 => {
                self.regs.sp = val;
                self.write_sp_bank(curmode, val);
            }
            14 => {
                self.regs.lr = val;
                self.write_lr_bank(curmode, val);
            }
            15 => self.regs.pc = val,
            _ => {}
        }
    }

    /// Reads register `n` as mode `target` sees it, even if `target` is
    /// not the current mode (used by the LDM/STM user-register and
    /// exception-return hypercalls).
    pub fn regmode_read(&self, target: Mode, reg_num: u32) -> u32 {
        let curmode = self.current_mode();
        if target == curmode {
            return self.reg_read(reg_num);
        }
        match reg_num {
            0..=7 => self.regs.gpr[reg_num as usize],
            8..=12 => {
                let idx = (reg_num - 8) as usize;
                if curmode == Mode::Fiq {
                    self.sregs.gpr_usr[idx]
                } else if target == Mode::Fiq {
                    self.sregs.gpr_fiq[idx]
                } else {
                    self.regs.gpr[reg_num as usize]
                }
            }
            13 => self.read_sp_bank(target),
            14 => self.read_lr_bank(target),
            15 => self.regs.pc,
            _ => 0,
        }
    }

    pub fn regmode_write(&mut self, target: Mode, reg_num: u32, val: u32) {
        let curmode = self.current_mode();
        if target == curmode {
            self.reg_write(reg_num, val);
            return;
        }
        match reg_num {
            0..=7 => self.regs.gpr[reg_num as usize] = val,
            8..=12 => {
                let idx = (reg_num - 8) as usize;
                if curmode == Mode::Fiq {
                    self.sregs.gpr_usr[idx] = val;
                } else if target == Mode::Fiq {
                    self.sregs.gpr_fiq[idx] = val;
                } else {
                    self.regs.gpr[reg_num as usize] = val;
                }
            }
            13 => self.write_sp_bank(target, val),
            14 => self.write_lr_bank(target, val),
            15 => self.regs.pc = val,
            _ => {}
        }
    }

    fn read_sp_bank(&self, mode: Mode) -> u32 {
        match mode {
            Mode::User | Mode::System => self.sregs.sp_usr,
            Mode::Fiq => self.sregs.sp_fiq,
            Mode::Irq => self.sregs.sp_irq,
            Mode::Supervisor => self.sregs.sp_svc,
            Mode::Abort => self.sregs.sp_abt,
            Mode::Undefined => self.sregs.sp_und,
            Mode::Monitor => self.sregs.sp_mon,
        }
    }

    fn write_sp_bank(&mut self, mode: Mode, val: u32) {
        match mode {
            Mode::User | Mode::System => self.sregs.sp_usr = val,
            Mode::Fiq => self.sregs.sp_fiq = val,
            Mode::Irq => self.sregs.sp_irq = val,
            Mode::Supervisor => self.sregs.sp_svc = val,
            Mode::Abort => self.sregs.sp_abt = val,
            Mode::Undefined => self.sregs.sp_und = val,
            Mode::Monitor => self.sregs.sp_mon = val,
        }
    }

    fn read_lr_bank(&self, mode: Mode) -> u32 {
        match mode {
            Mode::User | Mode::System => self.sregs.lr_usr,
            Mode::Fiq => self.sregs.lr_fiq,
            Mode::Irq => self.sregs.lr_irq,
            Mode::Supervisor => self.sregs.lr_svc,
            Mode::Abort => self.sregs.lr_abt,
            Mode::Undefined => self.sregs.lr_und,
            Mode::Monitor => self.sregs.lr_mon,
        }
    }

    fn write_lr_bank(&mut self, mode: Mode, val: u32) {
        match mode {
            Mode::User | Mode::System => self.sregs.lr_usr = val,
            Mode::Fiq => self.sregs.lr_fiq = val,
            Mode::Irq => self.sregs.lr_irq = val,
            Mode::Supervisor => self.sregs.lr_svc = val,
            Mode::Abort => self.sregs.lr_abt = val,
            Mode::Undefined => self.sregs.lr_und = val,
            Mode::Monitor => self.sregs.lr_mon = val,
        }
    }

    /// Resets to the reset vector in Supervisor mode with IRQ/FIQ/async
    /// abort masked, matching `vmm_vcpu_regs_init`'s normal-vcpu path.
    pub fn reset(&mut self, start_pc: u32) {
        *self = Arm32Bank::default();
        self.regs.pc = start_pc;
        self.sregs.cpsr = CPSR_ASYNC_ABORT_DISABLED
            | CPSR_IRQ_DISABLED
            | CPSR_FIQ_DISABLED
            | Mode::Supervisor.to_cpsr_bits();
        self.regs.cpsr = self.sregs.cpsr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiq_banks_r8_through_r12_other_modes_share_usr_bank() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);

        bank.reg_write(8, 0xdead_beef);
        assert_eq!(bank.sregs.gpr_usr[0], 0xdead_beef);

        bank.cpsr_update(Mode::Fiq.to_cpsr_bits() | CPSR_IRQ_DISABLED | CPSR_FIQ_DISABLED, CPSR_ALLBITS_MASK);
        assert_eq!(bank.current_mode(), Mode::Fiq);
        assert_ne!(bank.reg_read(8), 0xdead_beef, "FIQ bank starts zeroed, independent of usr bank");

        bank.reg_write(8, 0xcafe_babe);
        assert_eq!(bank.sregs.gpr_fiq[0], 0xcafe_babe);

        bank.cpsr_update(Mode::Supervisor.to_cpsr_bits() | CPSR_IRQ_DISABLED | CPSR_FIQ_DISABLED, CPSR_ALLBITS_MASK);
        assert_eq!(bank.reg_read(8), 0xdead_beef, "switching back to svc restores the usr-shared bank");
    }

    #[test]
    fn sp_lr_are_banked_per_mode() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.reg_write(13, 0x1000);
        bank.reg_write(14, 0x2000);

        bank.cpsr_update(Mode::Irq.to_cpsr_bits() | CPSR_FIQ_DISABLED, CPSR_ALLBITS_MASK);
        bank.reg_write(13, 0x3000);
        bank.reg_write(14, 0x4000);

        bank.cpsr_update(Mode::Supervisor.to_cpsr_bits() | CPSR_IRQ_DISABLED | CPSR_FIQ_DISABLED, CPSR_ALLBITS_MASK);
        assert_eq!(bank.reg_read(13), 0x1000);
        assert_eq!(bank.reg_read(14), 0x2000);
    }

    #[test]
    fn cpsr_update_user_mode_unprivileged_cannot_change_mode_bits_via_mask() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        let before = bank.cpsr_retrieve();
        // a mask that only touches the flags nibble must not move mode bits
        bank.cpsr_update(0xffff_ffff, CPSR_USERBITS_MASK);
        assert_eq!(bank.cpsr_retrieve() & CPSR_MODE_MASK, before & CPSR_MODE_MASK);
    }

    #[test]
    fn spsr_unavailable_in_user_and_system_mode() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::User.to_cpsr_bits(), CPSR_ALLBITS_MASK);
        assert!(bank.spsr_retrieve().is_err());
        assert!(bank.spsr_update(0).is_err());
    }

    #[test]
    fn regmode_read_fiq_from_non_fiq_mode() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::Fiq.to_cpsr_bits() | CPSR_IRQ_DISABLED, CPSR_ALLBITS_MASK);
        bank.reg_write(9, 0x42);
        bank.cpsr_update(Mode::Supervisor.to_cpsr_bits() | CPSR_IRQ_DISABLED | CPSR_FIQ_DISABLED, CPSR_ALLBITS_MASK);
        assert_eq!(bank.regmode_read(Mode::Fiq, 9), 0x42);
    }
}
