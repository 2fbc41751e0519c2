// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode and emulate the handful of ARM32 instructions a trap-and-emulate
//! hypervisor must trap on: the ones that read or write CPSR/SPSR, or the
//! banked registers of a mode other than the current one. A guest running
//! at a reduced privilege level cannot execute these for real, so the vCPU
//! traps them and this module carries out their architectural effect
//! against the banked register file instead.
//!
//! Bit layouts follow the ARM architecture reference's standard encodings
//! for CPS, MRS, MSR, RFE, SRS, LDM/STM (user registers and exception
//! return) and SUBS PC, LR. Guest memory access goes through the
//! `GuestMemory` trait rather than the host-equivalent page-table walk,
//! since this core addresses guest RAM as a flat buffer behind the MMIO
//! bus (see DESIGN.md).

use crate::arm32::Arm32Bank;
use crate::arm32::Mode;
use crate::arm32::CPSR_ALLBITS_MASK;
use crate::arm32::CPSR_CARRY_MASK;
use crate::Error;
use crate::Result;

/// Guest physical memory access, as the LDM/STM/RFE/SRS hypercalls need it.
pub trait GuestMemory {
    fn read_u32(&self, addr: u32) -> Result<u32>;
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<()>;
}

fn byte_mask_from_psr_mask(mask: u32) -> u32 {
    let mut byte_mask = 0u32;
    if mask & 0x1 != 0 {
        byte_mask |= 0x0000_00ff;
    }
    if mask & 0x2 != 0 {
        byte_mask |= 0x0000_ff00;
    }
    if mask & 0x4 != 0 {
        byte_mask |= 0x00ff_0000;
    }
    if mask & 0x8 != 0 {
        byte_mask |= 0xff00_0000;
    }
    byte_mask
}

#[derive(Debug, Copy, Clone)]
pub enum Hypercall {
    Cps {
        imod: u8,
        mode: Option<u32>,
        a: bool,
        i: bool,
        f: bool,
    },
    Mrs {
        rd: u32,
        from_spsr: bool,
    },
    MsrImmediate {
        mask: u32,
        value: u32,
        to_spsr: bool,
    },
    MsrRegister {
        mask: u32,
        rn: u32,
        to_spsr: bool,
    },
    Rfe {
        rn: u32,
        p: bool,
        u: bool,
        w: bool,
    },
    Srs {
        p: bool,
        u: bool,
        w: bool,
        mode: u32,
    },
    Wfi,
    Wfe,
    Yield,
    Smc,
    LdmExceptionReturn {
        rn: u32,
        p: bool,
        u: bool,
        w: bool,
        reg_list: u16,
    },
    LdmUserRegisters {
        rn: u32,
        reg_list: u16,
    },
    StmUserRegisters {
        rn: u32,
        p: bool,
        u: bool,
        reg_list: u16,
    },
    /// `SUBS/<ALU-op>S PC, Rn, Rm {, shift #imm}` — the register-operand2
    /// form. `shift_type` is the raw 2-bit encoding (LSL/LSR/ASR/ROR);
    /// `shift_imm` is the raw 5-bit shift amount, both resolved against
    /// the current carry flag at emulate time since operand2 depends on
    /// live register state.
    SubsPcLrRegister {
        opcode: u8,
        rn: u32,
        rm: u32,
        shift_type: u32,
        shift_imm: u32,
    },
    /// `SUBS/<ALU-op>S PC, Rn, #imm` — the immediate-operand2 form.
    /// `operand2` is already rotated into its final 32-bit value, since
    /// that only depends on the instruction bits, not register state.
    SubsPcLrImmediate {
        opcode: u8,
        rn: u32,
        operand2: u32,
    },
}

/// Decodes `inst` into one of the trapped forms above, or `None` if it is
/// not a recognized hypercall-class instruction.
pub fn decode(inst: u32) -> Option<Hypercall> {
    let bits = |hi: u32, lo: u32| (inst >> lo) & ((1 << (hi - lo + 1)) - 1);

    if inst & 0xfff1_0020 == 0xf101_0000 {
        let imod = bits(19, 18) as u8;
        let mmod = bits(17, 17) != 0;
        return Some(Hypercall::Cps {
            imod,
            mode: if mmod { Some(bits(4, 0)) } else { None },
            a: bits(8, 8) != 0,
            i: bits(7, 7) != 0,
            f: bits(6, 6) != 0,
        });
    }

    // MRS Rd, CPSR/SPSR
    if inst & 0x0fbf_0fff == 0x010f_0000 {
        return Some(Hypercall::Mrs {
            rd: bits(15, 12),
            from_spsr: bits(22, 22) != 0,
        });
    }

    // MSR CPSR_f/SPSR_f, #imm
    if inst & 0x0fb0_f000 == 0x0320_f000 {
        let rotate = bits(11, 8) * 2;
        let imm8 = bits(7, 0);
        let value = imm8.rotate_right(rotate);
        return Some(Hypercall::MsrImmediate {
            mask: bits(19, 16),
            value,
            to_spsr: bits(22, 22) != 0,
        });
    }

    // MSR CPSR_f/SPSR_f, Rn
    if inst & 0x0fb0_ff00 == 0x0120_f000 {
        return Some(Hypercall::MsrRegister {
            mask: bits(19, 16),
            rn: bits(3, 0),
            to_spsr: bits(22, 22) != 0,
        });
    }

    // RFE{IA,IB,DA,DB} Rn{!}
    if inst & 0xfe50_ffff == 0xf810_0a00 {
        return Some(Hypercall::Rfe {
            rn: bits(19, 16),
            p: bits(24, 24) != 0,
            u: bits(23, 23) != 0,
            w: bits(21, 21) != 0,
        });
    }

    // SRS{IA,IB,DA,DB} SP{!}, #mode
    if inst & 0xfe5f_fe00 == 0xf84d_0500 {
        return Some(Hypercall::Srs {
            p: bits(24, 24) != 0,
            u: bits(23, 23) != 0,
            w: bits(21, 21) != 0,
            mode: bits(4, 0),
        });
    }

    if inst & 0xffff_ffff == 0xe320_f003 {
        return Some(Hypercall::Wfi);
    }
    if inst & 0xffff_ffff == 0xe320_f002 {
        return Some(Hypercall::Wfe);
    }
    if inst & 0xffff_ffff == 0xe320_f001 {
        return Some(Hypercall::Yield);
    }

    // SMC #imm4
    if inst & 0x0ff0_00f0 == 0x0160_0070 {
        return Some(Hypercall::Smc);
    }

    // LDM{IA,IB,DA,DB} Rn{!}, reglist^  (bit 15 of reglist set => exception return)
    if inst & 0xfe50_8000 == 0xf810_8000 {
        return Some(Hypercall::LdmExceptionReturn {
            rn: bits(19, 16),
            p: bits(24, 24) != 0,
            u: bits(23, 23) != 0,
            w: bits(21, 21) != 0,
            reg_list: bits(15, 0) as u16,
        });
    }

    // LDM Rn, reglist^  (user registers, no writeback)
    if inst & 0xfe70_8000 == 0xf810_0000 {
        return Some(Hypercall::LdmUserRegisters {
            rn: bits(19, 16),
            reg_list: bits(15, 0) as u16,
        });
    }

    // STM{IA,IB,DA,DB} Rn, reglist^  (user registers)
    if inst & 0xfe50_0000 == 0xf800_0000 {
        return Some(Hypercall::StmUserRegisters {
            rn: bits(19, 16),
            p: bits(24, 24) != 0,
            u: bits(23, 23) != 0,
            reg_list: bits(15, 0) as u16,
        });
    }

    // <ALU-op>S PC, Rn, Rm {, shift #imm}  (data-processing, register form,
    // S=1, Rd=PC): the register-operand2 SUBS-rel exception return.
    if inst & 0x0e10_f010 == 0x0010_f000 {
        return Some(Hypercall::SubsPcLrRegister {
            opcode: bits(24, 21) as u8,
            rn: bits(19, 16),
            rm: bits(3, 0),
            shift_type: bits(6, 5),
            shift_imm: bits(11, 7),
        });
    }

    // <ALU-op>S PC, Rn, #imm  (data-processing, immediate form, S=1,
    // Rd=PC): the immediate-operand2 SUBS-rel exception return.
    if inst & 0x0e10_f000 == 0x0210_f000 {
        let rotate = bits(11, 8) * 2;
        let imm8 = bits(7, 0);
        return Some(Hypercall::SubsPcLrImmediate {
            opcode: bits(24, 21) as u8,
            rn: bits(19, 16),
            operand2: imm8.rotate_right(rotate),
        });
    }

    None
}

#[derive(Debug, Copy, Clone)]
enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

fn decode_shift(shift_type: u32, shift_imm: u32) -> (ShiftKind, u32) {
    match shift_type {
        0 => (ShiftKind::Lsl, shift_imm),
        1 => (ShiftKind::Lsr, if shift_imm == 0 { 32 } else { shift_imm }),
        2 => (ShiftKind::Asr, if shift_imm == 0 { 32 } else { shift_imm }),
        3 if shift_imm == 0 => (ShiftKind::Rrx, 1),
        _ => (ShiftKind::Ror, shift_imm),
    }
}

fn apply_shift(kind: ShiftKind, amount: u32, value: u32, carry_in: u32) -> u32 {
    match kind {
        ShiftKind::Lsl => {
            if amount == 0 {
                value
            } else if amount >= 32 {
                0
            } else {
                value << amount
            }
        }
        ShiftKind::Lsr => {
            if amount >= 32 {
                0
            } else {
                value >> amount
            }
        }
        ShiftKind::Asr => {
            if amount >= 32 {
                if (value as i32) < 0 {
                    0xffff_ffff
                } else {
                    0
                }
            } else {
                ((value as i32) >> amount) as u32
            }
        }
        ShiftKind::Ror => value.rotate_right(amount % 32),
        ShiftKind::Rrx => (carry_in << 31) | (value >> 1),
    }
}

/// The ALU op table shared by every `SUBS/<op>S PC, ...` form: AND, EOR,
/// SUB, RSB, ADD, ADC, SBC, RSC, ORR, MOV, BIC, MVN. Opcodes 0x8-0xB
/// (TST/TEQ/CMP/CMN) have no Rd and are unpredictable with Rd=PC.
fn alu_result(opcode: u8, result: u32, operand2: u32, carry_in: u32) -> Result<u32> {
    let add_with_carry = |a: u32, b: u32, c: u32| a.wrapping_add(b).wrapping_add(c);
    Ok(match opcode {
        0x0 => result & operand2,
        0x1 => result ^ operand2,
        0x2 => add_with_carry(result, !operand2, 1),
        0x3 => add_with_carry(!result, operand2, 1),
        0x4 => add_with_carry(result, operand2, 0),
        0x5 => add_with_carry(result, operand2, carry_in),
        0x6 => add_with_carry(result, !operand2, carry_in),
        0x7 => add_with_carry(!result, operand2, carry_in),
        0xc => result | operand2,
        0xd => operand2,
        0xe => result & !operand2,
        0xf => !operand2,
        _ => return Err(Error::UnpredictableHypercall(format!("SUBS-rel opcode {opcode:#x}"))),
    })
}

fn deassert_mode_irq(mode: Mode) -> Result<()> {
    // The actual assert/deassert happens against the interrupt fabric
    // owned by the embedder; this core signals it by returning the mode
    // transitioned out of an exception level so the caller can route the
    // deassertion. Modes with no matching external line (User, System
    // other than via fallthrough) are unpredictable here.
    match mode {
        Mode::Fiq | Mode::Irq | Mode::Supervisor | Mode::System | Mode::Abort | Mode::Undefined => {
            Ok(())
        }
        Mode::User | Mode::Monitor => Err(Error::UnpredictableHypercall(format!(
            "exception return from mode {mode:?}"
        ))),
    }
}

fn page_split_addr(p: bool, u: bool, rn_val: u32, length: u32) -> u32 {
    if u { rn_val } else { rn_val.wrapping_sub(length) }.wrapping_add(if p == u { 4 } else { 0 })
}

/// Emulates a decoded hypercall against the vCPU's banked register file
/// and guest memory, advancing `pc` the way the trapped instruction would
/// have. Exception-return variants (RFE, LDM exception-return, SUBS PC,LR)
/// additionally deassert the external interrupt line the mode was
/// servicing; the caller is expected to have already delivered the
/// matching condition since this module owns no interrupt fabric state.
pub fn emulate(bank: &mut Arm32Bank, mem: &mut impl GuestMemory, hc: Hypercall) -> Result<()> {
    match hc {
        Hypercall::Cps { imod, mode, a, i, f } => {
            let mut cpsr = 0u32;
            let mut mask = 0u32;
            if let Some(m) = mode {
                cpsr |= m;
                mask |= crate::arm32::CPSR_MODE_MASK;
            }
            if imod == 0x2 || imod == 0x3 {
                let bit_a = if a { crate::arm32::CPSR_ASYNC_ABORT_DISABLED } else { 0 };
                let bit_i = if i { crate::arm32::CPSR_IRQ_DISABLED } else { 0 };
                let bit_f = if f { crate::arm32::CPSR_FIQ_DISABLED } else { 0 };
                let touched = (if a { crate::arm32::CPSR_ASYNC_ABORT_DISABLED } else { 0 })
                    | (if i { crate::arm32::CPSR_IRQ_DISABLED } else { 0 })
                    | (if f { crate::arm32::CPSR_FIQ_DISABLED } else { 0 });
                if imod == 0x2 {
                    // clear (enable interrupts)
                    mask |= touched;
                } else {
                    cpsr |= bit_a | bit_i | bit_f;
                    mask |= touched;
                }
            }
            bank.cpsr_update(cpsr, mask);
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::Mrs { rd, from_spsr } => {
            if rd == 15 {
                return Err(Error::UnpredictableHypercall("MRS Rd=r15".into()));
            }
            let val = if from_spsr {
                bank.spsr_retrieve()?
            } else {
                bank.cpsr_retrieve()
            };
            bank.reg_write(rd, val);
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::MsrImmediate { mask, value, to_spsr } => {
            let byte_mask = byte_mask_from_psr_mask(mask);
            if to_spsr {
                let cur = bank.spsr_retrieve()?;
                bank.spsr_update((cur & !byte_mask) | (value & byte_mask))?;
            } else {
                bank.cpsr_update(value, byte_mask);
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::MsrRegister { mask, rn, to_spsr } => {
            if rn == 15 {
                return Err(Error::UnpredictableHypercall("MSR Rn=r15".into()));
            }
            let byte_mask = byte_mask_from_psr_mask(mask);
            let value = bank.reg_read(rn);
            if to_spsr {
                let cur = bank.spsr_retrieve()?;
                bank.spsr_update((cur & !byte_mask) | (value & byte_mask))?;
            } else {
                bank.cpsr_update(value, byte_mask);
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::Rfe { rn, p, u, w } => {
            if rn == 15 {
                return Err(Error::UnpredictableHypercall("RFE Rn=r15".into()));
            }
            deassert_mode_irq(bank.current_mode())?;
            let base = bank.reg_read(rn);
            let addr = if u { base } else { base.wrapping_sub(8) };
            let addr = if p == u { addr.wrapping_add(4) } else { addr };
            let new_cpsr = mem.read_u32(addr.wrapping_add(4))?;
            let new_pc = mem.read_u32(addr)?;
            bank.cpsr_update(new_cpsr, CPSR_ALLBITS_MASK);
            bank.regs.pc = new_pc;
            if w {
                let delta = 8u32;
                bank.reg_write(rn, if u { base.wrapping_add(delta) } else { base.wrapping_sub(delta) });
            }
        }

        Hypercall::Srs { p, u, w, mode } => {
            let target = decode_mode(mode)?;
            if matches!(bank.current_mode(), Mode::User | Mode::System) {
                return Err(Error::UnpredictableHypercall("SRS in User/System mode".into()));
            }
            let base = bank.regmode_read(target, 13);
            let addr = if u { base } else { base.wrapping_sub(8) };
            let addr = if p == u { addr.wrapping_add(4) } else { addr };
            mem.write_u32(addr, bank.reg_read(14))?;
            mem.write_u32(addr.wrapping_add(4), bank.spsr_retrieve()?)?;
            if w {
                let delta = 8u32;
                bank.regmode_write(
                    target,
                    13,
                    if u { base.wrapping_add(delta) } else { base.wrapping_sub(delta) },
                );
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::Wfi => {
            // The caller parks the vCPU; pc is advanced on wake per spec.
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }
        Hypercall::Wfe | Hypercall::Yield => {
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::Smc => {
            let rc = crate::psci::dispatch(bank);
            if rc != crate::psci::PSCI_SUCCESS {
                return Err(Error::UnpredictableHypercall(format!("PSCI call failed: {rc}")));
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::LdmExceptionReturn { rn, p, u, w, reg_list } => {
            if reg_list & 0x8000 == 0 {
                return Err(Error::UnpredictableHypercall("LDM exception-return without r15".into()));
            }
            deassert_mode_irq(bank.current_mode())?;
            let length: u32 = 4 + 4 * (0..15u32).filter(|i| reg_list & (1 << i) != 0).count() as u32;
            let base = bank.reg_read(rn);
            let address = page_split_addr(p, u, base, length);
            let mut words = Vec::with_capacity(length as usize / 4);
            for i in 0..(length / 4) {
                words.push(mem.read_u32(address.wrapping_add(i * 4))?);
            }
            let mut pos = 0usize;
            for i in 0..15u32 {
                if reg_list & (1 << i) != 0 {
                    bank.regmode_write(Mode::User, i, words[pos]);
                    pos += 1;
                }
            }
            if w && reg_list & (1 << rn) == 0 {
                let delta = length;
                bank.reg_write(rn, if u { base.wrapping_add(delta) } else { base.wrapping_sub(delta) });
            }
            bank.cpsr_update(bank.spsr_retrieve()?, CPSR_ALLBITS_MASK);
            bank.regs.pc = words[pos];
        }

        Hypercall::LdmUserRegisters { rn, reg_list } => {
            if reg_list == 0 {
                return Err(Error::UnpredictableHypercall("LDM user-registers empty list".into()));
            }
            if matches!(bank.current_mode(), Mode::User | Mode::System) {
                return Err(Error::UnpredictableHypercall("LDM user-registers in User/System mode".into()));
            }
            let length: u32 = 4 * (0..15u32).filter(|i| reg_list & (1 << i) != 0).count() as u32;
            let address = bank.reg_read(rn);
            let mut words = Vec::with_capacity((length / 4) as usize);
            for i in 0..(length / 4) {
                words.push(mem.read_u32(address.wrapping_add(i * 4))?);
            }
            let mut pos = 0usize;
            for i in 0..15u32 {
                if reg_list & (1 << i) != 0 {
                    bank.regmode_write(Mode::User, i, words[pos]);
                    pos += 1;
                }
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::StmUserRegisters { rn, p, u, reg_list } => {
            if rn == 15 || reg_list == 0 {
                return Err(Error::UnpredictableHypercall("STM user-registers Rn=r15 or empty list".into()));
            }
            if matches!(bank.current_mode(), Mode::User | Mode::System) {
                return Err(Error::UnpredictableHypercall("STM user-registers in User/System mode".into()));
            }
            let length: u32 = 4 * (0..16u32).filter(|i| reg_list & (1 << i) != 0).count() as u32;
            let base = bank.reg_read(rn);
            let address = page_split_addr(p, u, base, length);
            let mut i_word = 0u32;
            for i in 0..16u32 {
                if reg_list & (1 << i) != 0 {
                    let val = bank.regmode_read(Mode::User, i);
                    mem.write_u32(address.wrapping_add(i_word * 4), val)?;
                    i_word += 1;
                }
            }
            bank.regs.pc = bank.regs.pc.wrapping_add(4);
        }

        Hypercall::SubsPcLrRegister {
            opcode,
            rn,
            rm,
            shift_type,
            shift_imm,
        } => {
            deassert_mode_irq(bank.current_mode())?;
            let carry_in = (bank.cpsr_retrieve() & CPSR_CARRY_MASK != 0) as u32;
            let (kind, amount) = decode_shift(shift_type, shift_imm);
            let operand2 = apply_shift(kind, amount, bank.reg_read(rm), carry_in);
            let result = alu_result(opcode, bank.reg_read(rn), operand2, carry_in)?;
            let new_spsr = bank.spsr_retrieve()?;
            bank.cpsr_update(new_spsr, CPSR_ALLBITS_MASK);
            bank.regs.pc = result;
        }

        Hypercall::SubsPcLrImmediate { opcode, rn, operand2 } => {
            deassert_mode_irq(bank.current_mode())?;
            let carry_in = (bank.cpsr_retrieve() & CPSR_CARRY_MASK != 0) as u32;
            let result = alu_result(opcode, bank.reg_read(rn), operand2, carry_in)?;
            let new_spsr = bank.spsr_retrieve()?;
            bank.cpsr_update(new_spsr, CPSR_ALLBITS_MASK);
            bank.regs.pc = result;
        }
    }
    Ok(())
}

fn decode_mode(bits: u32) -> Result<Mode> {
    Mode::from_cpsr(bits).ok_or_else(|| Error::UnpredictableHypercall(format!("bad mode encoding {bits:#x}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm32::Arm32Bank;

    struct FlatMem(Vec<u8>);

    impl GuestMemory for FlatMem {
        fn read_u32(&self, addr: u32) -> Result<u32> {
            let o = addr as usize;
            Ok(u32::from_le_bytes(self.0[o..o + 4].try_into().unwrap()))
        }
        fn write_u32(&mut self, addr: u32, val: u32) -> Result<()> {
            let o = addr as usize;
            self.0[o..o + 4].copy_from_slice(&val.to_le_bytes());
            Ok(())
        }
    }

    #[test]
    fn cps_switches_mode_and_masks() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(
            &mut bank,
            &mut mem,
            Hypercall::Cps {
                imod: 0,
                mode: Some(Mode::Irq.to_cpsr_bits()),
                a: false,
                i: false,
                f: false,
            },
        )
        .unwrap();
        assert_eq!(bank.current_mode(), Mode::Irq);
        assert_eq!(bank.regs.pc, 4);
    }

    #[test]
    fn mrs_reads_combined_cpsr() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(&mut bank, &mut mem, Hypercall::Mrs { rd: 0, from_spsr: false }).unwrap();
        assert_eq!(bank.reg_read(0) & crate::arm32::CPSR_MODE_MASK, Mode::Supervisor.to_cpsr_bits());
    }

    #[test]
    fn msr_immediate_only_touches_masked_bytes() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(
            &mut bank,
            &mut mem,
            Hypercall::MsrImmediate {
                mask: 0x8, // f field only
                value: 0xf000_0000,
                to_spsr: false,
            },
        )
        .unwrap();
        assert_eq!(bank.cpsr_retrieve() & 0xf000_0000, 0xf000_0000);
        assert_eq!(bank.current_mode(), Mode::Supervisor);
    }

    #[test]
    fn wfi_does_not_change_mode() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(&mut bank, &mut mem, Hypercall::Wfi).unwrap();
        assert_eq!(bank.current_mode(), Mode::Supervisor);
        assert_eq!(bank.regs.pc, 4);
    }

    #[test]
    fn decode_recognizes_wfi() {
        assert!(matches!(decode(0xe320_f003), Some(Hypercall::Wfi)));
    }

    #[test]
    fn decode_recognizes_subs_pc_lr_immediate() {
        // SUBS PC, LR, #4 — the canonical exception return from SVC.
        match decode(0xe25e_f004) {
            Some(Hypercall::SubsPcLrImmediate { opcode, rn, operand2 }) => {
                assert_eq!(opcode, 0x2);
                assert_eq!(rn, 14);
                assert_eq!(operand2, 4);
            }
            other => panic!("expected SubsPcLrImmediate, got {other:?}"),
        }
    }

    #[test]
    fn decode_recognizes_movs_pc_lr_register() {
        // MOVS PC, LR — register form, no shift.
        match decode(0xe1b0_f00e) {
            Some(Hypercall::SubsPcLrRegister {
                opcode,
                rn,
                rm,
                shift_type,
                shift_imm,
            }) => {
                assert_eq!(opcode, 0xd);
                assert_eq!(rn, 0);
                assert_eq!(rm, 14);
                assert_eq!(shift_type, 0);
                assert_eq!(shift_imm, 0);
            }
            other => panic!("expected SubsPcLrRegister, got {other:?}"),
        }
    }

    #[test]
    fn subs_pc_lr_immediate_subtracts_and_restores_spsr() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::Irq.to_cpsr_bits(), CPSR_ALLBITS_MASK);
        bank.spsr_update(Mode::Supervisor.to_cpsr_bits()).unwrap();
        bank.reg_write(14, 0x2000);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(
            &mut bank,
            &mut mem,
            Hypercall::SubsPcLrImmediate {
                opcode: 0x2, // SUB
                rn: 14,
                operand2: 4,
            },
        )
        .unwrap();
        assert_eq!(bank.regs.pc, 0x1ffc);
        assert_eq!(bank.current_mode(), Mode::Supervisor);
    }

    #[test]
    fn subs_pc_lr_register_mov_copies_shifted_operand2_into_pc() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::Irq.to_cpsr_bits(), CPSR_ALLBITS_MASK);
        bank.spsr_update(Mode::Supervisor.to_cpsr_bits()).unwrap();
        bank.reg_write(14, 0x3000);
        let mut mem = FlatMem(vec![0u8; 16]);
        emulate(
            &mut bank,
            &mut mem,
            Hypercall::SubsPcLrRegister {
                opcode: 0xd, // MOV
                rn: 0,
                rm: 14,
                shift_type: 0,
                shift_imm: 0,
            },
        )
        .unwrap();
        assert_eq!(bank.regs.pc, 0x3000);
    }

    #[test]
    fn subs_pc_lr_rejects_compare_opcodes() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::Irq.to_cpsr_bits(), CPSR_ALLBITS_MASK);
        bank.spsr_update(Mode::Supervisor.to_cpsr_bits()).unwrap();
        let mut mem = FlatMem(vec![0u8; 16]);
        let rc = emulate(
            &mut bank,
            &mut mem,
            Hypercall::SubsPcLrImmediate {
                opcode: 0x8, // TST — no Rd, unpredictable with Rd=PC
                rn: 14,
                operand2: 0,
            },
        );
        assert!(rc.is_err());
    }

    #[test]
    fn spsr_rejects_user_mode_write() {
        let mut bank = Arm32Bank::default();
        bank.reset(0);
        bank.cpsr_update(Mode::User.to_cpsr_bits(), CPSR_ALLBITS_MASK);
        let mut mem = FlatMem(vec![0u8; 16]);
        let rc = emulate(&mut bank, &mut mem, Hypercall::Mrs { rd: 0, from_spsr: true });
        assert!(rc.is_err());
    }
}
