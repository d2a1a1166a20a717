// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Semantic handlers, one per mnemonic family. Operand extraction
//! follows the addressing record of the decode entry; fields that vary
//! per encoding are read straight from the instruction word.

use common::numutil::NumExt;

use crate::{
    alu,
    registers::Flag,
    tables::{AddrMode, AluOp, Entry, Insn},
    Cpu, Outcome,
};

impl Cpu {
    pub(crate) fn dispatch(&mut self, word: u32, e: Entry) -> Outcome {
        match e.insn {
            Insn::Alu(op) => self.op_alu(word, op, e.addr),

            Insn::Mul | Insn::Mla => self.op_mul(word, e.insn),
            Insn::Umull | Insn::Umlal | Insn::Smull | Insn::Smlal => {
                self.op_mul_long(word, e.insn)
            }
            Insn::SmlaXy | Insn::SmulXy | Insn::SmlawY | Insn::SmulwY | Insn::SmlalXy => {
                self.op_mul_half(word, e.insn)
            }

            Insn::Clz => self.op_clz(word),
            Insn::Qadd | Insn::Qsub | Insn::Qdadd | Insn::Qdsub => self.op_qalu(word, e.insn),

            Insn::Mrs => self.op_mrs(word, e.addr),
            Insn::Msr => self.op_msr(word, e.addr),

            Insn::B | Insn::Bl => self.op_branch(word, e.insn),
            Insn::Bx | Insn::BlxReg => self.op_branch_reg(word, e.insn),

            Insn::Ldr | Insn::Str => self.op_single_trans(word, e),
            Insn::Ldrh | Insn::Strh | Insn::Ldrsb | Insn::Ldrsh | Insn::Ldrd | Insn::Strd => {
                self.op_extra_trans(word, e)
            }
            Insn::Ldm | Insn::Stm => self.op_block_trans(word, e),
            Insn::Swp => self.op_swp(word),
            Insn::Ldrex => self.op_ldrex(word),
            Insn::Strex => self.op_strex(word),

            // Exception entry and the coprocessor interface are stubbed
            // by contract; they surface as typed outcomes.
            Insn::Swi => Outcome::Unsupported("swi", 3),
            Insn::Bkpt => Outcome::Unsupported("bkpt", 3),
            Insn::Cdp => Outcome::Unsupported("cdp", 1),
            Insn::Mcr => Outcome::Unsupported("mcr", 1),
            Insn::Mrc => Outcome::Unsupported("mrc", 1),
            Insn::Ldc => Outcome::Unsupported("ldc", 1),
            Insn::Stc => Outcome::Unsupported("stc", 1),
            Insn::Und => Outcome::Unsupported("undefined", 1),
        }
    }

    fn op_alu(&mut self, word: u32, op: AluOp, addr: AddrMode) -> Outcome {
        let s = word.is_bit(20);
        let carry_in = self.regs.carry();
        let reg_shift = matches!(addr, AddrMode::AluRegReg { .. });
        let (op2, shift_carry, mut cycles) = match addr {
            AddrMode::AluRegImm { shift } => {
                let rm = self.reg(word & 0xF);
                let (value, carry) = alu::eval_shift_imm(shift, rm, word.bits(7, 5), carry_in);
                (value, carry, 2)
            }
            AddrMode::AluRegReg { shift } => {
                let amount = self.reg(word.bits(8, 4)) & 0xFF;
                let rm = self.reg_pc4(word & 0xF);
                let (value, carry) = alu::eval_shift_reg(shift, rm, amount, carry_in);
                (value, carry, 3)
            }
            _ => {
                let (value, carry) = alu::eval_ror_imm(word & 0xFF, word.bits(8, 4), carry_in);
                (value, carry, 2)
            }
        };
        let rn = if reg_shift {
            self.reg_pc4(word.bits(16, 4))
        } else {
            self.reg(word.bits(16, 4))
        };
        let rd = word.bits(12, 4);

        use AluOp::*;
        let result = match op {
            And | Tst => {
                let r = rn & op2;
                if s {
                    self.regs.set_nz(r);
                    self.regs.set_c(shift_carry);
                }
                r
            }
            Eor | Teq => {
                let r = rn ^ op2;
                if s {
                    self.regs.set_nz(r);
                    self.regs.set_c(shift_carry);
                }
                r
            }
            Orr | Mov | Bic | Mvn => {
                let r = match op {
                    Orr => rn | op2,
                    Mov => op2,
                    Bic => rn & !op2,
                    _ => !op2,
                };
                if s {
                    self.regs.set_nz(r);
                    self.regs.set_c(shift_carry);
                }
                r
            }
            _ => {
                let a = match op {
                    Sub | Cmp => alu::sbc(rn, op2, 1),
                    Rsb => alu::sbc(op2, rn, 1),
                    Add | Cmn => alu::adc(rn, op2, 0),
                    Adc => alu::adc(rn, op2, carry_in),
                    Sbc => alu::sbc(rn, op2, carry_in),
                    _ => alu::sbc(op2, rn, carry_in),
                };
                if s {
                    self.regs.set_nz(a.value);
                    self.regs.set_c(a.carry);
                    self.regs.set_v(a.overflow);
                }
                a.value
            }
        };

        if !op.is_test() {
            if rd == 15 {
                cycles += 2;
                // Writing the PC is a branch; with S this is an
                // exception return, restoring CPSR from SPSR first.
                if s {
                    let spsr = self.regs.spsr();
                    self.regs.set_cpsr(spsr);
                }
                self.branch_to(result);
            } else {
                self.regs.r[rd.us()] = result;
            }
        }
        Outcome::Cycles(cycles)
    }

    fn op_mul(&mut self, word: u32, insn: Insn) -> Outcome {
        let s = word.is_bit(20);
        let rd = word.bits(16, 4);
        let rm = self.reg(word & 0xF);
        let rs = self.reg(word.bits(8, 4));
        let mut result = rm.wrapping_mul(rs);
        if insn == Insn::Mla {
            result = result.wrapping_add(self.reg(word.bits(12, 4)));
        }
        if s {
            self.regs.set_nz(result);
        }
        self.regs.r[rd.us()] = result;
        Outcome::Cycles(4)
    }

    fn op_mul_long(&mut self, word: u32, insn: Insn) -> Outcome {
        let s = word.is_bit(20);
        let rd_hi = word.bits(16, 4);
        let rd_lo = word.bits(12, 4);
        let rm = self.reg(word & 0xF);
        let rs = self.reg(word.bits(8, 4));

        let mut result = match insn {
            Insn::Umull | Insn::Umlal => rm as u64 * rs as u64,
            _ => (rm as i32 as i64).wrapping_mul(rs as i32 as i64) as u64,
        };
        if matches!(insn, Insn::Umlal | Insn::Smlal) {
            let acc = ((self.reg(rd_hi) as u64) << 32) | self.reg(rd_lo) as u64;
            result = result.wrapping_add(acc);
        }

        let hi = (result >> 32) as u32;
        let lo = result as u32;
        if s {
            self.regs.set_nz_wide(hi, lo);
        }
        self.regs.r[rd_hi.us()] = hi;
        self.regs.r[rd_lo.us()] = lo;
        Outcome::Cycles(5)
    }

    /// The v5 16-bit multiply family. x (bit 5) picks the Rm half, y
    /// (bit 6) the Rs half; accumulate overflow sets the sticky Q flag.
    fn op_mul_half(&mut self, word: u32, insn: Insn) -> Outcome {
        let x = word.is_bit(5);
        let y = word.is_bit(6);
        let rd = word.bits(16, 4);
        let rn = word.bits(12, 4);
        let rm = self.reg(word & 0xF);
        let rs = self.reg(word.bits(8, 4));

        let half = |v: u32, top: bool| {
            let h = if top { (v >> 16) as i16 } else { v as i16 };
            h as i32
        };

        match insn {
            Insn::SmulXy => {
                let result = half(rm, x).wrapping_mul(half(rs, y));
                self.regs.r[rd.us()] = result as u32;
            }
            Insn::SmlaXy => {
                let product = half(rm, x).wrapping_mul(half(rs, y));
                let (result, sat) = product.overflowing_add(self.reg(rn) as i32);
                if sat {
                    self.regs.set_flag(Flag::QClamped, true);
                }
                self.regs.r[rd.us()] = result as u32;
            }
            Insn::SmulwY => {
                let result = ((rm as i32 as i64 * half(rs, y) as i64) >> 16) as u32;
                self.regs.r[rd.us()] = result;
            }
            Insn::SmlawY => {
                let product = ((rm as i32 as i64 * half(rs, y) as i64) >> 16) as i32;
                let (result, sat) = product.overflowing_add(self.reg(rn) as i32);
                if sat {
                    self.regs.set_flag(Flag::QClamped, true);
                }
                self.regs.r[rd.us()] = result as u32;
            }
            _ => {
                // SMLALxy: 64-bit accumulate of the 16x16 product.
                let product = half(rm, x).wrapping_mul(half(rs, y)) as i64;
                let acc = (((self.reg(rd) as u64) << 32) | self.reg(rn) as u64) as i64;
                let result = acc.wrapping_add(product) as u64;
                self.regs.r[rd.us()] = (result >> 32) as u32;
                self.regs.r[rn.us()] = result as u32;
            }
        }
        Outcome::Cycles(2)
    }

    fn op_clz(&mut self, word: u32) -> Outcome {
        let rd = word.bits(12, 4);
        let rm = self.reg(word & 0xF);
        self.regs.r[rd.us()] = rm.leading_zeros();
        Outcome::Cycles(1)
    }

    fn op_qalu(&mut self, word: u32, insn: Insn) -> Outcome {
        let rd = word.bits(12, 4);
        let rm = self.reg(word & 0xF);
        let rn = self.reg(word.bits(16, 4));

        let (value, sat) = match insn {
            Insn::Qadd => alu::qadd(rm, rn),
            Insn::Qsub => alu::qsub(rm, rn),
            _ => {
                let (doubled, sat1) = alu::qdouble(rn);
                let (value, sat2) = if insn == Insn::Qdadd {
                    alu::qadd(rm, doubled)
                } else {
                    alu::qsub(rm, doubled)
                };
                (value, sat1 || sat2)
            }
        };
        if sat {
            self.regs.set_flag(Flag::QClamped, true);
        }
        self.regs.r[rd.us()] = value;
        Outcome::Cycles(1)
    }

    fn op_mrs(&mut self, word: u32, addr: AddrMode) -> Outcome {
        let spsr = matches!(addr, AddrMode::Mrs { spsr: true });
        let value = if spsr {
            self.regs.spsr()
        } else {
            self.regs.cpsr()
        };
        self.set_reg(word.bits(12, 4), value);
        Outcome::Cycles(2)
    }

    fn op_msr(&mut self, word: u32, addr: AddrMode) -> Outcome {
        let (spsr, value) = match addr {
            AddrMode::MsrReg { spsr } => (spsr, self.reg(word & 0xF)),
            _ => {
                let (value, _) = alu::eval_ror_imm(word & 0xFF, word.bits(8, 4), self.regs.carry());
                (matches!(addr, AddrMode::MsrImm { spsr: true }), value)
            }
        };

        let mut mask = 0u32;
        for (bit, field) in [(16u16, 0xFFu32), (17, 0xFF00), (18, 0xFF_0000), (19, 0xFF00_0000)] {
            if word.is_bit(bit) {
                mask |= field;
            }
        }
        // Unprivileged code can only touch the flags byte.
        if self.regs.mode() == crate::registers::Mode::User {
            mask &= 0xFF00_0000;
        }

        if spsr {
            let old = self.regs.spsr();
            self.regs.set_spsr((old & !mask) | (value & mask));
        } else {
            let old = self.regs.cpsr();
            self.regs.set_cpsr((old & !mask) | (value & mask));
        }
        Outcome::Cycles(2)
    }

    fn op_branch(&mut self, word: u32, insn: Insn) -> Outcome {
        let offset = ((word.bits(0, 24) << 8) as i32) >> 6;
        if insn == Insn::Bl {
            self.regs.r[14] = self.pc_next;
        }
        let target = self.regs.r[15].wrapping_add_signed(offset);
        self.branch_to(target);
        Outcome::Cycles(3)
    }

    fn op_branch_reg(&mut self, word: u32, insn: Insn) -> Outcome {
        let target = self.reg(word & 0xF);
        if target.is_bit(0) {
            // Thumb execution is out of contract.
            return Outcome::Unsupported("thumb", 3);
        }
        if insn == Insn::BlxReg {
            self.regs.r[14] = self.pc_next;
        }
        self.branch_to(target);
        Outcome::Cycles(3)
    }

    fn op_single_trans(&mut self, word: u32, e: Entry) -> Outcome {
        let byte = word.is_bit(22);
        let load = e.insn == Insn::Ldr;
        let (pre, up, writeback, offset) = match e.addr {
            AddrMode::MemImm { pre, up, writeback } => (pre, up, writeback, word & 0xFFF),
            AddrMode::MemReg {
                pre,
                up,
                writeback,
                shift,
            } => {
                let rm = self.reg(word & 0xF);
                let (value, _) =
                    alu::eval_shift_imm(shift, rm, word.bits(7, 5), self.regs.carry());
                (pre, up, writeback, value)
            }
            _ => unreachable!(),
        };

        let rn = word.bits(16, 4);
        let rd = word.bits(12, 4);
        let base = self.reg(rn);
        let shifted = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { shifted } else { base };
        let wb = !pre || writeback;

        let mut cycles = 2;
        if load {
            if wb && rn != 15 {
                self.regs.r[rn.us()] = shifted;
            }
            let value = if byte {
                self.read8(addr) as u32
            } else {
                self.read32_rotated(addr)
            };
            if rd == 15 {
                cycles += 2;
            }
            self.set_reg(rd, value);
        } else {
            let value = self.reg(rd);
            if byte {
                self.write8(addr, value.u8());
            } else {
                self.write32(addr, value);
            }
            if wb && rn != 15 {
                self.regs.r[rn.us()] = shifted;
            }
        }
        Outcome::Cycles(cycles)
    }

    fn op_extra_trans(&mut self, word: u32, e: Entry) -> Outcome {
        let (pre, up, writeback) = match e.addr {
            AddrMode::MemExImm { pre, up, writeback } | AddrMode::MemExReg { pre, up, writeback } => {
                (pre, up, writeback)
            }
            _ => unreachable!(),
        };
        let offset = if matches!(e.addr, AddrMode::MemExImm { .. }) {
            ((word >> 4) & 0xF0) | (word & 0xF)
        } else {
            self.reg(word & 0xF)
        };

        let rn = word.bits(16, 4);
        let rd = word.bits(12, 4);
        let base = self.reg(rn);
        let shifted = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { shifted } else { base };
        let wb = !pre || writeback;
        let load = matches!(e.insn, Insn::Ldrh | Insn::Ldrsb | Insn::Ldrsh | Insn::Ldrd);

        let mut cycles = 2;
        if load {
            if wb && rn != 15 {
                self.regs.r[rn.us()] = shifted;
            }
            match e.insn {
                Insn::Ldrh => {
                    let value = self.read16(addr) as u32;
                    self.set_reg(rd, value);
                }
                Insn::Ldrsb => {
                    let value = self.read8(addr) as i8 as i32 as u32;
                    self.set_reg(rd, value);
                }
                Insn::Ldrsh => {
                    let value = self.read16(addr) as i16 as i32 as u32;
                    self.set_reg(rd, value);
                }
                _ => {
                    // LDRD uses an even/odd register pair.
                    cycles += 1;
                    let lo = self.read32(addr);
                    let hi = self.read32(addr.wrapping_add(4));
                    self.regs.r[rd.us()] = lo;
                    self.set_reg(rd + 1, hi);
                }
            }
        } else {
            match e.insn {
                Insn::Strh => {
                    let value = self.reg(rd);
                    self.write16(addr, value.u16());
                }
                _ => {
                    cycles += 1;
                    let lo = self.reg(rd);
                    let hi = self.reg(rd + 1);
                    self.write32(addr, lo);
                    self.write32(addr.wrapping_add(4), hi);
                }
            }
            if wb && rn != 15 {
                self.regs.r[rn.us()] = shifted;
            }
        }
        Outcome::Cycles(cycles)
    }

    fn op_block_trans(&mut self, word: u32, e: Entry) -> Outcome {
        let (pre, up, user, writeback) = match e.addr {
            AddrMode::MemBlock {
                pre,
                up,
                user,
                writeback,
            } => (pre, up, user, writeback),
            _ => unreachable!(),
        };
        let load = e.insn == Insn::Ldm;
        let rn = word.bits(16, 4);
        let base = self.reg(rn);

        // An empty register list transfers r15 and moves the base by
        // 0x40, the ARM7-class behavior.
        let mut rlist = word & 0xFFFF;
        let empty = rlist == 0;
        let count = if empty { 16 } else { rlist.count_ones() };
        if empty {
            rlist = 1 << 15;
        }

        let wb_value = if up {
            base.wrapping_add(4 * count)
        } else {
            base.wrapping_sub(4 * count)
        };
        let mut addr = match (up, pre) {
            (true, false) => base,
            (true, true) => base.wrapping_add(4),
            (false, true) => base.wrapping_sub(4 * count),
            (false, false) => base.wrapping_sub(4 * count).wrapping_add(4),
        };

        let spsr_restore = load && user && rlist.is_bit(15);
        let user_bank = user && !spsr_restore;

        for r in 0..16u32 {
            if !rlist.is_bit(r.u16()) {
                continue;
            }
            if load {
                let value = self.read32(addr);
                if user_bank {
                    self.regs.set_user_reg(r.us(), value);
                } else {
                    self.set_reg(r, value);
                }
            } else {
                let value = if user_bank {
                    self.regs.user_reg(r.us())
                } else {
                    self.reg(r)
                };
                self.write32(addr, value);
            }
            addr = addr.wrapping_add(4);
        }

        // A loaded base wins over writeback.
        if writeback && !(load && rlist.is_bit(rn.u16())) && rn != 15 {
            self.regs.r[rn.us()] = wb_value;
        }
        if spsr_restore {
            let spsr = self.regs.spsr();
            self.regs.set_cpsr(spsr);
        }
        Outcome::Cycles(count as u16 + 2)
    }

    fn op_swp(&mut self, word: u32) -> Outcome {
        let byte = word.is_bit(22);
        let addr = self.reg(word.bits(16, 4));
        let rm = self.reg(word & 0xF);
        let rd = word.bits(12, 4);

        if byte {
            let old = self.read8(addr) as u32;
            self.write8(addr, rm.u8());
            self.set_reg(rd, old);
        } else {
            let old = self.read32_rotated(addr);
            self.write32(addr, rm);
            self.set_reg(rd, old);
        }
        Outcome::Cycles(4)
    }

    fn op_ldrex(&mut self, word: u32) -> Outcome {
        let addr = self.reg(word.bits(16, 4));
        let value = self.read32(addr);
        self.set_reg(word.bits(12, 4), value);
        Outcome::Cycles(2)
    }

    /// The store always succeeds; there is no exclusive monitor on a
    /// single-threaded bus.
    fn op_strex(&mut self, word: u32) -> Outcome {
        let addr = self.reg(word.bits(16, 4));
        let value = self.reg(word & 0xF);
        self.write32(addr, value);
        self.set_reg(word.bits(12, 4), 0);
        Outcome::Cycles(2)
    }
}

#[cfg(test)]
mod tests {
    use common::components::membus::{Accessor, MemoryBus};

    use super::*;
    use crate::{registers::Mode, Config, Version};
    use std::{cell::RefCell, rc::Rc};

    const BASE: u32 = 0x0200_0000;

    fn new_cpu(version: Version) -> Cpu {
        let ram = Rc::new(RefCell::new(vec![0u32; 0x1000]));
        let mut bus = MemoryBus::new(26, 14).unwrap();
        bus.add_range(BASE, 0x4000, Accessor::Ram(ram)).unwrap();
        Cpu::new(Config::new(version), bus, 1)
    }

    fn load(cpu: &mut Cpu, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            cpu.write32(BASE + 4 * i as u32, *w);
        }
        cpu.set_pc(BASE);
    }

    fn run(cpu: &mut Cpu, words: &[u32]) {
        load(cpu, words);
        for _ in 0..words.len() {
            cpu.step();
        }
    }

    #[test]
    fn mov_add_immediate() {
        let mut cpu = new_cpu(Version::V4);
        run(&mut cpu, &[0xE3A0_0005, 0xE280_0003]); // mov r0, #5; add r0, r0, #3
        assert_eq!(cpu.regs.r[0], 8);
        assert!(!cpu.regs.is_flag(Flag::Carry));
        assert!(!cpu.regs.is_flag(Flag::Overflow));
    }

    #[test]
    fn flag_setting_arithmetic() {
        let mut cpu = new_cpu(Version::V4);
        // mvn r0, #0; adds r0, r0, #1 -> 0, carry out, Z set
        run(&mut cpu, &[0xE3E0_0000, 0xE290_0001]);
        assert_eq!(cpu.regs.r[0], 0);
        assert!(cpu.regs.is_flag(Flag::Zero));
        assert!(cpu.regs.is_flag(Flag::Carry));
        assert!(!cpu.regs.is_flag(Flag::Overflow));

        // mov r1, #0x80000000 (imm ror 4 -> 8 ror 4); subs r1, r1, #1 -> overflow
        let mut cpu = new_cpu(Version::V4);
        run(&mut cpu, &[0xE3A0_1208, 0xE251_1001]);
        assert_eq!(cpu.regs.r[1], 0x7FFF_FFFF);
        assert!(cpu.regs.is_flag(Flag::Overflow));
        assert!(cpu.regs.is_flag(Flag::Carry));
    }

    #[test]
    fn logical_takes_carry_from_shifter() {
        let mut cpu = new_cpu(Version::V4);
        // mov r0, #3; movs r1, r0, lsr #1 -> r1 = 1, carry = 1
        run(&mut cpu, &[0xE3A0_0003, 0xE1B0_10A0]);
        assert_eq!(cpu.regs.r[1], 1);
        assert!(cpu.regs.is_flag(Flag::Carry));
    }

    #[test]
    fn conditional_execution_gates() {
        let mut cpu = new_cpu(Version::V4);
        // cmp r0, #0 (r0 is 0); moveq r1, #1; movne r2, #1
        run(&mut cpu, &[0xE350_0000, 0x03A0_1001, 0x13A0_2001]);
        assert_eq!(cpu.regs.r[1], 1);
        assert_eq!(cpu.regs.r[2], 0);
    }

    #[test]
    fn branch_with_link() {
        let mut cpu = new_cpu(Version::V4);
        // bl to base + 8 + 8
        load(&mut cpu, &[0xEB00_0002]);
        cpu.step();
        assert_eq!(cpu.regs.r[14], BASE + 4);
        assert_eq!(cpu.pc(), BASE + 16);
    }

    #[test]
    fn branch_exchange_to_arm() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[3] = BASE + 0x10;
        // bx r3
        load(&mut cpu, &[0xE12F_FF13]);
        cpu.step();
        assert_eq!(cpu.pc(), BASE + 0x10);
        assert_eq!(cpu.regs.r[15], BASE + 0x10 + 8);
    }

    #[test]
    fn load_store_word_and_byte() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = BASE + 0x100;
        cpu.regs.r[0] = 0x1234_5678;
        // str r0, [r1, #4]; ldrb r2, [r1, #5]; ldr r3, [r1, #4]
        run(
            &mut cpu,
            &[0xE581_0004, 0xE5D1_2005, 0xE591_3004],
        );
        assert_eq!(cpu.regs.r[2], 0x56);
        assert_eq!(cpu.regs.r[3], 0x1234_5678);
    }

    #[test]
    fn post_index_writes_back() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = BASE + 0x100;
        cpu.regs.r[0] = 77;
        // str r0, [r1], #4
        run(&mut cpu, &[0xE481_0004]);
        assert_eq!(cpu.regs.r[1], BASE + 0x104);
        let mut check = cpu;
        assert_eq!(check.read32(BASE + 0x100), 77);
    }

    #[test]
    fn pre_index_writeback_before_access() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = BASE + 0x100;
        // ldr r1, [r1, #8]! with memory at +0x108 holding a marker:
        cpu.write32(BASE + 0x108, 0xCAFE_0000);
        run(&mut cpu, &[0xE5B1_1008]);
        // The loaded value wins over the written-back base.
        assert_eq!(cpu.regs.r[1], 0xCAFE_0000);
    }

    #[test]
    fn halfword_and_signed_transfers() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = BASE + 0x200;
        cpu.regs.r[0] = 0xFFFF_8765;
        // strh r0, [r1]; ldrh r2, [r1]; ldrsh r3, [r1]; ldrsb r4, [r1]
        run(
            &mut cpu,
            &[0xE1C1_00B0, 0xE1D1_20B0, 0xE1D1_30F0, 0xE1D1_40D0],
        );
        assert_eq!(cpu.regs.r[2], 0x8765);
        assert_eq!(cpu.regs.r[3], 0xFFFF_8765);
        assert_eq!(cpu.regs.r[4], 0x65);
    }

    #[test]
    fn block_transfer_round_trip() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[13] = BASE + 0x1000;
        cpu.regs.r[0] = 10;
        cpu.regs.r[1] = 11;
        cpu.regs.r[4] = 14;
        // stmdb r13!, {r0, r1, r4}; then clobber; ldmia r13!, {r0, r1, r4}
        run(&mut cpu, &[0xE92D_0013]);
        assert_eq!(cpu.regs.r[13], BASE + 0x1000 - 12);
        cpu.regs.r[0] = 0;
        cpu.regs.r[1] = 0;
        cpu.regs.r[4] = 0;
        run(&mut cpu, &[0xE8BD_0013]);
        assert_eq!(cpu.regs.r[0], 10);
        assert_eq!(cpu.regs.r[1], 11);
        assert_eq!(cpu.regs.r[4], 14);
        assert_eq!(cpu.regs.r[13], BASE + 0x1000);
    }

    #[test]
    fn swap_exchanges_atomically() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = BASE + 0x300;
        cpu.regs.r[2] = 0xAAAA_BBBB;
        cpu.write32(BASE + 0x300, 0x1111_2222);
        // swp r0, r2, [r1]
        run(&mut cpu, &[0xE101_0092]);
        assert_eq!(cpu.regs.r[0], 0x1111_2222);
        let mut check = cpu;
        assert_eq!(check.read32(BASE + 0x300), 0xAAAA_BBBB);
    }

    #[test]
    fn multiply_accumulate() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[1] = 7;
        cpu.regs.r[2] = 6;
        cpu.regs.r[3] = 100;
        // mul r0, r1, r2; mla r4, r1, r2, r3
        run(&mut cpu, &[0xE000_0291, 0xE024_3291]);
        assert_eq!(cpu.regs.r[0], 42);
        assert_eq!(cpu.regs.r[4], 142);
    }

    #[test]
    fn long_multiply() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[2] = 0xFFFF_FFFF;
        cpu.regs.r[3] = 2;
        // umull r0, r1, r2, r3
        run(&mut cpu, &[0xE081_0392]);
        assert_eq!(cpu.regs.r[0], 0xFFFF_FFFE);
        assert_eq!(cpu.regs.r[1], 1);

        // smull r0, r1, r2, r3 (-1 * 2)
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[2] = 0xFFFF_FFFF;
        cpu.regs.r[3] = 2;
        run(&mut cpu, &[0xE0C1_0392]);
        assert_eq!(cpu.regs.r[0], 0xFFFF_FFFE);
        assert_eq!(cpu.regs.r[1], 0xFFFF_FFFF);
    }

    #[test]
    fn v5_clz_and_saturating() {
        let mut cpu = new_cpu(Version::V5);
        cpu.regs.r[1] = 0x0000_F000;
        // clz r0, r1
        run(&mut cpu, &[0xE16F_0F11]);
        assert_eq!(cpu.regs.r[0], 16);

        let mut cpu = new_cpu(Version::V5);
        cpu.regs.r[1] = 0x7FFF_FFFF;
        cpu.regs.r[2] = 1;
        // qadd r0, r2, r1 (rm = r2, rn = r1)
        run(&mut cpu, &[0xE101_0052]);
        assert_eq!(cpu.regs.r[0], 0x7FFF_FFFF);
        assert!(cpu.regs.is_flag(Flag::QClamped));
    }

    #[test]
    fn boots_privileged_with_interrupts_masked() {
        let cpu = new_cpu(Version::V4);
        assert_eq!(cpu.regs.mode(), Mode::Supervisor);
        assert!(cpu.regs.is_flag(Flag::IrqDisable));
        assert!(cpu.regs.is_flag(Flag::FiqDisable));
    }

    #[test]
    fn big_endian_lane_selection() {
        let ram = Rc::new(RefCell::new(vec![0u32; 0x1000]));
        let mut bus = MemoryBus::new(26, 14).unwrap();
        bus.add_range(BASE, 0x4000, Accessor::Ram(ram)).unwrap();
        let mut cpu = Cpu::new(
            Config {
                version: Version::V4,
                big_endian: true,
            },
            bus,
            1,
        );

        cpu.write32(BASE, 0x1122_3344);
        assert_eq!(cpu.read8(BASE), 0x11);
        assert_eq!(cpu.read8(BASE + 3), 0x44);
        assert_eq!(cpu.read16(BASE), 0x1122);
        assert_eq!(cpu.read16(BASE + 2), 0x3344);

        cpu.write8(BASE + 1, 0xAB);
        assert_eq!(cpu.read32(BASE), 0x11AB_3344);
        cpu.write16(BASE + 2, 0xCDEF);
        assert_eq!(cpu.read32(BASE), 0x11AB_CDEF);
    }

    #[test]
    fn msr_switches_mode_atomically() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[13] = 0x1000;
        cpu.regs.r[0] = 0xD2; // IRQ mode, I+F set
        // msr cpsr_c, r0
        run(&mut cpu, &[0xE121_F000]);
        assert_eq!(cpu.regs.mode(), Mode::Irq);
        assert_ne!(cpu.regs.r[13], 0x1000);

        // Returning to the boot mode restores the old stack pointer.
        cpu.regs.switch_mode(Mode::Supervisor);
        assert_eq!(cpu.regs.r[13], 0x1000);
    }

    #[test]
    fn unsupported_paths_are_counted() {
        let mut cpu = new_cpu(Version::V4);
        run(&mut cpu, &[0xEF00_0001, 0xEF00_0002]); // swi, swi
        let coverage: Vec<_> = cpu.coverage().collect();
        assert_eq!(coverage, vec![("swi", 2)]);
    }

    #[test]
    fn alu_write_to_pc_branches() {
        let mut cpu = new_cpu(Version::V4);
        cpu.regs.r[2] = BASE + 0x20;
        // mov pc, r2
        run(&mut cpu, &[0xE1A0_F002]);
        assert_eq!(cpu.pc(), BASE + 0x20);
        assert_eq!(cpu.regs.r[15], BASE + 0x20 + 8);
    }
}
