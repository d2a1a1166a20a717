// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Flat decode tables, one per core family. Each table maps the 12-bit
//! key taken from instruction bits [27:20] and [7:4] to a mnemonic and
//! an addressing record. Built once at startup from the per-family
//! generators below; collisions between generators are a build bug and
//! panic immediately.

use std::sync::OnceLock;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::alu::Shift;

/// The 16 data-processing opcodes, in encoding order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive)]
pub enum AluOp {
    And = 0,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl AluOp {
    /// TST/TEQ/CMP/CMN: always set flags, never write a result.
    pub fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }
}

/// Mnemonic identifier. Fields that vary per encoding but not per table
/// entry (S bit, byte bit, halfword x/y selectors) are read from the
/// instruction word by the handler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Insn {
    Alu(AluOp),
    Mul,
    Mla,
    Umull,
    Umlal,
    Smull,
    Smlal,
    SmlaXy,
    SmlawY,
    SmulwY,
    SmlalXy,
    SmulXy,
    Clz,
    Qadd,
    Qsub,
    Qdadd,
    Qdsub,
    Mrs,
    Msr,
    B,
    Bl,
    Bx,
    BlxReg,
    Swi,
    Bkpt,
    Str,
    Ldr,
    Strh,
    Ldrh,
    Ldrsb,
    Ldrsh,
    Strd,
    Ldrd,
    Stm,
    Ldm,
    Swp,
    Strex,
    Ldrex,
    Cdp,
    Mcr,
    Mrc,
    Ldc,
    Stc,
    Und,
}

/// Operand shape of a table entry. The bits fixed at generation time
/// (pre/up/writeback, shift kind, which PSR) live here; everything else
/// is taken from the instruction word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddrMode {
    AluRegImm { shift: Shift },
    AluRegReg { shift: Shift },
    AluImm,
    MulRdRmRs,
    MulRdRmRsRn,
    MulRnRdRmRs,
    Mrs { spsr: bool },
    MsrReg { spsr: bool },
    MsrImm { spsr: bool },
    BranchOffset,
    BranchReg,
    MemImm { pre: bool, up: bool, writeback: bool },
    MemReg { pre: bool, up: bool, writeback: bool, shift: Shift },
    MemExImm { pre: bool, up: bool, writeback: bool },
    MemExReg { pre: bool, up: bool, writeback: bool },
    MemBlock { pre: bool, up: bool, user: bool, writeback: bool },
    Swp,
    Clz,
    QAlu,
    Swi,
    Bkpt,
    CoDataTrans,
    CoRegTrans,
    CoDataOp,
    StrEx,
    LdrEx,
    Invalid,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Entry {
    pub insn: Insn,
    pub addr: AddrMode,
}

pub const TABLE_SIZE: usize = 4096;
pub type DecodeTable = [Entry; TABLE_SIZE];

/// Derive the table key from an instruction word.
#[inline]
pub fn decode_key(word: u32) -> usize {
    (((word >> 16) & 0xFF0) | ((word >> 4) & 0xF)) as usize
}

/// The decode table for the requested family, built on first use.
pub fn table(v5: bool) -> &'static DecodeTable {
    static V4: OnceLock<Box<DecodeTable>> = OnceLock::new();
    static V5: OnceLock<Box<DecodeTable>> = OnceLock::new();
    if v5 {
        &**V5.get_or_init(|| build(true))
    } else {
        &**V4.get_or_init(|| build(false))
    }
}

fn build(v5: bool) -> Box<DecodeTable> {
    let mut t = vec![
        Entry {
            insn: Insn::Und,
            addr: AddrMode::Invalid,
        };
        TABLE_SIZE
    ];

    gen_b_bl(&mut t);
    gen_bx_blx(&mut t);
    gen_swi(&mut t);
    if v5 {
        set(&mut t, 0x127, Insn::Bkpt, AddrMode::Bkpt);
    }
    gen_data_proc(&mut t);
    gen_multiply(&mut t, v5);
    if v5 {
        set(&mut t, 0x161, Insn::Clz, AddrMode::Clz);
        for (op, insn) in [Insn::Qadd, Insn::Qsub, Insn::Qdadd, Insn::Qdsub]
            .into_iter()
            .enumerate()
        {
            set(&mut t, 0x105 | ((op as u32) << 5), insn, AddrMode::QAlu);
        }
    }
    gen_psr(&mut t);
    gen_trans_imm9(&mut t);
    gen_trans_reg10(&mut t);
    gen_block_trans(&mut t);
    set(&mut t, 0x109, Insn::Swp, AddrMode::Swp);
    set(&mut t, 0x149, Insn::Swp, AddrMode::Swp);
    gen_co_data_trans(&mut t);
    gen_co_data_op(&mut t);
    set(&mut t, 0x189, Insn::Strex, AddrMode::StrEx);
    set(&mut t, 0x199, Insn::Ldrex, AddrMode::LdrEx);

    match t.into_boxed_slice().try_into() {
        Ok(table) => table,
        Err(_) => unreachable!(),
    }
}

fn set(t: &mut [Entry], key: u32, insn: Insn, addr: AddrMode) {
    let key = key as usize;
    assert!(
        t[key].insn == Insn::Und,
        "decode table collision at key {key:#05x}: {:?} vs {insn:?}",
        t[key].insn
    );
    t[key] = Entry { insn, addr };
}

fn gen_b_bl(t: &mut [Entry]) {
    for l in 0..2u32 {
        for imm in 0..256u32 {
            let insn = if l == 1 { Insn::Bl } else { Insn::B };
            set(t, 0xA00 | (l << 8) | imm, insn, AddrMode::BranchOffset);
        }
    }
}

fn gen_bx_blx(t: &mut [Entry]) {
    set(t, 0x121, Insn::Bx, AddrMode::BranchReg);
    set(t, 0x123, Insn::BlxReg, AddrMode::BranchReg);
}

fn gen_swi(t: &mut [Entry]) {
    for ignored in 0..256u32 {
        set(t, 0xF00 | ignored, Insn::Swi, AddrMode::Swi);
    }
}

fn gen_data_proc(t: &mut [Entry]) {
    for i in 0..2u32 {
        for op in 0..16u32 {
            for s in 0..2u32 {
                for imm in 0..16u32 {
                    let r = imm & 1;
                    let ty = (imm >> 1) & 3;
                    let test = (0x8..=0xB).contains(&op);

                    // Bit patterns 9/B/D/F of the low nibble belong to
                    // the multiply and extension spaces.
                    if i == 0 && r == 1 && imm & 8 != 0 {
                        continue;
                    }
                    // Test opcodes without S are the PSR space.
                    if s == 0 && test {
                        continue;
                    }

                    let shift = match Shift::from_u32(ty) {
                        Some(s) => s,
                        None => unreachable!(),
                    };
                    let addr = if i == 1 {
                        AddrMode::AluImm
                    } else if r == 1 {
                        AddrMode::AluRegReg { shift }
                    } else {
                        AddrMode::AluRegImm { shift }
                    };
                    let alu = match AluOp::from_u32(op) {
                        Some(op) => op,
                        None => unreachable!(),
                    };
                    set(
                        t,
                        (i << 9) | (op << 5) | (s << 4) | imm,
                        Insn::Alu(alu),
                        addr,
                    );
                }
            }
        }
    }
}

fn gen_multiply(t: &mut [Entry], v5: bool) {
    for op in 0..16u32 {
        let (insn, addr) = match op {
            0 => (Insn::Mul, AddrMode::MulRdRmRs),
            1 => (Insn::Mla, AddrMode::MulRdRmRsRn),
            4 => (Insn::Umull, AddrMode::MulRnRdRmRs),
            5 => (Insn::Umlal, AddrMode::MulRnRdRmRs),
            6 => (Insn::Smull, AddrMode::MulRnRdRmRs),
            7 => (Insn::Smlal, AddrMode::MulRnRdRmRs),
            8 => (Insn::SmlaXy, AddrMode::MulRdRmRsRn),
            9 | 10 | 11 => (Insn::Und, AddrMode::Invalid), // resolved below
            _ => continue,
        };
        for s in 0..2u32 {
            for y in 0..2u32 {
                for x in 0..2u32 {
                    let half = op & 8 != 0;
                    let (insn, addr, operand) = if half {
                        // The 16-bit family is an ARM9-class extension.
                        if s == 1 || !v5 {
                            continue;
                        }
                        let (insn, addr) = match op {
                            8 => (Insn::SmlaXy, AddrMode::MulRdRmRsRn),
                            9 if x == 1 => (Insn::SmulwY, AddrMode::MulRdRmRs),
                            9 => (Insn::SmlawY, AddrMode::MulRdRmRsRn),
                            10 => (Insn::SmlalXy, AddrMode::MulRnRdRmRs),
                            _ => (Insn::SmulXy, AddrMode::MulRdRmRs),
                        };
                        (insn, addr, 0x8 | (y << 2) | (x << 1))
                    } else {
                        if y != 0 || x != 0 {
                            continue;
                        }
                        (insn, addr, 0x9)
                    };
                    set(t, (op << 5) | (s << 4) | operand, insn, addr);
                }
            }
        }
    }
}

fn gen_psr(t: &mut [Entry]) {
    for i in 0..2u32 {
        for psr in 0..2u32 {
            for op in 0..2u32 {
                for imm in 0..16u32 {
                    if op == 0 && (imm != 0 || i != 0) {
                        continue;
                    }
                    if i == 0 && imm != 0 {
                        continue;
                    }

                    let spsr = psr == 1;
                    let (insn, addr) = if op == 0 {
                        (Insn::Mrs, AddrMode::Mrs { spsr })
                    } else if i == 0 {
                        (Insn::Msr, AddrMode::MsrReg { spsr })
                    } else {
                        (Insn::Msr, AddrMode::MsrImm { spsr })
                    };
                    set(
                        t,
                        0x100 | (i << 9) | (psr << 6) | (op << 5) | imm,
                        insn,
                        addr,
                    );
                }
            }
        }
    }
}

fn gen_trans_imm9(t: &mut [Entry]) {
    for i in 0..2u32 {
        for p in 0..2u32 {
            for u in 0..2u32 {
                for b in 0..2u32 {
                    for w in 0..2u32 {
                        for l in 0..2u32 {
                            for imm in 0..16u32 {
                                if i == 1 && imm & 1 != 0 {
                                    continue;
                                }
                                let ty = (imm >> 1) & 3;

                                let insn = if l == 1 { Insn::Ldr } else { Insn::Str };
                                let pre = p == 1;
                                let up = u == 1;
                                let writeback = p == 1 && w == 1;
                                let addr = if i == 0 {
                                    AddrMode::MemImm { pre, up, writeback }
                                } else {
                                    let shift = match Shift::from_u32(ty) {
                                        Some(s) => s,
                                        None => unreachable!(),
                                    };
                                    AddrMode::MemReg {
                                        pre,
                                        up,
                                        writeback,
                                        shift,
                                    }
                                };
                                set(
                                    t,
                                    0x400
                                        | (i << 9)
                                        | (p << 8)
                                        | (u << 7)
                                        | (b << 6)
                                        | (w << 5)
                                        | (l << 4)
                                        | imm,
                                    insn,
                                    addr,
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

fn gen_trans_reg10(t: &mut [Entry]) {
    for p in 0..2u32 {
        for u in 0..2u32 {
            for i in 0..2u32 {
                for w in 0..2u32 {
                    for l in 0..2u32 {
                        for op in 1..4u32 {
                            if p == 0 && w == 1 {
                                continue;
                            }

                            let insn = match (l, op) {
                                (0, 1) => Insn::Strh,
                                (0, 2) => Insn::Ldrd,
                                (0, 3) => Insn::Strd,
                                (1, 1) => Insn::Ldrh,
                                (1, 2) => Insn::Ldrsb,
                                _ => Insn::Ldrsh,
                            };
                            let pre = p == 1;
                            let up = u == 1;
                            let writeback = p == 1 && w == 1;
                            let addr = if i == 1 {
                                AddrMode::MemExImm { pre, up, writeback }
                            } else {
                                AddrMode::MemExReg { pre, up, writeback }
                            };
                            set(
                                t,
                                0x009
                                    | (p << 8)
                                    | (u << 7)
                                    | (i << 6)
                                    | (w << 5)
                                    | (l << 4)
                                    | (op << 1),
                                insn,
                                addr,
                            );
                        }
                    }
                }
            }
        }
    }
}

fn gen_block_trans(t: &mut [Entry]) {
    for p in 0..2u32 {
        for u in 0..2u32 {
            for s in 0..2u32 {
                for w in 0..2u32 {
                    for l in 0..2u32 {
                        for imm in 0..16u32 {
                            let insn = if l == 1 { Insn::Ldm } else { Insn::Stm };
                            let addr = AddrMode::MemBlock {
                                pre: p == 1,
                                up: u == 1,
                                user: s == 1,
                                writeback: w == 1,
                            };
                            set(
                                t,
                                0x800 | (p << 8) | (u << 7) | (s << 6) | (w << 5) | (l << 4) | imm,
                                insn,
                                addr,
                            );
                        }
                    }
                }
            }
        }
    }
}

fn gen_co_data_trans(t: &mut [Entry]) {
    for bits in 0..0x200u32 {
        let l = (bits >> 4) & 1;
        let insn = if l == 1 { Insn::Ldc } else { Insn::Stc };
        set(t, 0xC00 | bits, insn, AddrMode::CoDataTrans);
    }
}

fn gen_co_data_op(t: &mut [Entry]) {
    for cpopc in 0..16u32 {
        for cp in 0..8u32 {
            for trans in 0..2u32 {
                let (insn, addr) = if trans == 1 {
                    let insn = if cpopc & 1 == 1 { Insn::Mrc } else { Insn::Mcr };
                    (insn, AddrMode::CoRegTrans)
                } else {
                    (Insn::Cdp, AddrMode::CoDataOp)
                };
                set(t, 0xE00 | (cpopc << 4) | (cp << 1) | trans, insn, addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v5: bool, word: u32) -> Entry {
        table(v5)[decode_key(word)]
    }

    #[test]
    fn tables_build_without_collisions() {
        let _ = table(false);
        let _ = table(true);
    }

    #[test]
    fn decodes_data_processing() {
        // mov r0, #5
        let e = entry(false, 0xE3A0_0005);
        assert_eq!(e.insn, Insn::Alu(AluOp::Mov));
        assert_eq!(e.addr, AddrMode::AluImm);

        // adds r0, r0, r3
        let e = entry(false, 0xE090_0003);
        assert_eq!(e.insn, Insn::Alu(AluOp::Add));
        assert_eq!(e.addr, AddrMode::AluRegImm { shift: Shift::Lsl });

        // orr r1, r2, r3, lsr r4
        let e = entry(false, 0xE182_1433);
        assert_eq!(e.insn, Insn::Alu(AluOp::Orr));
        assert_eq!(e.addr, AddrMode::AluRegReg { shift: Shift::Lsr });

        // cmp r1, #0
        let e = entry(false, 0xE351_0000);
        assert_eq!(e.insn, Insn::Alu(AluOp::Cmp));
    }

    #[test]
    fn decodes_branches_and_psr() {
        assert_eq!(entry(false, 0xEA00_0000).insn, Insn::B);
        assert_eq!(entry(false, 0xEB00_1234).insn, Insn::Bl);
        assert_eq!(entry(false, 0xE12F_FF10).insn, Insn::Bx);
        assert_eq!(entry(false, 0xE10F_0000).insn, Insn::Mrs);
        assert_eq!(
            entry(false, 0xE14F_0000).addr,
            AddrMode::Mrs { spsr: true }
        );
        assert_eq!(entry(false, 0xE129_F000).insn, Insn::Msr);
        assert_eq!(entry(false, 0xEF00_0042).insn, Insn::Swi);
    }

    #[test]
    fn decodes_memory_transfers() {
        // ldr r0, [r1, #4]
        let e = entry(false, 0xE591_0004);
        assert_eq!(e.insn, Insn::Ldr);
        assert_eq!(
            e.addr,
            AddrMode::MemImm {
                pre: true,
                up: true,
                writeback: false
            }
        );

        // strb r2, [r3], -r4
        let e = entry(false, 0xE643_2004);
        assert_eq!(e.insn, Insn::Str);
        assert!(matches!(e.addr, AddrMode::MemReg { pre: false, up: false, .. }));

        // ldrh r0, [r1, #2]
        let e = entry(false, 0xE1D1_00B2);
        assert_eq!(e.insn, Insn::Ldrh);
        assert_eq!(
            e.addr,
            AddrMode::MemExImm {
                pre: true,
                up: true,
                writeback: false
            }
        );

        // ldmia r13!, {..}
        let e = entry(false, 0xE8BD_000F);
        assert_eq!(e.insn, Insn::Ldm);
        assert_eq!(
            e.addr,
            AddrMode::MemBlock {
                pre: false,
                up: true,
                user: false,
                writeback: true
            }
        );

        assert_eq!(entry(false, 0xE101_0092).insn, Insn::Swp);
        assert_eq!(entry(false, 0xE141_0092).insn, Insn::Swp);
    }

    #[test]
    fn v5_only_entries() {
        // clz r0, r1
        assert_eq!(entry(false, 0xE16F_0F11).insn, Insn::Und);
        assert_eq!(entry(true, 0xE16F_0F11).insn, Insn::Clz);
        // qadd r0, r1, r2
        assert_eq!(entry(true, 0xE102_0051).insn, Insn::Qadd);
        // bkpt
        assert_eq!(entry(true, 0xE127_FF71).insn, Insn::Bkpt);
        assert_eq!(entry(false, 0xE127_FF71).insn, Insn::Und);
    }

    #[test]
    fn decodes_multiplies() {
        assert_eq!(entry(false, 0xE000_0291).insn, Insn::Mul);
        assert_eq!(entry(false, 0xE021_3294).insn, Insn::Mla);
        assert_eq!(entry(false, 0xE083_4291).insn, Insn::Umull);
        assert_eq!(entry(false, 0xE0C3_4291).insn, Insn::Smull);
        // smlabb r0, r1, r2, r3
        assert_eq!(entry(true, 0xE100_3281).insn, Insn::SmlaXy);
        // smulbb r0, r1, r2
        assert_eq!(entry(true, 0xE160_0281).insn, Insn::SmulXy);
    }

    #[test]
    fn coprocessor_space_is_tagged() {
        assert_eq!(entry(false, 0xEE00_0A10).insn, Insn::Mcr);
        assert_eq!(entry(false, 0xEE10_0A10).insn, Insn::Mrc);
        assert_eq!(entry(false, 0xEE00_0A00).insn, Insn::Cdp);
        assert_eq!(entry(false, 0xED90_0A00).insn, Insn::Ldc);
        assert_eq!(entry(false, 0xED80_0A00).insn, Insn::Stc);
    }
}
