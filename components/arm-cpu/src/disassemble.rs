// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Text rendering of instruction words, driven by the same decode table
//! the interpreter uses. Only meant for tracing; output follows the
//! usual assembler syntax.

use std::fmt::Write;

use common::numutil::NumExt;

use crate::{
    alu::Shift,
    tables::{decode_key, AddrMode, AluOp, DecodeTable, Insn},
};

const CONDS: [&str; 16] = [
    "eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "", "nv",
];

const REGS: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc",
];

fn reg(r: u32) -> &'static str {
    REGS[(r & 0xF).us()]
}

/// Disassemble one word fetched from `addr`.
pub fn disassemble(word: u32, addr: u32, table: &DecodeTable) -> String {
    let e = table[decode_key(word)];
    let cond = CONDS[(word >> 28).us()];
    let (mnemonic, operands) = render(word, addr, e.insn, e.addr, cond);
    if operands.is_empty() {
        mnemonic
    } else {
        format!("{mnemonic:7}{operands}")
    }
}

fn render(word: u32, addr: u32, insn: Insn, mode: AddrMode, cond: &str) -> (String, String) {
    let rn = word.bits(16, 4);
    let rd = word.bits(12, 4);
    let rs = word.bits(8, 4);
    let rm = word & 0xF;

    match insn {
        Insn::Alu(op) => {
            let s = if word.is_bit(20) && !op.is_test() { "s" } else { "" };
            let name = format!("{}{cond}{s}", alu_name(op));
            let op2 = alu_op2(word, mode);
            let ops = match op {
                AluOp::Mov | AluOp::Mvn => format!("{}, {op2}", reg(rd)),
                _ if op.is_test() => format!("{}, {op2}", reg(rn)),
                _ => format!("{}, {}, {op2}", reg(rd), reg(rn)),
            };
            (name, ops)
        }

        Insn::Mul | Insn::Mla => {
            let s = if word.is_bit(20) { "s" } else { "" };
            let name = format!("{}{cond}{s}", if insn == Insn::Mul { "mul" } else { "mla" });
            let ops = if insn == Insn::Mul {
                format!("{}, {}, {}", reg(rn), reg(rm), reg(rs))
            } else {
                format!("{}, {}, {}, {}", reg(rn), reg(rm), reg(rs), reg(rd))
            };
            (name, ops)
        }
        Insn::Umull | Insn::Umlal | Insn::Smull | Insn::Smlal => {
            let base = match insn {
                Insn::Umull => "umull",
                Insn::Umlal => "umlal",
                Insn::Smull => "smull",
                _ => "smlal",
            };
            let s = if word.is_bit(20) { "s" } else { "" };
            (
                format!("{base}{cond}{s}"),
                format!("{}, {}, {}, {}", reg(rd), reg(rn), reg(rm), reg(rs)),
            )
        }
        Insn::SmlaXy | Insn::SmulXy | Insn::SmlawY | Insn::SmulwY | Insn::SmlalXy => {
            let x = if word.is_bit(5) { "t" } else { "b" };
            let y = if word.is_bit(6) { "t" } else { "b" };
            let (base, ops) = match insn {
                Insn::SmulXy => (format!("smul{x}{y}"), format!("{}, {}, {}", reg(rn), reg(rm), reg(rs))),
                Insn::SmlaXy => (
                    format!("smla{x}{y}"),
                    format!("{}, {}, {}, {}", reg(rn), reg(rm), reg(rs), reg(rd)),
                ),
                Insn::SmulwY => (format!("smulw{y}"), format!("{}, {}, {}", reg(rn), reg(rm), reg(rs))),
                Insn::SmlawY => (
                    format!("smlaw{y}"),
                    format!("{}, {}, {}, {}", reg(rn), reg(rm), reg(rs), reg(rd)),
                ),
                _ => (
                    format!("smlal{x}{y}"),
                    format!("{}, {}, {}, {}", reg(rd), reg(rn), reg(rm), reg(rs)),
                ),
            };
            (format!("{base}{cond}"), ops)
        }

        Insn::Clz => (format!("clz{cond}"), format!("{}, {}", reg(rd), reg(rm))),
        Insn::Qadd | Insn::Qsub | Insn::Qdadd | Insn::Qdsub => {
            let base = match insn {
                Insn::Qadd => "qadd",
                Insn::Qsub => "qsub",
                Insn::Qdadd => "qdadd",
                _ => "qdsub",
            };
            (
                format!("{base}{cond}"),
                format!("{}, {}, {}", reg(rd), reg(rm), reg(rn)),
            )
        }

        Insn::Mrs => {
            let psr = if matches!(mode, AddrMode::Mrs { spsr: true }) {
                "spsr"
            } else {
                "cpsr"
            };
            (format!("mrs{cond}"), format!("{}, {psr}", reg(rd)))
        }
        Insn::Msr => {
            let spsr = matches!(
                mode,
                AddrMode::MsrReg { spsr: true } | AddrMode::MsrImm { spsr: true }
            );
            let psr = if spsr { "spsr" } else { "cpsr" };
            let mut fields = String::new();
            for (bit, ch) in [(16, 'c'), (17, 'x'), (18, 's'), (19, 'f')] {
                if word.is_bit(bit) {
                    fields.push(ch);
                }
            }
            let src = if matches!(mode, AddrMode::MsrReg { .. }) {
                reg(rm).to_string()
            } else {
                format!("#0x{:x}", (word & 0xFF).rotate_right(2 * word.bits(8, 4)))
            };
            (format!("msr{cond}"), format!("{psr}_{fields}, {src}"))
        }

        Insn::B | Insn::Bl => {
            let offset = ((word.bits(0, 24) << 8) as i32) >> 6;
            let target = addr.wrapping_add(8).wrapping_add_signed(offset);
            let name = if insn == Insn::B { "b" } else { "bl" };
            (format!("{name}{cond}"), format!("0x{target:08x}"))
        }
        Insn::Bx => (format!("bx{cond}"), reg(rm).to_string()),
        Insn::BlxReg => (format!("blx{cond}"), reg(rm).to_string()),
        Insn::Swi => (format!("swi{cond}"), format!("0x{:06x}", word.bits(0, 24))),
        Insn::Bkpt => (format!("bkpt{cond}"), format!("0x{:04x}", ((word >> 4) & 0xFFF0) | (word & 0xF))),

        Insn::Ldr | Insn::Str => {
            let b = if word.is_bit(22) { "b" } else { "" };
            let name = if insn == Insn::Ldr { "ldr" } else { "str" };
            (
                format!("{name}{cond}{b}"),
                format!("{}, {}", reg(rd), mem_operand(word, mode)),
            )
        }
        Insn::Ldrh | Insn::Strh | Insn::Ldrsb | Insn::Ldrsh | Insn::Ldrd | Insn::Strd => {
            let name = match insn {
                Insn::Ldrh => "ldrh",
                Insn::Strh => "strh",
                Insn::Ldrsb => "ldrsb",
                Insn::Ldrsh => "ldrsh",
                Insn::Ldrd => "ldrd",
                _ => "strd",
            };
            (
                format!("{name}{cond}"),
                format!("{}, {}", reg(rd), mem_operand(word, mode)),
            )
        }

        Insn::Ldm | Insn::Stm => {
            let (pre, up, user, writeback) = match mode {
                AddrMode::MemBlock {
                    pre,
                    up,
                    user,
                    writeback,
                } => (pre, up, user, writeback),
                _ => (false, false, false, false),
            };
            let suffix = match (up, pre) {
                (true, false) => "ia",
                (true, true) => "ib",
                (false, false) => "da",
                (false, true) => "db",
            };
            let name = if insn == Insn::Ldm { "ldm" } else { "stm" };
            let wb = if writeback { "!" } else { "" };
            let caret = if user { "^" } else { "" };
            let mut list = String::new();
            for r in 0..16 {
                if word.is_bit(r) {
                    if !list.is_empty() {
                        list.push_str(", ");
                    }
                    list.push_str(reg(r as u32));
                }
            }
            (
                format!("{name}{cond}{suffix}"),
                format!("{}{wb}, {{{list}}}{caret}", reg(rn)),
            )
        }

        Insn::Swp => {
            let b = if word.is_bit(22) { "b" } else { "" };
            (
                format!("swp{cond}{b}"),
                format!("{}, {}, [{}]", reg(rd), reg(rm), reg(rn)),
            )
        }
        Insn::Ldrex => (format!("ldrex{cond}"), format!("{}, [{}]", reg(rd), reg(rn))),
        Insn::Strex => (
            format!("strex{cond}"),
            format!("{}, {}, [{}]", reg(rd), reg(rm), reg(rn)),
        ),

        Insn::Cdp => (format!("cdp{cond}"), co_operands(word)),
        Insn::Mcr => (format!("mcr{cond}"), co_reg_operands(word)),
        Insn::Mrc => (format!("mrc{cond}"), co_reg_operands(word)),
        Insn::Ldc | Insn::Stc => {
            let name = if insn == Insn::Ldc { "ldc" } else { "stc" };
            (
                format!("{name}{cond}"),
                format!("p{}, c{}, [{}, #0x{:x}]", rs, rd, reg(rn), (word & 0xFF) << 2),
            )
        }

        Insn::Und => (format!("und{cond}"), format!("0x{word:08x}")),
    }
}

fn alu_name(op: AluOp) -> &'static str {
    match op {
        AluOp::And => "and",
        AluOp::Eor => "eor",
        AluOp::Sub => "sub",
        AluOp::Rsb => "rsb",
        AluOp::Add => "add",
        AluOp::Adc => "adc",
        AluOp::Sbc => "sbc",
        AluOp::Rsc => "rsc",
        AluOp::Tst => "tst",
        AluOp::Teq => "teq",
        AluOp::Cmp => "cmp",
        AluOp::Cmn => "cmn",
        AluOp::Orr => "orr",
        AluOp::Mov => "mov",
        AluOp::Bic => "bic",
        AluOp::Mvn => "mvn",
    }
}

fn shift_name(kind: Shift) -> &'static str {
    match kind {
        Shift::Lsl => "lsl",
        Shift::Lsr => "lsr",
        Shift::Asr => "asr",
        Shift::Ror => "ror",
    }
}

/// The shifted-register form shared by data processing and indexed loads.
fn shifted_rm(word: u32, kind: Shift) -> String {
    let rm = reg(word & 0xF);
    let amount = word.bits(7, 5);
    match (kind, amount) {
        (Shift::Lsl, 0) => rm.to_string(),
        (Shift::Ror, 0) => format!("{rm}, rrx"),
        (Shift::Lsr | Shift::Asr, 0) => format!("{rm}, {} #32", shift_name(kind)),
        _ => format!("{rm}, {} #{amount}", shift_name(kind)),
    }
}

fn alu_op2(word: u32, mode: AddrMode) -> String {
    match mode {
        AddrMode::AluRegImm { shift } => shifted_rm(word, shift),
        AddrMode::AluRegReg { shift } => {
            format!("{}, {} {}", reg(word & 0xF), shift_name(shift), reg(word.bits(8, 4)))
        }
        _ => {
            let value = (word & 0xFF).rotate_right(2 * word.bits(8, 4));
            format!("#0x{value:x}")
        }
    }
}

fn mem_operand(word: u32, mode: AddrMode) -> String {
    let rn = reg(word.bits(16, 4));
    let (pre, up, writeback, offset) = match mode {
        AddrMode::MemImm { pre, up, writeback } => {
            (pre, up, writeback, format!("#0x{:x}", word & 0xFFF))
        }
        AddrMode::MemReg {
            pre,
            up,
            writeback,
            shift,
        } => (pre, up, writeback, shifted_rm(word, shift)),
        AddrMode::MemExImm { pre, up, writeback } => {
            let imm = ((word >> 4) & 0xF0) | (word & 0xF);
            (pre, up, writeback, format!("#0x{imm:x}"))
        }
        AddrMode::MemExReg { pre, up, writeback } => {
            (pre, up, writeback, reg(word & 0xF).to_string())
        }
        _ => return format!("[{rn}]"),
    };

    let sign = if up { "" } else { "-" };
    let mut out = String::new();
    if pre {
        let wb = if writeback { "!" } else { "" };
        let _ = write!(out, "[{rn}, {sign}{offset}]{wb}");
    } else {
        let _ = write!(out, "[{rn}], {sign}{offset}");
    }
    out
}

fn co_operands(word: u32) -> String {
    format!(
        "p{}, #{}, c{}, c{}, c{}, #{}",
        word.bits(8, 4),
        word.bits(20, 4),
        word.bits(12, 4),
        word.bits(16, 4),
        word & 0xF,
        word.bits(5, 3),
    )
}

fn co_reg_operands(word: u32) -> String {
    format!(
        "p{}, #{}, {}, c{}, c{}, #{}",
        word.bits(8, 4),
        word.bits(21, 3),
        reg(word.bits(12, 4)),
        word.bits(16, 4),
        word & 0xF,
        word.bits(5, 3),
    )
}
