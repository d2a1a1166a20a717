// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Barrel shifter and arithmetic primitives. These are pure functions of
//! their inputs; flag policy lives with the instruction handlers.

use common::numutil::NumExt;
use num_derive::FromPrimitive;

/// The four shift kinds of the barrel shifter, in encoding order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum Shift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

/// Apply an immediate-encoded shift. Amount 0 is special for every kind:
/// LSL keeps value and carry, LSR/ASR mean a shift by 32, ROR means RRX.
/// Returns the shifted value and the shifter carry-out (0/1).
pub fn eval_shift_imm(kind: Shift, value: u32, amount: u32, carry: u32) -> (u32, u32) {
    match (kind, amount) {
        (Shift::Lsl, 0) => (value, carry),
        (Shift::Lsl, n) => (value << n, value.bit(32 - n as u16)),
        (Shift::Lsr, 0) => (0, value.bit(31)),
        (Shift::Lsr, n) => (value >> n, value.bit(n as u16 - 1)),
        (Shift::Asr, 0) => (((value as i32) >> 31) as u32, value.bit(31)),
        (Shift::Asr, n) => (((value as i32) >> n) as u32, value.bit(n as u16 - 1)),
        (Shift::Ror, 0) => ((value >> 1) | (carry << 31), value & 1),
        (Shift::Ror, n) => {
            let res = value.rotate_right(n);
            (res, res.bit(31))
        }
    }
}

/// Apply a register-specified shift. The amount is the low byte of the
/// shift register; 0 keeps value and carry, amounts of 32 and beyond
/// follow the ARM long-shift rules.
pub fn eval_shift_reg(kind: Shift, value: u32, amount: u32, carry: u32) -> (u32, u32) {
    if amount == 0 {
        return (value, carry);
    }
    match kind {
        Shift::Lsl if amount < 32 => (value << amount, value.bit(32 - amount as u16)),
        Shift::Lsl if amount == 32 => (0, value & 1),
        Shift::Lsl => (0, 0),
        Shift::Lsr if amount < 32 => (value >> amount, value.bit(amount as u16 - 1)),
        Shift::Lsr if amount == 32 => (0, value.bit(31)),
        Shift::Lsr => (0, 0),
        Shift::Asr if amount < 32 => (((value as i32) >> amount) as u32, value.bit(amount as u16 - 1)),
        Shift::Asr => (((value as i32) >> 31) as u32, value.bit(31)),
        Shift::Ror => {
            let res = value.rotate_right(amount & 31);
            if amount & 31 == 0 {
                (value, value.bit(31))
            } else {
                (res, res.bit(31))
            }
        }
    }
}

/// Evaluate the rotated 8-bit immediate operand. The 4-bit rotate field
/// is doubled; a rotate of 0 leaves the carry alone.
pub fn eval_ror_imm(value: u32, rot: u32, carry: u32) -> (u32, u32) {
    let amount = rot << 1;
    if amount == 0 {
        (value, carry)
    } else {
        let res = value.rotate_right(amount);
        (res, res.bit(31))
    }
}

/// Result of the widened add-with-carry every arithmetic opcode is built
/// on. Carry and overflow are 0/1.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Arith {
    pub value: u32,
    pub carry: u32,
    pub overflow: u32,
}

/// 64-bit-widened add with carry. Carry is set when the true sum does not
/// fit in 32 bits, overflow when the signed interpretation disagrees with
/// the truncated result.
#[inline]
pub fn adc(rs: u32, rn: u32, c: u32) -> Arith {
    let wide = rs as u64 + rn as u64 + c as u64;
    let value = wide as u32;
    Arith {
        value,
        carry: (wide > 0xFFFF_FFFF) as u32,
        overflow: (!(rs ^ rn) & (rn ^ value)).bit(31),
    }
}

/// Subtract with carry, expressed through [adc] so the flags come from
/// the same primitive.
#[inline]
pub fn sbc(rs: u32, rn: u32, c: u32) -> Arith {
    adc(rs, !rn, c)
}

/// Signed saturating add. Returns the result and whether it clamped.
pub fn qadd(a: u32, b: u32) -> (u32, bool) {
    let (value, sat) = (a as i32).overflowing_add(b as i32);
    if sat {
        (clamp_sign(a), true)
    } else {
        (value as u32, false)
    }
}

/// Signed saturating subtract.
pub fn qsub(a: u32, b: u32) -> (u32, bool) {
    let (value, sat) = (a as i32).overflowing_sub(b as i32);
    if sat {
        (clamp_sign(a), true)
    } else {
        (value as u32, false)
    }
}

/// Signed saturating doubling, used by QDADD/QDSUB on their second
/// operand.
pub fn qdouble(a: u32) -> (u32, bool) {
    let (value, sat) = (a as i32).overflowing_mul(2);
    if sat {
        (clamp_sign(a), true)
    } else {
        (value as u32, false)
    }
}

fn clamp_sign(a: u32) -> u32 {
    if (a as i32) < 0 {
        0x8000_0000
    } else {
        0x7FFF_FFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: [u32; 5] = [0, 1, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF];

    #[test]
    fn adc_boundary_grid() {
        for a in BOUNDS {
            for b in BOUNDS {
                for c in 0..2u32 {
                    let res = adc(a, b, c);
                    let wide = a as u64 + b as u64 + c as u64;
                    assert_eq!(res.value, wide as u32);
                    assert_eq!(res.carry, (wide > 0xFFFF_FFFF) as u32, "carry {a:#x}+{b:#x}+{c}");
                    let signed = a as i32 as i64 + b as i32 as i64 + c as i64;
                    let mismatch = signed != (wide as u32) as i32 as i64;
                    assert_eq!(res.overflow, mismatch as u32, "overflow {a:#x}+{b:#x}+{c}");
                }
            }
        }
    }

    #[test]
    fn sbc_matches_complement_form() {
        // SUB rs - rn is ADC(rs, !rn, 1).
        let res = sbc(10, 3, 1);
        assert_eq!(res.value, 7);
        assert_eq!(res.carry, 1); // no borrow
        let res = sbc(3, 10, 1);
        assert_eq!(res.value, (-7i32) as u32);
        assert_eq!(res.carry, 0); // borrow
        let res = sbc(0x8000_0000, 1, 1);
        assert_eq!(res.value, 0x7FFF_FFFF);
        assert_eq!(res.overflow, 1);
    }

    #[test]
    fn lsl_zero_keeps_value_and_carry() {
        assert_eq!(eval_shift_imm(Shift::Lsl, 0x1234, 0, 1), (0x1234, 1));
        assert_eq!(eval_shift_imm(Shift::Lsl, 0x1234, 0, 0), (0x1234, 0));
        assert_eq!(eval_shift_imm(Shift::Lsl, 1, 4, 0), (16, 0));
        assert_eq!(eval_shift_imm(Shift::Lsl, 0x8000_0001, 1, 0), (2, 1));
    }

    #[test]
    fn lsr_zero_means_32() {
        assert_eq!(eval_shift_imm(Shift::Lsr, 0x8000_0000, 0, 0), (0, 1));
        assert_eq!(eval_shift_imm(Shift::Lsr, 0x7FFF_FFFF, 0, 1), (0, 0));
        assert_eq!(eval_shift_imm(Shift::Lsr, 0b110, 1, 0), (0b11, 0));
        assert_eq!(eval_shift_imm(Shift::Lsr, 0b111, 1, 0), (0b11, 1));
    }

    #[test]
    fn asr_zero_sign_fills() {
        assert_eq!(eval_shift_imm(Shift::Asr, 0x8000_0000, 0, 0), (0xFFFF_FFFF, 1));
        assert_eq!(eval_shift_imm(Shift::Asr, 0x7FFF_FFFF, 0, 1), (0, 0));
        assert_eq!(eval_shift_imm(Shift::Asr, 0x8000_0004, 2, 0), (0xE000_0001, 0));
    }

    #[test]
    fn ror_zero_is_rrx() {
        assert_eq!(eval_shift_imm(Shift::Ror, 0b11, 0, 0), (1, 1));
        assert_eq!(eval_shift_imm(Shift::Ror, 0b10, 0, 1), (0x8000_0001, 0));
        assert_eq!(eval_shift_imm(Shift::Ror, 0x0000_00F1, 4, 0), (0x1000_000F, 0));
    }

    #[test]
    fn register_shift_amounts_at_and_past_32() {
        assert_eq!(eval_shift_reg(Shift::Lsl, 0xFFFF_FFFF, 0, 1), (0xFFFF_FFFF, 1));
        assert_eq!(eval_shift_reg(Shift::Lsl, 0x3, 32, 0), (0, 1));
        assert_eq!(eval_shift_reg(Shift::Lsl, 0x3, 33, 1), (0, 0));
        assert_eq!(eval_shift_reg(Shift::Lsr, 0x8000_0000, 32, 0), (0, 1));
        assert_eq!(eval_shift_reg(Shift::Lsr, 0x8000_0000, 40, 1), (0, 0));
        assert_eq!(eval_shift_reg(Shift::Asr, 0x8000_0000, 40, 0), (0xFFFF_FFFF, 1));
        assert_eq!(eval_shift_reg(Shift::Ror, 0x8000_0001, 32, 0), (0x8000_0001, 1));
        assert_eq!(eval_shift_reg(Shift::Ror, 0xF, 4, 0), (0xF000_0000, 1));
    }

    #[test]
    fn rotated_immediate() {
        assert_eq!(eval_ror_imm(0xFF, 0, 1), (0xFF, 1));
        assert_eq!(eval_ror_imm(0xFF, 0, 0), (0xFF, 0));
        assert_eq!(eval_ror_imm(0x2, 1, 0), (0x8000_0000, 1));
        assert_eq!(eval_ror_imm(0xAB, 12, 0), (0xAB00, 0));
    }

    #[test]
    fn saturating_ops_clamp_and_report() {
        assert_eq!(qadd(0x7FFF_FFFF, 1), (0x7FFF_FFFF, true));
        assert_eq!(qadd(1, 2), (3, false));
        assert_eq!(qsub(0x8000_0000, 1), (0x8000_0000, true));
        assert_eq!(qdouble(0x4000_0000), (0x7FFF_FFFF, true));
        assert_eq!(qdouble(0x1000_0000), (0x2000_0000, false));
    }
}
