// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

use bitmatch::bitmatch;
use common::numutil::NumExt;

/// A register with values for FIQ and all other modes
#[derive(Clone, Copy, Default)]
struct FiqReg {
    reg: u32,
    fiq: u32,
}

/// A register with different values for the different CPU modes
type ModeReg = [u32; 6];

/// The ARM register file: the flat live array, the per-mode banks, and
/// the condition flags. The four NZCV flags are kept unpacked for fast
/// testing; the packed CPSR is materialized on demand.
///
/// Exactly one banked set is live in `r` at any time, selected by the
/// mode bits of the CPSR. All mode changes go through [`switch_mode`]
/// or [`set_cpsr`], which swap the banks as one atomic operation.
///
/// [`switch_mode`]: Registers::switch_mode
/// [`set_cpsr`]: Registers::set_cpsr
#[derive(Clone, Default)]
pub struct Registers {
    pub r: [u32; 16],
    cpsr: u32,
    spsr: ModeReg,
    fiqs: [FiqReg; 5],
    sp: ModeReg,
    lr: ModeReg,

    /// Bit 31 of this value is the N flag.
    flag_n: u32,
    /// Z is set iff this value is zero.
    flag_z: u32,
    flag_c: u32,
    flag_v: u32,
}

impl Registers {
    /// Zero everything, then run the export ceremony once per mode so
    /// every bank holds a consistent (all-zero) set, and re-import the
    /// flags from the zeroed CPSR. Calling this twice yields the same
    /// state both times.
    pub fn reset(&mut self) {
        *self = Self::default();
        for mode in Mode::ALL {
            self.export(mode);
        }
        self.flags_import();
    }

    /// Get the current CPU mode.
    pub fn mode(&self) -> Mode {
        Mode::get(self.cpsr & 0x1F)
    }

    /// The packed CPSR, with the cached flags folded back in.
    pub fn cpsr(&self) -> u32 {
        let n = self.flag_n & 0x8000_0000;
        let z = ((self.flag_z == 0) as u32) << 30;
        let c = self.flag_c << 29;
        let v = self.flag_v << 28;
        (self.cpsr & 0x0FFF_FFFF) | n | z | c | v
    }

    /// Set the CPSR. Swaps register banks if the mode bits changed and
    /// refreshes the flag cache.
    pub fn set_cpsr(&mut self, value: u32) {
        let from = self.mode();
        self.export(from);
        self.cpsr = value;
        self.import(self.mode());
        self.flags_import();
    }

    /// Change only the mode bits, exporting the live set into the old
    /// mode's bank and importing the new mode's bank.
    pub fn switch_mode(&mut self, to: Mode) {
        let cpsr = self.cpsr();
        self.set_cpsr((cpsr & !0x1F) | to.to_u32());
    }

    pub fn spsr(&self) -> u32 {
        self.spsr[self.mode().bank()]
    }

    pub fn set_spsr(&mut self, value: u32) {
        self.spsr[self.mode().bank()] = value;
    }

    fn export(&mut self, mode: Mode) {
        let bank = mode.bank();
        for (i, fiq) in self.fiqs.iter_mut().enumerate() {
            if mode == Mode::Fiq {
                fiq.fiq = self.r[8 + i];
            } else {
                fiq.reg = self.r[8 + i];
            }
        }
        self.sp[bank] = self.r[13];
        self.lr[bank] = self.r[14];
    }

    fn import(&mut self, mode: Mode) {
        let bank = mode.bank();
        for (i, fiq) in self.fiqs.iter().enumerate() {
            self.r[8 + i] = if mode == Mode::Fiq { fiq.fiq } else { fiq.reg };
        }
        self.r[13] = self.sp[bank];
        self.r[14] = self.lr[bank];
    }

    /// Read a register as the User bank sees it, regardless of the
    /// current mode. Used by block transfers with the S bit.
    pub fn user_reg(&self, r: usize) -> u32 {
        let banked = self.mode().bank() != 0;
        match r {
            8..=12 if self.mode() == Mode::Fiq => self.fiqs[r - 8].reg,
            13 if banked => self.sp[0],
            14 if banked => self.lr[0],
            _ => self.r[r],
        }
    }

    /// Write a register in the User bank, regardless of the current mode.
    pub fn set_user_reg(&mut self, r: usize, value: u32) {
        let banked = self.mode().bank() != 0;
        match r {
            8..=12 if self.mode() == Mode::Fiq => self.fiqs[r - 8].reg = value,
            13 if banked => self.sp[0] = value,
            14 if banked => self.lr[0] = value,
            _ => self.r[r] = value,
        }
    }

    /// Refresh the flag cache from the packed CPSR.
    pub fn flags_import(&mut self) {
        self.flag_n = self.cpsr;
        self.flag_z = (!self.cpsr).bit(30);
        self.flag_c = self.cpsr.bit(29);
        self.flag_v = self.cpsr.bit(28);
    }

    #[inline]
    pub fn set_nz(&mut self, value: u32) {
        self.flag_n = value;
        self.flag_z = value;
    }

    /// NZ from a 64-bit result split across two registers.
    #[inline]
    pub fn set_nz_wide(&mut self, hi: u32, lo: u32) {
        self.flag_n = hi;
        self.flag_z = hi | lo;
    }

    #[inline]
    pub fn set_c(&mut self, carry: u32) {
        self.flag_c = carry & 1;
    }

    #[inline]
    pub fn set_v(&mut self, overflow: u32) {
        self.flag_v = overflow & 1;
    }

    /// Carry flag as 0/1, the form the shifter and ADC want.
    #[inline]
    pub fn carry(&self) -> u32 {
        self.flag_c
    }

    pub fn is_flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::Neg => self.flag_n.is_bit(31),
            Flag::Zero => self.flag_z == 0,
            Flag::Carry => self.flag_c != 0,
            Flag::Overflow => self.flag_v != 0,
            _ => self.cpsr.is_bit(flag as u16),
        }
    }

    pub fn set_flag(&mut self, flag: Flag, en: bool) {
        match flag {
            Flag::Neg => self.flag_n = (en as u32) << 31,
            Flag::Zero => self.flag_z = !en as u32,
            Flag::Carry => self.flag_c = en as u32,
            Flag::Overflow => self.flag_v = en as u32,
            _ => self.cpsr = self.cpsr.set_bit(flag as u16, en),
        }
    }

    /// Evaluate a condition encoded into an instruction.
    pub fn eval_condition(&self, cond: u32) -> bool {
        // This condition table is taken from mGBA sources, which are licensed under
        // MPL2 at https://github.com/mgba-emu/mgba
        // Thank you to endrift and other mGBA contributors!
        const COND_MASKS: [u16; 16] = [
            0xF0F0, // EQ [-Z--]
            0x0F0F, // NE [-z--]
            0xCCCC, // CS [--C-]
            0x3333, // CC [--c-]
            0xFF00, // MI [N---]
            0x00FF, // PL [n---]
            0xAAAA, // VS [---V]
            0x5555, // VC [---v]
            0x0C0C, // HI [-zC-]
            0xF3F3, // LS [-Z--] || [--c-]
            0xAA55, // GE [N--V] || [n--v]
            0x55AA, // LT [N--v] || [n--V]
            0x0A05, // GT [Nz-V] || [nz-v]
            0xF5FA, // LE [-Z--] || [Nz-v] || [nz-V]
            0xFFFF, // AL [----]
            0x0000, // NV
        ];

        let flags = self.cpsr() >> 28;
        (COND_MASKS[cond.us()] & (1 << flags)) != 0
    }
}

/// Execution context of the CPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    User,
    Fiq,
    Supervisor,
    Abort,
    Irq,
    Undefined,
    System,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::User,
        Mode::Fiq,
        Mode::Supervisor,
        Mode::Abort,
        Mode::Irq,
        Mode::Undefined,
        Mode::System,
    ];

    #[bitmatch]
    pub fn get(n: u32) -> Self {
        #[bitmatch]
        match n {
            "0??00" => Self::User,
            "0??01" => Self::Fiq,
            "0??10" => Self::Irq,
            "0??11" => Self::Supervisor,
            "10000" => Self::User,
            "10001" => Self::Fiq,
            "10010" => Self::Irq,
            "10011" => Self::Supervisor,
            "10111" => Self::Abort,
            "11011" => Self::Undefined,
            "11111" => Self::System,
            _ => panic!(),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::User => 0b10000,
            Self::Fiq => 0b10001,
            Self::Irq => 0b10010,
            Self::Supervisor => 0b10011,
            Self::Abort => 0b10111,
            Self::Undefined => 0b11011,
            Self::System => 0b11111,
        }
    }

    /// System shares the User bank.
    fn bank(self) -> usize {
        match self {
            Self::User | Self::System => 0,
            Self::Fiq => 1,
            Self::Supervisor => 2,
            Self::Abort => 3,
            Self::Irq => 4,
            Self::Undefined => 5,
        }
    }
}

/// Flags inside CPSR.
#[derive(Copy, Clone)]
pub enum Flag {
    Neg = 31,
    Zero = 30,
    Carry = 29,
    Overflow = 28,
    QClamped = 27,
    IrqDisable = 7,
    FiqDisable = 6,
    Thumb = 5,
}
