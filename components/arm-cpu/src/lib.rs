// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! ARM7/ARM9 interpreter core. One [Cpu] owns its register file and its
//! own view of the memory bus; two cores sharing RAM do so through
//! backing buffers registered on both buses.

pub mod alu;
pub mod disassemble;
mod inst;
pub mod registers;
pub mod tables;

use common::{
    components::{clock::Clocked, membus::MemoryBus},
    numutil::NumExt,
    Time,
};
use hashbrown::HashMap;

use crate::{
    registers::Registers,
    tables::{decode_key, table, DecodeTable},
};

/// Core family. V5 is the ARM9-class core with CLZ, saturating
/// arithmetic, doubleword transfers and BKPT.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    V4,
    V5,
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub version: Version,
    pub big_endian: bool,
}

impl Config {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            big_endian: false,
        }
    }
}

/// What executing one instruction did. Architectural gaps are a typed
/// outcome so coverage stays measurable instead of silently no-opping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Cycles(u16),
    Unsupported(&'static str, u16),
}

pub struct Cpu {
    pub regs: Registers,
    pub bus: MemoryBus,
    table: &'static DecodeTable,

    /// Address of the instruction currently executing (just fetched).
    pc: u32,
    /// Address the next fetch will come from.
    pc_next: u32,

    tick: Time,
    divider: Time,
    endian8: u32,
    endian16: u32,

    /// Log each executed instruction at trace level.
    pub trace: bool,
    coverage: HashMap<&'static str, u64>,
}

impl Cpu {
    pub fn new(config: Config, bus: MemoryBus, divider: Time) -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            bus,
            table: table(config.version == Version::V5),
            pc: 0,
            pc_next: 0,
            tick: 0,
            divider,
            endian8: if config.big_endian { 3 } else { 0 },
            endian16: if config.big_endian { 1 } else { 0 },
            trace: false,
            coverage: HashMap::new(),
        };
        cpu.reset();
        cpu
    }

    /// Zero the register file and seed every bank; the PC pipeline is
    /// re-established by the next [`set_pc`].
    ///
    /// [`set_pc`]: Cpu::set_pc
    pub fn reset(&mut self) {
        self.regs.reset();
        // Cold boot is privileged: Supervisor mode, interrupts masked.
        self.regs.set_cpsr(0xD3);
        self.pc = 0;
        self.pc_next = 0;
        self.regs.r[15] = 0;
    }

    /// Establish the PC pipeline at `addr` and prefetch.
    pub fn set_pc(&mut self, addr: u32) {
        self.pc = addr;
        self.pc_next = addr;
        self.regs.r[15] = addr;
        self.prefetch();
    }

    /// Advance the pipeline: the next fetch address becomes current, and
    /// the architecturally visible r15 runs two fetches ahead.
    fn prefetch(&mut self) {
        let pc = self.pc_next;
        self.pc = pc;
        self.pc_next = pc.wrapping_add(4);
        self.regs.r[15] = pc.wrapping_add(8);
    }

    /// Address of the instruction about to execute.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Fetch, decode and execute a single instruction.
    pub fn step(&mut self) {
        let word = self.bus.read(self.pc & !3);
        if self.trace {
            log::trace!(
                "{:08x}  {}",
                self.pc,
                disassemble::disassemble(word, self.pc, self.table)
            );
        }

        let cycles = if self.regs.eval_condition(word >> 28) {
            let entry = self.table[decode_key(word)];
            match self.dispatch(word, entry) {
                Outcome::Cycles(cycles) => cycles,
                Outcome::Unsupported(name, cycles) => {
                    let count = self.coverage.entry(name).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        log::warn!("unsupported instruction {name} at {:08x}", self.pc);
                    }
                    cycles
                }
            }
        } else {
            1
        };

        self.tick += cycles as Time * self.divider;
        self.prefetch();
    }

    /// Redirect execution; the pending prefetch turns this into the next
    /// instruction address.
    pub(crate) fn branch_to(&mut self, addr: u32) {
        self.pc_next = addr & !3;
    }

    /// Hit counts of instructions that decoded but are not implemented.
    pub fn coverage(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.coverage.iter().map(|(&name, &count)| (name, count))
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        self.bus.read(addr & !3)
    }

    /// Word read with the unaligned-LDR rotation applied.
    pub(crate) fn read32_rotated(&mut self, addr: u32) -> u32 {
        self.bus.read(addr & !3).rotate_right(8 * (addr & 3))
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        let lane = ((addr >> 1) & 1) ^ self.endian16;
        (self.bus.read(addr & !3) >> (lane * 16)).u16()
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        let lane = (addr & 3) ^ self.endian8;
        (self.bus.read(addr & !3) >> (lane * 8)).u8()
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.bus.write(addr & !3, value);
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        let lane = ((addr >> 1) & 1) ^ self.endian16;
        let shift = lane * 16;
        let word = self.bus.read(addr & !3);
        let word = (word & !(0xFFFF << shift)) | ((value as u32) << shift);
        self.bus.write(addr & !3, word);
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        let lane = (addr & 3) ^ self.endian8;
        let shift = lane * 8;
        let word = self.bus.read(addr & !3);
        let word = (word & !(0xFF << shift)) | ((value as u32) << shift);
        self.bus.write(addr & !3, word);
    }

    /// Register read; r15 yields the pipelined value.
    #[inline]
    pub(crate) fn reg(&self, r: u32) -> u32 {
        self.regs.r[r.us()]
    }

    /// Register read for operands that see r15 one fetch further ahead
    /// (register-specified shifts).
    #[inline]
    pub(crate) fn reg_pc4(&self, r: u32) -> u32 {
        if r == 15 {
            self.regs.r[15].wrapping_add(4)
        } else {
            self.regs.r[r.us()]
        }
    }

    /// Register write; writing r15 is a branch.
    pub(crate) fn set_reg(&mut self, r: u32, value: u32) {
        if r == 15 {
            self.branch_to(value);
        } else {
            self.regs.r[r.us()] = value;
        }
    }
}

impl Clocked for Cpu {
    fn execute(&mut self, target: Time) -> Time {
        while self.tick < target {
            self.step();
        }
        self.tick
    }

    fn advance(&mut self, by: Time) {
        self.tick = self.tick.saturating_sub(by);
    }
}
