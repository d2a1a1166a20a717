// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The dual-CPU console: an ARM9-class master and an ARM7-class one
//! sharing main memory through two independently paged buses, kept in
//! step by a convergence clock.

pub mod cartridge;

use std::{cell::RefCell, rc::Rc};

use arm_cpu::{Config, Cpu, Version};
use common::{
    components::{
        clock::Clock,
        membus::{Accessor, MemoryBus, SetupError},
    },
    Time,
};

use crate::cartridge::{Cartridge, Executable, RomError};

pub const DOTS_PER_FRAME: u32 = (256 + 99) * (192 + 71);
pub const ARM9_TICKS_PER_DOT: u32 = 12;
pub const ARM7_TICKS_PER_DOT: u32 = 6;
/// One frame, counted in ARM9 ticks. The clock runs in this unit.
pub const TICKS_PER_FRAME: Time = (DOTS_PER_FRAME * ARM9_TICKS_PER_DOT) as Time;

pub const MAIN_RAM_BASE: u32 = 0x0200_0000;
pub const MAIN_RAM_SIZE: u32 = 0x40_0000;

pub struct Nds {
    pub cpu9: Rc<RefCell<Cpu>>,
    pub cpu7: Rc<RefCell<Cpu>>,
    pub clock: Clock,
    ram: Rc<RefCell<Vec<u32>>>,
    pub cart: Option<Cartridge>,
}

impl Nds {
    /// Build the console with both buses mapped and no cartridge.
    pub fn new() -> Result<Self, SetupError> {
        let ram = Rc::new(RefCell::new(vec![0u32; (MAIN_RAM_SIZE >> 2) as usize]));

        // The ARM9 bus pages coarser than the ARM7 one; both expose the
        // same backing words at the same addresses.
        let mut bus9 = MemoryBus::new(28, 22)?;
        bus9.add_range(MAIN_RAM_BASE, MAIN_RAM_SIZE, Accessor::Ram(Rc::clone(&ram)))?;
        let mut bus7 = MemoryBus::new(28, 23)?;
        bus7.add_range(MAIN_RAM_BASE, MAIN_RAM_SIZE, Accessor::Ram(Rc::clone(&ram)))?;

        // The ARM7 runs at half the ARM9 rate, so each of its cycles
        // costs two clock ticks.
        let cpu9 = Rc::new(RefCell::new(Cpu::new(Config::new(Version::V5), bus9, 1)));
        let cpu7 = Rc::new(RefCell::new(Cpu::new(Config::new(Version::V4), bus7, 2)));

        let mut clock = Clock::new();
        clock.add_master(cpu9.clone());
        clock.add_master(cpu7.clone());

        Ok(Self {
            cpu9,
            cpu7,
            clock,
            ram,
            cart: None,
        })
    }

    /// Load a cartridge: reset both cores, copy the boot executables
    /// into main memory and point each core at its entry address.
    pub fn insert_rom(&mut self, rom: Vec<u8>) -> Result<(), RomError> {
        let cart = Cartridge::new(rom)?;
        for (cpu, exe) in [("arm9", &cart.header.arm9), ("arm7", &cart.header.arm7)] {
            let end = exe.ram_address as u64 + exe.size as u64;
            if exe.ram_address < MAIN_RAM_BASE || end > (MAIN_RAM_BASE + MAIN_RAM_SIZE) as u64 {
                return Err(RomError::LoadOutsideRam {
                    cpu,
                    address: exe.ram_address,
                });
            }
        }

        self.ram.borrow_mut().fill(0);
        {
            let mut cpu9 = self.cpu9.borrow_mut();
            cpu9.reset();
            Self::load_blob(&mut cpu9, &cart, &cart.header.arm9);
            cpu9.set_pc(cart.header.arm9.entry_address);
        }
        {
            let mut cpu7 = self.cpu7.borrow_mut();
            cpu7.reset();
            Self::load_blob(&mut cpu7, &cart, &cart.header.arm7);
            cpu7.set_pc(cart.header.arm7.entry_address);
        }

        self.cart = Some(cart);
        Ok(())
    }

    /// Copy one executable through the core's own bus.
    fn load_blob(cpu: &mut Cpu, cart: &Cartridge, exe: &Executable) {
        for (i, byte) in cart.blob(exe).iter().enumerate() {
            cpu.write8(exe.ram_address + i as u32, *byte);
        }
    }

    /// Run both cores for one frame, then rebase all tick counters so
    /// they never grow without bound.
    pub fn run_frame(&mut self) {
        self.clock.execute(TICKS_PER_FRAME);
        self.clock.advance(TICKS_PER_FRAME);
    }

    /// Direct view of a main memory word, bypassing both buses.
    pub fn ram_word(&self, addr: u32) -> u32 {
        self.ram.borrow()[((addr - MAIN_RAM_BASE) >> 2) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::HEADER_SIZE;

    fn put(rom: &mut [u8], offset: usize, value: u32) {
        rom[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// A cartridge whose two executables each write a marker word into
    /// main memory, then spin.
    fn test_rom() -> Vec<u8> {
        let arm9: [u32; 5] = [
            0xE3A0_0005, // mov r0, #5
            0xE280_0003, // add r0, r0, #3
            0xE3A0_1402, // mov r1, #0x02000000
            0xE581_0EFC, // str r0, [r1, #0xEFC]
            0xEAFF_FFFE, // b .
        ];
        let arm7: [u32; 5] = [
            0xE3A0_0007, // mov r0, #7
            0xE3A0_2402, // mov r2, #0x02000000
            0xE382_2A02, // orr r2, r2, #0x2000
            0xE582_0000, // str r0, [r2]
            0xEAFF_FFFE, // b .
        ];

        let mut rom = vec![0u8; HEADER_SIZE];
        rom[..4].copy_from_slice(b"TEST");
        rom[0x00C..0x010].copy_from_slice(b"ATTE");
        put(&mut rom, 0x020, 0x200);
        put(&mut rom, 0x024, 0x0200_0000);
        put(&mut rom, 0x028, 0x0200_0000);
        put(&mut rom, 0x02C, 20);
        put(&mut rom, 0x030, 0x214);
        put(&mut rom, 0x034, 0x0200_0100);
        put(&mut rom, 0x038, 0x0200_0100);
        put(&mut rom, 0x03C, 20);
        for w in arm9 {
            rom.extend_from_slice(&w.to_le_bytes());
        }
        for w in arm7 {
            rom.extend_from_slice(&w.to_le_bytes());
        }
        rom
    }

    #[test]
    fn boots_and_runs_both_cores() {
        let mut nds = Nds::new().unwrap();
        nds.insert_rom(test_rom()).unwrap();
        nds.run_frame();

        // ARM9 computed 5 + 3 and stored it at 0x02000EFC.
        assert_eq!(nds.ram_word(0x0200_0EFC), 8);
        // ARM7 stored its marker at 0x02002000.
        assert_eq!(nds.ram_word(0x0200_2000), 7);
    }

    #[test]
    fn frames_rebase_the_clock() {
        let mut nds = Nds::new().unwrap();
        nds.insert_rom(test_rom()).unwrap();
        nds.run_frame();
        assert_eq!(nds.clock.executed(), 0);
        nds.run_frame();
        assert_eq!(nds.clock.executed(), 0);
    }

    #[test]
    fn shared_memory_is_visible_to_both() {
        let nds = Nds::new().unwrap();
        nds.cpu9.borrow_mut().write32(0x0200_4000, 0xDEAD_BEEF);
        assert_eq!(nds.cpu7.borrow_mut().read32(0x0200_4000), 0xDEAD_BEEF);
    }

    #[test]
    fn rejects_loads_outside_main_memory() {
        let mut rom = test_rom();
        put(&mut rom, 0x028, 0x0100_0000);
        let mut nds = Nds::new().unwrap();
        assert_eq!(
            nds.insert_rom(rom).unwrap_err(),
            RomError::LoadOutsideRam {
                cpu: "arm9",
                address: 0x0100_0000,
            }
        );
    }
}
