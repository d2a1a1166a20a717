// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Cartridge image handling: the 512-byte header and the two boot
//! executables it points at.

use thiserror::Error;

pub const HEADER_SIZE: usize = 0x200;
/// Largest boot executable the header may declare.
pub const EXEC_LIMIT: u32 = 0x3B_FE00;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RomError {
    #[error("rom is {0:#x} bytes, smaller than the {HEADER_SIZE:#x} byte header")]
    TooShort(usize),
    #[error("{cpu} executable at {offset:#x}+{size:#x} lies outside the rom")]
    BlobOutOfBounds {
        cpu: &'static str,
        offset: u32,
        size: u32,
    },
    #[error("{cpu} executable is {size:#x} bytes, over the {EXEC_LIMIT:#x} limit")]
    BlobTooLarge { cpu: &'static str, size: u32 },
    #[error("{cpu} executable loads at {address:#x}, outside main memory")]
    LoadOutsideRam { cpu: &'static str, address: u32 },
}

/// Location of one boot executable: where it sits in the ROM, where it
/// is copied to, and where the core starts executing.
#[derive(Debug, Clone, Copy)]
pub struct Executable {
    pub rom_offset: u32,
    pub entry_address: u32,
    pub ram_address: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct Header {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub unit_code: u8,
    pub arm9: Executable,
    pub arm7: Executable,
    /// File name table: (offset, size).
    pub file_table: (u32, u32),
    /// File allocation table: (offset, size).
    pub file_alloc: (u32, u32),
    pub checksum: u16,
}

impl Header {
    fn parse(rom: &[u8]) -> Self {
        Self {
            title: text(&rom[0x000..0x00C]),
            game_code: text(&rom[0x00C..0x010]),
            maker_code: text(&rom[0x010..0x012]),
            unit_code: rom[0x012],
            arm9: Executable {
                rom_offset: word(rom, 0x020),
                entry_address: word(rom, 0x024),
                ram_address: word(rom, 0x028),
                size: word(rom, 0x02C),
            },
            arm7: Executable {
                rom_offset: word(rom, 0x030),
                entry_address: word(rom, 0x034),
                ram_address: word(rom, 0x038),
                size: word(rom, 0x03C),
            },
            file_table: (word(rom, 0x040), word(rom, 0x044)),
            file_alloc: (word(rom, 0x048), word(rom, 0x04C)),
            checksum: u16::from_le_bytes([rom[0x15E], rom[0x15F]]),
        }
    }
}

fn word(rom: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([rom[offset], rom[offset + 1], rom[offset + 2], rom[offset + 3]])
}

/// NUL-padded ASCII field.
fn text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub header: Header,
}

impl Cartridge {
    /// Parse the header and validate both executables against the image.
    pub fn new(rom: Vec<u8>) -> Result<Self, RomError> {
        if rom.len() < HEADER_SIZE {
            return Err(RomError::TooShort(rom.len()));
        }
        let header = Header::parse(&rom);
        for (cpu, exe) in [("arm9", &header.arm9), ("arm7", &header.arm7)] {
            if exe.size > EXEC_LIMIT {
                return Err(RomError::BlobTooLarge {
                    cpu,
                    size: exe.size,
                });
            }
            let end = exe.rom_offset as u64 + exe.size as u64;
            if end > rom.len() as u64 {
                return Err(RomError::BlobOutOfBounds {
                    cpu,
                    offset: exe.rom_offset,
                    size: exe.size,
                });
            }
        }
        log::info!(
            "loaded '{}' ({}, maker {})",
            header.title,
            header.game_code,
            header.maker_code
        );
        Ok(Self { rom, header })
    }

    /// The bytes of one boot executable.
    pub fn blob(&self, exe: &Executable) -> &[u8] {
        let start = exe.rom_offset as usize;
        &self.rom[start..start + exe.size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(f: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut rom = vec![0u8; HEADER_SIZE];
        rom[..5].copy_from_slice(b"HELLO");
        rom[0x00C..0x010].copy_from_slice(b"AHEP");
        rom[0x010..0x012].copy_from_slice(b"01");
        f(&mut rom);
        rom
    }

    fn put(rom: &mut [u8], offset: usize, value: u32) {
        rom[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn parses_identification() {
        let rom = header_with(|_| {});
        let cart = Cartridge::new(rom).unwrap();
        assert_eq!(cart.header.title, "HELLO");
        assert_eq!(cart.header.game_code, "AHEP");
        assert_eq!(cart.header.maker_code, "01");
        assert_eq!(cart.header.unit_code, 0);
    }

    #[test]
    fn parses_executables() {
        let mut rom = header_with(|rom| {
            put(rom, 0x020, 0x200);
            put(rom, 0x024, 0x0200_0000);
            put(rom, 0x028, 0x0200_0000);
            put(rom, 0x02C, 0x10);
        });
        rom.extend_from_slice(&[0xAA; 0x10]);
        let cart = Cartridge::new(rom).unwrap();
        assert_eq!(cart.header.arm9.entry_address, 0x0200_0000);
        let exe = cart.header.arm9;
        assert_eq!(cart.blob(&exe), &[0xAA; 0x10]);
    }

    #[test]
    fn rejects_short_roms() {
        assert_eq!(
            Cartridge::new(vec![0; 0x50]).unwrap_err(),
            RomError::TooShort(0x50)
        );
    }

    #[test]
    fn rejects_out_of_bounds_executables() {
        let rom = header_with(|rom| {
            put(rom, 0x020, 0x200);
            put(rom, 0x02C, 0x100); // past the end of the image
        });
        assert_eq!(
            Cartridge::new(rom).unwrap_err(),
            RomError::BlobOutOfBounds {
                cpu: "arm9",
                offset: 0x200,
                size: 0x100,
            }
        );
    }

    #[test]
    fn rejects_oversized_executables() {
        let rom = header_with(|rom| {
            put(rom, 0x03C, EXEC_LIMIT + 1);
        });
        assert_eq!(
            Cartridge::new(rom).unwrap_err(),
            RomError::BlobTooLarge {
                cpu: "arm7",
                size: EXEC_LIMIT + 1,
            }
        );
    }
}
