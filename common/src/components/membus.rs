// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, rc::Rc};

use thiserror::Error;

use crate::numutil::NumExt;

pub type ReadFn = Rc<dyn Fn(u32) -> u32>;
pub type WriteFn = Rc<dyn Fn(u32, u32)>;

/// What backs an address range: raw word-granular memory shared with
/// whoever registered it, or a pair of MMIO delegates. `Invalid` is the
/// sentinel every page starts out as; hitting it at runtime is a
/// memory-map bug, not a recoverable condition.
#[derive(Clone, Default)]
pub enum Accessor {
    #[default]
    Invalid,
    Ram(Rc<RefCell<Vec<u32>>>),
    Io {
        read: Option<ReadFn>,
        write: Option<WriteFn>,
    },
}

/// One entry of a page's partition. `offset` is the base of the range the
/// item was installed for, so `addr - offset` indexes the backing memory
/// even after the item has been sliced by a later registration. The
/// exclusive limit is widened to u64 so the end of a full 32-bit space
/// (2^32) stays representable.
#[derive(Clone)]
struct PageItem {
    base: u32,
    limit: u64,
    offset: u32,
    accessor: Accessor,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("address space of 2^{0} words is not addressable")]
    AddressSpaceTooLarge(u32),
    #[error("page size 2^{page_bits} exceeds address space 2^{mem_bits}")]
    PageLargerThanSpace { mem_bits: u32, page_bits: u32 },
    #[error("range base {base:#010x} / size {size:#x} not 16-byte aligned")]
    Misaligned { base: u32, size: u32 },
    #[error("range {base:#010x}+{size:#x} exceeds the address space")]
    OutOfBounds { base: u32, size: u32 },
}

/// Address-range-partitioned memory dispatcher. The space is split into
/// fixed-size pages; each page holds a small sorted list of items that
/// partition it without gaps or overlap. Lookup is one shift plus a short
/// linear scan.
pub struct MemoryBus {
    pages: Vec<Vec<PageItem>>,
    mem_limit: u32,
    page_bits: u32,
    page_size: u64,
}

impl MemoryBus {
    pub fn new(mem_bits: u32, page_bits: u32) -> Result<Self, SetupError> {
        if mem_bits > 32 {
            return Err(SetupError::AddressSpaceTooLarge(mem_bits));
        }
        if page_bits > mem_bits {
            return Err(SetupError::PageLargerThanSpace {
                mem_bits,
                page_bits,
            });
        }

        let page_size = 1u64 << page_bits;
        let page_count = 1usize << (mem_bits - page_bits);
        let mut pages = Vec::with_capacity(page_count);
        let mut base = 0u64;
        for _ in 0..page_count {
            pages.push(vec![PageItem {
                base: base as u32,
                limit: base + page_size,
                offset: base as u32,
                accessor: Accessor::Invalid,
            }]);
            base += page_size;
        }

        Ok(Self {
            pages,
            mem_limit: ((1u64 << mem_bits) - 1) as u32,
            page_bits,
            page_size,
        })
    }

    /// Install an accessor over `[base, base + size)`. Items already
    /// covering parts of the range are sliced at the boundaries and
    /// dropped where fully covered; every touched page is re-validated.
    pub fn add_range(
        &mut self,
        base: u32,
        size: u32,
        accessor: Accessor,
    ) -> Result<(), SetupError> {
        if base & 0xF != 0 || size & 0xF != 0 || size == 0 {
            return Err(SetupError::Misaligned { base, size });
        }
        let limit = (base as u64) + (size as u64);
        if limit - 1 > self.mem_limit as u64 {
            return Err(SetupError::OutOfBounds { base, size });
        }

        let first_page = (base >> self.page_bits).us();
        let last_page = (((limit - 1) >> self.page_bits) as u32).us();
        for page_index in first_page..=last_page {
            let page_base = (page_index as u32) << self.page_bits;
            let page_end = page_base as u64 + self.page_size;
            let new = PageItem {
                base: base.max(page_base),
                limit: limit.min(page_end),
                offset: base,
                accessor: accessor.clone(),
            };

            let items = &mut self.pages[page_index];
            let mut kept = Vec::with_capacity(items.len() + 2);
            for item in items.drain(..) {
                if item.limit <= new.base as u64 || (item.base as u64) >= new.limit {
                    kept.push(item);
                    continue;
                }
                // Straddles the new base: keep the left remainder.
                if item.base < new.base {
                    kept.push(PageItem {
                        limit: new.base as u64,
                        ..item.clone()
                    });
                }
                // Straddles the new limit: keep the right remainder. Its
                // offset stays put so `addr - offset` still indexes the
                // original backing. A limit at the very top of the space
                // cannot straddle, so the truncation is exact.
                if item.limit > new.limit {
                    kept.push(PageItem {
                        base: new.limit as u32,
                        ..item
                    });
                }
            }
            let pos = kept.partition_point(|i| i.base < new.base);
            kept.insert(pos, new);
            *items = kept;

            self.validate_page(page_index, page_base);
        }
        Ok(())
    }

    /// Read the word containing `addr`. The bus is word-granular; callers
    /// do sub-word lane extraction themselves.
    pub fn read(&self, addr: u32) -> u32 {
        let item = self.find_item(addr);
        match &item.accessor {
            Accessor::Ram(ram) => ram.borrow()[((addr - item.offset) >> 2).us()],
            Accessor::Io {
                read: Some(read), ..
            } => read(addr),
            _ => {
                log::error!("invalid read access at address {addr:#010x}");
                panic!("invalid read access at address {addr:#010x}");
            }
        }
    }

    pub fn write(&self, addr: u32, value: u32) {
        let item = self.find_item(addr);
        match &item.accessor {
            Accessor::Ram(ram) => ram.borrow_mut()[((addr - item.offset) >> 2).us()] = value,
            Accessor::Io {
                write: Some(write), ..
            } => write(addr, value),
            _ => {
                log::error!("invalid write access at address {addr:#010x} (value = {value:#010x})");
                panic!("invalid write access at address {addr:#010x}");
            }
        }
    }

    fn find_item(&self, addr: u32) -> &PageItem {
        let addr = addr & self.mem_limit;
        let items = &self.pages[(addr >> self.page_bits).us()];
        match items
            .iter()
            .find(|i| i.base <= addr && (addr as u64) < i.limit)
        {
            Some(item) => item,
            // Unreachable while the partition invariant holds.
            None => panic!("no page item covers address {addr:#010x}"),
        }
    }

    fn validate_page(&self, page_index: usize, page_base: u32) {
        let items = &self.pages[page_index];
        let mut expected = page_base as u64;
        for item in items {
            if item.base as u64 != expected || item.limit <= item.base as u64 {
                log::error!(
                    "page {page_index} partition corrupt: item {:#010x}..{:#010x}, expected base {expected:#010x}",
                    item.base,
                    item.limit
                );
                panic!("page {page_index} partition corrupt");
            }
            expected = item.limit;
        }
        let page_end = page_base as u64 + self.page_size;
        if expected != page_end {
            log::error!(
                "page {page_index} partition corrupt: ends at {expected:#010x}, expected {page_end:#010x}"
            );
            panic!("page {page_index} partition corrupt");
        }
    }

    #[cfg(test)]
    fn items_in_page(&self, page_index: usize) -> Vec<(u32, u64)> {
        self.pages[page_index]
            .iter()
            .map(|i| (i.base, i.limit))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram(words: usize) -> (Accessor, Rc<RefCell<Vec<u32>>>) {
        let backing = Rc::new(RefCell::new(vec![0u32; words]));
        (Accessor::Ram(backing.clone()), backing)
    }

    #[test]
    fn rejects_misaligned_ranges() {
        let mut bus = MemoryBus::new(16, 12).unwrap();
        let (acc, _) = ram(16);
        assert_eq!(
            bus.add_range(0x1008, 0x100, acc.clone()),
            Err(SetupError::Misaligned {
                base: 0x1008,
                size: 0x100
            })
        );
        assert_eq!(
            bus.add_range(0x1000, 0x108, acc),
            Err(SetupError::Misaligned {
                base: 0x1000,
                size: 0x108
            })
        );
    }

    #[test]
    fn rejects_out_of_bounds_ranges() {
        let mut bus = MemoryBus::new(16, 12).unwrap();
        let (acc, _) = ram(16);
        assert!(bus.add_range(0xFFF0, 0x100, acc).is_err());
    }

    #[test]
    fn overlapping_registration_slices_items() {
        let mut bus = MemoryBus::new(16, 12).unwrap();
        let (old, old_ram) = ram(0x1000 / 4);
        let (new, new_ram) = ram(0x400 / 4);
        bus.add_range(0x1000, 0x1000, old).unwrap();
        bus.add_range(0x1800, 0x400, new).unwrap();

        assert_eq!(
            bus.items_in_page(1),
            vec![(0x1000, 0x1800), (0x1800, 0x1C00), (0x1C00, 0x2000)]
        );

        // The sliced right remainder still indexes the old backing from
        // the old range base.
        old_ram.borrow_mut()[(0x1C04 - 0x1000) / 4] = 0xAABB_CCDD;
        new_ram.borrow_mut()[(0x1804 - 0x1800) / 4] = 0x1122_3344;
        assert_eq!(bus.read(0x1C04), 0xAABB_CCDD);
        assert_eq!(bus.read(0x1804), 0x1122_3344);
    }

    #[test]
    fn range_spanning_pages_partitions_each() {
        let mut bus = MemoryBus::new(16, 12).unwrap();
        let (acc, backing) = ram(0x2000 / 4);
        bus.add_range(0x800, 0x2000, acc).unwrap();

        assert_eq!(bus.items_in_page(0), vec![(0x0, 0x800), (0x800, 0x1000)]);
        assert_eq!(bus.items_in_page(1), vec![(0x1000, 0x2000)]);
        assert_eq!(bus.items_in_page(2), vec![(0x2000, 0x2800), (0x2800, 0x3000)]);

        bus.write(0x1FFC, 0xDEAD_BEEF);
        assert_eq!(backing.borrow()[(0x1FFC - 0x800) / 4], 0xDEAD_BEEF);
    }

    #[test]
    fn io_delegates_are_called() {
        let mut bus = MemoryBus::new(16, 12).unwrap();
        let written = Rc::new(RefCell::new((0u32, 0u32)));
        let sink = written.clone();
        bus.add_range(
            0x2000,
            0x100,
            Accessor::Io {
                read: Some(Rc::new(|addr| addr ^ 0xFFFF_FFFF)),
                write: Some(Rc::new(move |addr, value| {
                    *sink.borrow_mut() = (addr, value);
                })),
            },
        )
        .unwrap();

        assert_eq!(bus.read(0x2004), 0x2004 ^ 0xFFFF_FFFF);
        bus.write(0x2008, 77);
        assert_eq!(*written.borrow(), (0x2008, 77));
    }

    #[test]
    #[should_panic(expected = "invalid read access")]
    fn invalid_access_is_fatal() {
        let bus = MemoryBus::new(16, 12).unwrap();
        bus.read(0x100);
    }

    #[test]
    fn maps_the_top_page_of_a_full_address_space() {
        let mut bus = MemoryBus::new(32, 22).unwrap();
        let (acc, backing) = ram(0x1000 / 4);
        bus.add_range(0xFFC0_0000, 0x1000, acc).unwrap();

        assert_eq!(
            bus.items_in_page(1023),
            vec![(0xFFC0_0000, 0xFFC0_1000), (0xFFC0_1000, 0x1_0000_0000)]
        );
        bus.write(0xFFC0_0FFC, 0x1234_5678);
        assert_eq!(bus.read(0xFFC0_0FFC), 0x1234_5678);
        assert_eq!(backing.borrow()[0xFFC / 4], 0x1234_5678);
    }

    #[test]
    fn shared_backing_between_two_buses() {
        let (acc, _) = ram(0x1000 / 4);
        let mut a = MemoryBus::new(16, 12).unwrap();
        let mut b = MemoryBus::new(16, 10).unwrap();
        a.add_range(0x1000, 0x1000, acc.clone()).unwrap();
        b.add_range(0x1000, 0x1000, acc).unwrap();

        a.write(0x1010, 42);
        assert_eq!(b.read(0x1010), 42);
    }
}
