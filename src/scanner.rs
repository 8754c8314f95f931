use std::slice::ChunksExact;

use crate::decoder::{StubVariant, INSTRUCTION_SIZE};
use crate::filter::PatchError;

/// Address range of an image's stub section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubRegion {
    pub start: usize,
    pub len: usize,
}

impl StubRegion {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A pointer slot together with the stub that loads from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerSlot {
    pub stub_address: usize,
    pub address: usize,
}

impl PointerSlot {
    /// Read the function pointer currently stored in the slot
    ///
    /// # Safety
    ///
    /// `address` must be mapped, readable and pointer-aligned.
    pub unsafe fn load(&self) -> usize {
        std::ptr::read_volatile(self.address as *const usize)
    }
}

/// A contiguous run of stub records of one variant
#[derive(Debug, Clone, Copy)]
pub struct StubTable<'a> {
    words: &'a [u32],
    base: usize,
    variant: StubVariant,
}

impl<'a> StubTable<'a> {
    /// Interpret `words` as the stub table that lives at `base`
    pub fn new(words: &'a [u32], base: usize, variant: StubVariant) -> Result<Self, PatchError> {
        if words.len() % variant.word_count() != 0 {
            return Err(PatchError::MisalignedStubSection {
                start: base,
                len: words.len() * INSTRUCTION_SIZE,
                record_size: variant.record_size(),
            });
        }
        Ok(Self { words, base, variant })
    }

    /// View a stub section of the running process
    ///
    /// # Safety
    ///
    /// The region must be mapped and readable for `'a`, and must not be
    /// written while the table is alive.
    pub unsafe fn from_region(region: StubRegion, variant: StubVariant) -> Result<Self, PatchError> {
        if region.len % variant.record_size() != 0 || region.start % INSTRUCTION_SIZE != 0 {
            return Err(PatchError::MisalignedStubSection {
                start: region.start,
                len: region.len,
                record_size: variant.record_size(),
            });
        }
        let words: &'a [u32] = if region.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(region.start as *const u32, region.len / INSTRUCTION_SIZE)
        };
        Ok(Self { words, base: region.start, variant })
    }

    pub fn variant(&self) -> StubVariant {
        self.variant
    }

    /// Number of stub records
    pub fn len(&self) -> usize {
        self.words.len() / self.variant.word_count()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Decode records in memory order; stops after the first unrecognized record
    pub fn slots(&self) -> Slots<'a> {
        Slots {
            records: self.words.chunks_exact(self.variant.word_count()),
            next_address: self.base,
            variant: self.variant,
            failed: false,
        }
    }

    /// Decode every record, failing on the first one that does not match the variant
    pub fn resolve_all(&self) -> Result<Vec<PointerSlot>, PatchError> {
        self.slots().collect()
    }
}

/// Iterator over the pointer slots of a [`StubTable`]
#[derive(Debug, Clone)]
pub struct Slots<'a> {
    records: ChunksExact<'a, u32>,
    next_address: usize,
    variant: StubVariant,
    failed: bool,
}

impl Iterator for Slots<'_> {
    type Item = Result<PointerSlot, PatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let record = self.records.next()?;
        let stub_address = self.next_address;
        self.next_address += self.variant.record_size();

        match self.variant.decode(record) {
            Ok(decoded) => Some(Ok(PointerSlot {
                stub_address,
                address: decoded.slot_address(stub_address),
            })),
            Err(source) => {
                self.failed = true;
                Some(Err(PatchError::UnrecognizedStub {
                    address: stub_address,
                    source,
                }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.records.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encode_stub, StubFixture};

    fn table_words(variant: StubVariant, base: usize, slots: &[usize]) -> Vec<u32> {
        slots
            .iter()
            .enumerate()
            .flat_map(|(i, &slot)| encode_stub(variant, base + i * variant.record_size(), slot))
            .collect()
    }

    #[test]
    fn slots_follow_memory_order() {
        let base = 0x1000_2000;
        let wanted = [0x1000_5018, 0x1000_5020, 0x1000_4ff8];
        let words = table_words(StubVariant::Authenticated, base, &wanted);
        let table = StubTable::new(&words, base, StubVariant::Authenticated).unwrap();

        assert_eq!(table.len(), 3);
        let slots = table.resolve_all().unwrap();
        let expected: Vec<_> = wanted
            .iter()
            .enumerate()
            .map(|(i, &address)| PointerSlot { stub_address: base + i * 16, address })
            .collect();
        assert_eq!(slots, expected);
    }

    #[test]
    fn plain_records_are_twelve_bytes_apart() {
        let base = 0x2000_0ff4;
        let words = table_words(StubVariant::Plain, base, &[0x2000_8000, 0x2000_8008]);
        let slots = StubTable::new(&words, base, StubVariant::Plain).unwrap().resolve_all().unwrap();

        assert_eq!(slots[0].stub_address, 0x2000_0ff4);
        assert_eq!(slots[1].stub_address, 0x2000_1000);
        assert_eq!(slots[1].address, 0x2000_8008);
    }

    #[test]
    fn scan_stops_at_first_unrecognized_record() {
        let base = 0x1000_2000;
        let mut words = table_words(StubVariant::Authenticated, base, &[0x1000_5018, 0x1000_5020, 0x1000_5028]);
        // record 1, braa replaced by br
        words[7] = 0xd61f_0200;
        let table = StubTable::new(&words, base, StubVariant::Authenticated).unwrap();

        let mut slots = table.slots();
        assert!(slots.next().unwrap().is_ok());
        match slots.next() {
            Some(Err(PatchError::UnrecognizedStub { address, source })) => {
                assert_eq!(address, base + 16);
                assert_eq!(source.word_index, 3);
            }
            other => panic!("expected an unrecognized stub, got {:?}", other),
        }
        assert!(slots.next().is_none());

        assert!(matches!(
            table.resolve_all(),
            Err(PatchError::UnrecognizedStub { address, .. }) if address == base + 16
        ));
    }

    #[test]
    fn partial_record_is_rejected() {
        let words = [0xf000_0011, 0x9100_6231, 0xf940_0230, 0xd71f_0a11, 0xf000_0011];
        assert!(matches!(
            StubTable::new(&words, 0x1000, StubVariant::Authenticated),
            Err(PatchError::MisalignedStubSection { len: 20, record_size: 16, .. })
        ));
    }

    #[test]
    fn region_length_must_divide_into_records() {
        let result = unsafe { StubTable::from_region(StubRegion::new(0x1000, 40), StubVariant::Authenticated) };
        assert!(matches!(result, Err(PatchError::MisalignedStubSection { start: 0x1000, len: 40, .. })));
    }

    #[test]
    fn empty_region_has_no_slots() {
        let table = unsafe { StubTable::from_region(StubRegion::new(0, 0), StubVariant::Plain) }.unwrap();
        assert!(table.is_empty());
        assert_eq!(table.resolve_all().unwrap(), Vec::new());
    }

    #[test]
    fn scans_live_memory() {
        let fixture = StubFixture::new(StubVariant::Plain, &[0x1111, 0x2222]);
        let table = unsafe { StubTable::from_region(fixture.stub_region(), StubVariant::Plain) }.unwrap();
        let slots = table.resolve_all().unwrap();

        assert_eq!(slots.len(), 2);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.address, fixture.slot_address(i));
        }
        assert_eq!(unsafe { slots[1].load() }, 0x2222);
    }
}
