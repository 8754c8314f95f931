/// Size of one AArch64 instruction word in bytes
pub const INSTRUCTION_SIZE: usize = 4;

/// ADRP always addresses 4 KiB pages, independent of the VM page size
pub const ADRP_PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page bits of an address for ADRP arithmetic
pub const ADRP_PAGE_MASK: usize = (1 << ADRP_PAGE_SHIFT) - 1;

// adrp x16, #page
const ADRP_X16: (u32, u32) = (0x9f00_001f, 0x9000_0010);
// adrp x17, #page
const ADRP_X17: (u32, u32) = (0x9f00_001f, 0x9000_0011);
// ldr x16, [x16, #pageoff]
const LDR_X16_X16_IMM: (u32, u32) = (0xffc0_03ff, 0xf940_0210);
// br x16
const BR_X16: (u32, u32) = (0xffff_ffff, 0xd61f_0200);
// add x17, x17, #pageoff
const ADD_X17_X17_IMM: (u32, u32) = (0xffc0_03ff, 0x9100_0231);
// ldr x16, [x17]
const LDR_X16_X17: (u32, u32) = (0xffff_ffff, 0xf940_0230);
// braa x16, x17
const BRAA_X16_X17: (u32, u32) = (0xffff_ffff, 0xd71f_0a11);

/// Shape of the linker-generated stubs for imported functions
///
/// Both shapes compute `page(stub) + (imm21 << 12) + pageoff` and load the call
/// target from that address; they differ only in which instruction carries the
/// page offset and how it is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubVariant {
    /// `adrp x16; ldr x16, [x16, #off]; br x16` as found in `__TEXT,__stubs`
    Plain,
    /// `adrp x17; add x17, x17, #off; ldr x16, [x17]; braa x16, x17` as found in `__TEXT,__auth_stubs`
    Authenticated,
}

impl StubVariant {
    /// Variant produced by the toolchain for the system libraries of the build target
    #[cfg(target_abi = "sim")]
    pub const NATIVE: StubVariant = StubVariant::Plain;

    /// Variant produced by the toolchain for the system libraries of the build target
    #[cfg(not(target_abi = "sim"))]
    pub const NATIVE: StubVariant = StubVariant::Authenticated;

    /// Number of instruction words in one stub record
    pub fn word_count(self) -> usize {
        match self {
            StubVariant::Plain => 3,
            StubVariant::Authenticated => 4,
        }
    }

    /// Size of one stub record in bytes
    pub fn record_size(self) -> usize {
        self.word_count() * INSTRUCTION_SIZE
    }

    /// Name of the `__TEXT` section holding stubs of this shape
    pub fn section_name(self) -> &'static str {
        match self {
            StubVariant::Plain => "__stubs",
            StubVariant::Authenticated => "__auth_stubs",
        }
    }

    fn patterns(self) -> &'static [(u32, u32)] {
        match self {
            StubVariant::Plain => &[ADRP_X16, LDR_X16_X16_IMM, BR_X16],
            StubVariant::Authenticated => &[ADRP_X17, ADD_X17_X17_IMM, LDR_X16_X17, BRAA_X16_X17],
        }
    }

    /// Decode one stub record
    ///
    /// `words` must start at the record; only the first [`word_count`](Self::word_count)
    /// words are looked at. Every fixed bit of every instruction is checked, the
    /// first mismatch is reported.
    pub fn decode(self, words: &[u32]) -> Result<DecodedStub, StubMismatch> {
        let patterns = self.patterns();
        if words.len() < patterns.len() {
            return Err(StubMismatch {
                variant: self,
                word_index: words.len(),
                mask: 0,
                expected: 0,
                found: None,
            });
        }

        for (word_index, (&word, &(mask, expected))) in words.iter().zip(patterns).enumerate() {
            if word & mask != expected {
                return Err(StubMismatch {
                    variant: self,
                    word_index,
                    mask,
                    expected,
                    found: Some(word),
                });
            }
        }

        let adrp = words[0];
        // Plain carries the offset in the ldr, Authenticated in the add
        let page_offset = (words[1] >> 10) & 0xfff;

        Ok(DecodedStub {
            variant: self,
            page_high: (adrp >> 5) & 0x7ffff,
            page_low: (adrp >> 29) & 0x3,
            page_offset,
            word_count: patterns.len(),
        })
    }
}

/// Instruction word that failed the bit-pattern check of a stub variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{variant:?} stub word {word_index}: expected {expected:#010x} under mask {mask:#010x}, found {}", describe_found(.found))]
pub struct StubMismatch {
    pub variant: StubVariant,
    pub word_index: usize,
    pub mask: u32,
    pub expected: u32,
    /// `None` when the record was shorter than the variant requires
    pub found: Option<u32>,
}

fn describe_found(found: &Option<u32>) -> String {
    match found {
        Some(word) => format!("{:#010x}", word),
        None => "end of record".to_string(),
    }
}

/// Immediate fields of a recognised stub record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedStub {
    pub variant: StubVariant,
    /// ADRP `immhi`, bits 5..24
    pub page_high: u32,
    /// ADRP `immlo`, bits 29..31
    pub page_low: u32,
    /// Raw 12-bit offset immediate of the ldr (Plain) or add (Authenticated)
    pub page_offset: u32,
    pub word_count: usize,
}

impl DecodedStub {
    /// Signed distance in bytes between the stub's page and the slot's page
    pub fn page_delta(&self) -> i64 {
        let imm21 = (self.page_high << 2 | self.page_low) as i64;
        // sign-extend from bit 20
        let signed = (imm21 << 43) >> 43;
        signed << ADRP_PAGE_SHIFT
    }

    /// Byte offset of the slot inside its page
    pub fn byte_offset(&self) -> usize {
        match self.variant {
            // ldr (unsigned offset, 64-bit) scales by the access size
            StubVariant::Plain => (self.page_offset as usize) << 3,
            StubVariant::Authenticated => self.page_offset as usize,
        }
    }

    /// Absolute address of the pointer slot the stub at `stub_address` loads from
    pub fn slot_address(&self, stub_address: usize) -> usize {
        let page = stub_address & !ADRP_PAGE_MASK;
        page.wrapping_add_signed(self.page_delta() as isize)
            .wrapping_add(self.byte_offset())
    }
}

/// Decode the record at `stub_address` and return the pointer slot it loads from
pub fn resolve_slot(words: &[u32], stub_address: usize, variant: StubVariant) -> Result<usize, StubMismatch> {
    variant
        .decode(words)
        .map(|decoded| decoded.slot_address(stub_address))
}
