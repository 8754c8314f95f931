//! Encoders, fixtures and fakes shared by the unit tests.

use std::cell::RefCell;
use std::ffi::{c_char, c_void};

use region::{Allocation, Protection};

use crate::decoder::{StubVariant, ADRP_PAGE_MASK, ADRP_PAGE_SHIFT};
use crate::images::{ImageSource, LoadedImage};
use crate::scanner::StubRegion;

fn adrp(rd: u32, stub: usize, slot: usize) -> u32 {
    let delta = ((slot & !ADRP_PAGE_MASK) as i64 - (stub & !ADRP_PAGE_MASK) as i64) >> ADRP_PAGE_SHIFT;
    let imm21 = (delta as u32) & 0x1f_ffff;
    0x9000_0000 | (imm21 & 0x3) << 29 | (imm21 >> 2) << 5 | rd
}

/// `adrp x16; ldr x16, [x16, #off]; br x16` loading from `slot`
pub fn plain_stub(stub: usize, slot: usize) -> [u32; 3] {
    let offset = (slot & ADRP_PAGE_MASK) as u32;
    assert_eq!(offset % 8, 0, "ldr offsets are 8-byte scaled");
    [adrp(16, stub, slot), 0xf940_0210 | (offset >> 3) << 10, 0xd61f_0200]
}

/// `adrp x17; add x17, x17, #off; ldr x16, [x17]; braa x16, x17` loading from `slot`
pub fn authenticated_stub(stub: usize, slot: usize) -> [u32; 4] {
    let offset = (slot & ADRP_PAGE_MASK) as u32;
    [adrp(17, stub, slot), 0x9100_0231 | offset << 10, 0xf940_0230, 0xd71f_0a11]
}

pub fn encode_stub(variant: StubVariant, stub: usize, slot: usize) -> Vec<u32> {
    match variant {
        StubVariant::Plain => plain_stub(stub, slot).to_vec(),
        StubVariant::Authenticated => authenticated_stub(stub, slot).to_vec(),
    }
}

/// Offset of the first slot inside the slot page
const FIRST_SLOT: usize = 0x18;

/// A stub table on one page and the slots it loads from on the next,
/// in freshly mapped memory
pub struct StubFixture {
    memory: Allocation,
    variant: StubVariant,
    records: usize,
}

impl StubFixture {
    pub fn new(variant: StubVariant, slot_values: &[usize]) -> Self {
        let page = region::page::size();
        let mut memory = region::alloc(page * 2, Protection::READ_WRITE).unwrap();
        let base = memory.as_mut_ptr::<u8>() as usize;

        for (i, &value) in slot_values.iter().enumerate() {
            let stub = base + i * variant.record_size();
            let slot = base + page + FIRST_SLOT + i * 8;
            let words = encode_stub(variant, stub, slot);
            unsafe {
                std::ptr::copy_nonoverlapping(words.as_ptr(), stub as *mut u32, words.len());
                std::ptr::write(slot as *mut usize, value);
            }
        }

        Self {
            memory,
            variant,
            records: slot_values.len(),
        }
    }

    fn base(&self) -> usize {
        self.memory.as_ptr::<u8>() as usize
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn stub_region(&self) -> StubRegion {
        StubRegion::new(self.base(), self.records * self.variant.record_size())
    }

    pub fn stub_address(&self, record: usize) -> usize {
        self.base() + record * self.variant.record_size()
    }

    pub fn slot_address(&self, record: usize) -> usize {
        self.base() + region::page::size() + FIRST_SLOT + record * 8
    }

    pub fn slot_value(&self, record: usize) -> usize {
        unsafe { std::ptr::read_volatile(self.slot_address(record) as *const usize) }
    }

    /// Overwrite one instruction word of a stub record
    pub fn write_word(&self, record: usize, word: usize, value: u32) {
        let address = self.stub_address(record) + word * 4;
        unsafe { std::ptr::write_volatile(address as *mut u32, value) }
    }

    pub fn protect_slots(&self, protection: Protection) {
        let page = self.base() + region::page::size();
        unsafe { region::protect(page as *const u8, region::page::size(), protection).unwrap() }
    }

    pub fn slot_protection(&self) -> Protection {
        region::query(self.slot_address(0) as *const u8).unwrap().protection()
    }
}

/// Image list and stub sections supplied by the test
#[derive(Default)]
pub struct FakeImages {
    images: Vec<(LoadedImage, Option<StubRegion>)>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, path: &str, load_address: usize, stubs: Option<StubRegion>) -> Self {
        self.images.push((LoadedImage::new(path, load_address), stubs));
        self
    }
}

impl ImageSource for FakeImages {
    fn loaded_images(&self) -> Vec<LoadedImage> {
        self.images.iter().map(|(image, _)| image.clone()).collect()
    }

    fn stub_region(&self, image: &LoadedImage, _variant: StubVariant) -> Option<StubRegion> {
        self.images
            .iter()
            .find(|(candidate, _)| candidate == image)
            .and_then(|(_, stubs)| *stubs)
    }
}

/// Arguments seen by [`recording_log_impl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedCall {
    pub dso: usize,
    pub log: usize,
    pub kind: u8,
    pub format: usize,
    pub buf: usize,
    pub size: u32,
}

thread_local! {
    static CALLS: RefCell<Vec<ForwardedCall>> = const { RefCell::new(Vec::new()) };
}

/// Forward target that records its arguments on the calling thread
pub unsafe extern "C" fn recording_log_impl(
    dso: *const c_void,
    log: *mut c_void,
    kind: u8,
    format: *const c_char,
    buf: *mut u8,
    size: u32,
) {
    let call = ForwardedCall {
        dso: dso as usize,
        log: log as usize,
        kind,
        format: format as usize,
        buf: buf as usize,
        size,
    };
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

/// Drain the calls recorded on this thread
pub fn take_calls() -> Vec<ForwardedCall> {
    CALLS.with(|calls| calls.borrow_mut().drain(..).collect())
}
