use std::ffi::{c_char, c_void};

use once_cell::sync::OnceCell;

use crate::decoder::StubMismatch;
use crate::images::LoadedImage;
use crate::trampoline::LogImplFn;

/// Path fragments of the libraries whose `os_log` traffic is dropped by default
pub const DEFAULT_FILTERED_MODULES: &[&str] = &[
    "/System/Library/Frameworks/CoreVideo.framework",
    "/System/Library/PrivateFrameworks/AppleJPEG.framework",
];

/// Which loaded images get their logging suppressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    modules: Vec<String>,
}

impl FilterConfig {
    /// A configuration that filters nothing
    pub fn empty() -> Self {
        Self { modules: Vec::new() }
    }

    /// Add a path fragment; an image is filtered when its path contains it
    pub fn with_module(mut self, fragment: impl Into<String>) -> Self {
        self.modules.push(fragment.into());
        self
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        DEFAULT_FILTERED_MODULES
            .iter()
            .fold(Self::empty(), |config, fragment| config.with_module(*fragment))
    }
}

/// A configured path fragment and, once observed, the load address of its image
#[derive(Debug)]
pub struct FilteredModule {
    fragment: String,
    load_address: OnceCell<usize>,
}

impl FilteredModule {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            load_address: OnceCell::new(),
        }
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Load address of the matching image, if one has been observed
    pub fn load_address(&self) -> Option<usize> {
        self.load_address.get().copied()
    }

    /// Record the image's load address. The first recorded address is kept for
    /// the life of the process; the return value is the address now in effect.
    pub fn resolve(&self, load_address: usize) -> usize {
        *self.load_address.get_or_init(|| load_address)
    }
}

/// The registry consulted by the suppression trampoline on every redirected call
pub struct Filter {
    modules: Vec<FilteredModule>,
    forward: LogImplFn,
}

impl Filter {
    /// Build a filter whose unsuppressed calls go to `forward`
    pub fn new(config: &FilterConfig, forward: LogImplFn) -> Self {
        Self {
            modules: config.modules().iter().map(FilteredModule::new).collect(),
            forward,
        }
    }

    pub fn modules(&self) -> &[FilteredModule] {
        &self.modules
    }

    pub fn forward(&self) -> LogImplFn {
        self.forward
    }

    /// Whether a call carrying this calling-image token is dropped
    pub fn suppresses(&self, dso: *const c_void) -> bool {
        let token = dso as usize;
        self.modules
            .iter()
            .any(|module| module.load_address() == Some(token))
    }

    /// Drop the call if it comes from a filtered image, otherwise forward it unchanged
    ///
    /// # Safety
    ///
    /// The arguments must satisfy the contract of the forward target.
    #[inline]
    pub unsafe fn dispatch(
        &self,
        dso: *const c_void,
        log: *mut c_void,
        kind: u8,
        format: *const c_char,
        buf: *mut u8,
        size: u32,
    ) {
        if self.suppresses(dso) {
            return;
        }
        (self.forward)(dso, log, kind, format, buf, size)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("modules", &self.modules)
            .field("forward", &(self.forward as usize as *const c_void))
            .finish()
    }
}

/// One stub whose pointer slot held (or still holds) a logging entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHit {
    pub stub_address: usize,
    pub slot_address: usize,
    /// Entry point the slot pointed at before redirection
    pub target: usize,
}

/// Outcome of processing one matched image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub fragment: String,
    pub image: LoadedImage,
    /// Stub records decoded; zero when the image has no stub section
    pub stub_count: usize,
    pub hits: Vec<SlotHit>,
}

/// Outcome of a bootstrap or inspection run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub images: Vec<ImageReport>,
    /// Set when nothing was written
    pub dry_run: bool,
}

impl PatchReport {
    pub fn stub_count(&self) -> usize {
        self.images.iter().map(|image| image.stub_count).sum()
    }

    pub fn hit_count(&self) -> usize {
        self.images.iter().map(|image| image.hits.len()).sum()
    }
}

/// Errors raised while locating and redirecting stub pointer slots
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("unrecognized stub at {address:#x}: {source}")]
    UnrecognizedStub {
        address: usize,
        #[source]
        source: StubMismatch,
    },

    #[error("stub section at {start:#x} is {len} bytes, not a multiple of the {record_size}-byte record")]
    MisalignedStubSection {
        start: usize,
        len: usize,
        record_size: usize,
    },

    #[error("cannot make pointer slot at {address:#x} writable: {source}")]
    Protection {
        address: usize,
        #[source]
        source: region::Error,
    },
}
