//! Quietlog Library
//!
//! Silences `os_log` output from a chosen set of system libraries without touching the
//! libraries, the logging facility, or log calls made by anyone else.
//!
//! ## How it works
//!
//! - Find the filtered images among the images dyld has loaded and record their load addresses
//! - Decode their `__TEXT,__stubs` / `__TEXT,__auth_stubs` records into the pointer slots they load from
//! - Redirect slots that hold an `os_log` entry point to a trampoline
//! - The trampoline drops calls whose `dso` argument is a filtered image and forwards the rest
//!
//! In debug builds on Apple aarch64 this runs automatically when the library is loaded.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(any(target_os = "macos", target_os = "ios"))]
//! fn main() -> Result<(), quietlog::PatchError> {
//!     let config = quietlog::FilterConfig::default().with_module("/System/Library/Frameworks/VideoToolbox.framework");
//!     let report = quietlog::install(&config)?;
//!     quietlog::print_patch_report(&report);
//!     Ok(())
//! }
//! # #[cfg(not(any(target_os = "macos", target_os = "ios")))]
//! # fn main() {}
//! ```

pub mod decoder;
pub mod scanner;
pub mod patcher;
pub mod images;
pub mod filter;
pub mod trampoline;
pub mod bootstrap;

#[cfg(test)]
mod testutil;

// Re-export main types and functions for convenience
pub use decoder::{
    resolve_slot,
    DecodedStub,
    StubMismatch,
    StubVariant,
};

pub use scanner::{
    PointerSlot,
    StubRegion,
    StubTable,
};

pub use patcher::{
    matching_slots,
    patch_slot,
    patch_slots,
    TargetSet,
};

pub use images::{
    match_images,
    resolve_modules,
    ImageMatch,
    ImageSource,
    LoadedImage,
};

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use images::DyldImages;

pub use filter::{
    Filter,
    FilterConfig,
    FilteredModule,
    ImageReport,
    PatchError,
    PatchReport,
    SlotHit,
    DEFAULT_FILTERED_MODULES,
};

pub use trampoline::{
    suppressing_log_impl,
    trampoline_address,
    LogImplFn,
};

pub use bootstrap::{
    inspect,
    install_with,
    print_patch_report,
    run_pipeline,
};

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use bootstrap::{install, inspect_process};

/// Crate version, as printed by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
