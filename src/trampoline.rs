use std::ffi::{c_char, c_void};

use once_cell::sync::OnceCell;

use crate::filter::Filter;

/// Signature shared by the `os_log` implementation entry points:
/// calling image, log handle, log type, format string, packed arguments, packed length
pub type LogImplFn = unsafe extern "C" fn(
    dso: *const c_void,
    log: *mut c_void,
    kind: u8,
    format: *const c_char,
    buf: *mut u8,
    size: u32,
);

static FILTER: OnceCell<Filter> = OnceCell::new();

/// Register the process-wide filter, keeping the first one if already registered
pub fn register(make: impl FnOnce() -> Filter) -> &'static Filter {
    FILTER.get_or_init(make)
}

/// The filter consulted by [`suppressing_log_impl`], once registered
pub fn installed() -> Option<&'static Filter> {
    FILTER.get()
}

/// Installed in place of every redirected entry point
///
/// Drops the call when `dso` is the load address of a filtered image and otherwise
/// hands every argument unchanged to the filter's forward target. Calls arriving
/// before a filter is registered are dropped.
///
/// # Safety
///
/// Called only through redirected stubs, with arguments valid for the forward target.
pub unsafe extern "C" fn suppressing_log_impl(
    dso: *const c_void,
    log: *mut c_void,
    kind: u8,
    format: *const c_char,
    buf: *mut u8,
    size: u32,
) {
    if let Some(filter) = FILTER.get() {
        filter.dispatch(dso, log, kind, format, buf, size);
    }
}

/// Address written into redirected pointer slots
pub fn trampoline_address() -> usize {
    suppressing_log_impl as LogImplFn as usize
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) mod os_log {
    use std::ffi::{c_char, c_void};

    extern "C" {
        pub fn _os_log_impl(dso: *const c_void, log: *mut c_void, kind: u8, format: *const c_char, buf: *mut u8, size: u32);
        pub fn _os_log_debug_impl(dso: *const c_void, log: *mut c_void, kind: u8, format: *const c_char, buf: *mut u8, size: u32);
        pub fn _os_log_error_impl(dso: *const c_void, log: *mut c_void, kind: u8, format: *const c_char, buf: *mut u8, size: u32);
        pub fn _os_log_fault_impl(dso: *const c_void, log: *mut c_void, kind: u8, format: *const c_char, buf: *mut u8, size: u32);
    }
}

/// Where unsuppressed calls end up on Apple targets
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn os_log_forward() -> LogImplFn {
    os_log::_os_log_impl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_address_is_the_function() {
        let address = trampoline_address();
        assert_ne!(address, 0);
        assert_eq!(address, suppressing_log_impl as LogImplFn as usize);
    }
}
