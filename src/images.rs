use crate::decoder::StubVariant;
use crate::filter::FilteredModule;
use crate::scanner::StubRegion;

/// An image mapped into the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub path: String,
    /// Address of the image's header; doubles as the image's `dso` token
    pub load_address: usize,
}

impl LoadedImage {
    pub fn new(path: impl Into<String>, load_address: usize) -> Self {
        Self {
            path: path.into(),
            load_address,
        }
    }
}

/// Host loader introspection needed by the bootstrap pipeline
pub trait ImageSource {
    /// Images currently mapped into the process, in loader order
    fn loaded_images(&self) -> Vec<LoadedImage>;

    /// The image's stub section for `variant`, if it has one
    fn stub_region(&self, image: &LoadedImage, variant: StubVariant) -> Option<StubRegion>;
}

/// A configured fragment paired with the first image whose path contains it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMatch {
    /// Index into the fragment list
    pub module: usize,
    pub fragment: String,
    pub image: LoadedImage,
}

/// Match each fragment against `images`, first image in list order wins.
/// Fragments without a match are left out.
pub fn match_images<'a, I>(fragments: I, images: &[LoadedImage]) -> Vec<ImageMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    fragments
        .into_iter()
        .enumerate()
        .filter_map(|(module, fragment)| {
            let image = images.iter().find(|image| image.path.contains(fragment));
            if image.is_none() {
                log::debug!("no loaded image matches {}", fragment);
            }
            image.map(|image| ImageMatch {
                module,
                fragment: fragment.to_string(),
                image: image.clone(),
            })
        })
        .collect()
}

/// Match the filter's modules against `images` and record each match's load address
pub fn resolve_modules(modules: &[FilteredModule], images: &[LoadedImage]) -> Vec<ImageMatch> {
    let matches = match_images(modules.iter().map(FilteredModule::fragment), images);
    for found in &matches {
        let module = &modules[found.module];
        let recorded = module.resolve(found.image.load_address);
        if recorded != found.image.load_address {
            log::warn!(
                "{} already resolved to {:#x}, ignoring {} at {:#x}",
                module.fragment(),
                recorded,
                found.image.path,
                found.image.load_address
            );
        }
    }
    matches
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use self::dyld::DyldImages;

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod dyld {
    use std::ffi::{c_char, c_ulong, c_void, CStr, CString};

    use super::{ImageSource, LoadedImage};
    use crate::decoder::StubVariant;
    use crate::scanner::StubRegion;

    extern "C" {
        fn getsectiondata(
            mhp: *const c_void,
            segname: *const c_char,
            sectname: *const c_char,
            size: *mut c_ulong,
        ) -> *mut u8;
    }

    /// Images as reported by dyld for the current process
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DyldImages;

    impl ImageSource for DyldImages {
        fn loaded_images(&self) -> Vec<LoadedImage> {
            let count = unsafe { libc::_dyld_image_count() };
            (0..count)
                .filter_map(|index| unsafe {
                    let header = libc::_dyld_get_image_header(index);
                    let name = libc::_dyld_get_image_name(index);
                    // Images can disappear between the count and the lookup
                    if header.is_null() || name.is_null() {
                        return None;
                    }
                    let path = CStr::from_ptr(name).to_string_lossy().into_owned();
                    Some(LoadedImage::new(path, header as usize))
                })
                .collect()
        }

        fn stub_region(&self, image: &LoadedImage, variant: StubVariant) -> Option<StubRegion> {
            let segment = CString::new("__TEXT").ok()?;
            let section = CString::new(variant.section_name()).ok()?;
            let mut size: c_ulong = 0;
            let start = unsafe {
                getsectiondata(
                    image.load_address as *const c_void,
                    segment.as_ptr(),
                    section.as_ptr(),
                    &mut size,
                )
            };
            if start.is_null() {
                return None;
            }
            Some(StubRegion::new(start as usize, size as usize))
        }
    }
}
