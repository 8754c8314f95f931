use crate::decoder::StubVariant;
use crate::filter::{Filter, FilterConfig, ImageReport, PatchError, PatchReport};
use crate::images::{match_images, resolve_modules, ImageMatch, ImageSource};
use crate::patcher::{matching_slots, patch_slots, TargetSet};
use crate::scanner::StubTable;
use crate::trampoline::{self, LogImplFn};

/// Decode the stub table of one matched image and either patch or just collect its hits
fn process_image<S: ImageSource + ?Sized>(
    source: &S,
    found: &ImageMatch,
    targets: &TargetSet,
    variant: StubVariant,
    replacement: Option<usize>,
) -> Result<ImageReport, PatchError> {
    let mut report = ImageReport {
        fragment: found.fragment.clone(),
        image: found.image.clone(),
        stub_count: 0,
        hits: Vec::new(),
    };

    let Some(region) = source.stub_region(&found.image, variant) else {
        log::warn!("{} has no __TEXT,{} section", found.image.path, variant.section_name());
        return Ok(report);
    };

    // Decode the whole table before touching any slot of this image
    let table = unsafe { StubTable::from_region(region, variant)? };
    let slots = table.resolve_all()?;
    report.stub_count = slots.len();

    report.hits = match replacement {
        Some(replacement) => unsafe { patch_slots(&slots, targets, replacement)? },
        None => unsafe { matching_slots(&slots, targets) },
    };

    log::debug!(
        "{}: {} stubs at {:#x}, {} routed to logging entry points",
        found.image.path,
        report.stub_count,
        region.start,
        report.hits.len()
    );
    Ok(report)
}

/// Resolve, scan and match without writing anything or registering a filter
pub fn inspect<S: ImageSource + ?Sized>(
    source: &S,
    config: &FilterConfig,
    targets: &TargetSet,
    variant: StubVariant,
) -> Result<PatchReport, PatchError> {
    let images = source.loaded_images();
    let matches = match_images(config.modules().iter().map(String::as_str), &images);

    let images = matches
        .iter()
        .map(|found| process_image(source, found, targets, variant, None))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PatchReport { images, dry_run: true })
}

/// Record the load address of every filtered image, then redirect the slots of
/// their stub tables that hold one of `targets` to `replacement`
///
/// All load addresses are recorded before the first slot is written, so the
/// filter is complete by the time a redirected call can reach it.
pub fn run_pipeline<S: ImageSource + ?Sized>(
    source: &S,
    filter: &Filter,
    targets: &TargetSet,
    variant: StubVariant,
    replacement: usize,
) -> Result<PatchReport, PatchError> {
    let images = source.loaded_images();
    let matches = resolve_modules(filter.modules(), &images);

    let mut report = PatchReport::default();
    for found in &matches {
        report
            .images
            .push(process_image(source, found, targets, variant, Some(replacement))?);
    }

    log::info!(
        "redirected {} logging slots in {} of {} filtered images",
        report.hit_count(),
        report.images.len(),
        filter.modules().len()
    );
    Ok(report)
}

/// Register the process-wide filter and redirect matching slots to the suppression trampoline
///
/// The filter is registered once per process; later calls keep the first filter and
/// its configuration, and find nothing left to patch in images already handled.
pub fn install_with<S: ImageSource + ?Sized>(
    source: &S,
    config: &FilterConfig,
    targets: &TargetSet,
    variant: StubVariant,
    forward: LogImplFn,
) -> Result<PatchReport, PatchError> {
    let filter = trampoline::register(|| Filter::new(config, forward));
    run_pipeline(source, filter, targets, variant, trampoline::trampoline_address())
}

/// Filter `os_log` calls of the configured images in the current process
///
/// Must run before any filtered image logs from another thread.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn install(config: &FilterConfig) -> Result<PatchReport, PatchError> {
    install_with(
        &crate::images::DyldImages,
        config,
        &TargetSet::os_log(),
        StubVariant::NATIVE,
        trampoline::os_log_forward(),
    )
}

/// Dry run of [`install`] against the current process
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn inspect_process(config: &FilterConfig) -> Result<PatchReport, PatchError> {
    inspect(
        &crate::images::DyldImages,
        config,
        &TargetSet::os_log(),
        StubVariant::NATIVE,
    )
}

#[cfg(all(
    debug_assertions,
    not(test),
    feature = "load-time",
    target_arch = "aarch64",
    any(target_os = "macos", target_os = "ios")
))]
mod load_time {
    use crate::filter::FilterConfig;

    /// Run by dyld after libSystem is initialized and before `main`
    #[used]
    #[link_section = "__DATA,__mod_init_func"]
    static INIT: extern "C" fn() = on_load;

    extern "C" fn on_load() {
        if let Err(err) = super::install(&FilterConfig::default()) {
            log::error!("os_log filter bootstrap failed: {}", err);
            std::process::abort();
        }
    }
}

/// Print a report in a formatted way
pub fn print_patch_report(report: &PatchReport) {
    println!("\n=== os_log Filter Report ===");
    println!("Mode: {}", if report.dry_run { "dry run" } else { "patched" });
    println!("Images matched: {}", report.images.len());

    for image in &report.images {
        println!("\nImage: {}", image.image.path);
        println!("  Fragment: {}", image.fragment);
        println!("  Load address: 0x{:x}", image.image.load_address);
        println!("  Stubs decoded: {}", image.stub_count);
        for hit in &image.hits {
            println!(
                "  Stub 0x{:x} -> slot 0x{:x} (entry point 0x{:x})",
                hit.stub_address, hit.slot_address, hit.target
            );
        }
    }

    println!("\n=== Summary ===");
    println!("Stubs decoded: {}", report.stub_count());
    if report.dry_run {
        println!("Slots that would be redirected: {}", report.hit_count());
    } else {
        println!("Slots redirected: {}", report.hit_count());
    }
}
