#[cfg(any(target_os = "macos", target_os = "ios"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use quietlog::*;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    println!("Quietlog - Install Example");

    let config = FilterConfig::default();

    // Step 1: see what would change
    println!("\n=== Step 1: Dry Run ===");
    let preview = inspect_process(&config)?;
    print_patch_report(&preview);

    // Step 2: redirect the slots
    println!("\n=== Step 2: Install ===");
    let report = install(&config)?;
    print_patch_report(&report);

    // Step 3: a second install has nothing left to do
    println!("\n=== Step 3: Reinstall ===");
    let again = install(&config)?;
    println!("Slots redirected on reinstall: {}", again.hit_count());

    println!("\n✅ Install example completed!");
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn main() {
    println!("This example needs dyld (macOS or iOS)");
}
