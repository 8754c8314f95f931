use quietlog::*;
use std::env;

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X").replace('_', "");
    u64::from_str_radix(&digits, 16).ok()
}

fn print_usage(program: &str) {
    println!("Usage: {} [--patch] [fragment...]", program);
    println!("       {} decode <stub_address> <word> <word> <word> [word]", program);
    println!("Example: {} /System/Library/Frameworks/CoreVideo.framework", program);
    println!("Example: {} decode 0x10002000 0xf0000011 0x91006231 0xf9400230 0xd71f0a11", program);
}

fn decode_command(program: &str, args: &[String]) {
    let Some((address, words)) = args.split_first() else {
        print_usage(program);
        return;
    };

    let Some(address) = parse_hex(address) else {
        println!("❌ Invalid stub address: {}", address);
        return;
    };

    let mut parsed = Vec::new();
    for word in words {
        match parse_hex(word).and_then(|w| u32::try_from(w).ok()) {
            Some(w) => parsed.push(w),
            None => {
                println!("❌ Invalid instruction word: {}", word);
                return;
            }
        }
    }

    let variant = match parsed.len() {
        3 => StubVariant::Plain,
        4 => StubVariant::Authenticated,
        n => {
            println!("❌ A stub record has 3 (plain) or 4 (authenticated) words, got {}", n);
            return;
        }
    };

    match variant.decode(&parsed) {
        Ok(decoded) => {
            println!("Variant: {:?} ({})", variant, variant.section_name());
            println!("  Page fields: immhi=0x{:x} immlo=0x{:x}", decoded.page_high, decoded.page_low);
            println!("  Page delta: {:#x}", decoded.page_delta());
            println!("  Page offset: 0x{:x} (raw 0x{:x})", decoded.byte_offset(), decoded.page_offset);
            println!("  Pointer slot: 0x{:x}", decoded.slot_address(address as usize));
        }
        Err(e) => println!("❌ Not a recognized stub: {}", e),
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn filter_command(patch: bool, config: FilterConfig) {
    println!("Filtered fragments:");
    for fragment in config.modules() {
        println!("  - {}", fragment);
    }

    let result = if patch { install(&config) } else { inspect_process(&config) };
    match result {
        Ok(report) => {
            print_patch_report(&report);
            if report.images.is_empty() {
                println!("\nNo loaded image matches the configured fragments");
            }
        }
        Err(e) => println!("❌ Failed: {}", e),
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn filter_command(_patch: bool, _config: FilterConfig) {
    println!("❌ Image introspection needs dyld; only `decode` is available on this platform");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("quietlog");
    let rest = args.get(1..).unwrap_or_default();

    match rest.first().map(String::as_str) {
        Some("--version") | Some("-v") => {
            println!("quietlog v{}", VERSION);
        }
        Some("--help") | Some("-h") => print_usage(program),
        Some("decode") => decode_command(program, &rest[1..]),
        _ => {
            let patch = rest.iter().any(|arg| arg == "--patch");
            let fragments: Vec<&String> = rest.iter().filter(|arg| !arg.starts_with("--")).collect();
            let config = if fragments.is_empty() {
                FilterConfig::default()
            } else {
                fragments
                    .into_iter()
                    .fold(FilterConfig::empty(), |config, fragment| config.with_module(fragment.as_str()))
            };
            filter_command(patch, config);
        }
    }
}
