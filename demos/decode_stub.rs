use quietlog::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Quietlog - Stub Decoding Example");

    // Example 1: the simulator form, adrp/ldr/br
    println!("\n=== Example 1: Plain stub ===");
    let plain = [0xf000_0010, 0xf940_0e10, 0xd61f_0200];
    let slot = resolve_slot(&plain, 0x1000_2000, StubVariant::Plain)?;
    println!("Stub at 0x10002000 loads from 0x{:x}", slot);

    // Example 2: the pointer-authenticated form, adrp/add/ldr/braa
    println!("\n=== Example 2: Authenticated stub ===");
    let authenticated = [0xf000_0011, 0x9100_6231, 0xf940_0230, 0xd71f_0a11];
    let decoded = StubVariant::Authenticated.decode(&authenticated)?;
    println!("Page delta: {:#x}", decoded.page_delta());
    println!("Page offset: 0x{:x}", decoded.byte_offset());
    println!("Stub at 0x10002000 loads from 0x{:x}", decoded.slot_address(0x1000_2000));

    // Example 3: a table with a record the decoder refuses
    println!("\n=== Example 3: Unrecognized record ===");
    let words = [
        0xf000_0011, 0x9100_6231, 0xf940_0230, 0xd71f_0a11,
        0xf000_0011, 0x9100_6231, 0xf940_0230, 0xd61f_0200,
    ];
    let table = StubTable::new(&words, 0x1000_2000, StubVariant::Authenticated)?;
    for slot in table.slots() {
        match slot {
            Ok(slot) => println!("  stub 0x{:x} -> slot 0x{:x}", slot.stub_address, slot.address),
            Err(e) => println!("  ❌ {}", e),
        }
    }

    println!("\n✅ Decoding examples completed!");
    Ok(())
}
