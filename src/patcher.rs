use std::mem::size_of;

use region::Protection;

use crate::filter::{PatchError, SlotHit};
use crate::scanner::PointerSlot;

/// Entry points whose pointer slots get redirected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    entry_points: Vec<usize>,
}

impl TargetSet {
    pub fn new(entry_points: impl IntoIterator<Item = usize>) -> Self {
        Self {
            entry_points: entry_points.into_iter().collect(),
        }
    }

    /// The `os_log` implementation entry points, bound by the dynamic linker
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub fn os_log() -> Self {
        use crate::trampoline::os_log;

        Self::new([
            os_log::_os_log_impl as usize,
            os_log::_os_log_debug_impl as usize,
            os_log::_os_log_error_impl as usize,
            os_log::_os_log_fault_impl as usize,
        ])
    }

    pub fn entry_points(&self) -> &[usize] {
        &self.entry_points
    }

    /// Identity comparison against the known entry points
    pub fn contains(&self, value: usize) -> bool {
        value != 0 && self.entry_points.contains(&value)
    }
}

/// Slots of `slots` that currently hold one of `targets`
///
/// # Safety
///
/// Every slot address must be mapped, readable and pointer-aligned.
pub unsafe fn matching_slots(slots: &[PointerSlot], targets: &TargetSet) -> Vec<SlotHit> {
    slots
        .iter()
        .filter_map(|slot| {
            let target = slot.load();
            targets.contains(target).then_some(SlotHit {
                stub_address: slot.stub_address,
                slot_address: slot.address,
                target,
            })
        })
        .collect()
}

/// Point `slot` at `replacement` if it currently holds one of `targets`
///
/// Write access is granted for the page(s) covering the slot only and the previous
/// protection is restored when the guard drops, whether or not the write completes.
/// Returns the hit when the slot was rewritten, `None` when it held anything else;
/// a slot that already holds `replacement` is therefore left alone.
///
/// # Safety
///
/// The slot address must be mapped, readable and pointer-aligned, and no other
/// thread may be calling through it while it is rewritten.
pub unsafe fn patch_slot(
    slot: PointerSlot,
    targets: &TargetSet,
    replacement: usize,
) -> Result<Option<SlotHit>, PatchError> {
    let target = slot.load();
    if !targets.contains(target) {
        return Ok(None);
    }

    let pointer = slot.address as *mut usize;
    let _guard = region::protect_with_handle(pointer as *const usize, size_of::<usize>(), Protection::READ_WRITE)
        .map_err(|source| PatchError::Protection {
            address: slot.address,
            source,
        })?;
    std::ptr::write_volatile(pointer, replacement);

    Ok(Some(SlotHit {
        stub_address: slot.stub_address,
        slot_address: slot.address,
        target,
    }))
}

/// Patch every matching slot, stopping at the first protection failure
///
/// # Safety
///
/// Same requirements as [`patch_slot`] for every slot.
pub unsafe fn patch_slots(
    slots: &[PointerSlot],
    targets: &TargetSet,
    replacement: usize,
) -> Result<Vec<SlotHit>, PatchError> {
    let mut hits = Vec::new();
    for &slot in slots {
        if let Some(hit) = patch_slot(slot, targets, replacement)? {
            hits.push(hit);
        }
    }
    Ok(hits)
}
