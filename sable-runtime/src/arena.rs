//! The arena seam.
//!
//! An arena owns the blocks serving one `(cpu, pointerness)` class and is
//! shared by every thread the scheduler lands on that CPU. The core treats
//! it as an abstract allocator: implementations live with the embedder (and
//! the test suite), which keeps the OS page-backing layer out of this crate.
//!
//! Arena indices pack the partition: `index = (cpu << 1) | contains_pointers`.
//! The low bit separates pointer-bearing from pointer-free storage so the
//! collector can restrict scanning to pointer arenas. Correctness does not
//! depend on reading the "right" CPU, only on the partitioning staying
//! consistent.

use std::ptr::NonNull;
use std::sync::OnceLock;

use tracing::debug;

use crate::emap::ExtentMap;
use crate::extent::{LargeExtent, PageDescriptor};

/// Abstract allocator backing one `(cpu, pointerness)` class.
pub trait Arena: Send + Sync {
    /// Allocate `size` bytes (already rounded to a size class) from a slab.
    /// Returns null on OOM.
    fn alloc_small(&self, emap: &dyn ExtentMap, size: usize) -> *mut u8;

    /// Allocate `size` bytes (already page-aligned) as a large extent,
    /// zeroed when `zero` is set. Returns null on OOM.
    fn alloc_large(&self, emap: &dyn ExtentMap, size: usize, zero: bool) -> *mut u8;

    /// Free an allocation previously returned by this arena.
    fn free(&self, emap: &dyn ExtentMap, descriptor: PageDescriptor, ptr: *mut u8);

    /// Try to grow or shrink a large extent in place to `new_size`
    /// (page-aligned). Returns true on success; on failure the extent is
    /// left unchanged.
    fn resize_large(&self, emap: &dyn ExtentMap, extent: NonNull<LargeExtent>, new_size: usize)
    -> bool;
}

/// Builds the arena for an index the first time a thread lands on it.
pub type ArenaFactory = fn(index: u32) -> &'static dyn Arena;

/// Upper bound on arena slots; CPU ids wrap into it. Even, so wrapping
/// preserves the pointerness bit.
pub const MAX_ARENAS: usize = 256;

static FACTORY: OnceLock<ArenaFactory> = OnceLock::new();
static ARENAS: [OnceLock<&'static dyn Arena>; MAX_ARENAS] =
    [const { OnceLock::new() }; MAX_ARENAS];

/// Install the process-wide arena factory. The first installation wins;
/// returns false if one was already present.
pub fn install_factory(factory: ArenaFactory) -> bool {
    FACTORY.set(factory).is_ok()
}

/// The arena for `index`, creating it through the installed factory on
/// first use. Returns `None` when no factory has been installed.
pub fn get_or_initialize(index: u32) -> Option<&'static dyn Arena> {
    let slot = &ARENAS[index as usize % MAX_ARENAS];
    if let Some(arena) = slot.get() {
        return Some(*arena);
    }

    let factory = FACTORY.get()?;
    Some(*slot.get_or_init(|| {
        debug!(index, "initializing arena");
        factory(index)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_wrapping_preserves_pointerness() {
        // A huge cpu id must still land on a slot with the same low bit.
        let index = (1000u32 << 1) | 1;
        assert_eq!((index as usize % MAX_ARENAS) & 1, 1);
        let index = 1000u32 << 1;
        assert_eq!((index as usize % MAX_ARENAS) & 1, 0);
    }
}
