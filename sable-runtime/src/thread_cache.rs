//! The per-thread allocation front end.
//!
//! Every mutator thread owns a [`ThreadCache`]: it classifies requests into
//! small and large, routes them to the arena for `(cpu, pointerness)`,
//! implements realloc and the appendable-slice contract on top of extent
//! metadata, dispatches finalizers, and drives conservative root scanning
//! for the collector.
//!
//! The cache is reached through [`with`], which hands out a mutable borrow
//! of the calling thread's instance. Finalizers run on the destroying
//! thread and must not re-enter the cache; the `RefCell` turns a violation
//! into a deterministic panic instead of corruption.

use std::cell::RefCell;
use std::ptr;

use tracing::debug;

use crate::arena::{self, Arena};
use crate::config;
use crate::emap::{self, ExtentMap};
use crate::extent::{ExtentKind, Finalizer, SlabAllocInfo};
use crate::platform::{cpu_id, push_registers, read_frame_pointer, unlikely};
use crate::size_class::{
    ADDRESS_SPACE, PAGE_SIZE, POINTER_SIZE, QUANTUM, align_up, alloc_size, class_for_size,
    class_supports_metadata, is_allocatable_size, is_large_size, is_small_size, size_from_class,
};

/// A half-open `[start, end)` range of addresses scanned conservatively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootRange {
    /// First address of the range.
    pub start: usize,
    /// One past the last address of the range.
    pub end: usize,
}

impl RootRange {
    /// The address range covered by a slice.
    pub fn of<T>(slice: &[T]) -> Self {
        let start = slice.as_ptr() as usize;
        Self {
            start,
            end: start + std::mem::size_of_val(slice),
        }
    }
}

/// Per-thread allocator state.
pub struct ThreadCache {
    /// Lazily bound process-wide extent map.
    emap: Option<&'static dyn ExtentMap>,
    /// Highest stack address of this thread; 0 when unknown.
    stack_bottom: usize,
    /// Mutator-registered conservative root ranges.
    roots: Vec<RootRange>,
}

thread_local! {
    static THREAD_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::new());
}

/// Run `f` with the calling thread's cache.
pub fn with<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> R {
    THREAD_CACHE.with(|cache| f(&mut cache.borrow_mut()))
}

/// The arena serving this CPU for the given pointerness.
fn arena_for(contains_pointers: bool) -> Option<&'static dyn Arena> {
    let shards = config::get().arena_shards;
    let cpu = cpu_id() % (shards / 2);
    arena::get_or_initialize(((cpu as u32) << 1) | contains_pointers as u32)
}

impl ThreadCache {
    /// A cache for the calling thread, with its stack bottom auto-detected
    /// where the platform allows.
    pub fn new() -> Self {
        Self {
            emap: None,
            stack_bottom: crate::platform::stack_bottom().unwrap_or(0),
            roots: Vec::new(),
        }
    }

    fn bind_emap(&mut self) -> Option<&'static dyn ExtentMap> {
        if self.emap.is_none() {
            self.emap = emap::get();
        }
        self.emap
    }

    /// Override the detected stack bottom (the highest scanned address).
    pub fn set_stack_bottom(&mut self, address: usize) {
        self.stack_bottom = address;
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `size` bytes. Returns null for unallocatable sizes and on
    /// OOM.
    pub fn alloc(&mut self, size: usize, contains_pointers: bool) -> *mut u8 {
        if unlikely(!is_allocatable_size(size)) {
            return ptr::null_mut();
        }
        let Some(emap) = self.bind_emap() else {
            return ptr::null_mut();
        };
        let Some(arena) = arena_for(contains_pointers) else {
            return ptr::null_mut();
        };

        if is_small_size(size) {
            arena.alloc_small(emap, alloc_size(size))
        } else {
            arena.alloc_large(emap, alloc_size(size), false)
        }
    }

    /// Allocate an appendable allocation of `size` used bytes, reserving
    /// room for `finalizer` after the payload when one is supplied.
    pub fn alloc_appendable(
        &mut self,
        size: usize,
        contains_pointers: bool,
        finalizer: Option<Finalizer>,
    ) -> *mut u8 {
        if unlikely(!is_allocatable_size(size)) {
            return ptr::null_mut();
        }
        let tail = if finalizer.is_some() { POINTER_SIZE } else { 0 };
        let request = align_up(size + tail, 2 * QUANTUM);
        if unlikely(!is_allocatable_size(request)) {
            return ptr::null_mut();
        }
        let Some(emap) = self.bind_emap() else {
            return ptr::null_mut();
        };
        let Some(arena) = arena_for(contains_pointers) else {
            return ptr::null_mut();
        };

        let asize = alloc_size(request);
        if is_small_size(asize) {
            assert!(
                class_supports_metadata(class_for_size(asize)),
                "appendable allocation landed in a class without metadata support"
            );
            let ptr = arena.alloc_small(emap, asize);
            if ptr.is_null() {
                return ptr;
            }
            let ExtentKind::Slab(extent) = emap.lookup(ptr as usize).kind() else {
                unreachable!("small allocation not mapped to a slab");
            };
            let mut si = unsafe { SlabAllocInfo::new(ptr, extent) };
            si.set_finalizer(finalizer);
            let fits = si.set_used_capacity(size);
            debug_assert!(fits, "used capacity does not fit the chosen slot");
            ptr
        } else {
            let ptr = arena.alloc_large(emap, asize, false);
            if ptr.is_null() {
                return ptr;
            }
            let ExtentKind::Large(extent) = emap.lookup(ptr as usize).kind() else {
                unreachable!("large allocation not mapped to a large extent");
            };
            unsafe {
                let e = &mut *extent.as_ptr();
                e.set_finalizer(finalizer);
                e.set_used_capacity(size);
            }
            ptr
        }
    }

    // ========================================================================
    // Deallocation
    // ========================================================================

    /// Free an allocation. `free(null)` is a no-op.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(emap) = self.bind_emap() else {
            return;
        };
        let descriptor = emap.lookup(ptr as usize);
        debug_assert!(descriptor.is_mapped(), "free of unmapped pointer");
        if let Some(arena) = arena::get_or_initialize(descriptor.arena_index()) {
            arena.free(emap, descriptor, ptr);
        }
    }

    /// Run the allocation's finalizer, if any, then free it.
    ///
    /// `ptr` must be the allocation's base address: destroying through an
    /// interior pointer is a contract violation.
    pub fn destroy(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(emap) = self.bind_emap() else {
            return;
        };
        let descriptor = emap.lookup(ptr as usize);
        match descriptor.kind() {
            ExtentKind::Unmapped => {
                debug_assert!(false, "destroy of unmapped pointer");
            }
            ExtentKind::Slab(extent) => {
                let si = unsafe { SlabAllocInfo::new(ptr, extent) };
                assert!(
                    ptr as usize == si.address(),
                    "destroy through an interior pointer"
                );
                if let Some(finalize) = si.finalizer() {
                    unsafe { finalize(ptr, si.used_capacity()) };
                }
                if let Some(arena) = arena::get_or_initialize(descriptor.arena_index()) {
                    arena.free(emap, descriptor, ptr);
                }
            }
            ExtentKind::Large(extent) => {
                let (address, used) = {
                    let e = unsafe { extent.as_ref() };
                    (e.address(), e.used_capacity())
                };
                assert!(ptr as usize == address, "destroy through an interior pointer");
                if let Some(finalize) = unsafe { extent.as_ref() }.finalizer() {
                    unsafe { finalize(ptr, used) };
                }
                if let Some(arena) = arena::get_or_initialize(descriptor.arena_index()) {
                    arena.free(emap, descriptor, ptr);
                }
            }
        }
    }

    // ========================================================================
    // Reallocation
    // ========================================================================

    /// Resize an allocation, in place when the geometry allows it.
    pub fn realloc(&mut self, ptr: *mut u8, size: usize, contains_pointers: bool) -> *mut u8 {
        if size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }
        if unlikely(!is_allocatable_size(size)) {
            return ptr::null_mut();
        }
        if ptr.is_null() {
            return self.alloc(size, contains_pointers);
        }
        let Some(emap) = self.bind_emap() else {
            return ptr::null_mut();
        };
        let descriptor = emap.lookup(ptr as usize);
        debug_assert!(descriptor.is_mapped(), "realloc of unmapped pointer");

        let copy_size = match descriptor.kind() {
            ExtentKind::Unmapped => return ptr::null_mut(),
            ExtentKind::Slab(extent) => {
                let mut si = unsafe { SlabAllocInfo::new(ptr, extent) };
                debug_assert!(ptr as usize == si.address());
                let old_class = unsafe { extent.as_ref() }.size_class();
                if is_small_size(size)
                    && class_for_size(size) == old_class
                    && descriptor.contains_pointers() == contains_pointers
                {
                    // Same slot: in place, unless the metadata trailer can no
                    // longer accommodate the new capacity.
                    if !si.supports_metadata() || si.set_used_capacity(size) {
                        return ptr;
                    }
                }
                size.min(size_from_class(old_class))
            }
            ExtentKind::Large(extent) => {
                let (address, extent_size, used) = {
                    let e = unsafe { extent.as_ref() };
                    (e.address(), e.size(), e.used_capacity())
                };
                debug_assert!(ptr as usize == address);
                if is_large_size(size) && descriptor.contains_pointers() == contains_pointers {
                    let target = align_up(size, PAGE_SIZE);
                    let in_place = target == extent_size
                        || arena::get_or_initialize(descriptor.arena_index())
                            .is_some_and(|a| a.resize_large(emap, extent, target));
                    if in_place {
                        unsafe { (*extent.as_ptr()).set_used_capacity(size) };
                        return ptr;
                    }
                }
                let payload = if used > 0 { used } else { extent_size };
                size.min(payload)
            }
        };

        // Move path: fresh allocation, copy, retire the old one. The old
        // allocation survives an OOM here.
        let new_ptr = self.alloc(size, contains_pointers);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, copy_size) };
        if let ExtentKind::Large(extent) = emap.lookup(new_ptr as usize).kind() {
            unsafe { (*extent.as_ptr()).set_used_capacity(size) };
        }
        self.free(ptr);
        new_ptr
    }

    // ========================================================================
    // Appendable slices
    // ========================================================================

    /// Spare capacity behind the slice `[ptr, ptr + len)`.
    ///
    /// Non-zero only when the slice's end coincides with the allocation's
    /// used capacity: only the live tail of an appendable array may grow,
    /// which keeps aliasing slices from clobbering each other.
    pub fn get_capacity(&mut self, ptr: *const u8, len: usize) -> usize {
        let Some(emap) = self.bind_emap() else {
            return 0;
        };
        if ptr.is_null() {
            return 0;
        }
        match emap.lookup(ptr as usize).kind() {
            ExtentKind::Unmapped => 0,
            ExtentKind::Slab(extent) => {
                let si = unsafe { SlabAllocInfo::new(ptr as *mut u8, extent) };
                let start = ptr as usize - si.address();
                let stop = start + len;
                if stop > 0 && stop == si.used_capacity() {
                    si.storage_size() - start
                } else {
                    0
                }
            }
            ExtentKind::Large(extent) => {
                let e = unsafe { extent.as_ref() };
                let start = ptr as usize - e.address();
                let stop = start + len;
                if stop > 0 && stop == e.used_capacity() {
                    e.size() - start
                } else {
                    0
                }
            }
        }
    }

    /// Grow the slice `[ptr, ptr + len)` by `delta` bytes in place.
    ///
    /// `delta == 0` always succeeds, even on non-appendable memory or null.
    /// Otherwise the slice must have capacity, and a large allocation that
    /// outgrows its extent is resized in place through the arena.
    pub fn extend(&mut self, ptr: *const u8, len: usize, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        let Some(emap) = self.bind_emap() else {
            return false;
        };
        if ptr.is_null() {
            return false;
        }
        match emap.lookup(ptr as usize).kind() {
            ExtentKind::Unmapped => false,
            ExtentKind::Slab(extent) => {
                let mut si = unsafe { SlabAllocInfo::new(ptr as *mut u8, extent) };
                let start = ptr as usize - si.address();
                let stop = start + len;
                let used = si.used_capacity();
                if stop == 0 || stop != used || start >= si.storage_size() {
                    return false;
                }
                si.set_used_capacity(used + delta)
            }
            ExtentKind::Large(extent) => {
                let (address, extent_size, used) = {
                    let e = unsafe { extent.as_ref() };
                    (e.address(), e.size(), e.used_capacity())
                };
                let start = ptr as usize - address;
                let stop = start + len;
                if stop == 0 || stop != used || start >= extent_size {
                    return false;
                }
                let new_used = used + delta;
                if new_used > extent_size {
                    let target = align_up(new_used, PAGE_SIZE);
                    let arena_index = emap.lookup(ptr as usize).arena_index();
                    let grown = arena::get_or_initialize(arena_index)
                        .is_some_and(|a| a.resize_large(emap, extent, target));
                    if !grown {
                        return false;
                    }
                }
                unsafe { (*extent.as_ptr()).set_used_capacity(new_used) };
                true
            }
        }
    }

    // ========================================================================
    // Roots and collection
    // ========================================================================

    /// Register a conservative root range.
    pub fn add_roots(&mut self, range: RootRange) {
        self.roots.push(range);
    }

    /// Scan one address range, marking every allocation it references.
    /// Returns true if any previously unmarked allocation was found.
    pub fn scan(&mut self, range: RootRange) -> bool {
        let Some(emap) = self.bind_emap() else {
            return false;
        };
        let mut worklist = Vec::new();
        scan_words(emap, range, &mut worklist)
    }

    /// Run a marking cycle from this thread's roots.
    ///
    /// Spills callee-saved registers, conservatively scans the stack (unless
    /// configured off) and every registered root range, then traces
    /// pointer-bearing allocations to a fixpoint. Sweeping unmarked extents
    /// is the arenas' side of the bargain; the caller must have parked every
    /// other mutator at a safe point first.
    pub fn collect(&mut self) -> bool {
        let Some(emap) = self.bind_emap() else {
            return false;
        };
        debug!(roots = self.roots.len(), "collection cycle: marking");

        let stack_bottom = self.stack_bottom;
        let roots = self.roots.clone();
        let mut worklist: Vec<RootRange> = Vec::new();
        let mut found = false;

        found |= push_registers(|| {
            if !config::get().stack_scan || stack_bottom == 0 {
                return false;
            }
            let frame = read_frame_pointer() as usize;
            if frame >= stack_bottom {
                return false;
            }
            scan_words(
                emap,
                RootRange {
                    start: frame,
                    end: stack_bottom,
                },
                &mut worklist,
            )
        });

        for root in roots {
            found |= scan_words(emap, root, &mut worklist);
        }
        while let Some(range) = worklist.pop() {
            found |= scan_words(emap, range, &mut worklist);
        }
        found
    }
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Conservative word scan: every properly aligned word in `range` that
/// passes the pointer-likeness filter is looked up; hits mark their
/// allocation, and newly marked pointer-bearing allocations queue their
/// payload for tracing.
fn scan_words(emap: &dyn ExtentMap, range: RootRange, worklist: &mut Vec<RootRange>) -> bool {
    let mut found = false;
    let mut cursor = align_up(range.start, POINTER_SIZE);
    while cursor + POINTER_SIZE <= range.end {
        let word = unsafe { (cursor as *const usize).read() };
        cursor += POINTER_SIZE;

        // Anything with bits above the address space cannot be a pointer.
        if word == 0 || word & !(ADDRESS_SPACE - 1) != 0 {
            continue;
        }

        let descriptor = emap.lookup(word);
        match descriptor.kind() {
            ExtentKind::Unmapped => {}
            ExtentKind::Slab(extent) => {
                let e = unsafe { extent.as_ref() };
                let index = (word - e.address()) / e.slot_size();
                // Mapped pages can extend past the last whole slot.
                if index >= e.slot_count() {
                    continue;
                }
                if !e.mark(index) {
                    found = true;
                    if descriptor.contains_pointers() {
                        let base = e.slot_address(index);
                        worklist.push(RootRange {
                            start: base,
                            end: base + e.slot_size(),
                        });
                    }
                }
            }
            ExtentKind::Large(extent) => {
                let e = unsafe { extent.as_ref() };
                if !e.mark() {
                    found = true;
                    if descriptor.contains_pointers() {
                        worklist.push(RootRange {
                            start: e.address(),
                            end: e.address() + e.size(),
                        });
                    }
                }
            }
        }
    }
    found
}
