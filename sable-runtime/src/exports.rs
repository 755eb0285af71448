//! C ABI entry points.
//!
//! Code generated by the Sable compiler calls the runtime through these
//! symbols; they are thin shims over the calling thread's [`ThreadCache`].

use crate::extent::Finalizer;
use crate::thread_cache::{self, RootRange};

/// Allocate `size` bytes. Returns null for invalid sizes and on OOM.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_alloc(size: usize, contains_pointers: bool) -> *mut u8 {
    thread_cache::with(|tc| tc.alloc(size, contains_pointers))
}

/// Allocate an appendable allocation, optionally carrying a finalizer.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_alloc_appendable(
    size: usize,
    contains_pointers: bool,
    finalizer: Option<Finalizer>,
) -> *mut u8 {
    thread_cache::with(|tc| tc.alloc_appendable(size, contains_pointers, finalizer))
}

/// Free an allocation. Null is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_free(ptr: *mut u8) {
    thread_cache::with(|tc| tc.free(ptr));
}

/// Finalize (if applicable) and free an allocation. Null is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_destroy(ptr: *mut u8) {
    thread_cache::with(|tc| tc.destroy(ptr));
}

/// Resize an allocation. Returns the (possibly moved) allocation, or null
/// when `size` is 0 or unallocatable.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_realloc(ptr: *mut u8, size: usize, contains_pointers: bool) -> *mut u8 {
    thread_cache::with(|tc| tc.realloc(ptr, size, contains_pointers))
}

/// Spare capacity behind the slice `[ptr, ptr + len)`.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_capacity(ptr: *const u8, len: usize) -> usize {
    thread_cache::with(|tc| tc.get_capacity(ptr, len))
}

/// Grow the slice `[ptr, ptr + len)` by `delta` bytes in place.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_extend(ptr: *const u8, len: usize, delta: usize) -> bool {
    thread_cache::with(|tc| tc.extend(ptr, len, delta))
}

/// Register `[start, start + length)` as a conservative root range.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_add_roots(start: *const u8, length: usize) {
    if start.is_null() {
        return;
    }
    let start = start as usize;
    thread_cache::with(|tc| {
        tc.add_roots(RootRange {
            start,
            end: start + length,
        })
    });
}

/// Run a marking cycle from the calling thread's roots. Returns whether any
/// previously unmarked allocation was found.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_collect() -> bool {
    thread_cache::with(|tc| tc.collect())
}

/// Declare the calling thread's stack bottom (its highest stack address).
/// Threads the runtime did not create call this once at startup; pass null
/// to keep the auto-detected value.
#[unsafe(no_mangle)]
pub extern "C" fn sable_gc_thread_init(stack_bottom: *const u8) {
    if stack_bottom.is_null() {
        return;
    }
    thread_cache::with(|tc| tc.set_stack_bottom(stack_bottom as usize));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_cache::tests::env;
    use std::ptr;

    #[test]
    fn test_null_is_harmless() {
        env();
        sable_gc_free(ptr::null_mut());
        sable_gc_destroy(ptr::null_mut());
        sable_gc_add_roots(ptr::null(), 64);
        sable_gc_thread_init(ptr::null());
        assert_eq!(sable_gc_capacity(ptr::null(), 0), 0);
        assert!(sable_gc_extend(ptr::null(), 0, 0));
    }

    #[test]
    fn test_alloc_roundtrip() {
        env();
        let p = sable_gc_alloc(100, false);
        assert!(!p.is_null());
        let p = sable_gc_realloc(p, 200, false);
        assert!(!p.is_null());
        sable_gc_free(p);

        assert!(sable_gc_alloc(0, false).is_null());
    }
}
