//! The extent map: page-aligned address → page descriptor.
//!
//! Production embedders provide the map (the reference deployment uses a
//! radix tree keyed on the page number); the core only consumes it as a
//! lookup oracle, through a process-wide registration that thread caches
//! bind lazily.
//!
//! [`PageTable`] is the portable locked implementation used by the test
//! suite and by embedders that do not care about lookup latency.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::extent::PageDescriptor;
use crate::size_class::PAGE_SIZE;

/// Address → descriptor oracle. Implementations are shared process-wide.
pub trait ExtentMap: Send + Sync {
    /// Resolve the page containing `address`.
    ///
    /// Returns [`PageDescriptor::unmapped`] when no arena maps the page.
    /// `address` does not need to be page-aligned; lookups are
    /// page-granular.
    fn lookup(&self, address: usize) -> PageDescriptor;
}

static EXTENT_MAP: OnceLock<&'static dyn ExtentMap> = OnceLock::new();

/// Register the process-wide extent map. The first registration wins;
/// returns false if one was already installed.
pub fn install(map: &'static dyn ExtentMap) -> bool {
    EXTENT_MAP.set(map).is_ok()
}

/// The process-wide extent map, if one has been installed.
pub fn get() -> Option<&'static dyn ExtentMap> {
    EXTENT_MAP.get().copied()
}

/// Hash-based reference implementation of [`ExtentMap`].
#[derive(Default)]
pub struct PageTable {
    pages: RwLock<HashMap<usize, PageDescriptor>>,
}

impl PageTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `page_count` pages starting at `address` to `descriptor`.
    pub fn insert(&self, address: usize, page_count: usize, descriptor: PageDescriptor) {
        debug_assert!(address % PAGE_SIZE == 0);
        let mut pages = self.pages.write();
        for i in 0..page_count {
            pages.insert(address + i * PAGE_SIZE, descriptor);
        }
    }

    /// Drop the mapping for `page_count` pages starting at `address`.
    pub fn remove(&self, address: usize, page_count: usize) {
        debug_assert!(address % PAGE_SIZE == 0);
        let mut pages = self.pages.write();
        for i in 0..page_count {
            pages.remove(&(address + i * PAGE_SIZE));
        }
    }
}

impl ExtentMap for PageTable {
    fn lookup(&self, address: usize) -> PageDescriptor {
        let page = address & !(PAGE_SIZE - 1);
        self.pages
            .read()
            .get(&page)
            .copied()
            .unwrap_or_else(PageDescriptor::unmapped)
    }
}
