//! # Sable Runtime
//!
//! The memory subsystem of the Sable language: a thread-caching, arena-
//! sharded, huge-page-backed allocator with appendable and finalizable
//! allocations, and a conservative marking collector.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SABLE RUNTIME                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   ┌──────────────┐      ┌──────────────┐     ┌──────────────┐   │
//! │   │  ThreadCache │─────▶│    Arena     │────▶│    Block     │   │
//! │   │ (per thread) │      │ (per cpu ×   │     │  descriptors │   │
//! │   └──────────────┘      │  pointerness)│     │  and heaps   │   │
//! │          │              └──────────────┘     └──────────────┘   │
//! │          ▼                      │                    │          │
//! │   ┌──────────────┐              ▼                    ▼          │
//! │   │  Extent map  │      ┌──────────────┐     ┌──────────────┐   │
//! │   │   (lookup)   │◀─────│   Extents    │     │    Bitmaps   │   │
//! │   └──────────────┘      │ (slab/large) │     │  (page/mark) │   │
//! │                         └──────────────┘     └──────────────┘   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request enters through the calling thread's [`thread_cache::ThreadCache`]
//! (or the `sable_gc_*` C exports), which classifies it by size and routes it
//! to the arena for `(cpu, pointerness)`. Arenas place allocations inside
//! 2 MiB blocks; each block's [`block::BlockDescriptor`] tracks its pages with
//! [`bitmap::Bitmap`]s and competes for allocations through a packed priority
//! key in [`block_heap::PriorityBlockHeap`]. Frees and reallocs resolve their
//! pointer through the [`emap::ExtentMap`] to the owning
//! [`extent::SlabExtent`] or [`extent::LargeExtent`].
//!
//! The arena implementation and the production extent map live with the
//! embedder; this crate defines their seams ([`arena::Arena`],
//! [`emap::ExtentMap`]) and everything on this side of them.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::len_without_is_empty)]

pub mod arena;
pub mod bitmap;
pub mod block;
pub mod block_heap;
pub mod config;
pub mod emap;
pub mod exports;
pub mod extent;
pub mod platform;
pub mod size_class;
pub mod thread_cache;

pub use arena::Arena;
pub use bitmap::{Bitmap, PageBitmap};
pub use block::{BlockDescriptor, PriorityKey};
pub use block_heap::{BlockRing, PriorityBlockHeap, UnusedBlockHeap};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use emap::ExtentMap;
pub use extent::{Finalizer, LargeExtent, PageDescriptor, SlabExtent};
pub use thread_cache::{RootRange, ThreadCache};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
