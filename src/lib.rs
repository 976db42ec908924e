//! # rgc - A Garbage-Collected Block Heap
//!
//! This crate provides a **first-fit free-list heap** with a **conservative
//! mark-and-sweep collector** on top. Callers allocate and free by hand, and
//! may also ask the heap to reclaim every block that no root word points at.
//!
//! ## Overview
//!
//! ```text
//!   Block chain:
//!
//!   ┌──────────────────────── region (mmap) ─────────────────────────┐
//!   │ ┌───────┬────┐ ┌───────┬────┐ ┌───────┬────┐ ┌───────┬──────┐  │
//!   │ │ hdr A │ .. │→│ hdr B │ .. │→│ hdr C │ .. │→│ hdr   │ free │  │ → next region
//!   │ └───────┴────┘ └───────┴────┘ └───────┴────┘ └───────┴──────┘  │
//!   └────────────────────────────────────────────────────────────────┘
//!
//!   allocate : first free block that fits, split off the tail
//!   free     : mark free, merge with free neighbours
//!   collect  : mark blocks named by roots, free everything else
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rgc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header and snapshots
//!   ├── os         - Page sources (mmap)
//!   ├── heap       - Heap: allocate, free, coalesce, pin
//!   ├── collect    - Root sources, mark and sweep
//!   ├── stats      - Profiler counters
//!   ├── config     - HeapConfig
//!   ├── error      - HeapError
//!   └── bench      - Timing helper
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rgc::{FreeStatus, Heap};
//!
//! let mut heap = Heap::new();
//!
//! let a = heap.allocate(8).unwrap();
//! let b = heap.allocate(8).unwrap();
//!
//! // Only `a` is a root: `b` is reclaimed.
//! heap.collect_with(&[a][..]);
//! assert!(heap.validate(a));
//! assert!(!heap.validate(b));
//!
//! // Pinned blocks cannot be freed.
//! heap.pin(a).unwrap();
//! assert_eq!(heap.free(a), Ok(FreeStatus::RefusedPinned));
//! ```
//!
//! ## Collection
//!
//! [`Heap::collect`] scans the calling thread's stack word by word. Any word
//! equal to the payload address of an allocated block keeps that block. The
//! scan is conservative and shallow:
//!
//! - **Exact addresses only**: a pointer into the middle of a payload does
//!   not keep the block alive.
//! - **No tracing**: words stored inside heap blocks are not followed.
//! - **Stack only**: registers, globals and other threads are not scanned.
//!
//! [`Heap::collect_with`] takes any [`RootSource`] instead of the stack.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Heap` is neither `Send` nor `Sync`
//! - **No compaction**: blocks never move
//! - **Memory is kept**: regions go back to the OS only when the heap drops
//! - **Unix-only**: requires `libc` and `mmap`; stack bounds need Linux
//!
//! ## Safety
//!
//! Pointers returned by the heap are raw. Reading or writing through a
//! pointer after its block was freed, swept, or the heap dropped is
//! undefined behaviour, exactly as with `free(3)`.

pub mod align;
pub mod bench;
mod block;
mod collect;
mod config;
mod error;
mod heap;
mod os;
mod stats;

pub use block::BlockInfo;
pub use collect::{CollectionReport, RootSource, StackRoots};
pub use config::HeapConfig;
pub use error::{HeapError, Result};
pub use heap::{Blocks, FreeStatus, Heap};
pub use os::{MmapPages, PageSource};
pub use stats::HeapStats;

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = block::Block::HEADER;
