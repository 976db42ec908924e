use std::{fmt, mem, ptr::NonNull};

use crate::align;

/// Header placed in front of every payload handed out by the heap.
///
/// ```text
///   ┌──────────────────────────────┬───────────────────────────┐
///   │ Block                        │ payload                   │
///   │ size | next | flags          │ size - HEADER bytes       │
///   └──────────────────────────────┴───────────────────────────┘
///   ▲                              ▲
///   block address                  Block::payload(block)
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct Block {
  /// Header plus payload, in bytes.
  pub size: usize,
  /// Next block in chain order.
  pub next: *mut Block,
  pub free: bool,
  pub marked: bool,
  pub pinned: bool,
}

impl Block {
  /// Size of the header, rounded so payloads stay word aligned.
  pub const HEADER: usize = align!(mem::size_of::<Block>());

  pub fn new(
    size: usize,
    free: bool,
    next: *mut Block,
  ) -> Self {
    Self {
      size,
      next,
      free,
      marked: false,
      pinned: false,
    }
  }

  /// Writes a fresh header at `at`.
  ///
  /// # Safety
  ///
  /// `at` must be word aligned and point to at least `size` writable bytes.
  pub unsafe fn write(
    at: NonNull<u8>,
    size: usize,
    free: bool,
    next: *mut Block,
  ) -> NonNull<Block> {
    let block = at.cast::<Block>();
    unsafe { block.as_ptr().write(Block::new(size, free, next)) };
    block
  }

  /// Payload address of `block`.
  pub fn payload(block: NonNull<Block>) -> NonNull<u8> {
    // SAFETY: every block spans at least HEADER bytes, so the offset stays
    // inside (or one past) the same allocation.
    unsafe { block.cast::<u8>().add(Self::HEADER) }
  }

  /// Header address for a payload address. The result is only a candidate:
  /// callers confirm it against the chain before dereferencing.
  pub fn from_payload(payload: NonNull<u8>) -> Option<NonNull<Block>> {
    (payload.as_ptr() as usize)
      .checked_sub(Self::HEADER)
      .and_then(|addr| NonNull::new(addr as *mut Block))
  }

  pub fn capacity(&self) -> usize {
    self.size - Self::HEADER
  }

  pub fn addr(&self) -> usize {
    self as *const Block as usize
  }

  /// Address one past the last payload byte.
  pub fn end(&self) -> usize {
    self.addr() + self.size
  }

  /// Whether `other` starts exactly where this block ends.
  pub fn is_adjacent(
    &self,
    other: &Block,
  ) -> bool {
    self.end() == other.addr()
  }

  /// Returns the block to the free state, clearing its mark and pin.
  pub fn release(&mut self) {
    self.free = true;
    self.marked = false;
    self.pinned = false;
  }

  pub fn info(&self) -> BlockInfo {
    BlockInfo {
      addr: self.addr(),
      payload: self.addr() + Self::HEADER,
      size: self.size,
      free: self.free,
      marked: self.marked,
      pinned: self.pinned,
    }
  }
}

/// Copy of a block's header, detached from the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: usize,
  pub payload: usize,
  pub size: usize,
  pub free: bool,
  pub marked: bool,
  pub pinned: bool,
}

impl BlockInfo {
  pub fn capacity(&self) -> usize {
    self.size - Block::HEADER
  }

  /// Payload byte range, `[payload, addr + size)`.
  pub fn payload_range(&self) -> std::ops::Range<usize> {
    self.payload..self.addr + self.size
  }
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "Block at {:#x} | Size: {} | Free: {} | Marked: {} | Pinned: {}",
      self.addr, self.size, self.free as u8, self.marked as u8, self.pinned as u8
    )
  }
}
