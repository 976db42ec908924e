use std::{marker::PhantomData, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
  align, align_to,
  block::{Block, BlockInfo},
  config::HeapConfig,
  error::{HeapError, Result},
  os::{MmapPages, PageSource, Region},
  stats::HeapStats,
};

/// Outcome of [`Heap::free`] on a pointer the heap owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeStatus {
  /// The block went back to the free list. `bytes` includes its header.
  Freed { bytes: usize },
  /// The block is pinned and stays allocated.
  RefusedPinned,
}

/// A first-fit free-list heap whose blocks can also be reclaimed by
/// [`collect`](Heap::collect).
///
/// Every block lives in one forward chain. Regions come from the
/// [`PageSource`] in whole pages and are only given back when the heap is
/// dropped, which invalidates every pointer it handed out.
///
/// The heap is neither `Send` nor `Sync`; all operations run to completion
/// on the owning thread.
pub struct Heap<S: PageSource = MmapPages> {
  pub(crate) first: *mut Block,
  pub(crate) last: *mut Block,
  pub(crate) regions: Vec<Region>,
  pub(crate) source: S,
  pub(crate) config: HeapConfig,
  pub(crate) stats: HeapStats,
}

impl Heap<MmapPages> {
  pub fn new() -> Self {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> Self {
    Self::with_source(MmapPages::new(), config)
  }
}

impl Default for Heap<MmapPages> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: PageSource> Heap<S> {
  pub fn with_source(
    source: S,
    config: HeapConfig,
  ) -> Self {
    Self {
      first: std::ptr::null_mut(),
      last: std::ptr::null_mut(),
      regions: Vec::new(),
      source,
      config,
      stats: HeapStats::default(),
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn stats(&self) -> HeapStats {
    self.stats
  }

  /// Allocates at least `size` bytes and returns the payload address.
  ///
  /// A zero-byte request is served as a one-byte request. The payload is
  /// word aligned and its contents are unspecified.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size > isize::MAX as usize / 2 {
      return Err(HeapError::OutOfMemory { requested: size });
    }

    let total = Block::HEADER + align!(size.max(1));

    let block = match self.find_fit(total) {
      Some(block) => block,
      None => self.grow(total)?,
    };

    let bytes = unsafe { self.carve(block, total) };
    self.stats.record_allocation(bytes);

    let payload = Block::payload(block);
    trace!("allocated {} bytes at {:p} (block size {})", size, payload, bytes);

    Ok(payload)
  }

  /// Returns an allocated block to the free list and coalesces.
  ///
  /// Pinned blocks are left alone and reported as
  /// [`FreeStatus::RefusedPinned`]. Pointers this heap did not hand out, and
  /// blocks that are already free, are rejected without touching the heap.
  pub fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<FreeStatus> {
    let block = unsafe { &mut *self.lookup(ptr)?.as_ptr() };

    if block.pinned {
      warn!("attempted to free pinned block at {:p}, skipping", ptr);
      return Ok(FreeStatus::RefusedPinned);
    }

    let bytes = block.size;
    block.release();
    self.stats.record_free(bytes);
    trace!("freed {} bytes at {:p}", bytes, ptr);

    self.coalesce();

    Ok(FreeStatus::Freed { bytes })
  }

  /// Merges every run of physically adjacent free blocks into its first
  /// block. Returns the number of merges; a second pass always returns 0.
  pub fn coalesce(&mut self) -> usize {
    let mut merges = 0;
    let mut current = self.first;

    unsafe {
      while !current.is_null() && !(*current).next.is_null() {
        let next = (*current).next;

        if (*current).free && (*next).free && (*current).is_adjacent(&*next) {
          (*current).size += (*next).size;
          (*current).next = (*next).next;

          if self.last == next {
            self.last = current;
          }

          merges += 1;
        } else {
          current = next;
        }
      }
    }

    self.stats.free_blocks -= merges;
    self.stats.total_blocks -= merges;

    if merges > 0 {
      trace!("coalesced {} free blocks", merges);
    }

    merges
  }

  /// Whether `ptr` is the payload address of a currently allocated block.
  pub fn validate(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self
      .find_block(ptr)
      .is_some_and(|block| unsafe { !(*block.as_ptr()).free })
  }

  /// Exempts an allocated block from [`free`](Self::free) and from sweeping.
  pub fn pin(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<()> {
    let block = self.lookup(ptr)?;
    unsafe { (*block.as_ptr()).pinned = true };
    Ok(())
  }

  pub fn unpin(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<()> {
    let block = self.lookup(ptr)?;
    unsafe { (*block.as_ptr()).pinned = false };
    Ok(())
  }

  pub fn is_pinned(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self
      .find_block(ptr)
      .is_some_and(|block| unsafe { (*block.as_ptr()).pinned })
  }

  /// Snapshot iterator over every block in chain order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.first,
      _heap: PhantomData,
    }
  }

  /// Logs every block at debug level.
  pub fn dump(&self) {
    debug!("=== Memory Blocks ===");
    for info in self.blocks() {
      debug!("{}", info);
    }
    debug!("=====================");
  }

  /// Block whose payload starts exactly at `ptr`, free or not.
  pub(crate) fn find_block(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<NonNull<Block>> {
    let addr = ptr.as_ptr() as usize;

    if !self.regions.iter().any(|region| region.contains(addr)) {
      return None;
    }

    let wanted = Block::from_payload(ptr)?;
    let mut current = self.first;

    while let Some(block) = NonNull::new(current) {
      if block == wanted {
        return Some(block);
      }
      current = unsafe { (*current).next };
    }

    None
  }

  /// Like [`find_block`](Self::find_block) but only for allocated blocks,
  /// with a diagnostic for everything else.
  fn lookup(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<NonNull<Block>> {
    let Some(block) = self.find_block(ptr) else {
      warn!("pointer {:p} does not belong to this heap", ptr);
      return Err(HeapError::InvalidPointer(ptr.as_ptr() as usize));
    };

    if unsafe { (*block.as_ptr()).free } {
      warn!("pointer {:p} refers to a free block", ptr);
      return Err(HeapError::NotAllocated(ptr.as_ptr() as usize));
    }

    Ok(block)
  }

  fn find_fit(
    &self,
    total: usize,
  ) -> Option<NonNull<Block>> {
    let mut current = self.first;

    unsafe {
      while !current.is_null() {
        if (*current).free && (*current).size >= total {
          return NonNull::new(current);
        }
        current = (*current).next;
      }
    }

    None
  }

  /// Maps a region big enough for `total` bytes and appends it to the chain
  /// as one free block.
  fn grow(
    &mut self,
    total: usize,
  ) -> Result<NonNull<Block>> {
    let page = self.source.page_size();
    let wanted = self
      .config
      .min_region_pages
      .checked_mul(page)
      .map(|min| total.max(min))
      .filter(|&wanted| wanted <= usize::MAX - page);

    let Some(wanted) = wanted else {
      warn!("region for {} bytes exceeds the address space", total);
      return Err(HeapError::OutOfMemory { requested: total });
    };
    let len = align_to!(wanted, page);

    let Some(start) = self.source.map(len) else {
      warn!("page source could not map {} bytes", len);
      return Err(HeapError::OutOfMemory { requested: len });
    };

    debug!("mapped region {:p} ({} bytes)", start, len);
    self.regions.push(Region { start, len });

    let block = unsafe { Block::write(start, len, true, std::ptr::null_mut()) };

    if self.first.is_null() {
      self.first = block.as_ptr();
    } else {
      unsafe { (*self.last).next = block.as_ptr() };
    }
    self.last = block.as_ptr();

    self.stats.free_blocks += 1;
    self.stats.total_blocks += 1;

    Ok(block)
  }

  /// Marks a free block of at least `total` bytes as allocated, splitting
  /// off the tail when it can hold a header and a word of payload. Returns
  /// the final size of the allocated block.
  ///
  /// # Safety
  ///
  /// `block` must be a free block in this heap's chain.
  unsafe fn carve(
    &mut self,
    block: NonNull<Block>,
    total: usize,
  ) -> usize {
    let header = unsafe { &mut *block.as_ptr() };

    header.free = false;
    header.marked = false;
    header.pinned = false;
    self.stats.free_blocks -= 1;

    if header.capacity() > total {
      let tail_at = unsafe { block.cast::<u8>().add(total) };
      let tail = unsafe { Block::write(tail_at, header.size - total, true, header.next) };

      header.size = total;
      header.next = tail.as_ptr();

      if self.last == block.as_ptr() {
        self.last = tail.as_ptr();
      }

      self.stats.free_blocks += 1;
      self.stats.total_blocks += 1;
    }

    header.size
  }
}

impl<S: PageSource> Drop for Heap<S> {
  fn drop(&mut self) {
    for region in self.regions.drain(..) {
      unsafe { self.source.unmap(region.start, region.len) };
    }
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  current: *mut Block,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = NonNull::new(self.current)?;

    unsafe {
      self.current = (*block.as_ptr()).next;
      Some((*block.as_ptr()).info())
    }
  }
}
