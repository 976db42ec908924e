//! Raw memory from the operating system.

use std::ptr::{self, NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};

/// Supplier of page-granular memory regions for a [`Heap`](crate::Heap).
pub trait PageSource {
  /// Granularity of every request, in bytes. Must be a power of two.
  fn page_size(&self) -> usize;

  /// Maps `len` bytes (a multiple of [`page_size`](Self::page_size)) of
  /// zeroed, writable memory, or `None` when the system is out of memory.
  fn map(
    &mut self,
    len: usize,
  ) -> Option<NonNull<u8>>;

  /// Releases a region previously returned by [`map`](Self::map).
  ///
  /// # Safety
  ///
  /// `region` and `len` must come from a single earlier `map` call on this
  /// source, and nothing may reference the region afterwards.
  unsafe fn unmap(
    &mut self,
    region: NonNull<u8>,
    len: usize,
  );
}

/// Anonymous private mappings via `mmap(2)`.
#[derive(Debug, Clone, Copy)]
pub struct MmapPages {
  page_size: usize,
}

impl MmapPages {
  pub fn new() -> Self {
    let reported = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if reported > 0 && (reported as usize).is_power_of_two() {
      reported as usize
    } else {
      4096
    };

    Self { page_size }
  }
}

impl Default for MmapPages {
  fn default() -> Self {
    Self::new()
  }
}

impl PageSource for MmapPages {
  fn page_size(&self) -> usize {
    self.page_size
  }

  fn map(
    &mut self,
    len: usize,
  ) -> Option<NonNull<u8>> {
    let address = unsafe {
      mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return None;
    }

    NonNull::new(address as *mut u8)
  }

  unsafe fn unmap(
    &mut self,
    region: NonNull<u8>,
    len: usize,
  ) {
    unsafe {
      munmap(region.as_ptr() as *mut c_void, len);
    }
  }
}

/// A region obtained from a [`PageSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
  pub start: NonNull<u8>,
  pub len: usize,
}

impl Region {
  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    let start = self.start.as_ptr() as usize;
    addr >= start && addr < start + self.len
  }
}
