//! Heap profiler counters.

use std::fmt;

/// Running totals kept by a [`Heap`](crate::Heap). Diagnostic only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes (headers included) ever handed out by `allocate`.
  pub total_allocated: usize,
  /// Bytes ever returned by `free` or reclaimed by a collection.
  pub total_freed: usize,
  /// Free blocks currently in the chain.
  pub free_blocks: usize,
  /// All blocks currently in the chain.
  pub total_blocks: usize,
  /// Successful `allocate` calls.
  pub allocations: usize,
  /// Blocks returned by `free` or reclaimed by a collection.
  pub frees: usize,
  /// Completed collections.
  pub collections: usize,
}

impl HeapStats {
  pub fn live_bytes(&self) -> usize {
    self.total_allocated.saturating_sub(self.total_freed)
  }

  pub(crate) fn record_allocation(
    &mut self,
    size: usize,
  ) {
    self.total_allocated += size;
    self.allocations += 1;
  }

  pub(crate) fn record_free(
    &mut self,
    size: usize,
  ) {
    self.total_freed += size;
    self.frees += 1;
    self.free_blocks += 1;
  }
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Heap Profiler Stats:")?;
    writeln!(f, "Total Allocated: {} bytes", self.total_allocated)?;
    writeln!(f, "Total Freed: {} bytes", self.total_freed)?;
    writeln!(f, "Free Blocks: {}", self.free_blocks)?;
    writeln!(f, "Allocations: {}", self.allocations)?;
    writeln!(f, "Frees: {}", self.frees)?;
    write!(f, "Collections: {}", self.collections)
  }
}
