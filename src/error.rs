use thiserror::Error;

/// Failures reported by heap operations.
///
/// A free refused because the block is pinned is not an error; see
/// [`FreeStatus`](crate::FreeStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  /// The page source could not supply a region for the request.
  #[error("out of memory: could not map {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The address is not the payload of any block in this heap.
  #[error("pointer {0:#x} does not belong to this heap")]
  InvalidPointer(usize),

  /// The address names a block that is currently free.
  #[error("pointer {0:#x} refers to a block that is not allocated")]
  NotAllocated(usize),
}

pub type Result<T> = std::result::Result<T, HeapError>;
