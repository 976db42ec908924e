//! Conservative mark and sweep.
//!
//! Roots are plain machine words. A word keeps a block alive only if it is
//! exactly that block's payload address: interior pointers are not
//! recognised, and words stored inside heap blocks are never followed, so
//! an object reachable only through another object is reclaimed. Both
//! limits can retain garbage or drop indirectly reachable objects; neither
//! can reclaim a block whose payload address is itself a root.

use std::{marker::PhantomData, mem, ops::Range, ptr, ptr::NonNull};

use log::{debug, warn};

use crate::{block::Block, heap::Heap, os::PageSource};

/// Supplies candidate root words to a collection.
pub trait RootSource {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  );
}

impl RootSource for [usize] {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    for &word in self {
      visit(word);
    }
  }
}

impl RootSource for [NonNull<u8>] {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    for ptr in self {
      visit(ptr.as_ptr() as usize);
    }
  }
}

impl<R: RootSource> RootSource for Vec<R> {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    for source in self {
      source.visit_roots(visit);
    }
  }
}

impl RootSource for usize {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    visit(*self);
  }
}

impl RootSource for NonNull<u8> {
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    visit(self.as_ptr() as usize);
  }
}

/// Every word of the calling thread's stack between the frame that runs
/// the scan and an upper bound.
///
/// Values held only in registers are invisible to the scan; keep roots in
/// memory (for instance through [`std::hint::black_box`]) across a
/// collection. The bound belongs to the thread that built it, so the type
/// is neither `Send` nor `Sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRoots {
  upper: usize,
  _thread: PhantomData<*const ()>,
}

impl StackRoots {
  /// Scans up to the address of `anchor`, which must be a local in an outer
  /// frame of the thread that collects. Returns `None` when `anchor` does
  /// not lie on the calling thread's stack.
  pub fn from_anchor<T>(anchor: &T) -> Option<Self> {
    let stack = thread_stack()?;
    let start = anchor as *const T as usize;
    let upper = start.checked_add(mem::size_of::<T>())?;

    if !stack.contains(&start) || upper > stack.end {
      warn!("anchor {:#x} is not on the calling thread's stack", start);
      return None;
    }

    Some(Self::bounded(upper))
  }

  /// Scans up to the top of the calling thread's stack.
  pub fn current_thread() -> Option<Self> {
    thread_stack().map(|stack| Self::bounded(stack.end))
  }

  pub fn upper(&self) -> usize {
    self.upper
  }

  fn bounded(upper: usize) -> Self {
    Self {
      upper,
      _thread: PhantomData,
    }
  }
}

/// Address range of the calling thread's stack.
#[cfg(target_os = "linux")]
fn thread_stack() -> Option<Range<usize>> {
  unsafe {
    let mut attr: libc::pthread_attr_t = mem::zeroed();

    if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
      return None;
    }

    let mut base: *mut libc::c_void = ptr::null_mut();
    let mut size: libc::size_t = 0;
    let rc = libc::pthread_attr_getstack(&attr, &mut base, &mut size);
    libc::pthread_attr_destroy(&mut attr);

    if rc != 0 || base.is_null() {
      return None;
    }

    Some(base as usize..base as usize + size)
  }
}

#[cfg(not(target_os = "linux"))]
fn thread_stack() -> Option<Range<usize>> {
  None
}

impl RootSource for StackRoots {
  #[inline(never)]
  fn visit_roots(
    &self,
    visit: &mut dyn FnMut(usize),
  ) {
    let word = mem::size_of::<usize>();
    let here = 0usize;
    let lower = ptr::addr_of!(here) as usize;

    // An upper bound at or below this frame means the anchoring frame has
    // already returned: there is nothing left to scan.
    if lower >= self.upper {
      return;
    }

    let mut slot = crate::align!(lower);
    while slot + word <= self.upper {
      // Stack memory between two live frames is mapped; volatile keeps the
      // compiler from reasoning about what it holds.
      visit(unsafe { ptr::read_volatile(slot as *const usize) });
      slot += word;
    }
  }
}

/// What a single collection did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReport {
  /// Root words offered by the root source.
  pub roots_scanned: usize,
  /// Allocated blocks found to be referenced by a root.
  pub marked: usize,
  pub reclaimed_blocks: usize,
  pub reclaimed_bytes: usize,
}

impl<S: PageSource> Heap<S> {
  /// Collects with the calling thread's stack as the root set.
  ///
  /// If the stack bounds cannot be determined nothing is reclaimed.
  pub fn collect(&mut self) -> CollectionReport {
    match StackRoots::current_thread() {
      Some(stack) => self.collect_with(&stack),
      None => {
        warn!("stack bounds unavailable, skipping collection");
        CollectionReport::default()
      }
    }
  }

  /// Marks every allocated block whose payload address appears in `roots`,
  /// then returns every allocated, unmarked, unpinned block to the free
  /// list. Marks stay set until the next collection.
  pub fn collect_with<R: RootSource + ?Sized>(
    &mut self,
    roots: &R,
  ) -> CollectionReport {
    let mut report = CollectionReport::default();

    self.mark(roots, &mut report);
    self.sweep(&mut report);

    self.stats.collections += 1;

    debug!(
      "collection {}: {} roots, {} marked, {} blocks ({} bytes) reclaimed",
      self.stats.collections,
      report.roots_scanned,
      report.marked,
      report.reclaimed_blocks,
      report.reclaimed_bytes
    );

    if self.config.coalesce_after_sweep {
      self.coalesce();
    }

    report
  }

  fn mark<R: RootSource + ?Sized>(
    &mut self,
    roots: &R,
    report: &mut CollectionReport,
  ) {
    let mut live = Vec::with_capacity(self.stats.total_blocks);
    let mut current = self.first;

    unsafe {
      while let Some(block) = NonNull::new(current) {
        (*current).marked = false;
        if !(*current).free {
          live.push((Block::payload(block).as_ptr() as usize, current));
        }
        current = (*current).next;
      }
    }

    live.sort_unstable_by_key(|&(payload, _)| payload);

    roots.visit_roots(&mut |word| {
      report.roots_scanned += 1;

      if let Ok(i) = live.binary_search_by_key(&word, |&(payload, _)| payload) {
        let block = unsafe { &mut *live[i].1 };
        if !block.marked {
          block.marked = true;
          report.marked += 1;
        }
      }
    });
  }

  fn sweep(
    &mut self,
    report: &mut CollectionReport,
  ) {
    let mut current = self.first;

    unsafe {
      while !current.is_null() {
        let block = &mut *current;

        if !block.free && !block.marked && !block.pinned {
          block.release();
          self.stats.record_free(block.size);
          report.reclaimed_blocks += 1;
          report.reclaimed_bytes += block.size;
        }

        current = block.next;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::hint::black_box;

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::HeapConfig;

  #[test]
  fn test_explicit_roots_keep_blocks() {
    let mut heap = Heap::new();

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let c = heap.allocate(8).unwrap();

    let report = heap.collect_with(&[a, c][..]);

    assert_eq!(report.roots_scanned, 2);
    assert_eq!(report.marked, 2);
    assert_eq!(report.reclaimed_blocks, 1);
    assert!(heap.validate(a));
    assert!(!heap.validate(b));
    assert!(heap.validate(c));
  }

  #[test]
  fn test_interior_pointer_is_not_a_root() {
    let mut heap = Heap::new();
    let a = heap.allocate(32).unwrap();

    let interior = a.as_ptr() as usize + 8;
    let report = heap.collect_with(&[interior][..]);

    assert_eq!(report.marked, 0);
    assert!(!heap.validate(a));
  }

  #[test]
  fn test_marking_is_not_transitive() {
    let mut heap = Heap::new();

    let outer = heap.allocate(mem::size_of::<usize>()).unwrap();
    let inner = heap.allocate(8).unwrap();
    unsafe { outer.cast::<usize>().write(inner.as_ptr() as usize) };

    heap.collect_with(&outer);

    assert!(heap.validate(outer));
    assert!(!heap.validate(inner));
  }

  #[test]
  fn test_pinned_survives_without_roots() {
    let mut heap = Heap::new();
    let a = heap.allocate(8).unwrap();
    heap.pin(a).unwrap();

    let report = heap.collect_with(&[0usize; 0][..]);

    assert_eq!(report.reclaimed_blocks, 0);
    assert!(heap.validate(a));
  }

  #[test]
  fn test_duplicate_roots_mark_once() {
    let mut heap = Heap::new();
    let a = heap.allocate(8).unwrap();

    let report = heap.collect_with(&vec![a, a, a]);

    assert_eq!(report.roots_scanned, 3);
    assert_eq!(report.marked, 1);
  }

  #[test]
  fn test_marks_reset_each_cycle() {
    let mut heap = Heap::new();
    let a = heap.allocate(8).unwrap();

    heap.collect_with(&a);
    assert!(heap.blocks().next().unwrap().marked);

    heap.pin(a).unwrap();
    heap.collect_with(&[0usize; 0][..]);
    assert!(!heap.blocks().next().unwrap().marked);
    assert!(heap.validate(a));
  }

  #[test]
  fn test_sweep_updates_stats() {
    let mut heap = Heap::new();
    heap.allocate(8).unwrap();
    heap.allocate(8).unwrap();

    let report = heap.collect_with(&[0usize; 0][..]);
    let stats = heap.stats();

    assert_eq!(report.reclaimed_blocks, 2);
    assert_eq!(stats.total_freed, report.reclaimed_bytes);
    assert_eq!(stats.total_freed, stats.total_allocated);
    assert_eq!(stats.free_blocks, 3);
    assert_eq!(stats.collections, 1);
  }

  #[test]
  fn test_coalesce_after_sweep() {
    let mut heap = Heap::with_config(HeapConfig::default().with_coalesce_after_sweep(true));
    heap.allocate(8).unwrap();
    heap.allocate(8).unwrap();

    heap.collect_with(&[0usize; 0][..]);

    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn test_stack_roots_keep_live_locals() {
    let mut heap = Heap::new();

    let a = heap.allocate(8).unwrap();
    let slot = black_box(&a);
    unsafe { a.cast::<u64>().write(7) };

    let report = heap.collect();

    assert!(report.roots_scanned > 0);
    assert_eq!(report.reclaimed_blocks, 0);
    assert!(heap.validate(*slot));
    assert_eq!(unsafe { slot.cast::<u64>().read() }, 7);
  }

  #[cfg(target_os = "linux")]
  #[inline(never)]
  fn scan_below(anchor: &u8) -> bool {
    let value = 0x5157_usize;
    black_box(&value);

    let mut seen = false;
    StackRoots::from_anchor(anchor)
      .unwrap()
      .visit_roots(&mut |word| seen |= word == 0x5157);
    black_box(&value);

    seen
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_anchor_scan_sees_inner_frame() {
    let anchor = 0u8;
    assert!(scan_below(black_box(&anchor)));
  }

  static GLOBAL_ANCHOR: u64 = 0;

  #[test]
  fn test_anchor_off_the_stack_is_rejected() {
    let boxed = Box::new(0u8);

    assert_eq!(StackRoots::from_anchor(&*boxed), None);
    assert_eq!(StackRoots::from_anchor(&GLOBAL_ANCHOR), None);
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_current_thread_bounds() {
    let local = 0usize;
    let stack = StackRoots::current_thread().unwrap();

    assert!(stack.upper() > ptr::addr_of!(local) as usize);
  }
}
