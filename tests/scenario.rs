//! Allocation, explicit free, pinning and collection end to end.

use std::hint::black_box;

use pretty_assertions::assert_eq;
use rgc::{FreeStatus, Heap, MmapPages, PageSource};

#[test]
fn test_three_ints_then_pinning() {
  let mut heap = Heap::new();

  let a = heap.allocate(4).expect("Failed to allocate a").cast::<i32>();
  let b = heap.allocate(4).expect("Failed to allocate b").cast::<i32>();
  let c = heap.allocate(4).expect("Failed to allocate c").cast::<i32>();

  unsafe {
    a.write(10);
    b.write(20);
    c.write(30);
  }

  // All three stay reachable from this frame.
  let live = [a, b, c];
  black_box(&live);
  let report = heap.collect();

  assert_eq!(report.reclaimed_blocks, 0, "live locals must not be reclaimed");
  unsafe {
    assert_eq!((live[0].read(), live[1].read(), live[2].read()), (10, 20, 30));
  }

  let stats = heap.stats();
  assert_eq!(stats.allocations, 3);
  assert_eq!(stats.frees, 0);
  assert_eq!(stats.total_freed, 0);

  for ptr in live {
    assert!(matches!(heap.free(ptr.cast()), Ok(FreeStatus::Freed { .. })));
  }

  let stats = heap.stats();
  assert_eq!(stats.frees, 3);
  assert_eq!(stats.total_freed, stats.total_allocated);
  assert_eq!(stats.free_blocks, 1);
  assert_eq!(heap.blocks().count(), 1, "frees coalesce into a single block");

  heap.collect();
  assert_eq!(heap.stats().total_freed, stats.total_freed);
  assert_eq!(heap.stats().frees, 3);

  let d = heap.allocate(4).expect("Failed to allocate d").cast::<i32>();
  unsafe { d.write(42) };
  heap.pin(d.cast()).unwrap();

  assert_eq!(heap.free(d.cast()), Ok(FreeStatus::RefusedPinned));
  assert_eq!(unsafe { d.read() }, 42);
  assert_eq!(heap.stats().frees, 3);

  heap.collect();
  assert!(heap.validate(d.cast()));
  assert_eq!(unsafe { d.read() }, 42);

  heap.unpin(d.cast()).unwrap();
  assert!(matches!(heap.free(d.cast()), Ok(FreeStatus::Freed { .. })));

  heap.collect();
  let region = heap.blocks().next().unwrap();
  assert!(region.free);
  assert!(region.payload_range().contains(&(d.as_ptr() as usize)));
}

#[test]
fn test_split_conserves_size() {
  let page = MmapPages::new().page_size();
  let mut heap = Heap::new();

  // One free block spanning the whole first region.
  let whole = heap.allocate(page - rgc::HEADER_SIZE).unwrap();
  heap.free(whole).unwrap();

  let before: Vec<_> = heap.blocks().collect();
  assert_eq!(before.len(), 1);
  let capacity = before[0].capacity();

  let n = 64;
  heap.allocate(n).unwrap();

  let after: Vec<_> = heap.blocks().collect();
  assert_eq!(after.len(), 2);
  assert!(!after[0].free);
  assert_eq!(after[0].capacity(), n);
  assert!(after[1].free);
  assert_eq!(after[1].capacity(), capacity - n - rgc::HEADER_SIZE);
  assert_eq!(
    after.iter().map(|block| block.size).sum::<usize>(),
    before.iter().map(|block| block.size).sum::<usize>()
  );
}

#[test]
fn test_adjacent_frees_merge_once() {
  let mut heap = Heap::new();

  let a = heap.allocate(24).unwrap();
  let b = heap.allocate(24).unwrap();
  let guard = heap.allocate(24).unwrap();

  let start = heap.blocks().next().unwrap().addr;

  heap.free(a).unwrap();
  heap.free(b).unwrap();

  let blocks: Vec<_> = heap.blocks().collect();
  assert_eq!(blocks[0].addr, start);
  assert!(blocks[0].free);
  assert_eq!(blocks[0].size, 2 * (rgc::HEADER_SIZE + 24));
  assert_eq!(blocks[1].payload, guard.as_ptr() as usize);

  assert_eq!(heap.coalesce(), 0);
  assert_eq!(heap.blocks().collect::<Vec<_>>(), blocks);
}

#[test]
fn test_new_region_when_nothing_fits() {
  let page = MmapPages::new().page_size();
  let mut heap = Heap::new();

  let small = heap.allocate(16).unwrap();
  let big = heap.allocate(2 * page).unwrap();

  assert!(heap.validate(small));
  assert!(heap.validate(big));
  assert_eq!(heap.blocks().filter(|block| !block.free).count(), 2);

  let total: usize = heap.blocks().map(|block| block.size).sum();
  assert_eq!(total % page, 0);
}

#[test]
fn test_heaps_are_independent() {
  let mut first = Heap::new();
  let mut second = Heap::new();

  let ptr = first.allocate(8).unwrap();

  assert!(first.validate(ptr));
  assert!(!second.validate(ptr));
  assert!(second.free(ptr).is_err());
  assert!(second.pin(ptr).is_err());
  assert!(!first.is_pinned(ptr));
}
