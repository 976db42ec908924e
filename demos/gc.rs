use std::{hint::black_box, io::Read};

use rgc::{FreeStatus, Heap};

/// Waits until the user presses ENTER when `RGC_STEP` is set, so the heap can
/// be inspected with `pmap` or `gdb` between steps.
fn pause() {
  if std::env::var_os("RGC_STEP").is_some() {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_blocks(heap: &Heap) {
  println!("=== Memory Blocks ===");
  for block in heap.blocks() {
    println!("{}", block);
  }
  println!("=====================");
}

fn main() -> Result<(), rgc::HeapError> {
  env_logger::init();

  let mut heap = Heap::new();

  println!("== Initial GC and Heap Profiler Test ==");

  let a = heap.allocate(4)?.cast::<i32>();
  let b = heap.allocate(4)?.cast::<i32>();
  let c = heap.allocate(4)?.cast::<i32>();

  unsafe {
    a.write(10);
    b.write(20);
    c.write(30);
    println!("a: {}, b: {}, c: {}", a.read(), b.read(), c.read());
  }

  // Keep the three pointers in stack memory so the scan can see them.
  let live = [a, b, c];
  black_box(&live);

  let (report, _) = rgc::bench::time("collect", || heap.collect());
  println!("collect reclaimed {} blocks", report.reclaimed_blocks);
  println!("{}", heap.stats());
  pause();

  for ptr in live {
    heap.free(ptr.cast())?;
  }

  heap.collect();
  println!("{}", heap.stats());
  print_blocks(&heap);
  pause();

  println!("\n== Pinning and Unpinning Test ==");
  let d = heap.allocate(4)?.cast::<i32>();
  unsafe { d.write(42) };

  heap.pin(d.cast())?;
  println!("Pinned object d: {}", unsafe { d.read() });

  if heap.free(d.cast())? == FreeStatus::RefusedPinned {
    println!("Attempted to free a pinned block, skipping.");
  }
  heap.collect();
  print_blocks(&heap);
  pause();

  heap.unpin(d.cast())?;
  heap.free(d.cast())?;
  heap.collect();
  print_blocks(&heap);

  Ok(())
}
