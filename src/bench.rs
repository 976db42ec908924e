use std::time::{Duration, Instant};

use log::info;

/// Runs `f`, logs how long it took and hands back its result.
///
/// ```rust
/// use rgc::{Heap, bench};
///
/// let mut heap = Heap::new();
/// let (ptr, elapsed) = bench::time("allocate", || heap.allocate(64));
///
/// assert!(ptr.is_ok());
/// assert!(elapsed.as_secs() < 60);
/// ```
pub fn time<T>(
  label: &str,
  f: impl FnOnce() -> T,
) -> (T, Duration) {
  let start = Instant::now();
  let value = f();
  let elapsed = start.elapsed();

  info!("{} took {:.3} ms", label, elapsed.as_secs_f64() * 1e3);

  (value, elapsed)
}
