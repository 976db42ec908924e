/// Tunables for a [`Heap`](crate::Heap).
///
/// ```rust
/// use rgc::HeapConfig;
///
/// let config = HeapConfig::default()
///   .with_coalesce_after_sweep(true)
///   .with_min_region_pages(4);
///
/// assert!(config.coalesce_after_sweep);
/// assert_eq!(config.min_region_pages, 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Merge adjacent free blocks at the end of every collection. Otherwise
  /// swept blocks stay separate until the next `free`.
  pub coalesce_after_sweep: bool,
  /// Smallest region, in pages, requested from the page source.
  pub min_region_pages: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      coalesce_after_sweep: false,
      min_region_pages: 1,
    }
  }
}

impl HeapConfig {
  pub fn with_coalesce_after_sweep(
    mut self,
    enabled: bool,
  ) -> Self {
    self.coalesce_after_sweep = enabled;
    self
  }

  pub fn with_min_region_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.min_region_pages = pages.max(1);
    self
  }
}
