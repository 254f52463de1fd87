//! The per-object descriptor: configuration, residency bookkeeping, and
//! the backing store handle for one live object.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use vmcore_sync::DescriptorLock;

use crate::{backing_store::BackingStore, bitmap::PageBitmap, error::VmError, source::Source};

/// Mutable residency/dirty bookkeeping, all held behind one
/// [`DescriptorLock`] per the concurrency model: install and evict on the
/// same object are mutually exclusive.
pub struct DescriptorState {
	/// `1` iff the page is currently backed by RAM.
	pub residency: PageBitmap,
	/// `1` iff the page differs from its backing-store image.
	pub dirty: PageBitmap,
	/// `1` iff the page was ever written to the backing store (so a
	/// later fault knows to read it back instead of re-populating).
	pub ever_dirty: PageBitmap,
	/// Coarse last-touch epoch per page, used by approximate LRU victim
	/// selection.
	pub lru_epoch: Vec<u32>,
}

impl DescriptorState {
	fn new(n_pages: usize) -> Self {
		Self {
			residency:  PageBitmap::new(n_pages),
			dirty:      PageBitmap::new(n_pages),
			ever_dirty: PageBitmap::new(n_pages),
			lru_epoch:  vec![0; n_pages],
		}
	}
}

/// One live object's configuration and bookkeeping.
pub struct ObjectDescriptor {
	/// Page-aligned start of the object's virtual range.
	pub base_addr: usize,
	/// Logical length of the array, in elements.
	pub n_elements: u64,
	/// Size, in bytes, of one element.
	pub element_size: usize,
	/// Optional shape, purely informational.
	pub dims: Option<Vec<u64>>,
	/// How to interpret each element's bytes.
	pub element_kind: crate::source::ElementKind,
	/// Elements that must be materialized per fault, after rounding to a
	/// whole number of pages.
	pub min_load_elements: u64,
	/// Bytes reserved for a host-written header. Never populated or
	/// evicted by the engine.
	pub header_bytes: usize,
	/// The page size this object's bitmaps are sized against.
	pub page_size: usize,
	/// Total number of pages in the object's range.
	pub n_pages: usize,
	/// The populate capability.
	pub source: Box<dyn crate::source::PopulateSource>,
	/// The destructor, taken (and run) exactly once at destruction.
	pub destructor: DescriptorLock<Option<Box<dyn FnOnce() + Send>>>,
	/// This object's backing store.
	pub backing: BackingStore,
	/// Residency/dirty/ever_dirty bitmaps and LRU epochs.
	state: DescriptorLock<DescriptorState>,
	/// Sticky error recorded on the fault path: it cannot return a
	/// `Result`, so it records here instead.
	error: DescriptorLock<Option<String>>,
	/// Set once [`crate::Engine::destroy_object`] has begun tearing this
	/// object down; new faults must not begin new populate work once
	/// this is `true`.
	pub terminating: AtomicBool,
	/// Count of in-flight populate/evict operations on this object, used
	/// by destruction to wait for them to drain.
	pub inflight: AtomicUsize,
	/// Monotonic epoch counter, advanced by every touch, used to stamp
	/// `lru_epoch`.
	epoch: AtomicU32,
}

impl ObjectDescriptor {
	/// Builds a descriptor for a freshly allocated segment.
	pub fn new(
		base_addr: usize,
		page_size: usize,
		n_pages: usize,
		source: Source,
		backing: BackingStore,
	) -> Self {
		Self {
			base_addr,
			n_elements: source.n_elements,
			element_size: source.element_size,
			dims: source.dims,
			element_kind: source.element_kind,
			min_load_elements: source.min_load_elements,
			header_bytes: source.header_bytes,
			page_size,
			n_pages,
			source: source.populate,
			destructor: DescriptorLock::new(source.destructor),
			backing,
			state: DescriptorLock::new(DescriptorState::new(n_pages)),
			error: DescriptorLock::new(None),
			terminating: AtomicBool::new(false),
			inflight: AtomicUsize::new(0),
			epoch: AtomicU32::new(0),
		}
	}

	/// Total length of the object's virtual range, in bytes (including
	/// the header).
	#[must_use]
	pub fn range_len(&self) -> usize {
		self.n_pages * self.page_size
	}

	/// Acquires the exclusive lock over this object's bookkeeping.
	#[must_use]
	pub fn lock_state(&self) -> vmcore_sync::MutexGuard<'_, DescriptorState> {
		self.state.lock()
	}

	/// Attempts to acquire the bookkeeping lock with a timeout, used by
	/// destruction to wait (without blocking forever) for in-flight work
	/// to finish.
	#[must_use]
	pub fn try_lock_state_for(
		&self,
		timeout: std::time::Duration,
	) -> Option<vmcore_sync::MutexGuard<'_, DescriptorState>> {
		self.state.try_lock_for(timeout)
	}

	/// Advances and returns this object's touch epoch.
	pub fn next_epoch(&self) -> u32 {
		self.epoch.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Records a sticky error for later retrieval via
	/// [`crate::Engine::last_error`].
	pub fn set_error(&self, err: &VmError) {
		*self.error.lock() = Some(err.to_string());
	}

	/// Returns and clears the sticky error, if any.
	pub fn take_error(&self) -> Option<String> {
		self.error.lock().take()
	}

	/// Whether a sticky error is currently set, without clearing it.
	#[must_use]
	pub fn has_error(&self) -> bool {
		self.error.lock().is_some()
	}
}
