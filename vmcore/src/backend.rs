//! The `PageBackend` seam: the only place the engine talks to an
//! OS-specific page-fault-redirection facility.
//!
//! The engine is written entirely against this trait. `vmcore` ships no
//! implementation of it itself — [`vmcore-backend-userfaultfd`] provides
//! the Linux `userfaultfd(2)` implementation used in production, and
//! [`vmcore-backend-mock`] provides an in-process implementation used by
//! the test harness and by hosts exercising the engine without
//! `/dev/userfaultfd` access. A port to another OS would add a third
//! implementation of this trait without touching anything in
//! [`crate::dispatcher`], [`crate::populator`], or [`crate::eviction`].

use std::io;

/// A page fault reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEvent {
	/// The faulting address. Always arena-relative in the sense that it
	/// falls within a range previously passed to
	/// [`PageBackend::register_range`].
	pub addr:  usize,
	/// Whether the fault was caused by a write.
	pub write: bool,
}

/// Errors surfaced by a [`PageBackend`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	/// Reserving virtual address space failed (e.g. `mmap` returned
	/// `MAP_FAILED`).
	#[error("failed to reserve {len} bytes of address space")]
	ReserveFailed {
		/// The requested reservation size.
		len: usize,
		/// The underlying OS error.
		#[source]
		source: io::Error,
	},

	/// Registering a range with the kernel's fault-redirection facility
	/// failed.
	#[error("failed to register range [{base:#x}, {base_plus_len:#x}) with the page backend")]
	RegisterFailed {
		/// Start of the range.
		base: usize,
		/// End of the range, for display purposes only.
		base_plus_len: usize,
		/// The underlying OS error.
		#[source]
		source: io::Error,
	},

	/// Blocking for the next fault event failed.
	#[error("failed to read the next page fault event")]
	AwaitFaultFailed(#[source] io::Error),

	/// Installing a page (or zero-page) failed.
	#[error("failed to install page at {addr:#x}")]
	InstallFailed {
		/// The address the install targeted.
		addr: usize,
		/// The underlying OS error.
		#[source]
		source: io::Error,
	},

	/// Dropping (reclaiming) a page failed.
	#[error("failed to drop page at {addr:#x}")]
	DropFailed {
		/// The address the drop targeted.
		addr: usize,
		/// The underlying OS error.
		#[source]
		source: io::Error,
	},

	/// The backend was asked to perform an operation after
	/// [`PageBackend::shutdown`] had already been called.
	#[error("page backend has already been shut down")]
	ShuttingDown,
}

/// The isolation seam between the engine and the kernel's page-fault
/// facility.
///
/// Implementations must be safe to share across the dispatcher thread,
/// the worker pool, and the eviction engine: all methods take `&self`.
pub trait PageBackend: Send + Sync {
	/// Reserves `len` bytes of virtually-contiguous address space and
	/// returns its base address. No physical memory is committed.
	///
	/// Called exactly once, by the arena allocator, at engine startup.
	fn reserve(&self, len: usize) -> Result<usize, BackendError>;

	/// Registers `[base, base + len)` with the kernel's fault-redirection
	/// facility so that any access to an unmapped page in that range
	/// produces a [`FaultEvent`] instead of a `SIGSEGV`.
	///
	/// Called exactly once, immediately after [`PageBackend::reserve`]
	/// returns the same range.
	fn register_range(&self, base: usize, len: usize) -> Result<(), BackendError>;

	/// Blocks until the next fault event is available, or returns `Ok(None)`
	/// once [`PageBackend::shutdown`] has been called and no more events
	/// will arrive.
	fn await_fault(&self) -> Result<Option<FaultEvent>, BackendError>;

	/// Atomically installs `data` as the page(s) backing
	/// `[addr, addr + data.len())`. `data.len()` must be a multiple of
	/// `page_size`. This is the step that wakes any host thread blocked
	/// on a fault in the installed range.
	fn install_page(&self, addr: usize, data: &[u8]) -> Result<(), BackendError>;

	/// Atomically installs `n_pages` zero-filled pages at `addr`. Used
	/// when a populate failure still must answer the fault, so a zero
	/// page is installed instead of leaving the host thread blocked
	/// forever.
	fn install_zero_pages(&self, addr: usize, n_pages: usize, page_size: usize) -> Result<(), BackendError>;

	/// Reclaims the pages backing `[addr, addr + len)`, dropping their
	/// physical backing so that a subsequent touch re-faults. Equivalent
	/// to `madvise(..., MADV_DONTNEED)`.
	fn drop_page(&self, addr: usize, len: usize) -> Result<(), BackendError>;

	/// Unregisters the arena and releases its address space. Called once,
	/// during final shutdown.
	fn release(&self, base: usize, len: usize) -> Result<(), BackendError>;

	/// Unblocks any thread currently parked in [`PageBackend::await_fault`],
	/// causing it to return `Ok(None)`. Idempotent.
	fn shutdown(&self);
}
