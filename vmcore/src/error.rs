//! The engine's error model.
//!
//! Every fallible entry point returns [`VmError`]. Failures that occur on
//! the page-fault critical path (inside [`crate::populator`]) cannot be
//! returned this way, since the faulting host thread is blocked inside a
//! memory read with no call frame to unwind into; those are instead
//! recorded on the owning [`crate::descriptor::ObjectDescriptor`] and
//! surfaced later through [`crate::Engine::last_error`].

use std::{io, path::PathBuf};

/// Errors produced by the engine's fallible entry points.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
	/// The arena has no free segment large enough for the request.
	#[error("arena exhausted: no free segment of {requested} bytes available")]
	OutOfAddressSpace {
		/// The segment size that could not be satisfied.
		requested: usize,
	},

	/// A read or write against a per-object backing file failed.
	#[error("backing store I/O failed for page {page_index}")]
	BackingStoreIo {
		/// The page index the operation was attempting to service.
		page_index: u64,
		/// The underlying I/O error.
		#[source]
		source: io::Error,
	},

	/// The user-supplied `populate_fn` returned a nonzero status.
	#[error("populate callback failed with status {status} for elements [{start_elem}, {end_elem})")]
	PopulateFailed {
		/// The first element of the requested range.
		start_elem: u64,
		/// The exclusive end of the requested range.
		end_elem: u64,
		/// The nonzero status the callback returned.
		status: i32,
	},

	/// The kernel's page-fault-redirection facility failed to register,
	/// arm, or service a request.
	#[error("kernel page backend error: {0}")]
	KernelUserfault(#[source] crate::backend::BackendError),

	/// A `Source` was invalid (zero sizes, misaligned header, etc.).
	#[error("invalid source: {0}")]
	InvalidSource(String),

	/// Process-wide configuration failed validation.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// A host API call referenced a `base_addr` that is not a live object.
	#[error("no live object at base address {base_addr:#x}")]
	UnknownObject {
		/// The address the host passed.
		base_addr: usize,
	},

	/// The scratch directory used for backing files could not be created
	/// or is not writable.
	#[error("scratch directory {path:?} is not usable")]
	ScratchDirUnusable {
		/// The offending path.
		path: PathBuf,
		/// The underlying I/O error.
		#[source]
		source: io::Error,
	},
}

/// Convenience alias used throughout the crate.
pub type VmResult<T> = Result<T, VmError>;
