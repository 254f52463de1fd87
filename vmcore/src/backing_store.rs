//! Per-object backing store: an anonymous temporary file used as swap
//! for evicted dirty pages.
//!
//! Storage is sparse — [`tempfile::tempfile_in`] gives us a file that is
//! unlinked the moment it is created, so it never outlives the process
//! and never needs explicit removal, and positional writes past the
//! current end-of-file punch a hole rather than allocating eagerly.

use std::{
	fs::File,
	os::unix::fs::FileExt,
	path::Path,
};

use crate::error::{VmError, VmResult};

/// A per-object swap file, addressed by page index.
pub struct BackingStore {
	file:      File,
	page_size: usize,
}

impl BackingStore {
	/// Opens a new, already-unlinked temporary file in `scratch_dir`.
	pub fn create(scratch_dir: &Path, page_size: usize) -> VmResult<Self> {
		let file = tempfile::tempfile_in(scratch_dir).map_err(|source| VmError::ScratchDirUnusable {
			path: scratch_dir.to_path_buf(),
			source,
		})?;
		Ok(Self { file, page_size })
	}

	/// Writes `bytes` (exactly one page) at `page_index`.
	///
	/// # Panics
	/// Panics if `bytes.len() != page_size`.
	pub fn write_page(&self, page_index: u64, bytes: &[u8]) -> VmResult<()> {
		assert_eq!(bytes.len(), self.page_size, "write_page requires exactly one page");
		self.file
			.write_all_at(bytes, page_index * self.page_size as u64)
			.map_err(|source| VmError::BackingStoreIo { page_index, source })
	}

	/// Reads exactly one page at `page_index` into `out`.
	///
	/// # Panics
	/// Panics if `out.len() != page_size`.
	pub fn read_page(&self, page_index: u64, out: &mut [u8]) -> VmResult<()> {
		assert_eq!(out.len(), self.page_size, "read_page requires exactly one page");
		self.file
			.read_exact_at(out, page_index * self.page_size as u64)
			.map_err(|source| VmError::BackingStoreIo { page_index, source })
	}
}
