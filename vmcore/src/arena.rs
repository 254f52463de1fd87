//! The arena allocator: one large virtually-contiguous reservation,
//! carved into page-aligned segments for objects.
//!
//! Grounded in the same first-in-last-out spirit as a page-frame
//! allocator, but operating on variable-sized segments rather than
//! single frames, so free-list management here is a plain sorted
//! first-fit list rather than a FILO stack of uniform frames.

use std::sync::Arc;

use vmcore_sync::DescriptorLock;

use crate::{
	backend::PageBackend,
	error::{VmError, VmResult},
	page::ceil_to_page,
};

/// A single free (or, once allocated, formerly-free) run of the arena.
#[derive(Debug, Clone, Copy)]
struct Run {
	/// Offset from the arena base, in bytes.
	offset: usize,
	/// Length, in bytes.
	len:    usize,
}

/// Tracks free and allocated segments within one reserved arena.
pub struct Arena {
	backend:   Arc<dyn PageBackend>,
	base:      usize,
	total_len: usize,
	page_size: usize,
	free:      DescriptorLock<Vec<Run>>,
}

impl Arena {
	/// Reserves `total_len` bytes of address space via `backend` and
	/// registers the whole range with the kernel's fault-redirection
	/// facility. Called exactly once, by the lifecycle controller, at
	/// engine startup.
	pub fn reserve(backend: Arc<dyn PageBackend>, total_len: usize, page_size: usize) -> VmResult<Self> {
		let base = backend
			.reserve(total_len)
			.map_err(VmError::KernelUserfault)?;
		backend
			.register_range(base, total_len)
			.map_err(VmError::KernelUserfault)?;

		Ok(Self {
			backend,
			base,
			total_len,
			page_size,
			free: DescriptorLock::new(vec![Run {
				offset: 0,
				len:    total_len,
			}]),
		})
	}

	/// The arena's base address.
	#[must_use]
	pub fn base(&self) -> usize {
		self.base
	}

	/// Total reserved length, in bytes.
	#[must_use]
	pub fn total_len(&self) -> usize {
		self.total_len
	}

	/// Total free bytes currently available for allocation.
	#[must_use]
	pub fn free_bytes(&self) -> usize {
		self.free.lock().iter().map(|r| r.len).sum()
	}

	/// Allocates a page-aligned segment able to hold `requested_bytes`,
	/// using first-fit over the free-run list. Returns the segment's
	/// absolute base address.
	pub fn alloc_segment(&self, requested_bytes: usize) -> VmResult<usize> {
		let len = ceil_to_page(requested_bytes, self.page_size);
		let mut free = self.free.lock();

		let Some(idx) = free.iter().position(|r| r.len >= len) else {
			return Err(VmError::OutOfAddressSpace { requested: len });
		};

		let run = free[idx];
		if run.len == len {
			free.remove(idx);
		} else {
			free[idx] = Run {
				offset: run.offset + len,
				len:    run.len - len,
			};
		}

		Ok(self.base + run.offset)
	}

	/// Returns a previously-allocated segment to the free list and drops
	/// any residual mapping in its range, merging it with adjacent free
	/// runs to keep the list compact.
	///
	/// `len` must be exactly what was passed (after page rounding) to
	/// the matching [`Arena::alloc_segment`] call.
	pub fn free_segment(&self, segment_base: usize, len: usize) -> VmResult<()> {
		self.backend
			.drop_page(segment_base, len)
			.map_err(VmError::KernelUserfault)?;

		let offset = segment_base - self.base;
		let mut free = self.free.lock();
		let insert_at = free.partition_point(|r| r.offset < offset);
		free.insert(insert_at, Run { offset, len });

		// Merge with the following run first (stable index), then the
		// preceding one, so indices stay valid across both merges.
		if insert_at + 1 < free.len() && free[insert_at].offset + free[insert_at].len == free[insert_at + 1].offset {
			free[insert_at].len += free[insert_at + 1].len;
			free.remove(insert_at + 1);
		}
		if insert_at > 0 && free[insert_at - 1].offset + free[insert_at - 1].len == free[insert_at].offset {
			free[insert_at - 1].len += free[insert_at].len;
			free.remove(insert_at);
		}

		Ok(())
	}

	/// Releases the entire arena back to the OS. Called once, during
	/// final shutdown, after every object has been destroyed.
	pub fn release(&self) -> VmResult<()> {
		self.backend
			.release(self.base, self.total_len)
			.map_err(VmError::KernelUserfault)
	}
}

// Unit tests for this module live in `tests/arena.rs`: they need
// `vmcore-backend-mock`, which itself depends on `vmcore`, and pulling
// that dev-dependency into this crate's own unit tests would compile
// two distinct copies of `vmcore` (see that file for details).
