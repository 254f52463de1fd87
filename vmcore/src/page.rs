//! Page-size arithmetic shared by every component that slices the
//! arena into pages.

/// The page size assumed when a [`crate::config::Config`] does not
/// override it. Matches the common x86_64/AArch64 base page size; hosts
/// on architectures with a different base page size must set
/// [`crate::config::ConfigBuilder::page_size`] explicitly.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Rounds `bytes` up to the next multiple of `page_size`.
///
/// # Panics
/// Panics if `page_size` is zero.
#[inline]
#[must_use]
pub fn ceil_to_page(bytes: usize, page_size: usize) -> usize {
	assert_ne!(page_size, 0, "page_size must be nonzero");
	(bytes + page_size - 1) & !(page_size - 1)
}

/// Rounds `bytes` down to the previous multiple of `page_size`.
///
/// # Panics
/// Panics if `page_size` is zero.
#[inline]
#[must_use]
pub fn floor_to_page(bytes: usize, page_size: usize) -> usize {
	assert_ne!(page_size, 0, "page_size must be nonzero");
	bytes & !(page_size - 1)
}

/// Returns the number of pages needed to cover `bytes`.
#[inline]
#[must_use]
pub fn n_pages(bytes: usize, page_size: usize) -> usize {
	ceil_to_page(bytes, page_size) / page_size
}

/// Returns the host's native page size via `sysconf(_SC_PAGESIZE)`.
///
/// Falls back to [`DEFAULT_PAGE_SIZE`] if the syscall reports something
/// nonsensical (zero, or not a power of two).
#[must_use]
pub fn system_page_size() -> usize {
	// SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions and never
	// touches memory we own.
	let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
	if raw > 0 && (raw as usize).is_power_of_two() {
		raw as usize
	} else {
		DEFAULT_PAGE_SIZE
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ceil_rounds_up_to_page_boundary() {
		assert_eq!(ceil_to_page(0, 4096), 0);
		assert_eq!(ceil_to_page(1, 4096), 4096);
		assert_eq!(ceil_to_page(4096, 4096), 4096);
		assert_eq!(ceil_to_page(4097, 4096), 8192);
	}

	#[test]
	fn floor_rounds_down_to_page_boundary() {
		assert_eq!(floor_to_page(0, 4096), 0);
		assert_eq!(floor_to_page(4095, 4096), 0);
		assert_eq!(floor_to_page(4096, 4096), 4096);
		assert_eq!(floor_to_page(8191, 4096), 4096);
	}

	#[test]
	fn n_pages_counts_partial_pages() {
		assert_eq!(n_pages(0, 4096), 0);
		assert_eq!(n_pages(1, 4096), 1);
		assert_eq!(n_pages(4096, 4096), 1);
		assert_eq!(n_pages(4097, 4096), 2);
	}
}
