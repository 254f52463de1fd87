//! Arena allocator tests, run out-of-crate against the mock backend to
//! avoid pulling in two separate compiled copies of `vmcore` (the
//! `vmcore-backend-mock` dev-dependency already depends on `vmcore`
//! itself, so these tests can't live as unit tests inside the `vmcore`
//! crate alongside that same dependency).

use std::sync::Arc;

use vmcore::arena::Arena;
use vmcore::backend::PageBackend;
use vmcore::error::VmError;
use vmcore::page::ceil_to_page;
use vmcore_backend_mock::MockBackend;

fn arena(total: usize, page_size: usize) -> Arena {
	let backend: Arc<dyn PageBackend> = Arc::new(MockBackend::new(page_size));
	Arena::reserve(backend, total, page_size).unwrap()
}

#[test]
fn allocates_and_frees_exactly() {
	let a = arena(1 << 20, 4096);
	let initial_free = a.free_bytes();

	let seg = a.alloc_segment(10_000).unwrap();
	assert_eq!(seg % 4096, 0);
	assert_eq!(a.free_bytes(), initial_free - ceil_to_page(10_000, 4096));

	a.free_segment(seg, ceil_to_page(10_000, 4096)).unwrap();
	assert_eq!(a.free_bytes(), initial_free);
}

#[test]
fn out_of_address_space_when_exhausted() {
	let a = arena(8192, 4096);
	a.alloc_segment(8192).unwrap();
	let err = a.alloc_segment(4096).unwrap_err();
	assert!(matches!(err, VmError::OutOfAddressSpace { .. }));
}

#[test]
fn free_merges_adjacent_runs() {
	let a = arena(3 * 4096, 4096);
	let s1 = a.alloc_segment(4096).unwrap();
	let s2 = a.alloc_segment(4096).unwrap();
	let s3 = a.alloc_segment(4096).unwrap();
	assert_eq!(a.free_bytes(), 0);

	a.free_segment(s1, 4096).unwrap();
	a.free_segment(s3, 4096).unwrap();
	a.free_segment(s2, 4096).unwrap();

	// Everything should have merged back into one run covering the
	// whole arena.
	assert_eq!(a.free_bytes(), 3 * 4096);
	let seg = a.alloc_segment(3 * 4096).unwrap();
	assert_eq!(seg, a.base());
}
