//! Fault-handling tests that exercise the mock backend, run out-of-crate
//! to avoid pulling in two separate compiled copies of `vmcore` (the
//! `vmcore-backend-mock` dev-dependency already depends on `vmcore`
//! itself, so these tests can't live as unit tests inside the `vmcore`
//! crate alongside that same dependency).

use std::sync::Arc;

use vmcore::backing_store::BackingStore;
use vmcore::descriptor::ObjectDescriptor;
use vmcore::eviction::EvictionEngine;
use vmcore::populator::handle_fault;
use vmcore::source::{Callout, ElementKind, PopulateSource, Source};
use vmcore_backend_mock::MockBackend;

struct SeqSource;
impl PopulateSource for SeqSource {
	fn populate(
		&self,
		start_elem: u64,
		end_elem: u64,
		_callout: &Callout,
		out: &mut [u8],
	) -> Result<(), i32> {
		for (i, elem) in (start_elem..end_elem).enumerate() {
			out[i * 4..i * 4 + 4].copy_from_slice(&(elem as u32).to_le_bytes());
		}
		Ok(())
	}
}

#[test]
fn fault_entirely_within_header_installs_zero_page() {
	let page_size = 4096;
	let header_bytes = 4096;
	let n_pages = 10;
	let backend = MockBackend::new(page_size);
	let base = backend.reserve(n_pages * page_size).unwrap();
	let backing = BackingStore::create(&std::env::temp_dir(), page_size).unwrap();
	let source = Source {
		populate: Box::new(SeqSource),
		destructor: None,
		element_kind: ElementKind::Integer,
		n_elements: ((n_pages * page_size - header_bytes) / 4) as u64,
		element_size: 4,
		header_bytes,
		dims: None,
		min_load_elements: 256,
	};
	let d = Arc::new(ObjectDescriptor::new(base, page_size, n_pages, source, backing));
	let eviction = EvictionEngine::new(1 << 30, page_size);

	// Page 0 is entirely header; faulting there must never call
	// populate, but it must still install a page so the faulting
	// thread unblocks.
	handle_fault(&d, 0, false, &backend, &eviction);

	assert!(!d.has_error());
	assert_eq!(backend.read_installed(base, page_size), vec![0u8; page_size]);
}

#[test]
fn fault_straddling_header_boundary_populates_only_the_data_portion() {
	let page_size = 4096;
	let header_bytes = 16;
	let n_pages = 1;
	let backend = MockBackend::new(page_size);
	let base = backend.reserve(n_pages * page_size).unwrap();
	let backing = BackingStore::create(&std::env::temp_dir(), page_size).unwrap();
	let n_elements = ((n_pages * page_size - header_bytes) / 4) as u64;
	let source = Source {
		populate: Box::new(SeqSource),
		destructor: None,
		element_kind: ElementKind::Integer,
		n_elements,
		element_size: 4,
		header_bytes,
		dims: None,
		min_load_elements: n_elements,
	};
	let d = Arc::new(ObjectDescriptor::new(base, page_size, n_pages, source, backing));
	let eviction = EvictionEngine::new(1 << 30, page_size);

	handle_fault(&d, 0, false, &backend, &eviction);

	assert!(!d.has_error());
	let installed = backend.read_installed(base, page_size);
	assert_eq!(&installed[..header_bytes], &[0u8; 16], "header prefix must stay zero");
	assert_eq!(&installed[header_bytes..header_bytes + 4], &0u32.to_le_bytes(), "first element follows the header immediately");
}
