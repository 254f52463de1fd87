//! Eviction engine tests, run out-of-crate against the mock backend to
//! avoid pulling in two separate compiled copies of `vmcore` (the
//! `vmcore-backend-mock` dev-dependency already depends on `vmcore`
//! itself, so these tests can't live as unit tests inside the `vmcore`
//! crate alongside that same dependency).

use std::sync::Arc;

use vmcore::backend::PageBackend;
use vmcore::backing_store::BackingStore;
use vmcore::descriptor::ObjectDescriptor;
use vmcore::eviction::EvictionEngine;
use vmcore::registry::Registry;
use vmcore::source::{Callout, ElementKind, Source};
use vmcore_backend_mock::MockBackend;

fn desc(base: usize, n_pages: usize, page_size: usize) -> Arc<ObjectDescriptor> {
	let backing = BackingStore::create(&std::env::temp_dir(), page_size).unwrap();
	let source = Source {
		populate: Box::new(|_s: u64, _e: u64, _c: &Callout, _out: &mut [u8]| Ok(())),
		destructor: None,
		element_kind: ElementKind::Byte,
		n_elements: (n_pages * page_size) as u64,
		element_size: 1,
		header_bytes: 0,
		dims: None,
		min_load_elements: page_size as u64,
	};
	Arc::new(ObjectDescriptor::new(base, page_size, n_pages, source, backing))
}

#[test]
fn no_op_when_under_budget() {
	let engine = EvictionEngine::new(1 << 20, 4096);
	let backend = MockBackend::new(4096);
	let registry = Registry::new();
	engine.run_tick(&registry, &backend).unwrap();
	assert_eq!(engine.resident_bytes(), 0);
}

#[test]
fn evicts_oldest_pages_first() {
	let engine = EvictionEngine::new(0, 4096);
	let backend = MockBackend::new(4096);
	let registry = Registry::new();

	let base = backend.reserve(4 * 4096).unwrap();
	let d = desc(base, 4, 4096);
	{
		let mut state = d.lock_state();
		state.residency.set_range(0..4);
		state.lru_epoch = vec![3, 1, 4, 2];
	}
	engine.account_install(4, 4096);
	registry.insert(Arc::clone(&d));

	engine.run_tick(&registry, &backend).unwrap();

	// Budget is zero, so every resident page is a candidate; all
	// four should be reclaimed in one tick.
	assert_eq!(engine.resident_bytes(), 0);
	let state = d.lock_state();
	assert_eq!(state.residency.popcount(), 0);
}

#[test]
fn header_pages_are_never_evicted() {
	let engine = EvictionEngine::new(0, 4096);
	let backend = MockBackend::new(4096);
	let registry = Registry::new();

	let backing = BackingStore::create(&std::env::temp_dir(), 4096).unwrap();
	let source = Source {
		populate: Box::new(|_s: u64, _e: u64, _c: &Callout, _out: &mut [u8]| Ok(())),
		destructor: None,
		element_kind: ElementKind::Byte,
		n_elements: 4096,
		element_size: 1,
		header_bytes: 4096,
		dims: None,
		min_load_elements: 4096,
	};
	let base = backend.reserve(2 * 4096).unwrap();
	let d = Arc::new(ObjectDescriptor::new(base, 4096, 2, source, backing));
	{
		let mut state = d.lock_state();
		state.residency.set_range(0..2);
	}
	engine.account_install(2, 4096);
	registry.insert(Arc::clone(&d));

	engine.run_tick(&registry, &backend).unwrap();

	let state = d.lock_state();
	assert!(state.residency.get(0), "header page must stay resident");
	assert!(!state.residency.get(1));
}

#[test]
fn non_page_aligned_header_protects_every_page_it_spans() {
	let engine = EvictionEngine::new(0, 4096);
	let backend = MockBackend::new(4096);
	let registry = Registry::new();

	// header_bytes = 5000 spans pages 0 and 1 (page 1 only up to byte
	// 5000); page 2 is the only pure-data page.
	let backing = BackingStore::create(&std::env::temp_dir(), 4096).unwrap();
	let source = Source {
		populate: Box::new(|_s: u64, _e: u64, _c: &Callout, _out: &mut [u8]| Ok(())),
		destructor: None,
		element_kind: ElementKind::Byte,
		n_elements: 4096,
		element_size: 1,
		header_bytes: 5000,
		dims: None,
		min_load_elements: 4096,
	};
	let base = backend.reserve(3 * 4096).unwrap();
	let d = Arc::new(ObjectDescriptor::new(base, 4096, 3, source, backing));
	{
		let mut state = d.lock_state();
		state.residency.set_range(0..3);
	}
	engine.account_install(3, 4096);
	registry.insert(Arc::clone(&d));

	engine.run_tick(&registry, &backend).unwrap();

	let state = d.lock_state();
	assert!(state.residency.get(0), "page 0 is entirely header");
	assert!(state.residency.get(1), "page 1 still holds header bytes up to 5000");
	assert!(!state.residency.get(2), "page 2 is pure data and evictable");
}
