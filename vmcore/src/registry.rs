//! The object registry: maps `base_addr` to [`ObjectDescriptor`].
//!
//! Backed by a [`BTreeMap`] keyed by `base_addr`, which gives the
//! dispatcher's fault-address lookup a predecessor search in
//! `O(log n)` via [`BTreeMap::range`] — sub-logarithmic would require a
//! more specialized interval structure, but for the number of live
//! objects any realistic host creates, a balanced tree's `log n` is
//! indistinguishable from constant time on the fault path.

use std::{collections::BTreeMap, sync::Arc};

use vmcore_sync::RegistryLock;

use crate::descriptor::ObjectDescriptor;

/// Maps object base addresses to their descriptors.
#[derive(Default)]
pub struct Registry {
	by_base: RegistryLock<BTreeMap<usize, Arc<ObjectDescriptor>>>,
}

impl Registry {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a newly created object. Serialized against all other
	/// insertions and removals, and against concurrent lookups.
	pub fn insert(&self, desc: Arc<ObjectDescriptor>) {
		self.by_base.write().insert(desc.base_addr, desc);
	}

	/// Removes and returns the descriptor for `base_addr`, if present.
	pub fn remove(&self, base_addr: usize) -> Option<Arc<ObjectDescriptor>> {
		self.by_base.write().remove(&base_addr)
	}

	/// Looks up the descriptor owning `base_addr` exactly (host APIs
	/// call with a known base).
	#[must_use]
	pub fn get(&self, base_addr: usize) -> Option<Arc<ObjectDescriptor>> {
		self.by_base.read().get(&base_addr).cloned()
	}

	/// Finds the descriptor whose range contains `addr`, used by the
	/// dispatcher on the page-fault critical path.
	///
	/// Finds the predecessor key (the largest `base_addr <= addr`) and
	/// checks whether `addr` falls within that object's range.
	#[must_use]
	pub fn find_containing(&self, addr: usize) -> Option<Arc<ObjectDescriptor>> {
		let guard = self.by_base.read();
		let (_, desc) = guard.range(..=addr).next_back()?;
		if addr < desc.base_addr + desc.range_len() {
			Some(Arc::clone(desc))
		} else {
			None
		}
	}

	/// Returns a snapshot of every live descriptor, used by the eviction
	/// engine's victim scan.
	#[must_use]
	pub fn snapshot(&self) -> Vec<Arc<ObjectDescriptor>> {
		self.by_base.read().values().cloned().collect()
	}

	/// Number of live objects.
	#[must_use]
	pub fn len(&self) -> usize {
		self.by_base.read().len()
	}

	/// Whether the registry currently holds no objects.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.by_base.read().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{backing_store::BackingStore, source::{Callout, ElementKind, Source}};

	fn fake_descriptor(base_addr: usize, n_pages: usize) -> Arc<ObjectDescriptor> {
		let dir = std::env::temp_dir();
		let backing = BackingStore::create(&dir, 4096).unwrap();
		let source = Source {
			populate: Box::new(|_s: u64, _e: u64, _c: &Callout, _out: &mut [u8]| Ok(())),
			destructor: None,
			element_kind: ElementKind::Byte,
			n_elements: (n_pages * 4096) as u64,
			element_size: 1,
			header_bytes: 0,
			dims: None,
			min_load_elements: 4096,
		};
		Arc::new(ObjectDescriptor::new(base_addr, 4096, n_pages, source, backing))
	}

	#[test]
	fn exact_and_containing_lookups() {
		let reg = Registry::new();
		reg.insert(fake_descriptor(0x1000, 4));
		reg.insert(fake_descriptor(0x10000, 4));

		assert!(reg.get(0x1000).is_some());
		assert!(reg.get(0x2000).is_none());

		// 0x1000 + 2 pages = 0x3000, still inside the first object.
		assert_eq!(reg.find_containing(0x3000).unwrap().base_addr, 0x1000);
		// Falls in the gap between the two objects.
		assert!(reg.find_containing(0x8000).is_none());
		assert_eq!(reg.find_containing(0x10000).unwrap().base_addr, 0x10000);
	}

	#[test]
	fn remove_drops_from_registry() {
		let reg = Registry::new();
		reg.insert(fake_descriptor(0x1000, 1));
		assert_eq!(reg.len(), 1);
		assert!(reg.remove(0x1000).is_some());
		assert!(reg.is_empty());
		assert!(reg.remove(0x1000).is_none());
	}

	#[test]
	fn snapshot_returns_all_live_objects() {
		let reg = Registry::new();
		reg.insert(fake_descriptor(0x1000, 1));
		reg.insert(fake_descriptor(0x2000, 1));
		assert_eq!(reg.snapshot().len(), 2);
	}
}
