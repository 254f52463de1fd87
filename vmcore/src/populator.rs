//! Turns one page fault into an install: computes the element range,
//! calls the user populate callback (or replays the backing store),
//! and installs the result.

use std::sync::{atomic::Ordering, Arc};

use crate::{
	backend::PageBackend,
	descriptor::ObjectDescriptor,
	error::{VmError, VmResult},
	eviction::EvictionEngine,
	page::{ceil_to_page, floor_to_page},
	source::Callout,
};

/// Computes the install unit `[byte_lo, byte_hi)` for a fault at
/// `page_index`: round the faulting page down to a page boundary, then
/// extend by `max(page_size, ceil_to_page(min_load_elements * element_size))`,
/// clamped to the object's end.
fn install_range(desc: &ObjectDescriptor, page_index: usize) -> (usize, usize) {
	let page_size = desc.page_size;
	let byte_lo = floor_to_page(page_index * page_size, page_size);
	let min_unit = ceil_to_page(
		(desc.min_load_elements as usize).saturating_mul(desc.element_size),
		page_size,
	)
	.max(page_size);
	let byte_hi = (byte_lo + min_unit).min(desc.range_len());
	(byte_lo, byte_hi)
}

/// Converts a byte range within the object into the element range the
/// populate callback is asked to fill, accounting for the host header.
fn element_range(desc: &ObjectDescriptor, byte_lo: usize, byte_hi: usize) -> (u64, u64) {
	let lo = byte_lo.saturating_sub(desc.header_bytes) / desc.element_size;
	let hi = byte_hi.saturating_sub(desc.header_bytes) / desc.element_size;
	(lo as u64, hi as u64)
}

/// Services one fault at `(desc, page_index)` against `backend`,
/// installing either populated bytes, bytes replayed from the backing
/// store, or (on error) a zero page, and always leaving the fault
/// answered.
///
/// `is_write` is the triggering fault's write flag: when set, the
/// installed pages are marked dirty immediately, since the kernel only
/// reports missing-page faults once per page and gives no signal for a
/// second write to an already-resident page. A page first touched by a
/// read and written to only afterward is not observed this way; full
/// write tracking would need the backend to re-arm write-protection on
/// every install, which no `PageBackend` implementation here does.
pub fn handle_fault(
	desc: &Arc<ObjectDescriptor>,
	page_index: usize,
	is_write: bool,
	backend: &dyn PageBackend,
	eviction: &EvictionEngine,
) {
	desc.inflight.fetch_add(1, Ordering::AcqRel);
	let result = handle_fault_inner(desc, page_index, is_write, backend, eviction);
	desc.inflight.fetch_sub(1, Ordering::AcqRel);

	if let Err(err) = result {
		log::error!(
			"populate failed for object {:#x} page {page_index}: {err}",
			desc.base_addr
		);
		desc.set_error(&err);
		let (byte_lo, byte_hi) = install_range(desc, page_index);
		let n_pages = (byte_hi - byte_lo) / desc.page_size;
		if let Err(backend_err) =
			backend.install_zero_pages(desc.base_addr + byte_lo, n_pages, desc.page_size)
		{
			log::error!(
				"failed to install zero page after populate failure on object {:#x}: {backend_err}",
				desc.base_addr
			);
		}
	}
}

fn handle_fault_inner(
	desc: &Arc<ObjectDescriptor>,
	page_index: usize,
	is_write: bool,
	backend: &dyn PageBackend,
	eviction: &EvictionEngine,
) -> VmResult<()> {
	let (byte_lo, byte_hi) = install_range(desc, page_index);
	let page_lo = byte_lo / desc.page_size;
	let page_hi = byte_hi / desc.page_size;

	// `header_bytes` need only be a whole number of elements, not a whole
	// number of pages (see `Source::validate`), so the install unit can
	// straddle the boundary: part header, part data. The header portion
	// is always left zeroed in `scratch`; only bytes at or past
	// `header_bytes` are ever populated or replayed. The fault is still
	// answered even when the whole unit falls inside the header, since a
	// host thread touching the header for the first time must unblock
	// too.
	let mut scratch = vec![0u8; byte_hi - byte_lo];
	let data_lo = byte_lo.max(desc.header_bytes);

	{
		let mut state = desc.lock_state();

		if state.residency.get(page_lo) {
			// Another thread raced us and already installed this page;
			// the kernel will retry the faulting instruction.
			return Ok(());
		}

		if data_lo < byte_hi {
			let needs_replay = state.ever_dirty.any_in_range(page_lo..page_hi);
			if needs_replay {
				for p in page_lo..page_hi {
					let off = (p - page_lo) * desc.page_size;
					if state.ever_dirty.get(p) {
						desc.backing
							.read_page(p as u64, &mut scratch[off..off + desc.page_size])?;
					}
				}
			} else {
				let (start_elem, end_elem) = element_range(desc, data_lo, byte_hi);
				let data_off = data_lo - byte_lo;
				desc.source
					.populate(start_elem, end_elem, &Callout::default(), &mut scratch[data_off..])
					.map_err(|status| VmError::PopulateFailed {
						start_elem,
						end_elem,
						status,
					})?;
			}
		}

		backend
			.install_page(desc.base_addr + byte_lo, &scratch)
			.map_err(VmError::KernelUserfault)?;

		state.residency.set_range(page_lo..page_hi);
		if is_write {
			state.dirty.set_range(page_lo..page_hi);
		}
		let epoch = desc.next_epoch();
		for p in page_lo..page_hi {
			state.lru_epoch[p] = epoch;
		}
		eviction.account_install(page_hi - page_lo, desc.page_size);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	struct SeqSource;
	impl crate::source::PopulateSource for SeqSource {
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

	fn desc(page_size: usize, n_pages: usize, header_bytes: usize, min_load_elements: u64) -> Arc<ObjectDescriptor> {
		let backing = crate::backing_store::BackingStore::create(&std::env::temp_dir(), page_size).unwrap();
		let source = crate::source::Source {
			populate: Box::new(SeqSource),
			destructor: None,
			element_kind: crate::source::ElementKind::Integer,
			n_elements: ((n_pages * page_size - header_bytes) / 4) as u64,
			element_size: 4,
			header_bytes,
			dims: None,
			min_load_elements,
		};
		Arc::new(ObjectDescriptor::new(0x1000, page_size, n_pages, source, backing))
	}

	#[test]
	fn install_range_rounds_to_min_load_unit() {
		let d = desc(4096, 100, 0, 4096); // min_load_elements * 4 bytes = 16384 = 4 pages
		let (lo, hi) = install_range(&d, 5);
		assert_eq!(lo, 5 * 4096); // byte_lo floors the fault to its own page boundary
		assert_eq!((hi - lo) / 4096, 4); // extended forward by the install unit
	}

	#[test]
	fn element_range_accounts_for_header() {
		let d = desc(4096, 10, 4096, 1024);
		// byte range [4096, 8192) is the first data page, right after the header.
		let (lo, hi) = element_range(&d, 4096, 8192);
		assert_eq!(lo, 0);
		assert_eq!(hi, 1024);
	}
}
