//! The eviction engine: keeps total resident bytes under the configured
//! budget by reclaiming the coldest pages, flushing dirty ones to their
//! backing store first.
//!
//! Runs as a periodic background tick (mirroring the worker-pool/ticker
//! shape the rest of this workspace uses for its own background work)
//! rather than synchronously on the install path: install only accounts
//! bytes in, the tick later brings the total back under budget. This
//! keeps the fault path free of cross-object locking, since reclaiming
//! a victim page on another object requires that object's own lock.

use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc,
};

use crate::{backend::PageBackend, descriptor::ObjectDescriptor, error::VmResult, registry::Registry};

/// Tracks global resident-byte usage and reclaims pages once it crosses
/// [`crate::config::Config::residency_budget`].
pub struct EvictionEngine {
	budget: usize,
	page_size: usize,
	resident_bytes: AtomicUsize,
}

impl EvictionEngine {
	/// Creates an eviction engine enforcing `budget` bytes resident,
	/// measured in units of `page_size`.
	#[must_use]
	pub fn new(budget: usize, page_size: usize) -> Self {
		Self {
			budget,
			page_size,
			resident_bytes: AtomicUsize::new(0),
		}
	}

	/// Records that `n_pages` pages were just installed.
	pub fn account_install(&self, n_pages: usize, page_size: usize) {
		self.resident_bytes
			.fetch_add(n_pages * page_size, Ordering::Relaxed);
	}

	/// Records that `n_pages` pages were just reclaimed.
	fn account_evict(&self, n_pages: usize) {
		self.resident_bytes
			.fetch_sub(n_pages * self.page_size, Ordering::Relaxed);
	}

	/// Current global resident-byte count.
	#[must_use]
	pub fn resident_bytes(&self) -> usize {
		self.resident_bytes.load(Ordering::Relaxed)
	}

	/// Runs one eviction pass: if resident bytes are over budget, walks
	/// the registry's objects oldest-page-first (per object, by
	/// `lru_epoch`) and reclaims pages until back under budget or every
	/// object has been scanned once.
	///
	/// Objects whose bookkeeping lock is currently held (e.g. by an
	/// in-flight populate) are skipped for this tick rather than waited
	/// on, so the victim scan never blocks the fault path.
	pub fn run_tick(&self, registry: &Registry, backend: &dyn PageBackend) -> VmResult<()> {
		let mut over = self.resident_bytes().saturating_sub(self.budget);
		if over == 0 {
			return Ok(());
		}

		for desc in registry.snapshot() {
			if over == 0 {
				break;
			}
			over = self.evict_from(&desc, over, backend)?;
		}

		Ok(())
	}

	/// Evicts pages from one object until `want_bytes` have been
	/// reclaimed or the object has no more evictable (non-header)
	/// resident pages, returning the remaining bytes still wanted.
	fn evict_from(&self, desc: &Arc<ObjectDescriptor>, want_bytes: usize, backend: &dyn PageBackend) -> VmResult<usize> {
		let Some(mut state) = desc.try_lock_state_for(std::time::Duration::from_millis(0)) else {
			return Ok(want_bytes);
		};

		let header_pages = crate::page::n_pages(desc.header_bytes, desc.page_size);
		let mut victims: Vec<usize> = (header_pages..desc.n_pages)
			.filter(|&p| state.residency.get(p))
			.collect();
		victims.sort_by_key(|&p| state.lru_epoch[p]);

		let mut remaining = want_bytes;
		for page in victims.drain(..) {
			if remaining == 0 {
				break;
			}

			if state.dirty.get(page) {
				// The page was installed from a write-triggered fault (see
				// `crate::populator::handle_fault`); its current bytes have
				// never been written to the backing store.
				let addr = desc.base_addr + page * desc.page_size;
				// The page is live in our own address space (it was
				// installed into this process's mapping, not a remote
				// one), so the current bytes are read directly rather
				// than through the backend seam.
				// SAFETY: `addr` falls within a range this engine
				// registered and installed a page for, so `page_size`
				// bytes starting there are mapped and readable in this
				// process; the bookkeeping lock held here excludes any
				// concurrent drop or re-install of the same page.
				let live = unsafe { std::slice::from_raw_parts(addr as *const u8, desc.page_size) };
				desc.backing.write_page(page as u64, live)?;
				state.ever_dirty.set(page);
				state.dirty.clear(page);
			}

			backend
				.drop_page(desc.base_addr + page * desc.page_size, desc.page_size)
				.map_err(crate::error::VmError::KernelUserfault)?;
			state.residency.clear(page);
			self.account_evict(1);
			remaining = remaining.saturating_sub(desc.page_size);
		}

		Ok(remaining)
	}

	/// Spawns the periodic background tick thread. The thread exits once
	/// `shutdown` is observed `true`.
	pub fn spawn_background(
		engine: Arc<Self>,
		registry: Arc<Registry>,
		backend: Arc<dyn PageBackend>,
		interval: std::time::Duration,
		shutdown: Arc<AtomicBool>,
	) -> std::thread::JoinHandle<()> {
		std::thread::spawn(move || {
			while !shutdown.load(Ordering::Acquire) {
				std::thread::sleep(interval);
				if let Err(err) = engine.run_tick(&registry, backend.as_ref()) {
					log::warn!("eviction tick failed: {err}");
				}
			}
		})
	}
}

// Unit tests for this module live in `tests/eviction.rs`: they need
// `vmcore-backend-mock`, which itself depends on `vmcore`, and pulling
// that dev-dependency into this crate's own unit tests would compile
// two distinct copies of `vmcore` (see that file for details).
