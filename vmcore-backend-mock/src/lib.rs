//! An in-process [`PageBackend`] implementation: real `mmap` reservations
//! so installed pages behave like real memory (readable by address), but
//! fault delivery is a plain channel instead of `userfaultfd(2)`. Lets
//! the engine and its test harness run fully portably, without
//! `/dev/userfaultfd` access.

use std::collections::HashSet;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use vmcore::backend::{BackendError, FaultEvent, PageBackend};

/// The in-process mock backend.
pub struct MockBackend {
	page_size: usize,
	regions:   Mutex<Vec<(usize, usize)>>,
	installed: Mutex<HashSet<usize>>,
	install_cv: Condvar,
	fault_tx:  Mutex<Option<Sender<FaultEvent>>>,
	fault_rx:  Receiver<FaultEvent>,
}

impl MockBackend {
	/// Creates a mock backend whose bitmaps and install units are sized
	/// in units of `page_size`.
	#[must_use]
	pub fn new(page_size: usize) -> Self {
		let (tx, rx) = unbounded();
		Self {
			page_size,
			regions: Mutex::new(Vec::new()),
			installed: Mutex::new(HashSet::new()),
			install_cv: Condvar::new(),
			fault_tx: Mutex::new(Some(tx)),
			fault_rx: rx,
		}
	}

	/// Simulates a host touch of `addr`: if the covering page is already
	/// installed, returns immediately; otherwise delivers a
	/// [`FaultEvent`] to whatever is draining [`PageBackend::await_fault`]
	/// and blocks until a matching [`PageBackend::install_page`] call
	/// marks it resident. Used by the test harness in place of an actual
	/// memory access.
	pub fn touch_for_test(&self, addr: usize, write: bool) -> Result<(), BackendError> {
		let page = addr & !(self.page_size - 1);

		let mut installed = self.installed.lock();
		if installed.contains(&page) {
			return Ok(());
		}

		let tx = self
			.fault_tx
			.lock()
			.clone()
			.ok_or(BackendError::ShuttingDown)?;
		tx.send(FaultEvent { addr: page, write })
			.map_err(|_| BackendError::ShuttingDown)?;

		while !installed.contains(&page) {
			self.install_cv.wait(&mut installed);
		}
		Ok(())
	}

	/// Reads back the current bytes of the (already installed) page
	/// covering `addr`, for test assertions.
	///
	/// # Panics
	/// Panics if the page is not currently installed.
	#[must_use]
	pub fn read_installed(&self, addr: usize, len: usize) -> Vec<u8> {
		let page = addr & !(self.page_size - 1);
		assert!(
			self.installed.lock().contains(&page),
			"read_installed called on a page that was never installed"
		);
		// SAFETY: the page is marked installed only after `install_page`
		// has written `page_size` readable bytes there via the real
		// `mmap` reservation backing this region.
		unsafe { std::slice::from_raw_parts(addr as *const u8, len) }.to_vec()
	}
}

impl PageBackend for MockBackend {
	fn reserve(&self, len: usize) -> Result<usize, BackendError> {
		// SAFETY: a fixed-size anonymous, non-reserving, inaccessible
		// mapping; `addr` is null so the kernel chooses the location, and
		// no existing mapping is disturbed.
		let addr = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				len,
				libc::PROT_NONE,
				libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
				-1,
				0,
			)
		};
		if addr == libc::MAP_FAILED {
			return Err(BackendError::ReserveFailed {
				len,
				source: std::io::Error::last_os_error(),
			});
		}
		let base = addr as usize;
		self.regions.lock().push((base, len));
		Ok(base)
	}

	fn register_range(&self, _base: usize, _len: usize) -> Result<(), BackendError> {
		Ok(())
	}

	fn await_fault(&self) -> Result<Option<FaultEvent>, BackendError> {
		match self.fault_rx.recv() {
			Ok(event) => Ok(Some(event)),
			Err(_) => Ok(None),
		}
	}

	fn install_page(&self, addr: usize, data: &[u8]) -> Result<(), BackendError> {
		assert_eq!(data.len() % self.page_size, 0, "install_page requires whole pages");
		// SAFETY: `addr` falls within a region reserved by `reserve`
		// above, and `mprotect` here only widens access on memory we
		// exclusively manage.
		let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, data.len(), libc::PROT_READ | libc::PROT_WRITE) };
		if rc != 0 {
			return Err(BackendError::InstallFailed {
				addr,
				source: std::io::Error::last_os_error(),
			});
		}
		// SAFETY: the range was just made writable above and is exactly
		// `data.len()` bytes, matching `data`.
		unsafe {
			std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len());
		}

		let mut installed = self.installed.lock();
		for p in (addr..addr + data.len()).step_by(self.page_size) {
			installed.insert(p);
		}
		self.install_cv.notify_all();
		Ok(())
	}

	fn install_zero_pages(&self, addr: usize, n_pages: usize, page_size: usize) -> Result<(), BackendError> {
		let zeros = vec![0u8; n_pages * page_size];
		self.install_page(addr, &zeros)
	}

	fn drop_page(&self, addr: usize, len: usize) -> Result<(), BackendError> {
		// SAFETY: `addr` falls within a region reserved by `reserve`.
		let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, libc::PROT_NONE) };
		if rc != 0 {
			return Err(BackendError::DropFailed {
				addr,
				source: std::io::Error::last_os_error(),
			});
		}
		let mut installed = self.installed.lock();
		for p in (addr..addr + len).step_by(self.page_size) {
			installed.remove(&p);
		}
		Ok(())
	}

	fn release(&self, base: usize, len: usize) -> Result<(), BackendError> {
		// SAFETY: `base`/`len` match a prior `reserve` call exactly; no
		// other live reference into this range remains once the arena
		// calls this.
		let rc = unsafe { libc::munmap(base as *mut libc::c_void, len) };
		if rc != 0 {
			return Err(BackendError::DropFailed {
				addr: base,
				source: std::io::Error::last_os_error(),
			});
		}
		self.regions.lock().retain(|&(b, _)| b != base);
		Ok(())
	}

	fn shutdown(&self) {
		self.fault_tx.lock().take();
	}
}

impl Drop for MockBackend {
	fn drop(&mut self) {
		for (base, len) in self.regions.lock().drain(..) {
			// SAFETY: these are exactly the regions this backend itself
			// reserved via `mmap` and has not yet released.
			unsafe {
				libc::munmap(base as *mut libc::c_void, len);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn install_then_read_round_trips() {
		let backend = MockBackend::new(4096);
		let base = backend.reserve(3 * 4096).unwrap();
		let page = vec![7u8; 4096];
		backend.install_page(base, &page).unwrap();
		assert_eq!(backend.read_installed(base, 4096), page);
		backend.release(base, 3 * 4096).unwrap();
	}

	#[test]
	fn touch_delivers_fault_and_unblocks_on_install() {
		let backend = std::sync::Arc::new(MockBackend::new(4096));
		let base = backend.reserve(4096).unwrap();

		let waiter = {
			let backend = std::sync::Arc::clone(&backend);
			std::thread::spawn(move || backend.touch_for_test(base, false))
		};

		let event = backend.await_fault().unwrap().unwrap();
		assert_eq!(event.addr, base);
		backend.install_page(base, &vec![0u8; 4096]).unwrap();

		waiter.join().unwrap().unwrap();
		backend.release(base, 4096).unwrap();
	}

	#[test]
	fn shutdown_unblocks_await_fault() {
		let backend = MockBackend::new(4096);
		backend.shutdown();
		assert!(backend.await_fault().unwrap().is_none());
	}
}
