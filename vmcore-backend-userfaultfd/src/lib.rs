//! The production [`PageBackend`]: Linux `userfaultfd(2)` via the
//! [`userfaultfd`] crate.
//!
//! An object's range is reserved with a plain anonymous `mmap`, made
//! accessible, then registered with the kernel's userfault file
//! descriptor so that any access to a page the engine has not yet
//! installed blocks the accessing thread and queues a
//! [`userfaultfd::Event::Pagefault`] instead of raising `SIGSEGV`.

#![cfg(target_os = "linux")]

use std::{
	io,
	os::fd::{AsRawFd, RawFd},
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex,
	},
};

use userfaultfd::{Event, ReadWrite, Uffd, UffdBuilder};
use vmcore::backend::{BackendError, FaultEvent, PageBackend};

/// The `userfaultfd`-backed page backend.
pub struct UserfaultfdBackend {
	uffd:          Uffd,
	regions:       Mutex<Vec<(usize, usize)>>,
	shut_down:     AtomicBool,
	/// Read end of a self-pipe used to wake a thread parked in
	/// [`PageBackend::await_fault`]'s `poll` once [`PageBackend::shutdown`]
	/// has written to the write end. `userfaultfd(2)` descriptors are not
	/// sockets, so `shutdown(2)` cannot be used to unblock a reader the
	/// way it can for a socket fd; a self-pipe polled alongside the uffd
	/// is the standard way to interrupt a blocking read on an arbitrary
	/// fd from another thread.
	wake_read:     RawFd,
	wake_write:    RawFd,
}

impl UserfaultfdBackend {
	/// Opens the userfault file descriptor. Requires either
	/// `CAP_SYS_PTRACE` or `/proc/sys/vm/unprivileged_userfaultfd` set to
	/// `1`, per `userfaultfd(2)`.
	pub fn new() -> Result<Self, BackendError> {
		let uffd = UffdBuilder::new()
			.close_on_exec(true)
			.non_blocking(false)
			.user_mode_only(true)
			.create()
			.map_err(|source| BackendError::ReserveFailed {
				len: 0,
				source: io::Error::new(io::ErrorKind::Other, source),
			})?;

		let mut fds = [0 as RawFd; 2];
		// SAFETY: `fds` is a valid, appropriately-sized output array.
		let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
		if rc != 0 {
			return Err(BackendError::ReserveFailed {
				len: 0,
				source: io::Error::last_os_error(),
			});
		}

		Ok(Self {
			uffd,
			regions: Mutex::new(Vec::new()),
			shut_down: AtomicBool::new(false),
			wake_read: fds[0],
			wake_write: fds[1],
		})
	}
}

impl Drop for UserfaultfdBackend {
	fn drop(&mut self) {
		// SAFETY: both ends were opened by this struct's constructor and
		// are not otherwise closed.
		unsafe {
			libc::close(self.wake_read);
			libc::close(self.wake_write);
		}
	}
}

impl PageBackend for UserfaultfdBackend {
	fn reserve(&self, len: usize) -> Result<usize, BackendError> {
		// SAFETY: a fixed-size anonymous mapping at a kernel-chosen
		// address; no existing mapping is disturbed.
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
				source: io::Error::last_os_error(),
			});
		}
		let base = addr as usize;
		self.regions.lock().unwrap().push((base, len));
		Ok(base)
	}

	fn register_range(&self, base: usize, len: usize) -> Result<(), BackendError> {
		// SAFETY: `base`/`len` was just reserved by `reserve` above and is
		// not yet accessed by anything else.
		let rc = unsafe { libc::mprotect(base as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_WRITE) };
		if rc != 0 {
			return Err(BackendError::RegisterFailed {
				base,
				base_plus_len: base + len,
				source: io::Error::last_os_error(),
			});
		}

		// SAFETY: `base`/`len` describe a mapping this process owns and
		// that will not be unmapped before `release` unregisters it.
		unsafe { self.uffd.register(base as *mut libc::c_void, len) }.map_err(|source| {
			BackendError::RegisterFailed {
				base,
				base_plus_len: base + len,
				source: io::Error::new(io::ErrorKind::Other, source),
			}
		})?;
		Ok(())
	}

	fn await_fault(&self) -> Result<Option<FaultEvent>, BackendError> {
		loop {
			if self.shut_down.load(Ordering::Acquire) {
				return Ok(None);
			}

			let mut fds = [
				libc::pollfd { fd: self.uffd.as_raw_fd(), events: libc::POLLIN, revents: 0 },
				libc::pollfd { fd: self.wake_read, events: libc::POLLIN, revents: 0 },
			];
			// SAFETY: `fds` is a valid array of the length passed; `-1`
			// blocks indefinitely until either fd is readable.
			let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
			if rc < 0 {
				let err = io::Error::last_os_error();
				if err.kind() == io::ErrorKind::Interrupted {
					continue;
				}
				return Err(BackendError::AwaitFaultFailed(err));
			}

			if fds[1].revents & libc::POLLIN != 0 {
				return Ok(None);
			}
			if fds[0].revents & libc::POLLIN == 0 {
				continue;
			}

			match self.uffd.read_event() {
				Ok(Some(Event::Pagefault { addr, rw, .. })) => {
					return Ok(Some(FaultEvent {
						addr:  addr as usize,
						write: rw == ReadWrite::Write,
					}));
				}
				// Remap/remove/unmap notifications don't apply here since
				// the engine never remaps a registered range in place;
				// skip and keep waiting for the next event.
				Ok(Some(_)) => continue,
				Ok(None) => return Ok(None),
				Err(source) => {
					if self.shut_down.load(Ordering::Acquire) {
						return Ok(None);
					}
					return Err(BackendError::AwaitFaultFailed(io::Error::new(io::ErrorKind::Other, source)));
				}
			}
		}
	}

	fn install_page(&self, addr: usize, data: &[u8]) -> Result<(), BackendError> {
		// SAFETY: `addr` is a registered, currently-unpopulated range at
		// least `data.len()` bytes long; `data` is readable for its own
		// length. `wake = true` unblocks any thread already faulted here.
		unsafe {
			self.uffd
				.copy(data.as_ptr().cast(), addr as *mut libc::c_void, data.len(), true)
		}
		.map(|_| ())
		.map_err(|source| BackendError::InstallFailed {
			addr,
			source: io::Error::new(io::ErrorKind::Other, source),
		})
	}

	fn install_zero_pages(&self, addr: usize, n_pages: usize, page_size: usize) -> Result<(), BackendError> {
		// SAFETY: `addr` is a registered, currently-unpopulated range of
		// at least `n_pages * page_size` bytes.
		unsafe { self.uffd.zeropage(addr as *mut libc::c_void, n_pages * page_size, true) }
			.map(|_| ())
			.map_err(|source| BackendError::InstallFailed {
				addr,
				source: io::Error::new(io::ErrorKind::Other, source),
			})
	}

	fn drop_page(&self, addr: usize, len: usize) -> Result<(), BackendError> {
		// SAFETY: `addr`/`len` fall within a region this backend owns;
		// `MADV_DONTNEED` only discards physical backing, the virtual
		// mapping and its userfaultfd registration are unaffected.
		let rc = unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_DONTNEED) };
		if rc != 0 {
			return Err(BackendError::DropFailed {
				addr,
				source: io::Error::last_os_error(),
			});
		}
		Ok(())
	}

	fn release(&self, base: usize, len: usize) -> Result<(), BackendError> {
		// SAFETY: `base`/`len` match a prior `reserve`/`register_range`
		// pair exactly, and every object within the range has already
		// been destroyed by the time the lifecycle controller calls this.
		if let Err(source) = unsafe { self.uffd.unregister(base as *mut libc::c_void, len) } {
			log::warn!("failed to unregister range [{base:#x}, {:#x}): {source}", base + len);
		}
		let rc = unsafe { libc::munmap(base as *mut libc::c_void, len) };
		if rc != 0 {
			return Err(BackendError::DropFailed {
				addr: base,
				source: io::Error::last_os_error(),
			});
		}
		self.regions.lock().unwrap().retain(|&(b, _)| b != base);
		Ok(())
	}

	fn shutdown(&self) {
		if self.shut_down.swap(true, Ordering::AcqRel) {
			return;
		}
		// Wakes a thread parked in `await_fault`'s `poll` by making the
		// self-pipe's read end readable; the dispatcher notices the
		// `shut_down` flag on the next loop iteration and returns `None`.
		let byte = [0u8; 1];
		// SAFETY: `wake_write` is a valid, open, write end of the pipe
		// opened in `new`, alive for the lifetime of `self`.
		unsafe {
			libc::write(self.wake_write, byte.as_ptr().cast(), 1);
		}
	}
}

// Exercising this backend requires userfaultfd permissions
// (`CAP_SYS_PTRACE` or `/proc/sys/vm/unprivileged_userfaultfd`) that a
// typical CI sandbox lacks; its behavior is covered indirectly through
// `vmcore-backend-mock`, which implements the same `PageBackend`
// contract, and exercised directly only on hosts where the fixture
// opens successfully.
