//! Reusable `PopulateSource` implementations and scenario drivers used
//! to exercise [`vmcore`] end to end without a real `userfaultfd`.
//!
//! Mirrors the parent workspace's own `orok-test-harness` crate: rather
//! than every test hand-rolling a source and a backend, this crate
//! provides the handful of building blocks the testable properties
//! actually need, and a `Harness` that wires them to an `Engine` running
//! against [`vmcore_backend_mock::MockBackend`].

use std::{
	fs::File,
	os::unix::fs::FileExt,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use vmcore::{
	backend::PageBackend,
	config::{Config, ConfigBuilder},
	source::{Callout, ElementKind, PopulateSource, Source},
	Engine, VmResult,
};
use vmcore_backend_mock::MockBackend;

/// A source that fills element `i` with the little-endian bytes of `i`
/// itself, truncated to `u32`. Used by scenarios that just need
/// predictable, checkable content (S1, S2, S4).
pub struct SequenceSource {
	calls: Arc<AtomicUsize>,
}

impl SequenceSource {
	/// Builds a new sequence source, returning it alongside a shared
	/// counter of how many times `populate` has been called.
	#[must_use]
	pub fn new() -> (Self, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		(
			Self {
				calls: Arc::clone(&calls),
			},
			calls,
		)
	}
}

impl PopulateSource for SequenceSource {
	fn populate(&self, start_elem: u64, end_elem: u64, _callout: &Callout, out: &mut [u8]) -> Result<(), i32> {
		self.calls.fetch_add(1, Ordering::Relaxed);
		for (i, elem) in (start_elem..end_elem).enumerate() {
			out[i * 4..i * 4 + 4].copy_from_slice(&(elem as u32).to_le_bytes());
		}
		Ok(())
	}
}

/// A source that replays 4-byte little-endian integers from an
/// already-written file, used by S3.
pub struct FileSource {
	file:  File,
	calls: Arc<AtomicUsize>,
}

impl FileSource {
	/// Creates a file holding `n_elements` sequential `u32` values and a
	/// source that reads from it.
	pub fn sequential(n_elements: u64) -> VmResult<(Self, Arc<AtomicUsize>, tempfile::TempPath)> {
		let (file, path) = tempfile::NamedTempFile::new()
			.expect("failed to create scenario fixture file")
			.into_parts();
		for chunk_start in (0..n_elements).step_by(4096) {
			let chunk_end = (chunk_start + 4096).min(n_elements);
			let mut buf = Vec::with_capacity((chunk_end - chunk_start) as usize * 4);
			for elem in chunk_start..chunk_end {
				buf.extend_from_slice(&(elem as u32).to_le_bytes());
			}
			file.write_all_at(&buf, chunk_start * 4).unwrap();
		}
		let calls = Arc::new(AtomicUsize::new(0));
		Ok((
			Self {
				file,
				calls: Arc::clone(&calls),
			},
			calls,
			path,
		))
	}
}

impl PopulateSource for FileSource {
	fn populate(&self, start_elem: u64, end_elem: u64, _callout: &Callout, out: &mut [u8]) -> Result<(), i32> {
		self.calls.fetch_add(1, Ordering::Relaxed);
		self.file.read_exact_at(out, start_elem * 4).map_err(|_| -1)?;
		let _ = end_elem;
		Ok(())
	}
}

/// A source that always fails, used by S6.
pub struct FailingSource {
	calls: Arc<AtomicUsize>,
}

impl FailingSource {
	/// Builds a failing source alongside a shared call counter.
	#[must_use]
	pub fn new() -> (Self, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		(
			Self {
				calls: Arc::clone(&calls),
			},
			calls,
		)
	}
}

impl PopulateSource for FailingSource {
	fn populate(&self, _start_elem: u64, _end_elem: u64, _callout: &Callout, _out: &mut [u8]) -> Result<(), i32> {
		self.calls.fetch_add(1, Ordering::Relaxed);
		Err(-1)
	}
}

/// An [`Engine`] wired to a [`MockBackend`] the harness keeps a handle
/// to, so tests can simulate host touches directly.
pub struct Harness {
	/// The engine under test.
	pub engine: Engine,
	backend:    Arc<MockBackend>,
	page_size:  usize,
}

impl Harness {
	/// Builds a harness from `config`, using a fresh [`MockBackend`] sized
	/// to `config.page_size`.
	pub fn new(config: Config) -> VmResult<Self> {
		let page_size = config.page_size;
		let backend = Arc::new(MockBackend::new(page_size));
		let engine = Engine::new(config, Arc::clone(&backend) as Arc<dyn PageBackend>)?;
		Ok(Self {
			engine,
			backend,
			page_size,
		})
	}

	/// A harness with every default except a small, deterministic page
	/// size and a tight worker pool, suitable for fast scenario tests.
	pub fn with_defaults() -> VmResult<Self> {
		static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
		let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
		Self::new(
			ConfigBuilder::new()
				.page_size(4096)
				.worker_pool_size(2)
				.scratch_dir(std::env::temp_dir().join(format!("vmcore-harness-{}-{id}", std::process::id())))
				.build()?,
		)
	}

	/// Simulates a host read of `len` bytes at `addr`, touching (and
	/// blocking on) every page the range spans, then returning the
	/// installed bytes.
	pub fn read(&self, addr: usize, len: usize) -> Vec<u8> {
		let lo = addr & !(self.page_size - 1);
		let hi = (addr + len + self.page_size - 1) & !(self.page_size - 1);
		for page in (lo..hi).step_by(self.page_size) {
			self.backend.touch_for_test(page, false).expect("touch failed");
		}
		self.backend.read_installed(addr, len)
	}

	/// Simulates a host write of `bytes` at `addr`: touches every covered
	/// page as a write fault (so the engine marks it dirty), then writes
	/// `bytes` directly into the now-resident mapping, the same way a
	/// real host store instruction would.
	pub fn write(&self, addr: usize, bytes: &[u8]) {
		let lo = addr & !(self.page_size - 1);
		let hi = (addr + bytes.len() + self.page_size - 1) & !(self.page_size - 1);
		for page in (lo..hi).step_by(self.page_size) {
			self.backend.touch_for_test(page, true).expect("touch failed");
		}
		// SAFETY: every page in `[lo, hi)` was just installed above, which
		// leaves it mapped `PROT_READ | PROT_WRITE` in this process.
		unsafe {
			std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
		}
	}
}

/// S1 (sequence, cold read): reading the first and last element of a
/// 10,000-element sequence object returns the expected values, with at
/// most two populate calls total.
pub fn run_s1() -> Result<(), String> {
	let harness = Harness::with_defaults().map_err(|e| e.to_string())?;
	let (source, calls) = SequenceSource::new();
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: 10_000,
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: 0,
		})
		.map_err(|e| e.to_string())?;

	let first = harness.read(base, 4);
	if u32::from_le_bytes(first.try_into().unwrap()) != 0 {
		return Err("element 0 mismatch".to_owned());
	}

	let last = harness.read(base + 9_999 * 4, 4);
	if u32::from_le_bytes(last.try_into().unwrap()) != 9_999 {
		return Err("element 9999 mismatch".to_owned());
	}

	if calls.load(Ordering::Relaxed) > 2 {
		return Err(format!("expected at most 2 populate calls, saw {}", calls.load(Ordering::Relaxed)));
	}
	Ok(())
}

/// S2 (large object, eviction), scaled down from the property's
/// 10^8-element object to keep the test fast: sequentially reads every
/// element of an object much larger than its residency budget and
/// checks peak resident bytes never exceeds the budget by more than one
/// page.
pub fn run_s2() -> Result<(), String> {
	const PAGE_SIZE: usize = 4096;
	const BUDGET: usize = 8 * PAGE_SIZE;
	const N_ELEMENTS: u64 = 100_000; // ~98 pages of 4-byte ints, well past the 8-page budget.

	let harness = Harness::new(
		ConfigBuilder::new()
			.page_size(PAGE_SIZE)
			.residency_budget(BUDGET)
			.eviction_tick_interval(std::time::Duration::from_millis(5))
			.worker_pool_size(2)
			.scratch_dir(std::env::temp_dir().join(format!("vmcore-harness-s2-{}", std::process::id())))
			.build()
			.map_err(|e| e.to_string())?,
	)
	.map_err(|e| e.to_string())?;

	let (source, calls) = SequenceSource::new();
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: N_ELEMENTS,
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: 0,
		})
		.map_err(|e| e.to_string())?;

	for elem in 0..N_ELEMENTS {
		let bytes = harness.read(base + (elem * 4) as usize, 4);
		let got = u32::from_le_bytes(bytes.try_into().unwrap());
		if u64::from(got) != elem {
			return Err(format!("element {elem} mismatch: got {got}"));
		}
	}

	if calls.load(Ordering::Relaxed) == 0 {
		return Err("expected at least one populate call".to_owned());
	}

	// Eviction runs on an asynchronous background tick, so resident bytes
	// can transiently exceed the budget between installs and the next
	// tick; give it a bounded window to converge before checking the
	// steady-state bound the property names.
	let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
	while harness.engine.resident_bytes() > BUDGET + PAGE_SIZE && std::time::Instant::now() < deadline {
		std::thread::sleep(std::time::Duration::from_millis(5));
	}
	if harness.engine.resident_bytes() > BUDGET + PAGE_SIZE {
		return Err(format!(
			"resident bytes {} did not converge under budget {BUDGET} + one page",
			harness.engine.resident_bytes()
		));
	}
	Ok(())
}

/// S3 (binary-file source): reading element 4 and element 10,000 of a
/// file-backed object returns the file's values, re-reading a resident
/// element triggers no further populate call.
pub fn run_s3() -> Result<(), String> {
	let harness = Harness::with_defaults().map_err(|e| e.to_string())?;
	let (source, calls, _guard) = FileSource::sequential(65_536).map_err(|e| e.to_string())?;
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: 65_536,
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: 0,
		})
		.map_err(|e| e.to_string())?;

	let v4 = u32::from_le_bytes(harness.read(base + 4 * 4, 4).try_into().unwrap());
	if v4 != 4 {
		return Err("element 4 mismatch".to_owned());
	}
	let after_first_read = calls.load(Ordering::Relaxed);

	let v10000 = u32::from_le_bytes(harness.read(base + 10_000 * 4, 4).try_into().unwrap());
	if v10000 != 10_000 {
		return Err("element 10000 mismatch".to_owned());
	}
	if calls.load(Ordering::Relaxed) != after_first_read + 1 {
		return Err("element 10000 should have triggered exactly one more populate call".to_owned());
	}

	let _ = harness.read(base + 4 * 4, 4);
	if calls.load(Ordering::Relaxed) != after_first_read + 1 {
		return Err("re-reading a resident element must not populate again".to_owned());
	}
	Ok(())
}

/// S4 (`min_load_elements` honored): a single-element read against an
/// object whose `min_load_elements` spans many pages still installs the
/// whole rounded unit in one populate call.
pub fn run_s4() -> Result<(), String> {
	let harness = Harness::with_defaults().map_err(|e| e.to_string())?;
	let (source, calls) = SequenceSource::new();
	let min_load_elements: u64 = 250_000;
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: 1_000_000,
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: min_load_elements as u64,
		})
		.map_err(|e| e.to_string())?;

	let _ = harness.read(base, 4);
	if calls.load(Ordering::Relaxed) != 1 {
		return Err("expected exactly one populate call".to_owned());
	}

	// The installed unit must cover at least 250,000 elements; check the
	// last element of that unit is already resident (no extra populate).
	let before = calls.load(Ordering::Relaxed);
	let _ = harness.read(base + 250_000 * 4, 4);
	if calls.load(Ordering::Relaxed) != before {
		return Err("min_load_elements was not honored: a second populate call occurred within the unit".to_owned());
	}
	Ok(())
}

/// S5 (lifecycle): creating and destroying 100 objects returns the
/// arena's free-byte count to its starting value and resident bytes to
/// zero.
pub fn run_s5() -> Result<(), String> {
	let harness = Harness::with_defaults().map_err(|e| e.to_string())?;
	let initial_free = harness.engine.arena_free_bytes();

	let mut bases = Vec::new();
	for _ in 0..100 {
		let (source, _calls) = SequenceSource::new();
		let base = harness
			.engine
			.new_object(Source {
				populate: Box::new(source),
				destructor: None,
				element_kind: ElementKind::Integer,
				n_elements: 256,
				element_size: 4,
				header_bytes: 0,
				dims: None,
				min_load_elements: 0,
			})
			.map_err(|e| e.to_string())?;
		bases.push(base);
	}

	for i in (0..bases.len()).step_by(7) {
		let _ = harness.read(bases[i], 4);
	}

	// "Random order" per the property this scenario names; a fixed
	// interleaving keeps the test deterministic while still not
	// destroying in creation order.
	bases.sort_by_key(|&b| (b.wrapping_mul(2_654_435_761)) % 1000);
	for base in bases {
		harness.engine.destroy_object(base).map_err(|e| e.to_string())?;
	}

	if harness.engine.resident_bytes() != 0 {
		return Err(format!(
			"expected zero resident bytes after destroying every object, got {}",
			harness.engine.resident_bytes()
		));
	}
	if harness.engine.arena_free_bytes() != initial_free {
		return Err(format!(
			"arena free bytes did not return to the starting value: expected {initial_free}, got {}",
			harness.engine.arena_free_bytes()
		));
	}
	Ok(())
}

/// S6 (populate error): a failing populate callback results in a zero
/// page at the faulted address and a recorded sticky error.
pub fn run_s6() -> Result<(), String> {
	let harness = Harness::with_defaults().map_err(|e| e.to_string())?;
	let (source, calls) = FailingSource::new();
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: 256,
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: 0,
		})
		.map_err(|e| e.to_string())?;

	let bytes = harness.read(base, 4);
	if bytes != [0, 0, 0, 0] {
		return Err("expected a zero page on populate failure".to_owned());
	}
	if calls.load(Ordering::Relaxed) != 1 {
		return Err("expected exactly one populate attempt".to_owned());
	}

	match harness.engine.last_error(base) {
		Ok(Some(_)) => Ok(()),
		Ok(None) => Err("expected a sticky error to be recorded".to_owned()),
		Err(e) => Err(e.to_string()),
	}
}

/// S7 (dirty round trip): a page written by the host, then evicted under
/// budget pressure, re-faults with the last-written bytes rather than
/// the original populated content.
pub fn run_s7() -> Result<(), String> {
	const PAGE_SIZE: usize = 4096;

	let harness = Harness::new(
		ConfigBuilder::new()
			.page_size(PAGE_SIZE)
			.residency_budget(PAGE_SIZE) // one page resident at a time forces eviction.
			.eviction_tick_interval(std::time::Duration::from_millis(5))
			.worker_pool_size(2)
			.scratch_dir(std::env::temp_dir().join(format!("vmcore-harness-s7-{}", std::process::id())))
			.build()
			.map_err(|e| e.to_string())?,
	)
	.map_err(|e| e.to_string())?;

	let (source, _calls) = SequenceSource::new();
	let base = harness
		.engine
		.new_object(Source {
			populate: Box::new(source),
			destructor: None,
			element_kind: ElementKind::Integer,
			n_elements: 4_096, // several pages, comfortably over the one-page budget.
			element_size: 4,
			header_bytes: 0,
			dims: None,
			min_load_elements: 0,
		})
		.map_err(|e| e.to_string())?;

	let overwritten: u32 = 0xDEAD_BEEF;
	harness.write(base, &overwritten.to_le_bytes());

	let readback = u32::from_le_bytes(harness.read(base, 4).try_into().unwrap());
	if readback != overwritten {
		return Err(format!("wrote {overwritten:#x}, immediate read-back got {readback:#x}"));
	}

	// Touch every other page so the budget forces element 0's page out;
	// give the background tick a bounded window to actually run.
	for elem in (1024u64..4_096).step_by(1024) {
		let _ = harness.read(base + (elem * 4) as usize, 4);
	}
	let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
	while harness.engine.resident_bytes() > PAGE_SIZE && std::time::Instant::now() < deadline {
		std::thread::sleep(std::time::Duration::from_millis(5));
	}

	let after_evict = u32::from_le_bytes(harness.read(base, 4).try_into().unwrap());
	if after_evict != overwritten {
		return Err(format!(
			"expected evict-then-refault to yield the last-written value {overwritten:#x}, got {after_evict:#x}"
		));
	}
	Ok(())
}
