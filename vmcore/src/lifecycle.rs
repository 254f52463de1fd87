//! The lifecycle controller: the single [`Engine`] entry point a host
//! embeds, tying together the arena, registry, dispatcher, and eviction
//! engine.

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use crate::{
	arena::Arena,
	backend::PageBackend,
	config::Config,
	descriptor::ObjectDescriptor,
	dispatcher::Dispatcher,
	error::{VmError, VmResult},
	eviction::EvictionEngine,
	page,
	registry::Registry,
	source::Source,
};

/// How long [`Engine::destroy_object`] waits for in-flight populate work
/// on an object to drain before giving up and proceeding anyway.
const DESTROY_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The engine: one arena, one registry, one dispatcher, one eviction
/// engine, all wired together against a chosen [`PageBackend`].
///
/// Construction reserves the arena and starts the dispatcher and
/// eviction threads immediately (there is no separate "first object"
/// initialization step to get wrong); [`Engine::shutdown`] tears all of
/// it down, idempotently.
pub struct Engine {
	config:         Config,
	backend:        Arc<dyn PageBackend>,
	arena:          Arena,
	registry:       Arc<Registry>,
	eviction:       Arc<EvictionEngine>,
	dispatcher:     Dispatcher,
	eviction_tick:  Option<std::thread::JoinHandle<()>>,
	tick_shutdown:  Arc<AtomicBool>,
	debug:          AtomicBool,
	shut_down:      AtomicBool,
}

impl Engine {
	/// Starts a new engine: reserves the arena, and launches the
	/// dispatcher and background eviction threads.
	pub fn new(config: Config, backend: Arc<dyn PageBackend>) -> VmResult<Self> {
		let arena = Arena::reserve(Arc::clone(&backend), config.arena_size, config.page_size)?;
		let registry = Arc::new(Registry::new());
		let eviction = Arc::new(EvictionEngine::new(config.residency_budget, config.page_size));

		let dispatcher = Dispatcher::start(
			Arc::clone(&backend),
			Arc::clone(&registry),
			Arc::clone(&eviction),
			config.worker_pool_size,
		);

		let tick_shutdown = Arc::new(AtomicBool::new(false));
		let eviction_tick = Some(EvictionEngine::spawn_background(
			Arc::clone(&eviction),
			Arc::clone(&registry),
			Arc::clone(&backend),
			config.eviction_tick_interval,
			Arc::clone(&tick_shutdown),
		));

		Ok(Self {
			config,
			backend,
			arena,
			registry,
			eviction,
			dispatcher,
			eviction_tick,
			tick_shutdown,
			debug: AtomicBool::new(false),
			shut_down: AtomicBool::new(false),
		})
	}

	/// Creates a new demand-paged object backed by `source`, returning
	/// its base address.
	pub fn new_object(&self, source: Source) -> VmResult<usize> {
		source
			.validate(self.config.page_size)
			.map_err(VmError::InvalidSource)?;

		let element_bytes = source.n_elements as usize * source.element_size;
		let total_bytes = source.header_bytes + element_bytes;
		let n_pages = page::n_pages(total_bytes, self.config.page_size);

		let base_addr = self.arena.alloc_segment(total_bytes)?;
		let backing = crate::backing_store::BackingStore::create(&self.config.scratch_dir, self.config.page_size)?;

		let mut source = source;
		if source.min_load_elements == 0 {
			source.min_load_elements = self.config.default_min_load_elements;
		}

		let desc = Arc::new(ObjectDescriptor::new(
			base_addr,
			self.config.page_size,
			n_pages,
			source,
			backing,
		));
		self.registry.insert(desc);

		if self.debug.load(Ordering::Relaxed) {
			log::debug!("new_object: base={base_addr:#x} n_pages={n_pages}");
		}

		Ok(base_addr)
	}

	/// Creates a new object with an informational shape, convenience
	/// wrapper over [`Engine::new_object`] that fills in `dims` and
	/// validates `n_elements` against their product.
	pub fn new_object_multidim(&self, mut source: Source, dims: Vec<u64>) -> VmResult<usize> {
		source.dims = Some(dims);
		self.new_object(source)
	}

	/// Tears down the object at `base_addr`: marks it terminating so no
	/// new populate work begins, waits (up to a bounded timeout) for any
	/// in-flight work to finish, runs its destructor, and returns its
	/// segment to the arena.
	pub fn destroy_object(&self, base_addr: usize) -> VmResult<()> {
		let desc = self
			.registry
			.remove(base_addr)
			.ok_or(VmError::UnknownObject { base_addr })?;

		desc.terminating.store(true, Ordering::Release);

		let deadline = std::time::Instant::now() + DESTROY_DRAIN_TIMEOUT;
		while desc.inflight.load(Ordering::Acquire) > 0 && std::time::Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(1));
		}
		if desc.inflight.load(Ordering::Acquire) > 0 {
			log::warn!(
				"destroy_object: {base_addr:#x} still has in-flight populate work after the drain timeout; proceeding anyway"
			);
		}

		if let Some(destructor) = desc.destructor.lock().take() {
			destructor();
		}

		self.arena.free_segment(base_addr, desc.range_len())
	}

	/// Returns and clears the sticky populate/backend error last
	/// recorded for the object at `base_addr`, if any.
	pub fn last_error(&self, base_addr: usize) -> VmResult<Option<String>> {
		let desc = self
			.registry
			.get(base_addr)
			.ok_or(VmError::UnknownObject { base_addr })?;
		Ok(desc.take_error())
	}

	/// Enables or disables verbose debug logging of lifecycle events.
	pub fn set_debug(&self, enabled: bool) {
		self.debug.store(enabled, Ordering::Relaxed);
	}

	/// Current global resident-byte usage, exposed for diagnostics.
	#[must_use]
	pub fn resident_bytes(&self) -> usize {
		self.eviction.resident_bytes()
	}

	/// Number of currently live objects.
	#[must_use]
	pub fn object_count(&self) -> usize {
		self.registry.len()
	}

	/// Bytes currently free in the arena, exposed for diagnostics and
	/// lifecycle testing.
	#[must_use]
	pub fn arena_free_bytes(&self) -> usize {
		self.arena.free_bytes()
	}

	/// Tears the whole engine down: every live object is destroyed, the
	/// dispatcher and eviction threads are stopped, and the arena is
	/// released. Idempotent — a second call is a no-op.
	pub fn shutdown(&mut self) -> VmResult<()> {
		if self.shut_down.swap(true, Ordering::AcqRel) {
			return Ok(());
		}

		for desc in self.registry.snapshot() {
			if let Err(err) = self.destroy_object(desc.base_addr) {
				log::error!("shutdown: failed to destroy object {:#x}: {err}", desc.base_addr);
			}
		}

		self.tick_shutdown.store(true, Ordering::Release);
		if let Some(handle) = self.eviction_tick.take() {
			let _ = handle.join();
		}

		self.dispatcher.shutdown(self.backend.as_ref());
		self.arena.release()
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		if let Err(err) = self.shutdown() {
			log::error!("engine shutdown during drop failed: {err}");
		}
	}
}
