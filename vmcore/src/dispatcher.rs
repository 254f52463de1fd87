//! The page-fault dispatcher: a single thread that drains
//! [`crate::backend::PageBackend::await_fault`] and hands each fault to
//! a worker pool, keeping the fault-reception path itself free of any
//! work that could stall behind a slow populate callback.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{backend::PageBackend, eviction::EvictionEngine, registry::Registry};

/// One unit of work handed from the dispatcher thread to a worker.
struct Job {
	addr:    usize,
	write:   bool,
	backend: Arc<dyn PageBackend>,
	desc:    Arc<crate::descriptor::ObjectDescriptor>,
}

/// Owns the dispatcher thread and the worker pool it feeds.
pub struct Dispatcher {
	tx:      Option<Sender<Job>>,
	workers: Vec<std::thread::JoinHandle<()>>,
	reader:  Option<std::thread::JoinHandle<()>>,
}

/// Queue depth between the dispatcher thread and the worker pool. Bounds
/// memory if populate callbacks run slower than faults arrive; the
/// dispatcher simply blocks handing off the next fault until a worker
/// frees up, which is fine since the kernel itself is already holding
/// the faulting host thread.
const QUEUE_DEPTH: usize = 256;

impl Dispatcher {
	/// Starts the dispatcher thread and `worker_pool_size` populate
	/// workers, all servicing faults from `backend` against `registry`.
	pub fn start(
		backend: Arc<dyn PageBackend>,
		registry: Arc<Registry>,
		eviction: Arc<EvictionEngine>,
		worker_pool_size: usize,
	) -> Self {
		let (tx, rx): (Sender<Job>, Receiver<Job>) = bounded(QUEUE_DEPTH);

		let workers = (0..worker_pool_size)
			.map(|id| {
				let rx = rx.clone();
				let eviction = Arc::clone(&eviction);
				std::thread::Builder::new()
					.name(format!("vmcore-populate-{id}"))
					.spawn(move || {
						for job in rx {
							let page_index = (job.addr - job.desc.base_addr) / job.desc.page_size;
							crate::populator::handle_fault(&job.desc, page_index, job.write, job.backend.as_ref(), &eviction);
						}
					})
					.expect("failed to spawn populate worker thread")
			})
			.collect();

		let reader = {
			let backend = Arc::clone(&backend);
			let registry = Arc::clone(&registry);
			let tx = tx.clone();
			std::thread::Builder::new()
				.name("vmcore-dispatcher".to_owned())
				.spawn(move || Self::run(backend, registry, tx))
				.expect("failed to spawn dispatcher thread")
		};

		Self {
			tx: Some(tx),
			workers,
			reader: Some(reader),
		}
	}

	/// The dispatcher thread body: blocks on `await_fault`, resolves the
	/// faulting address to its owning object, and forwards the work.
	/// Returns (letting the thread exit) once `await_fault` reports
	/// `Ok(None)`, i.e. after [`crate::backend::PageBackend::shutdown`].
	fn run(backend: Arc<dyn PageBackend>, registry: Arc<Registry>, tx: Sender<Job>) {
		loop {
			let event = match backend.await_fault() {
				Ok(Some(event)) => event,
				Ok(None) => break,
				Err(err) => {
					log::error!("await_fault failed, dispatcher thread exiting: {err}");
					break;
				}
			};

			let Some(desc) = registry.find_containing(event.addr) else {
				log::warn!("fault at {:#x} has no owning object; ignoring", event.addr);
				continue;
			};

			if desc.terminating.load(std::sync::atomic::Ordering::Acquire) {
				continue;
			}

			let job = Job {
				addr: event.addr,
				write: event.write,
				backend: Arc::clone(&backend),
				desc,
			};
			if tx.send(job).is_err() {
				break;
			}
		}
	}

	/// Signals the backend to stop delivering faults and waits for the
	/// dispatcher and all workers to drain and exit. Idempotent.
	pub fn shutdown(&mut self, backend: &dyn PageBackend) {
		backend.shutdown();
		if let Some(reader) = self.reader.take() {
			let _ = reader.join();
		}
		// The dispatcher thread's own sender clone is gone once it has
		// joined above; dropping this last one closes the channel, which
		// lets every worker's `for job in rx` loop end naturally.
		self.tx.take();
		for worker in self.workers.drain(..) {
			let _ = worker.join();
		}
	}
}
