//! Small lock wrappers shared by the `vmcore` engine.
//!
//! The engine needs exactly two locking disciplines: an exclusive lock
//! guarding a single object's residency bookkeeping (held for the
//! duration of an install or an eviction), and a many-readers/single-writer
//! lock guarding the object registry (held briefly by the dispatcher's
//! address-to-descriptor lookup, and exclusively by `new_object`/
//! `destroy_object`). Both are thin wrappers around `parking_lot`
//! primitives rather than bespoke spinlocks, since this crate runs in
//! user space under a real scheduler and parking on contention is the
//! right default.

#![warn(missing_docs)]

use std::time::Duration;

use parking_lot::{Mutex, RwLock};
pub use parking_lot::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};

/// Exclusive lock protecting one object's residency/dirty bitmaps and
/// install/evict bookkeeping.
///
/// Named distinctly from a bare `Mutex` so call sites read as "the
/// descriptor lock" rather than an anonymous mutex, matching the way
/// the per-descriptor lock is singled out in the concurrency model.
pub struct DescriptorLock<T>(Mutex<T>);

impl<T> DescriptorLock<T> {
	/// Creates a new descriptor lock wrapping `value`.
	#[must_use]
	pub fn new(value: T) -> Self {
		Self(Mutex::new(value))
	}

	/// Acquires the lock, blocking until it is available.
	#[must_use]
	pub fn lock(&self) -> MutexGuard<'_, T> {
		self.0.lock()
	}

	/// Attempts to acquire the lock without blocking.
	#[must_use]
	pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
		self.0.try_lock()
	}

	/// Attempts to acquire the lock, giving up after `timeout`.
	///
	/// Used by object destruction to wait for an in-flight populate or
	/// evict to drain without blocking shutdown forever on a wedged
	/// populate callback.
	#[must_use]
	pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
		self.0.try_lock_for(timeout)
	}
}

/// Many-readers/single-writer lock protecting the object registry.
pub struct RegistryLock<T>(RwLock<T>);

impl<T> RegistryLock<T> {
	/// Creates a new registry lock wrapping `value`.
	#[must_use]
	pub fn new(value: T) -> Self {
		Self(RwLock::new(value))
	}

	/// Acquires a shared (read) lock, used by the dispatcher's
	/// address-to-descriptor lookup.
	#[must_use]
	pub fn read(&self) -> RwLockReadGuard<'_, T> {
		self.0.read()
	}

	/// Acquires an exclusive (write) lock, used by insertion and removal.
	#[must_use]
	pub fn write(&self) -> RwLockWriteGuard<'_, T> {
		self.0.write()
	}
}

impl<T: Default> Default for DescriptorLock<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T: Default> Default for RegistryLock<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}
