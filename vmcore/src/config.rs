//! Process-wide configuration, assembled once at
//! [`crate::Engine`] startup.
//!
//! Mirrors the layering the rest of this workspace's tooling uses for
//! its own configuration: explicit defaults, a builder for programmatic
//! overrides, then environment-variable overrides (`VMCORE_*`) applied
//! last, with validation happening once before anything else starts.

use std::{env, path::PathBuf, time::Duration};

use crate::error::VmError;

/// Default arena reservation: 256 GiB of address space. No physical
/// memory is committed for this; it is purely a `mmap` reservation.
const DEFAULT_ARENA_SIZE: usize = 256 << 30;
/// Default global residency budget: 512 MiB.
const DEFAULT_RESIDENCY_BUDGET: usize = 512 << 20;
/// Default worker-pool size.
const DEFAULT_WORKER_POOL_SIZE: usize = 4;
/// Default `min_load_elements` used when a source specifies zero.
const DEFAULT_MIN_LOAD_ELEMENTS: u64 = 256;
/// Default eviction tick interval.
const DEFAULT_EVICTION_TICK: Duration = Duration::from_millis(250);

/// Process-wide engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
	/// Size, in bytes, of the single arena reservation.
	pub arena_size: usize,
	/// Global resident-byte budget enforced by the eviction engine.
	pub residency_budget: usize,
	/// Directory in which per-object backing files are created.
	pub scratch_dir: PathBuf,
	/// Number of worker threads servicing populate/evict work.
	pub worker_pool_size: usize,
	/// Default `min_load_elements`, used when a [`crate::source::Source`]
	/// specifies `0`.
	pub default_min_load_elements: u64,
	/// The page size assumed for all arithmetic. Defaults to the host's
	/// native page size.
	pub page_size: usize,
	/// How often the background eviction tick runs.
	pub eviction_tick_interval: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			arena_size: DEFAULT_ARENA_SIZE,
			residency_budget: DEFAULT_RESIDENCY_BUDGET,
			scratch_dir: env::temp_dir(),
			worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
			default_min_load_elements: DEFAULT_MIN_LOAD_ELEMENTS,
			page_size: crate::page::system_page_size(),
			eviction_tick_interval: DEFAULT_EVICTION_TICK,
		}
	}
}

/// Builds a [`Config`], applying `VMCORE_*` environment overrides last.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
	config: Config,
}

impl ConfigBuilder {
	/// Starts from [`Config::default`].
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the arena reservation size.
	#[must_use]
	pub fn arena_size(mut self, bytes: usize) -> Self {
		self.config.arena_size = bytes;
		self
	}

	/// Sets the global residency budget.
	#[must_use]
	pub fn residency_budget(mut self, bytes: usize) -> Self {
		self.config.residency_budget = bytes;
		self
	}

	/// Sets the scratch directory used for backing files.
	#[must_use]
	pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.scratch_dir = dir.into();
		self
	}

	/// Sets the populate/evict worker-pool size.
	#[must_use]
	pub fn worker_pool_size(mut self, n: usize) -> Self {
		self.config.worker_pool_size = n;
		self
	}

	/// Sets the default `min_load_elements`.
	#[must_use]
	pub fn default_min_load_elements(mut self, n: u64) -> Self {
		self.config.default_min_load_elements = n;
		self
	}

	/// Overrides the assumed page size. Mostly useful in tests, which
	/// want small, deterministic pages rather than the host's real page
	/// size.
	#[must_use]
	pub fn page_size(mut self, bytes: usize) -> Self {
		self.config.page_size = bytes;
		self
	}

	/// Sets the background eviction tick interval.
	#[must_use]
	pub fn eviction_tick_interval(mut self, interval: Duration) -> Self {
		self.config.eviction_tick_interval = interval;
		self
	}

	/// Applies `VMCORE_*` environment variable overrides on top of
	/// whatever has been set so far.
	///
	/// Recognizes `VMCORE_ARENA_SIZE`, `VMCORE_RESIDENCY_BUDGET`,
	/// `VMCORE_SCRATCH_DIR`, `VMCORE_WORKER_POOL_SIZE`,
	/// `VMCORE_DEFAULT_MIN_LOAD_ELEMENTS`, all parsed as their natural
	/// type; malformed values are ignored (the prior value is kept).
	#[must_use]
	pub fn with_env_overrides(mut self) -> Self {
		if let Some(v) = parse_env("VMCORE_ARENA_SIZE") {
			self.config.arena_size = v;
		}
		if let Some(v) = parse_env("VMCORE_RESIDENCY_BUDGET") {
			self.config.residency_budget = v;
		}
		if let Ok(dir) = env::var("VMCORE_SCRATCH_DIR") {
			self.config.scratch_dir = PathBuf::from(dir);
		}
		if let Some(v) = parse_env("VMCORE_WORKER_POOL_SIZE") {
			self.config.worker_pool_size = v;
		}
		if let Some(v) = parse_env("VMCORE_DEFAULT_MIN_LOAD_ELEMENTS") {
			self.config.default_min_load_elements = v;
		}
		self
	}

	/// Validates and finalizes the configuration.
	pub fn build(self) -> Result<Config, VmError> {
		let cfg = self.config;

		if cfg.arena_size == 0 {
			return Err(VmError::InvalidConfig("arena_size must be nonzero".to_owned()));
		}
		if cfg.residency_budget == 0 {
			return Err(VmError::InvalidConfig(
				"residency_budget must be nonzero".to_owned(),
			));
		}
		if cfg.page_size == 0 || !cfg.page_size.is_power_of_two() {
			return Err(VmError::InvalidConfig(format!(
				"page_size ({}) must be a power of two",
				cfg.page_size
			)));
		}
		if cfg.arena_size % cfg.page_size != 0 {
			return Err(VmError::InvalidConfig(
				"arena_size must be a multiple of page_size".to_owned(),
			));
		}
		if cfg.worker_pool_size == 0 {
			return Err(VmError::InvalidConfig(
				"worker_pool_size must be nonzero".to_owned(),
			));
		}
		if cfg.default_min_load_elements == 0 {
			return Err(VmError::InvalidConfig(
				"default_min_load_elements must be nonzero".to_owned(),
			));
		}

		std::fs::create_dir_all(&cfg.scratch_dir).map_err(|source| VmError::ScratchDirUnusable {
			path: cfg.scratch_dir.clone(),
			source,
		})?;

		Ok(cfg)
	}
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
	env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_build_cleanly() {
		let cfg = ConfigBuilder::new()
			.scratch_dir(std::env::temp_dir().join("vmcore-config-test-defaults"))
			.build()
			.expect("default config should validate");
		assert!(cfg.page_size.is_power_of_two());
		assert_eq!(cfg.arena_size % cfg.page_size, 0);
	}

	#[test]
	fn rejects_zero_arena_size() {
		let err = ConfigBuilder::new().arena_size(0).build().unwrap_err();
		assert!(matches!(err, VmError::InvalidConfig(_)));
	}

	#[test]
	fn rejects_non_power_of_two_page_size() {
		let err = ConfigBuilder::new().page_size(100).build().unwrap_err();
		assert!(matches!(err, VmError::InvalidConfig(_)));
	}

	#[test]
	fn rejects_arena_not_page_aligned() {
		let err = ConfigBuilder::new()
			.page_size(4096)
			.arena_size(4097)
			.build()
			.unwrap_err();
		assert!(matches!(err, VmError::InvalidConfig(_)));
	}
}
