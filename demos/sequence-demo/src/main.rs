//! Demonstrates a host touching a demand-paged array: every read past
//! the object's base address is an ordinary memory load, but the first
//! touch of each page blocks until a populate worker fills it in.

use std::sync::Arc;

use vmcore::{
	config::ConfigBuilder,
	source::{Callout, ElementKind, PopulateSource, Source},
	Engine,
};
use vmcore_backend_userfaultfd::UserfaultfdBackend;

struct Sequence;

impl PopulateSource for Sequence {
	fn populate(&self, start_elem: u64, end_elem: u64, _callout: &Callout, out: &mut [u8]) -> Result<(), i32> {
		for (i, elem) in (start_elem..end_elem).enumerate() {
			out[i * 4..i * 4 + 4].copy_from_slice(&(elem as u32).to_le_bytes());
		}
		log::info!("populated elements [{start_elem}, {end_elem})");
		Ok(())
	}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let backend = Arc::new(UserfaultfdBackend::new()?);
	let config = ConfigBuilder::new().with_env_overrides().build()?;
	let mut engine = Engine::new(config, backend)?;

	let base = engine.new_object(Source {
		populate: Box::new(Sequence),
		destructor: None,
		element_kind: ElementKind::Integer,
		n_elements: 1_000_000,
		element_size: 4,
		header_bytes: 0,
		dims: None,
		min_load_elements: 0,
	})?;

	// SAFETY: `base` is the start of a live object's element 0, and
	// reading 4 bytes there is within its n_elements * element_size
	// range; the engine installs a real page behind it on first touch.
	let slice = unsafe { std::slice::from_raw_parts(base as *const u8, 4) };
	let first = u32::from_le_bytes(slice.try_into().unwrap());
	println!("element 0 = {first}");

	let addr = base + 999_999 * 4;
	// SAFETY: same reasoning as above, at the array's last element.
	let slice = unsafe { std::slice::from_raw_parts(addr as *const u8, 4) };
	let last = u32::from_le_bytes(slice.try_into().unwrap());
	println!("element 999999 = {last}");

	engine.shutdown()?;
	Ok(())
}
