//! The host-facing `Source` type: what a caller supplies to
//! [`crate::Engine::new_object`].
//!
//! A C-style API would describe this as a `populate_fn` function pointer
//! plus an opaque `user_data` pointer, with a separate `destructor_fn`
//! invoked once at object destruction to free it. Rust has a safer
//! alternative to that pattern: a trait object for the populate
//! callback, and an `FnOnce` closure for the destructor that captures
//! whatever state it needs to free by value. Both generalize the
//! C-style pair into a polymorphic source capability, with variants for
//! a sequence generator and a binary-file reader provided by
//! [`vmcore-test-harness`].

/// How many bytes make up one element, and how the host should
/// interpret them. Purely informational to the engine: it only ever
/// copies bytes, never inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
	/// Opaque bytes.
	Byte,
	/// A boolean/logical value.
	Logical,
	/// A signed or unsigned integer.
	Integer,
	/// A floating-point value.
	Real,
	/// A complex (paired real) value.
	Complex,
	/// Raw, host-defined encoding.
	Raw,
}

/// A handle passed to [`PopulateSource::populate`], reserved for a
/// future extension that would let a populate callback ask the engine
/// to widen the range it is being asked to fill. The current engine
/// never acts on a populated `Callout`; implementations must accept and
/// ignore it.
#[derive(Debug, Default)]
pub struct Callout {
	_private: (),
}

/// The populate capability a host supplies when creating an object.
///
/// `populate` is called by a populator worker (never by the dispatcher
/// thread itself) with the element range `[start_elem, end_elem)` that
/// must be filled, and a `out` buffer sized exactly
/// `(end_elem - start_elem) * element_size` bytes. Returning `Err` is
/// equivalent to a C-style `populate_fn` returning a nonzero status: the
/// engine installs a zero page and records the error on the descriptor.
pub trait PopulateSource: Send + Sync {
	/// Fills `out` with the bytes for elements `[start_elem, end_elem)`.
	fn populate(
		&self,
		start_elem: u64,
		end_elem: u64,
		callout: &Callout,
		out: &mut [u8],
	) -> Result<(), i32>;
}

impl<F> PopulateSource for F
where
	F: Fn(u64, u64, &Callout, &mut [u8]) -> Result<(), i32> + Send + Sync,
{
	fn populate(
		&self,
		start_elem: u64,
		end_elem: u64,
		callout: &Callout,
		out: &mut [u8],
	) -> Result<(), i32> {
		self(start_elem, end_elem, callout, out)
	}
}

/// Everything a host must supply to create one object.
pub struct Source {
	/// The populate capability. Boxed as a trait object so the engine can
	/// store heterogeneous sources (generators, file readers, ...) behind
	/// one type, the way the design notes ask for a sum-type-like
	/// "source" capability rather than raw function pointers.
	pub populate: Box<dyn PopulateSource>,
	/// Called exactly once, at object destruction, after the last
	/// in-flight populate for this object has finished. Takes the place
	/// of a C-style `destructor_fn(user_data)`: any state the closure
	/// needs to free, it owns by value.
	pub destructor: Option<Box<dyn FnOnce() + Send>>,
	/// How to interpret each element's bytes.
	pub element_kind: ElementKind,
	/// The logical length of the array, in elements.
	pub n_elements: u64,
	/// The size, in bytes, of one element.
	pub element_size: usize,
	/// Bytes reserved at the start of the range for a host-written
	/// header. The engine never populates or evicts these bytes.
	pub header_bytes: usize,
	/// Optional shape, for multidimensional objects. Purely informational.
	pub dims: Option<Vec<u64>>,
	/// Lower bound on how many elements one populate call must fill. `0`
	/// means "use the engine's configured default".
	pub min_load_elements: u64,
}

impl Source {
	/// Validates the source: nonzero sizes, a header expressible as a
	/// whole number of elements, and (if present) a `dims` vector whose
	/// product matches `n_elements`.
	pub(crate) fn validate(&self, page_size: usize) -> Result<(), String> {
		if self.n_elements == 0 {
			return Err("n_elements must be nonzero".to_owned());
		}
		if self.element_size == 0 {
			return Err("element_size must be nonzero".to_owned());
		}
		if self.header_bytes % self.element_size != 0 {
			return Err(format!(
				"header_bytes ({}) must be a multiple of element_size ({})",
				self.header_bytes, self.element_size
			));
		}
		if page_size == 0 || !page_size.is_power_of_two() {
			return Err(format!("page_size ({page_size}) must be a power of two"));
		}
		if let Some(dims) = &self.dims {
			if dims.is_empty() {
				return Err("dims, if present, must not be empty".to_owned());
			}
			let product: u128 = dims.iter().map(|&d| u128::from(d)).product();
			if product != u128::from(self.n_elements) {
				return Err(format!(
					"product of dims ({product}) does not match n_elements ({})",
					self.n_elements
				));
			}
		}
		Ok(())
	}
}
