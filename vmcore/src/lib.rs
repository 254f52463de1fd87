//! A user-space virtual memory manager: demand-paged, larger-than-RAM
//! arrays backed by a kernel page-fault-redirection facility.
//!
//! A host creates one [`Engine`], then calls [`Engine::new_object`] for
//! each array it wants to back with a [`source::Source`] — a sequence
//! generator, a file reader, or any other [`source::PopulateSource`]
//! implementation. Touching an unmapped page of that array blocks the
//! touching thread until a populate worker fills it in; the engine keeps
//! total resident memory under a configured budget by evicting cold
//! pages, flushing dirty ones to a per-object backing file first.
//!
//! The engine is written entirely against the [`backend::PageBackend`]
//! seam. [`vmcore-backend-userfaultfd`] provides the production Linux
//! implementation; [`vmcore-backend-mock`] provides an in-process
//! implementation suitable for portable tests.

#![warn(missing_docs)]

pub mod arena;
pub mod backend;
pub mod backing_store;
pub mod bitmap;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod eviction;
pub mod lifecycle;
pub mod page;
pub mod populator;
pub mod registry;
pub mod source;

pub use config::{Config, ConfigBuilder};
pub use error::{VmError, VmResult};
pub use lifecycle::Engine;
pub use source::{Callout, ElementKind, PopulateSource, Source};
