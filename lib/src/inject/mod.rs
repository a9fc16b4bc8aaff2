//! Hotfix preamble injection
//!
//! ### Pipeline
//!
//! For each module, [`select_methods`] picks the methods to instrument based on markers. Each
//! selected method then goes through the [`Stage`]s in order:
//!
//!   1. [`synthesize`] builds a [`Preamble`] calling into the [`PatchRegistry`]
//!   2. [`splice_preamble`] inserts it in front of the original first instruction
//!   3. offsets of the body are recomputed
//!   4. the body is encoded as part of the module
//!
//! [`Injector`] drives this over a batch of modules read from and written to a [`ModuleStore`].

mod errors;
mod injector;
mod preamble;
mod registry;
mod selector;
mod settings;
mod splice;
mod store;

pub use errors::*;
pub use injector::*;
pub use preamble::*;
pub use registry::*;
pub use selector::*;
pub use settings::*;
pub use splice::*;
pub use store::*;
