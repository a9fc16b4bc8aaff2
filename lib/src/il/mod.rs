//! Compiled IL modules
//!
//! A [`Module`] is a set of type definitions, each with methods whose bodies are CIL-shaped stack
//! code. Modules are read from and written to a compact image format (see [`image`]), which
//! references strings, types and methods from code through metadata [`Token`]s.

mod attributes;
mod binary_format;
pub mod code;
mod errors;
pub mod image;
mod module;
mod resolver;
mod signatures;
mod tokens;

pub use attributes::*;
pub use binary_format::*;
pub use errors::*;
pub use module::*;
pub use resolver::*;
pub use signatures::*;
pub use tokens::*;
