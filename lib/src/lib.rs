//! Inject hotfix preambles into the methods of compiled IL modules.
//!
//! Selected methods get a short instruction sequence spliced in front of their original code.
//! At run time that sequence asks an external patch registry whether the method has been patched,
//! and if so forwards the (boxed) arguments to the registry instead of running the original body.
//!
//!   - [`il`] models modules, methods and their instruction streams, and reads/writes them
//!   - [`inject`] selects methods, synthesizes preambles and splices them into bodies

pub mod il;
pub mod inject;
pub mod util;
