//! Method code
//!
//! ### Structure
//!
//! A method [`Body`] is an arena of [`Instruction`]s addressed by [`InsnId`] handles, plus the
//! order in which those instructions are laid out. Branches always refer to their targets by
//! handle, so instructions can be inserted anywhere without anything else needing to be patched.
//!
//! ### Offsets
//!
//! Byte offsets only matter when code is read or written. They are derived from the layout by
//! [`Body::recompute_offsets`], which must run after the last insertion and before
//! [`Body::encode`] (which refuses stale offsets).

mod body;
mod encoding;
mod instructions;

pub use body::*;
pub use encoding::*;
pub use instructions::*;
