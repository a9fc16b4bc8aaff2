mod offset_vec;

pub use offset_vec::*;
