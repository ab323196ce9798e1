mod intern_table;
mod offset_vec;

pub use intern_table::*;
pub use offset_vec::*;
