//! Annotations: encoding, decoding, and an in-memory value tree
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.16

mod reader;
mod value;
mod writer;

pub use reader::*;
pub use value::*;
pub use writer::*;
