//! Binary layer of the class file format: encoding primitives, the constant pool, and attribute
//! payloads
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod attribute;
mod byte_vector;
mod bytecode_reader;
mod constants;
mod loadable;
mod serialize;
mod version;

pub use attribute::*;
pub use byte_vector::*;
pub use bytecode_reader::*;
pub use constants::*;
pub use loadable::*;
pub use serialize::*;
pub use version::*;

/// Every class file starts with these four bytes
pub const MAGIC: u32 = 0xCAFE_BABE;
