//! Read, transform, and write JVM classes
//!
//! Classes flow through visitors: a [`ClassReader`] turns a class file into a stream of events,
//! and a [`ClassWriter`] turns a stream of events back into a class file, computing `max_stack`
//! (and optionally the `StackMapTable`) along the way. Anything that implements the visitor
//! traits can sit in between.
//!
//! ### Simple example
//!
//! Generating a class with a single static method:
//!
//! ```
//! use classweave::jvm::class_file::Version;
//! use classweave::jvm::opcodes::*;
//! use classweave::jvm::*;
//! use classweave::jvm::analysis::ComputeMode;
//!
//! # fn generate_class() -> Result<(), Error> {
//! let mut writer = ClassWriter::new(WriterOptions::new(ComputeMode::Frames));
//! let info = ClassInfo {
//!     super_name: Some(String::from("java/lang/Object")),
//!     ..ClassInfo::default()
//! };
//! writer.visit(Version::JAVA8, ClassAccessFlags::PUBLIC, "me/alec/Abs", &info)?;
//!
//! let abs = MethodInfo {
//!     access: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     name: String::from("abs"),
//!     descriptor: String::from("(I)I"),
//!     signature: None,
//!     exceptions: vec![],
//!     deprecated: false,
//! };
//! if let Some(mut code) = writer.visit_method(&abs)? {
//!     let positive = Label::new();
//!     code.visit_code()?;
//!     code.visit_var_insn(ILOAD, 0)?;
//!     code.visit_jump_insn(IFGE, positive)?;
//!     code.visit_var_insn(ILOAD, 0)?;
//!     code.visit_insn(INEG)?;
//!     code.visit_insn(IRETURN)?;
//!     code.visit_label(positive)?;
//!     code.visit_var_insn(ILOAD, 0)?;
//!     code.visit_insn(IRETURN)?;
//!     code.visit_maxs(0, 0)?;
//!     code.visit_end()?;
//! }
//! writer.visit_end()?;
//! let bytes: Vec<u8> = writer.to_bytes()?;
//!
//! // Read it back
//! let mut tracer = Tracer::new();
//! ClassReader::new(&bytes)?.accept(&mut tracer)?;
//! assert!(tracer.to_string().contains("maxs stack 1 locals 1"));
//! # Ok(())
//! # }
//! # generate_class().unwrap();
//! ```

mod access_flags;
pub mod analysis;
pub mod annotations;
pub mod class_file;
mod descriptors;
mod errors;
mod label;
pub mod opcodes;
pub mod reader;
mod trace;
mod visitor;
pub mod writer;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use label::*;
pub use reader::ClassReader;
pub use trace::*;
pub use visitor::*;
pub use writer::{ClassWriter, WriterOptions};
