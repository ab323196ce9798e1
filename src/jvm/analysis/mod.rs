//! Control flow and frame analysis of method bodies
//!
//! [`ControlFlowGraph`] is fed by the method writer as instructions are emitted. Depending on
//! the [`ComputeMode`], it either tracks stack heights to compute `max_stack`, or runs full type
//! inference over [`Frame`]s to also produce the `StackMapTable`.

mod cfg;
mod constructors;
mod frame;
mod hierarchy;

pub use cfg::*;
pub use constructors::*;
pub use frame::*;
pub use hierarchy::*;
