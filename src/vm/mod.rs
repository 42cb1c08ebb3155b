//! Serialization VM: compiles a resolved data element into a `Program` and
//! executes pack/unpack against a byte buffer (spec §4.2).

pub mod exec;
pub mod opcode;
pub mod program;

pub use exec::{pack, unpack};
pub use program::{compile, Program};
