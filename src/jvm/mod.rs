//! Model of the JVM side of the translation: names, descriptors, the constant pool, and decoded
//! method bodies

mod access_flags;
pub mod bytecode;
mod class_graph;
mod constants;
mod decoder;
mod descriptors;
mod exceptions;
mod method;
mod names;

pub use access_flags::*;
pub use bytecode::{CompareMode, EqComparison, Instruction, InvokeType, OrdComparison, ShiftType};
pub use class_graph::*;
pub use constants::*;
pub use decoder::*;
pub use descriptors::*;
pub use exceptions::*;
pub use method::*;
pub use names::*;
