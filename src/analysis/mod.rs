//! Type-flow analysis over the original bytecode: abstract types, simulated frames, and basic
//! block boundaries

mod blocks;
mod frame;
mod locals;
mod stack;
mod types;

pub use blocks::*;
pub use frame::*;
pub use locals::*;
pub use stack::*;
pub use types::*;
