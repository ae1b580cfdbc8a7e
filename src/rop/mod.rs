//! Register-based IR ("rop"): register specs, instructions, and the blocks of the output graph

mod block;
mod insn;
mod label;
mod register;

pub use block::*;
pub use insn::*;
pub use label::*;
pub use register::*;
