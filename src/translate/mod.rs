//! Translation of method bodies from stack-based bytecode into register IR
//!
//! [`translate_method`] drives the analysis: blocks are simulated from a worklist
//! until their start frames stop changing, each simulated instruction being handed to a
//! [`RopEmitter`]. Subroutines are inlined at the end, once every caller's frame is known.

mod emitter;
mod ropper;
mod settings;
mod simulator;
mod subroutines;

pub use emitter::*;
pub use ropper::*;
pub use settings::*;
pub use simulator::*;
pub use subroutines::*;
