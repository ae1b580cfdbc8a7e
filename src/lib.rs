//! Translation of JVM method bodies into a register-based intermediate representation

pub mod analysis;
pub mod errors;
pub mod jvm;
pub mod rop;
pub mod translate;
pub mod util;
