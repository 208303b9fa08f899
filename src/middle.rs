//! The SSA-form intermediate representation, the constant-folding
//! optimizer, and the renumbering pass.

pub mod fold;
pub mod renumber;
pub mod tir;

pub use fold::optimize;
pub use tir::*;
