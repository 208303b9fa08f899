//! The back-end of the compiler: renumbering and Graphviz serialization.
//! There is no code generator here — this compiler's output is a CFG
//! description, not machine code (see SPEC_FULL.md's Non-goals).

pub mod dot;

pub use dot::render;
