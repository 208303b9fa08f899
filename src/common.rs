//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent, deterministic iteration order:
// DFS traversal and per-variable phi insertion depend on visiting blocks and
// locals in a stable order.
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

use derive_more::Display;

/// Identifiers (source-level variable, array, and function names).
pub type Id = internment::Intern<String>;

/// Bytes occupied by a single scalar value (and by one array element).
pub const INTEGER_SIZE: i64 = 4;

/// A byte offset into the original source, used to locate lex/parse errors.
pub type Pos = usize;

/// Every fatal condition the compiler can raise, unified so `main` can
/// propagate a single error type with `?` and report it uniformly.
#[derive(Display)]
pub enum Error {
    #[display("{_0}")]
    Lex(crate::front::lex::LexError),
    #[display("{_0}")]
    Parse(crate::front::parse::ParseError),
    #[display("{_0}")]
    Semantic(crate::middle::tir::SemanticError),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<crate::front::lex::LexError> for Error {
    fn from(e: crate::front::lex::LexError) -> Self {
        Error::Lex(e)
    }
}

impl From<crate::front::parse::ParseError> for Error {
    fn from(e: crate::front::parse::ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<crate::middle::tir::SemanticError> for Error {
    fn from(e: crate::middle::tir::SemanticError) -> Self {
        Error::Semantic(e)
    }
}
