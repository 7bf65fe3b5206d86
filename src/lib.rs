pub mod lex;
pub mod lines;
pub mod cpp;
pub mod expr;
pub mod macros;
pub mod cond;
pub mod error;

pub mod symbols;

pub use error::{Error, ErrorKind};
