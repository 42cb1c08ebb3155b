//! APX definition parser: logical-line lexing, the data-signature grammar,
//! and the document-level section state machine (spec §4.1).

pub mod document;
pub mod lexer;
pub mod signature;

pub use document::parse_document;
