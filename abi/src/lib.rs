//! x86-64 System V ABI classification and JSON corpus extraction for
//! ELF shared libraries.
//!
//! The pipeline, leaves to root: [`binary`] maps the file and reads its
//! dynamic symbol table, [`dwarf`] turns `.debug_info` into [`typeinfo::Type`]
//! trees, [`classify`] reduces a type to one or two eightbyte register
//! classes, [`allocate`] turns a classification into concrete register
//! or stack locations, and [`parameter`] assembles the result into the
//! JSON-serializable record that [`corpus`] collects per function.

pub mod allocate;
pub mod binary;
pub mod classify;
pub mod corpus;
pub mod dwarf;
pub mod error;
pub mod parameter;
pub mod symbol;
pub mod typeinfo;

pub use corpus::{build_corpus, Corpus};
pub use error::{Error, Result};
