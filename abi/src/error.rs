use std::path::PathBuf;

/// Errors produced while reading a binary or classifying its ABI surface.
///
/// Variants line up with the error-kind table in the ABI classification
/// design: classifier gaps and allocator invariant violations are kept
/// distinct from object/DWARF read failures so callers can apply the
/// right recovery policy (local vs. per-function vs. process-fatal)
/// instead of matching on a message string.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse object file")]
    Object(#[source] goblin::error::Error),

    #[error("failed to read DWARF debug information")]
    Dwarf(#[source] gimli::Error),

    #[error("architecture `{0}` is not supported; only x86-64 is implemented")]
    UnsupportedArchitecture(String),

    #[error("classifier could not determine a register class for `{type_name}`")]
    ClassifierGap { type_name: String },

    #[error("allocator invariant violated: {detail}")]
    AllocatorInvariant { detail: String },
}

impl From<gimli::Error> for Error {
    fn from(err: gimli::Error) -> Self {
        Error::Dwarf(err)
    }
}

impl From<goblin::error::Error> for Error {
    fn from(err: goblin::error::Error) -> Self {
        Error::Object(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
