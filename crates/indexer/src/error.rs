//! Result and Error types for ubtools-indexer

/// Type alias for Result<T, indexer::Error>
pub type Result<T> = core::result::Result<T, Error>;

/// The error type for the `ubtools-indexer` crate
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("too few usable q-vectors for indexing (found {found}, need at least 4)")]
    InsufficientData { found: usize },

    #[error("no linearly independent triple of candidate vectors indexes the peaks")]
    DegenerateTriple,

    #[error("computed UB matrix failed the validity check")]
    InvalidUb,

    #[error("invalid indexing settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("lattice operation failed")]
    LatticeError(#[from] ubtools_lattice::Error),
}
