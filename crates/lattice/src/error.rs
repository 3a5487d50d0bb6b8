//! Result and Error types for ubtools-lattice

/// Type alias for Result<T, lattice::Error>
pub type Result<T> = core::result::Result<T, Error>;

/// The error type for the `ubtools-lattice` crate
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("basis vectors are singular or numerically degenerate")]
    SingularBasis,

    #[error("cell reduction failed to converge after {iterations} iterations")]
    ReductionStalled { iterations: usize },
}
