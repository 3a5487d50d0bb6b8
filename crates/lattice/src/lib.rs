//! UB matrix and lattice cell operations
#![doc = include_str!("../readme.md")]

// Split into subfiles for development, but anything important is re-exported
mod cell;
mod error;
mod ub;

pub mod niggli;

// inline the important lattice types for a nice public API
#[doc(inline)]
pub use ub::UbMatrix;

#[doc(inline)]
pub use cell::{CellErrors, CellParameters};

#[doc(inline)]
pub use error::{Error, Result};
