//! Lattice discovery and peak indexing from scattering vectors
//!
//! This crate takes the q-vectors of observed diffraction peaks from a
//! single crystal and recovers the sample orientation as a UB matrix,
//! without any prior knowledge of the lattice.
//!
//! # How it works
//!
//! The search runs as a fixed pipeline of stages, each consuming the output
//! of the previous one together with the original (read-only) peak list:
//!
//! 1. **Direction scan** - unit vectors covering a hemisphere are sampled
//!    at a fixed angular step. The peaks are projected onto each direction
//!    and an FFT of the projection histogram picks out directions along
//!    which the projections repeat with a real-space period between `min_d`
//!    and `max_d`. Directions are independent, so this stage fans out
//!    across threads.
//! 2. **Candidate refinement** - every (direction, period) pair becomes a
//!    trial real-space edge vector, refined by iterated least squares to
//!    index as many peaks as possible, then sorted by length and
//!    deduplicated.
//! 3. **Triple selection** - three short, linearly independent candidates
//!    spanning at least a minimum cell volume are chosen such that the
//!    resulting UB indexes at least 80% of the best count achievable by any
//!    qualifying triple.
//! 4. **UB refinement** - the full 3x3 matrix is re-fitted by linear least
//!    squares against every indexed peak, producing the final fit error and
//!    lattice parameter uncertainties.
//! 5. **Niggli reduction** - the refined matrix is transformed to the
//!    canonical reduced cell description of the same lattice.
//!
//! # Basic use
//!
//! Search for a cell with real-space edges between 8 and 13 angstroms:
//!
//! ```rust, no_run
//! use ubtools_indexer::{find_ub, IndexSettings, QVector};
//!
//! let peaks: Vec<QVector> = todo!("q-vectors from your reduction workflow");
//!
//! let settings = IndexSettings::new(8.0, 13.0);
//! let result = find_ub(&peaks, &settings).unwrap();
//!
//! println!("indexed {} peaks", result.num_indexed);
//! println!("{}", result.ub);
//! ```
//!
//! Failures are structured values, never panics. A peak list that is too
//! small, not from a single crystal, or degenerate (e.g. collinear
//! q-vectors) comes back as the matching [Error] variant and no orientation
//! is produced, so the caller never has a partial state to roll back.

// Split into subfiles for development, but anything important is re-exported
mod candidate;
mod error;
mod index;
mod pipeline;
mod refine;
mod search;
mod triple;

// inline the important types and entry points for a nice public API
#[doc(inline)]
pub use pipeline::{find_ub, IndexSettings, IndexingResult};

#[doc(inline)]
pub use candidate::Candidate;

#[doc(inline)]
pub use index::{indexed_pairs, is_indexed, miller_indices, num_indexed, QVector};

#[doc(inline)]
pub use error::{Error, Result};
