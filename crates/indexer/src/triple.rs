//! Selection of the cell-defining triple of candidate vectors
//!
//! Stage three of the pipeline. Three linearly independent candidates
//! spanning a sensible cell volume become the real-space basis of a trial
//! UB matrix. Shorter vectors are preferred so the search lands on the
//! primitive cell rather than some larger multiple of it.

// internal modules
use crate::candidate::Candidate;
use crate::error::{Error, Result};
use crate::index::{num_indexed, QVector};

// crystallography toolkit
use ubtools_lattice::UbMatrix;

// external crates
use itertools::Itertools;
use log::debug;

/// Only the shortest candidates are worth combining
///
/// The candidate list is sorted shortest-first and real cells hide in the
/// short end; combinations over more than this many vectors buy nothing
/// but cubic blow-up.
const MAX_TRIPLE_CANDIDATES: usize = 30;

/// Fraction of the best achievable indexing count a triple must reach
const INDEXING_FRACTION: f64 = 0.8;

/// A scored qualifying triple
struct ScoredTriple {
    ub: UbMatrix,
    indexed: usize,
    total_edge: f64,
}

/// Choose the triple of candidate vectors that defines the cell
///
/// Every combination of three candidates from the (sorted, deduplicated)
/// list qualifies when it is linearly independent, spans at least
/// `min_volume`, and produces a valid UB. Among qualifying triples, any
/// that index at least 80% of the best count are acceptable, and the most
/// compact (smallest summed edge length) of those wins. This biases the
/// result towards the true primitive cell over larger super-cells that
/// index equally well.
///
/// Returns [Error::DegenerateTriple] when no qualifying triple exists,
/// which is the one abort point of the pipeline.
pub fn select_triple(
    candidates: &[Candidate],
    q_vectors: &[QVector],
    tolerance: f64,
    min_volume: f64,
) -> Result<UbMatrix> {
    let pool = &candidates[..candidates.len().min(MAX_TRIPLE_CANDIDATES)];

    let mut scored: Vec<ScoredTriple> = Vec::new();
    for (a, b, c) in pool.iter().tuple_combinations() {
        let volume = a.vector.dot(&b.vector.cross(&c.vector)).abs();
        if volume < min_volume {
            continue;
        }

        let Ok(ub) = UbMatrix::from_real_cell(&a.vector, &b.vector, &c.vector) else {
            continue;
        };
        if !ub.is_valid() {
            continue;
        }

        scored.push(ScoredTriple {
            ub,
            indexed: num_indexed(&ub, q_vectors, tolerance),
            total_edge: a.length() + b.length() + c.length(),
        });
    }

    let best_count = scored.iter().map(|t| t.indexed).max().unwrap_or(0);
    if best_count == 0 {
        return Err(Error::DegenerateTriple);
    }

    let threshold = (INDEXING_FRACTION * best_count as f64).ceil() as usize;
    debug!(
        "{} qualifying triples, best indexes {} peaks, acceptance threshold {}",
        scored.len(),
        best_count,
        threshold
    );

    scored
        .into_iter()
        .filter(|t| t.indexed >= threshold)
        .min_by(|a, b| a.total_edge.total_cmp(&b.total_edge))
        .map(|t| t.ub)
        .ok_or(Error::DegenerateTriple)
}
