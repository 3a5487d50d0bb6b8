//! Candidate edge vector refinement and deduplication
//!
//! Stage two of the pipeline. The raw trial vectors from the direction
//! scan are only as accurate as the angular step and FFT bin width, so
//! each one is polished by iterated linear least squares before the list
//! is sorted by length and collapsed to unique vectors.

// internal modules
use crate::index::QVector;

// external crates
use log::trace;
use nalgebra::{DMatrix, DVector, Vector3};

use std::f64::consts::TAU;

/// Least-squares polish passes per trial vector
///
/// The system is re-linearised around the rounded projection integers each
/// pass. Two or three passes are enough in practice; four is cheap.
const REFINE_PASSES: usize = 4;

/// Relative length difference below which two candidates can be duplicates
const DEDUP_LENGTH_TOL: f64 = 0.02;

/// Angle in degrees within which two directions count as parallel
const DEDUP_ANGLE_DEG: f64 = 2.0;

/// A refined real-space edge vector with its indexing quality
///
/// Produced by stage two, consumed by the triple selection. The quality
/// numbers use the 1D criterion: a peak is indexed by the vector when its
/// projection `q·v/2π` is within tolerance of an integer.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Real-space edge vector (angstroms)
    pub vector: Vector3<f64>,
    /// Number of peaks indexed by this vector alone
    pub indexed: usize,
    /// Sum of squared projection deviations over the indexed peaks
    pub fit_error: f64,
}

impl Candidate {
    /// Euclidean length of the edge vector in angstroms
    pub fn length(&self) -> f64 {
        self.vector.norm()
    }
}

/// Refine raw trial vectors and collapse them to a unique sorted list
///
/// Each trial vector is least-squares fitted against the projections it
/// best explains, scored at `tolerance`, sorted ascending by length, and
/// deduplicated. Duplicate means same length within a small relative
/// tolerance and parallel (or antiparallel) direction; the duplicate with
/// the higher indexed count wins, with lower fit error as the tie-break.
///
/// Deduplication is idempotent: running it again on its own output changes
/// nothing.
pub fn refine_candidates(
    trial_vectors: &[Vector3<f64>],
    q_vectors: &[QVector],
    tolerance: f64,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = trial_vectors
        .iter()
        .filter_map(|trial| refine_vector(trial, q_vectors, tolerance))
        .collect();

    candidates.sort_by(|a, b| a.length().total_cmp(&b.length()));
    let unique = deduplicate(candidates);

    trace!(
        "{} of {} trial vectors survived refinement and dedup",
        unique.len(),
        trial_vectors.len()
    );
    unique
}

/// Least-squares polish of a single trial edge vector
///
/// Each pass rounds the projections `q·v/2π` to their nearest integers and
/// solves the overdetermined linear system `(q/2π)·v' = n` for the vector
/// that best reproduces them. The solve goes through an SVD with a rank
/// tolerance, so degenerate peak sets (all q collinear, say) collapse the
/// solution onto the subspace the data actually constrains instead of
/// blowing up.
///
/// Returns `None` when the vector shrinks to nothing or indexes no peaks.
fn refine_vector(
    trial: &Vector3<f64>,
    q_vectors: &[QVector],
    tolerance: f64,
) -> Option<Candidate> {
    let mut vector = *trial;

    let design = DMatrix::from_fn(q_vectors.len(), 3, |row, col| q_vectors[row][col] / TAU);

    for _ in 0..REFINE_PASSES {
        let targets =
            DVector::from_fn(q_vectors.len(), |row, _| {
                (q_vectors[row].dot(&vector) / TAU).round()
            });

        let solution = design
            .clone()
            .svd(true, true)
            .solve(&targets, 1.0e-10)
            .ok()?;
        vector = Vector3::new(solution[0], solution[1], solution[2]);

        if vector.norm() < 1.0e-6 {
            return None;
        }
    }

    let (indexed, fit_error) = score_vector(&vector, q_vectors, tolerance);
    if indexed == 0 {
        return None;
    }

    Some(Candidate {
        vector,
        indexed,
        fit_error,
    })
}

/// Count 1D-indexed peaks and accumulate their squared deviations
fn score_vector(vector: &Vector3<f64>, q_vectors: &[QVector], tolerance: f64) -> (usize, f64) {
    let mut indexed = 0;
    let mut fit_error = 0.0;

    for q in q_vectors {
        let projection = q.dot(vector) / TAU;
        let deviation = (projection - projection.round()).abs();
        if deviation <= tolerance {
            indexed += 1;
            fit_error += deviation * deviation;
        }
    }

    (indexed, fit_error)
}

/// Collapse near-identical candidates, keeping the best scorer of each set
///
/// Assumes the input is sorted by length. The output preserves that order
/// and contains no two entries that are duplicates of each other.
fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        insert_unique(&mut unique, candidate);
    }

    unique.sort_by(|a, b| a.length().total_cmp(&b.length()));
    unique
}

/// Insert a candidate, merging it with any duplicates already kept
///
/// A candidate that beats a kept duplicate takes its place and is scanned
/// again, so a chain of pairwise duplicates collapses to a single winner
/// instead of leaving two near-identical survivors.
fn insert_unique(unique: &mut Vec<Candidate>, candidate: Candidate) {
    loop {
        let Some(position) = unique.iter().position(|kept| is_duplicate(kept, &candidate)) else {
            unique.push(candidate);
            return;
        };

        let kept = &unique[position];
        if candidate.indexed > kept.indexed
            || (candidate.indexed == kept.indexed && candidate.fit_error < kept.fit_error)
        {
            unique.remove(position);
        } else {
            return;
        }
    }
}

/// Same length within tolerance and parallel or antiparallel directions
fn is_duplicate(a: &Candidate, b: &Candidate) -> bool {
    let (la, lb) = (a.length(), b.length());
    if (la - lb).abs() > DEDUP_LENGTH_TOL * la.max(lb) {
        return false;
    }

    let cosine = a.vector.dot(&b.vector).abs() / (la * lb);
    cosine >= DEDUP_ANGLE_DEG.to_radians().cos()
}
