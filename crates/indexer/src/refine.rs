//! Global least-squares refinement of the UB matrix
//!
//! Stage four of the pipeline. The raw UB from the triple selection is
//! only as good as its three defining vectors; this stage re-fits all nine
//! matrix elements against every indexed peak at once and propagates the
//! fit covariance into uncertainties on the six lattice parameters.

// internal modules
use crate::index::{indexed_pairs, QVector};

// crystallography toolkit
use ubtools_lattice::{CellErrors, UbMatrix};

// external crates
use log::warn;
use nalgebra::{DMatrix, Matrix3};

use std::f64::consts::TAU;

/// Fewest indexed peaks for a meaningful nine-parameter fit
const MIN_PAIRS: usize = 4;

/// Relative step for the finite-difference error propagation
const DERIVATIVE_STEP: f64 = 1.0e-6;

/// Refine a UB matrix against every peak it indexes
///
/// The peaks indexed by `ub` at `tolerance` fix a set of integer Miller
/// triples; the matrix minimising the total squared residual
/// `‖2π·UB·hkl − q‖²` over those pairs is then the solution of a linear
/// least-squares system, solved in one shot through an SVD.
///
/// Returns the refined matrix, the root-mean-square residual of the fit
/// (in units of q/2π per degree of freedom), and the one-sigma lattice
/// parameter errors.
///
/// Refinement never hard-fails: a rank-deficient or under-determined
/// system logs a warning and hands back the input matrix with no residual
/// (`None`) and zeroed parameter errors, leaving the caller with the best
/// available result.
pub fn optimize_ub(
    ub: &UbMatrix,
    q_vectors: &[QVector],
    tolerance: f64,
) -> (UbMatrix, Option<f64>, CellErrors) {
    let pairs = indexed_pairs(ub, q_vectors, tolerance);
    if pairs.len() < MIN_PAIRS {
        warn!(
            "only {} indexed peaks, too few to refine UB - keeping the unrefined matrix",
            pairs.len()
        );
        return (*ub, None, CellErrors::default());
    }

    // design matrix of Miller triples, observations in units of q/2π
    let design = DMatrix::from_fn(pairs.len(), 3, |row, col| pairs[row].0[col]);
    let observed = DMatrix::from_fn(pairs.len(), 3, |row, col| pairs[row].1[col] / TAU);

    let solution = match design.clone().svd(true, true).solve(&observed, 1.0e-10) {
        Ok(solution) => solution,
        Err(reason) => {
            warn!("UB least-squares solve failed ({reason}) - keeping the unrefined matrix");
            return (*ub, None, CellErrors::default());
        }
    };

    // the solve produces UBᵀ since the design rows are hkl triples
    let refined = UbMatrix::new(Matrix3::from_fn(|row, col| solution[(col, row)]));
    if !refined.is_valid() {
        warn!("refined UB failed the validity check - keeping the unrefined matrix");
        return (*ub, None, CellErrors::default());
    }

    // residuals of the fit, one column per reciprocal dimension
    let residuals = &design * &solution - &observed;
    let rss: f64 = residuals.iter().map(|r| r * r).sum();
    let dof = (3 * pairs.len()).saturating_sub(9).max(1);
    let fit_error = (rss / dof as f64).sqrt();

    let errors = lattice_parameter_errors(&refined, &design, &residuals);
    (refined, Some(fit_error), errors)
}

/// Propagate the least-squares covariance into lattice parameter errors
///
/// Each row of UB is an independent regression over the same design
/// matrix, so the coefficient covariance is `s²·(HᵀH)⁻¹` with the residual
/// variance `s²` taken per row. The partial derivative of every lattice
/// parameter with respect to every matrix element is estimated by central
/// finite differences and the variances accumulated in quadrature.
///
/// Returns zeroed errors when the normal matrix cannot be inverted, which
/// only happens for degenerate Miller index sets.
fn lattice_parameter_errors(
    ub: &UbMatrix,
    design: &DMatrix<f64>,
    residuals: &DMatrix<f64>,
) -> CellErrors {
    let normal = design.transpose() * design;
    let Some(covariance) = normal.try_inverse() else {
        warn!("normal matrix is singular - no lattice parameter errors available");
        return CellErrors::default();
    };

    let n = design.nrows();
    let dof = n.saturating_sub(3).max(1) as f64;

    // variance of each UB element: row variance times design covariance
    let mut element_variance = Matrix3::zeros();
    for row in 0..3 {
        let row_rss: f64 = residuals.column(row).iter().map(|r| r * r).sum();
        let row_variance = row_rss / dof;
        for col in 0..3 {
            element_variance[(row, col)] = row_variance * covariance[(col, col)];
        }
    }

    let scale = ub.matrix().amax();
    let step = DERIVATIVE_STEP * scale;

    // accumulate (∂p/∂e)²·var(e) over the nine elements for each parameter
    let mut variances = [0.0_f64; 6];
    for row in 0..3 {
        for col in 0..3 {
            let Some(gradient) = parameter_gradients(ub, row, col, step) else {
                continue;
            };
            for (variance, slope) in variances.iter_mut().zip(gradient) {
                *variance += slope * slope * element_variance[(row, col)];
            }
        }
    }

    CellErrors {
        a: variances[0].sqrt(),
        b: variances[1].sqrt(),
        c: variances[2].sqrt(),
        alpha: variances[3].sqrt(),
        beta: variances[4].sqrt(),
        gamma: variances[5].sqrt(),
    }
}

/// Central-difference slope of the six lattice parameters for one element
fn parameter_gradients(ub: &UbMatrix, row: usize, col: usize, step: f64) -> Option<[f64; 6]> {
    let mut plus = *ub.matrix();
    plus[(row, col)] += step;
    let mut minus = *ub.matrix();
    minus[(row, col)] -= step;

    let plus = UbMatrix::new(plus).cell_parameters().ok()?;
    let minus = UbMatrix::new(minus).cell_parameters().ok()?;

    Some([
        (plus.a - minus.a) / (2.0 * step),
        (plus.b - minus.b) / (2.0 * step),
        (plus.c - minus.c) / (2.0 * step),
        (plus.alpha - minus.alpha) / (2.0 * step),
        (plus.beta - minus.beta) / (2.0 * step),
        (plus.gamma - minus.gamma) / (2.0 * step),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    fn lattice_peaks(ub: &UbMatrix, extent: i32) -> Vec<QVector> {
        let mut peaks = Vec::new();
        for h in -extent..=extent {
            for k in -extent..=extent {
                for l in -extent..=extent {
                    if (h, k, l) == (0, 0, 0) {
                        continue;
                    }
                    peaks.push(ub.hkl_to_q(&Vector3::new(h as f64, k as f64, l as f64)));
                }
            }
        }
        peaks
    }

    fn rotated_ub() -> UbMatrix {
        let rotation = Rotation3::from_euler_angles(0.4, -0.3, 0.7);
        UbMatrix::from_real_cell(
            &(rotation * Vector3::new(8.5, 0.0, 0.0)),
            &(rotation * Vector3::new(0.0, 9.5, 0.0)),
            &(rotation * Vector3::new(0.0, 0.0, 11.0)),
        )
        .unwrap()
    }

    #[test]
    fn perturbed_matrix_refines_back_to_truth() {
        let truth = rotated_ub();
        let peaks = lattice_peaks(&truth, 3);

        // a small elementwise perturbation that still indexes everything
        let perturbed = UbMatrix::new(ub_plus(&truth, 2.0e-4));
        let (refined, fit_error, errors) = optimize_ub(&perturbed, &peaks, 0.15);

        for (got, want) in refined.matrix().iter().zip(truth.matrix().iter()) {
            assert!((got - want).abs() < 1e-10);
        }
        assert!(fit_error.unwrap() < 1e-6);
        assert!(errors.a < 1e-6 && errors.b < 1e-6 && errors.c < 1e-6);
    }

    fn ub_plus(ub: &UbMatrix, delta: f64) -> Matrix3<f64> {
        ub.matrix() + Matrix3::identity() * delta
    }

    #[test]
    fn too_few_peaks_degrades_gracefully() {
        let truth = rotated_ub();
        let peaks = lattice_peaks(&truth, 3);

        // a matrix so wrong it indexes nothing
        let hopeless = UbMatrix::new(Matrix3::identity() * 0.03);
        let (kept, fit_error, errors) = optimize_ub(&hopeless, &peaks, 0.05);

        assert_eq!(kept.matrix(), hopeless.matrix());
        assert!(fit_error.is_none());
        assert_eq!(errors, CellErrors::default());
    }
}
