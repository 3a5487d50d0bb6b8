// external crates
use nalgebra::Vector3;

// crystallography toolkit
use ubtools_lattice::UbMatrix;

/// Scattering vector of an observed peak in reciprocal angstroms
///
/// Includes the 2π factor, i.e. `q = 2π·UB·hkl` for a peak belonging to the
/// lattice described by UB.
pub type QVector = Vector3<f64>;

/// Fractional Miller indices of a scattering vector under a trial UB
///
/// Returns `None` for a singular matrix. The result is generally not an
/// integer triple; how far each component is from the nearest integer is
/// the indexing criterion.
pub fn miller_indices(ub: &UbMatrix, q: &QVector) -> Option<Vector3<f64>> {
    ub.q_to_hkl(q)
}

/// Largest per-component distance from the nearest integer triple
///
/// This is deliberately the max-component deviation rather than a Euclidean
/// distance, so a peak is only "indexed" when every one of h, k and l is
/// close to an integer.
pub fn max_integer_deviation(hkl: &Vector3<f64>) -> f64 {
    hkl.iter()
        .map(|v| (v - v.round()).abs())
        .fold(0.0, f64::max)
}

/// Whether a single peak is indexed by `ub` within `tolerance`
pub fn is_indexed(ub: &UbMatrix, q: &QVector, tolerance: f64) -> bool {
    match miller_indices(ub, q) {
        Some(hkl) => max_integer_deviation(&hkl) <= tolerance,
        None => false,
    }
}

/// Number of peaks indexed by `ub` within `tolerance`
///
/// Deterministic for fixed inputs, and monotonically non-decreasing in the
/// tolerance.
pub fn num_indexed(ub: &UbMatrix, q_vectors: &[QVector], tolerance: f64) -> usize {
    // invert once rather than per peak
    let inverse = match ub.matrix().try_inverse() {
        Some(inverse) => inverse,
        None => return 0,
    };

    q_vectors
        .iter()
        .filter(|q| {
            let hkl = inverse * *q / std::f64::consts::TAU;
            max_integer_deviation(&hkl) <= tolerance
        })
        .count()
}

/// Collect the (Miller index, q-vector) pairs indexed by `ub`
///
/// The Miller indices are rounded to the nearest integer triple, ready for
/// use as the fixed design matrix of the least-squares refinement.
pub fn indexed_pairs(
    ub: &UbMatrix,
    q_vectors: &[QVector],
    tolerance: f64,
) -> Vec<(Vector3<f64>, QVector)> {
    let inverse = match ub.matrix().try_inverse() {
        Some(inverse) => inverse,
        None => return Vec::new(),
    };

    q_vectors
        .iter()
        .filter_map(|q| {
            let hkl = inverse * q / std::f64::consts::TAU;
            if max_integer_deviation(&hkl) <= tolerance {
                Some((hkl.map(f64::round), *q))
            } else {
                None
            }
        })
        .collect()
}
