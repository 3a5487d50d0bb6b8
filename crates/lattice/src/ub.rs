// internal modules
use crate::cell::CellParameters;
use crate::error::{Error, Result};

// external crates
use nalgebra::{Matrix3, Vector3};

// formatting helpers
use ubtools_utils::ValueExt;

/// Smallest |det(UB)| considered a usable orientation matrix
///
/// The determinant of UB is the reciprocal of the real cell volume, so this
/// corresponds to an absurdly large 10^7 cubic angstrom cell. Anything below
/// it is treated as degenerate.
pub const MIN_DETERMINANT: f64 = 1.0e-7;

/// Largest |det(UB)| considered a usable orientation matrix
///
/// Corresponds to a 1 cubic angstrom cell, far smaller than any physical
/// crystal lattice.
pub const MAX_DETERMINANT: f64 = 1.0;

/// Orientation matrix mapping Miller indices to scattering vectors
///
/// The columns of UB are the reciprocal basis vectors `a* b* c*` in units of
/// 1/angstrom, without the 2π factor. The mapping convention is
///
/// ```text
/// q = 2π · UB · (h,k,l)
/// ```
///
/// so a scattering vector divided by 2π and multiplied by the inverse of UB
/// recovers the (fractional) Miller indices of the corresponding peak.
///
/// `UbMatrix` is an immutable value type. Every operation that changes the
/// orientation builds and returns a new instance, which keeps the pipeline
/// stages free of aliasing surprises.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UbMatrix {
    matrix: Matrix3<f64>,
}

impl UbMatrix {
    /// Wrap an explicit 3x3 matrix using the `q = 2π·UB·hkl` convention
    pub fn new(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Build the UB matrix for a cell spanned by real-space edges `a, b, c`
    ///
    /// The edges are the real lattice translations in angstroms. UB is the
    /// inverse of the matrix whose rows are `a`, `b` and `c`, which makes
    /// `q·a = 2πh`, `q·b = 2πk` and `q·c = 2πl` hold for every lattice
    /// scattering vector.
    ///
    /// Returns [Error::SingularBasis] for edges that do not span a cell of
    /// sensible volume.
    pub fn from_real_cell(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Result<Self> {
        let basis = Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]);

        // determinant of the basis is the signed cell volume
        if basis.determinant().abs() < 1.0e-6 {
            return Err(Error::SingularBasis);
        }

        basis
            .try_inverse()
            .map(Self::new)
            .ok_or(Error::SingularBasis)
    }

    /// Reference to the underlying 3x3 matrix
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Determinant of UB, the reciprocal of the real cell volume
    pub fn determinant(&self) -> f64 {
        self.matrix.determinant()
    }

    /// Real-space edge vectors `[a, b, c]` of the cell described by UB
    ///
    /// These are the rows of UB⁻¹. Returns [Error::SingularBasis] when UB
    /// cannot be inverted.
    pub fn real_cell(&self) -> Result<[Vector3<f64>; 3]> {
        let inverse = self.matrix.try_inverse().ok_or(Error::SingularBasis)?;
        Ok([
            inverse.row(0).transpose(),
            inverse.row(1).transpose(),
            inverse.row(2).transpose(),
        ])
    }

    /// Scattering vector of the reflection `(h,k,l)`, i.e. `2π·UB·hkl`
    pub fn hkl_to_q(&self, hkl: &Vector3<f64>) -> Vector3<f64> {
        std::f64::consts::TAU * self.matrix * hkl
    }

    /// Fractional Miller indices of a scattering vector, i.e. `UB⁻¹·q/2π`
    ///
    /// Returns `None` when UB is singular. The result is generally
    /// non-integer; how close it is to an integer triple is exactly the
    /// indexing criterion used throughout the toolkit.
    pub fn q_to_hkl(&self, q: &Vector3<f64>) -> Option<Vector3<f64>> {
        self.matrix
            .try_inverse()
            .map(|inverse| inverse * q / std::f64::consts::TAU)
    }

    /// The `CheckUB` validity test
    ///
    /// A usable orientation matrix must have all-finite elements and a
    /// determinant magnitude between [MIN_DETERMINANT] and [MAX_DETERMINANT].
    pub fn is_valid(&self) -> bool {
        if self.matrix.iter().any(|v| !v.is_finite()) {
            return false;
        }

        let det = self.matrix.determinant().abs();
        (MIN_DETERMINANT..=MAX_DETERMINANT).contains(&det)
    }

    /// Lattice parameters `(a, b, c, α, β, γ, V)` of the real cell
    pub fn cell_parameters(&self) -> Result<CellParameters> {
        let [a, b, c] = self.real_cell()?;
        Ok(CellParameters::from_real_cell(&a, &b, &c))
    }
}

impl std::fmt::Display for UbMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for row in 0..3 {
            writeln!(
                f,
                "{}",
                self.matrix
                    .row(row)
                    .iter()
                    .map(|v| v.sci(6, 2))
                    .collect::<Vec<String>>()
                    .join("  ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic_ub(edge: f64) -> UbMatrix {
        UbMatrix::new(Matrix3::identity() / edge)
    }

    #[test]
    fn real_cell_round_trip() {
        let a = Vector3::new(8.5, 0.0, 0.0);
        let b = Vector3::new(0.3, 9.5, 0.0);
        let c = Vector3::new(-0.2, 0.4, 11.0);

        let ub = UbMatrix::from_real_cell(&a, &b, &c).unwrap();
        let [ra, rb, rc] = ub.real_cell().unwrap();

        assert!((ra - a).norm() < 1e-10);
        assert!((rb - b).norm() < 1e-10);
        assert!((rc - c).norm() < 1e-10);
    }

    #[test]
    fn hkl_q_mapping_is_consistent() {
        let ub = cubic_ub(10.0);
        let hkl = Vector3::new(1.0, -2.0, 3.0);

        let q = ub.hkl_to_q(&hkl);
        let back = ub.q_to_hkl(&q).unwrap();

        assert!((back - hkl).norm() < 1e-12);
    }

    #[test]
    fn projections_onto_real_edges_are_integer() {
        let a = Vector3::new(8.0, 1.0, 0.0);
        let b = Vector3::new(0.0, 10.0, -1.0);
        let c = Vector3::new(0.5, 0.0, 12.0);
        let ub = UbMatrix::from_real_cell(&a, &b, &c).unwrap();

        let q = ub.hkl_to_q(&Vector3::new(2.0, -1.0, 4.0));
        assert!((q.dot(&a) / std::f64::consts::TAU - 2.0).abs() < 1e-10);
        assert!((q.dot(&b) / std::f64::consts::TAU + 1.0).abs() < 1e-10);
        assert!((q.dot(&c) / std::f64::consts::TAU - 4.0).abs() < 1e-10);
    }

    #[test]
    fn flat_cell_is_rejected() {
        let a = Vector3::new(8.0, 0.0, 0.0);
        let b = Vector3::new(16.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 9.0, 0.0);
        assert!(UbMatrix::from_real_cell(&a, &b, &c).is_err());
    }

    #[test]
    fn validity_check_bounds() {
        assert!(cubic_ub(10.0).is_valid());

        // 10^7 cubic angstrom cell, determinant below the floor
        assert!(!cubic_ub(10_000.0).is_valid());

        // sub-angstrom cell
        assert!(!cubic_ub(0.5).is_valid());

        let nan = UbMatrix::new(Matrix3::identity() * f64::NAN);
        assert!(!nan.is_valid());
    }
}
