// external crates
use nalgebra::Vector3;

// formatting helpers
use ubtools_utils::f;

/// Lattice parameters of a real-space unit cell
///
/// Edge lengths `a, b, c` are in angstroms, the angles `alpha, beta, gamma`
/// in degrees using the usual convention (`alpha` between `b` and `c`, and
/// so on). The volume is the unsigned parallelepiped volume in cubic
/// angstroms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellParameters {
    /// Length of the `a` edge (angstroms)
    pub a: f64,
    /// Length of the `b` edge (angstroms)
    pub b: f64,
    /// Length of the `c` edge (angstroms)
    pub c: f64,
    /// Angle between `b` and `c` (degrees)
    pub alpha: f64,
    /// Angle between `a` and `c` (degrees)
    pub beta: f64,
    /// Angle between `a` and `b` (degrees)
    pub gamma: f64,
    /// Unsigned cell volume (cubic angstroms)
    pub volume: f64,
}

impl CellParameters {
    /// Calculate the six lattice parameters and volume from cell edges
    pub fn from_real_cell(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Self {
        Self {
            a: a.norm(),
            b: b.norm(),
            c: c.norm(),
            alpha: b.angle(c).to_degrees(),
            beta: a.angle(c).to_degrees(),
            gamma: a.angle(b).to_degrees(),
            volume: a.dot(&b.cross(c)).abs(),
        }
    }
}

impl std::fmt::Display for CellParameters {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let lengths = f!("a={:.4} b={:.4} c={:.4}", self.a, self.b, self.c);
        let angles = f!(
            "alpha={:.3} beta={:.3} gamma={:.3}",
            self.alpha,
            self.beta,
            self.gamma
        );
        write!(fmt, "{} {} vol={:.2}", lengths, angles, self.volume)
    }
}

/// One-sigma uncertainties on the six lattice parameters
///
/// The `sigabc` vector of the refinement stage. Lengths are in angstroms and
/// angles in degrees, matching [CellParameters]. A zeroed set is used when
/// the refinement was too poorly conditioned for meaningful error estimates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CellErrors {
    /// Error on the `a` edge length
    pub a: f64,
    /// Error on the `b` edge length
    pub b: f64,
    /// Error on the `c` edge length
    pub c: f64,
    /// Error on the `alpha` angle
    pub alpha: f64,
    /// Error on the `beta` angle
    pub beta: f64,
    /// Error on the `gamma` angle
    pub gamma: f64,
}

impl std::fmt::Display for CellErrors {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "sig(abc)=({:.5}, {:.5}, {:.5}) sig(angles)=({:.4}, {:.4}, {:.4})",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthorhombic_parameters() {
        let cell = CellParameters::from_real_cell(
            &Vector3::new(8.5, 0.0, 0.0),
            &Vector3::new(0.0, 9.5, 0.0),
            &Vector3::new(0.0, 0.0, 11.0),
        );

        assert!((cell.a - 8.5).abs() < 1e-12);
        assert!((cell.b - 9.5).abs() < 1e-12);
        assert!((cell.c - 11.0).abs() < 1e-12);
        assert!((cell.alpha - 90.0).abs() < 1e-10);
        assert!((cell.beta - 90.0).abs() < 1e-10);
        assert!((cell.gamma - 90.0).abs() < 1e-10);
        assert!((cell.volume - 888.25).abs() < 1e-9);
    }

    #[test]
    fn monoclinic_beta_angle() {
        let beta: f64 = 100.0_f64.to_radians();
        let cell = CellParameters::from_real_cell(
            &Vector3::new(8.0, 0.0, 0.0),
            &Vector3::new(0.0, 10.0, 0.0),
            &Vector3::new(12.0 * beta.cos(), 0.0, 12.0 * beta.sin()),
        );

        assert!((cell.beta - 100.0).abs() < 1e-9);
        assert!((cell.alpha - 90.0).abs() < 1e-9);
        assert!((cell.gamma - 90.0).abs() < 1e-9);
    }
}
