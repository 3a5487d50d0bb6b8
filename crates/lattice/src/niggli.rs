//! Niggli cell reduction
//!
//! Transforms a UB matrix into the equivalent matrix for the Niggli-reduced
//! cell: the canonical choice of basis with the shortest edges and the most
//! uniform angles that generates the same lattice points.
//!
//! The implementation is the classic Krivý–Gruber iteration. Each step
//! applies a unimodular integer change of basis (a swap, a sign fix, or a
//! shear by a neighbouring edge) until none of the reduction conditions
//! fire. Because every step has determinant ±1 with a compensating sign
//! flip, the cell volume is preserved exactly and the lattice is unchanged.
//!
//! ```rust
//! use nalgebra::Vector3;
//! use ubtools_lattice::{niggli, UbMatrix};
//!
//! // a deliberately skewed description of a primitive cubic cell
//! let ub = UbMatrix::from_real_cell(
//!     &Vector3::new(5.0, 0.0, 0.0),
//!     &Vector3::new(5.0, 5.0, 0.0),
//!     &Vector3::new(0.0, 0.0, 5.0),
//! )
//! .unwrap();
//!
//! let reduced = niggli::reduce(&ub).unwrap();
//! let cell = reduced.cell_parameters().unwrap();
//! assert!((cell.a - 5.0).abs() < 1e-10);
//! assert!((cell.b - 5.0).abs() < 1e-10);
//! assert!((cell.gamma - 90.0).abs() < 1e-8);
//! ```

// internal modules
use crate::error::{Error, Result};
use crate::ub::UbMatrix;

// external crates
use nalgebra::Vector3;

/// Hard cap on reduction steps before giving up
///
/// Well-formed cells reduce in a handful of iterations. Hitting the cap
/// means the metric tensor is pathological (near-degenerate or huge aspect
/// ratio) and the caller should keep the unreduced matrix.
const MAX_ITERATIONS: usize = 100;

/// Relative tolerance applied to every metric comparison
const RELATIVE_EPSILON: f64 = 1.0e-5;

/// Metric description of a basis, updated alongside the edge vectors
struct Metric {
    aa: f64,
    bb: f64,
    cc: f64,
    xi: f64,
    eta: f64,
    zeta: f64,
}

impl Metric {
    fn from_edges(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Self {
        Self {
            aa: a.dot(a),
            bb: b.dot(b),
            cc: c.dot(c),
            xi: 2.0 * b.dot(c),
            eta: 2.0 * a.dot(c),
            zeta: 2.0 * a.dot(b),
        }
    }
}

/// Reduce a UB matrix to its Niggli cell equivalent
///
/// The returned matrix describes exactly the same lattice as the input, but
/// through the canonical reduced basis (shortest three edges, `a ≤ b ≤ c`,
/// angles either all acute or all non-acute).
///
/// Reduction is a fixed point: reducing an already-reduced matrix returns
/// it unchanged apart from floating point noise.
///
/// Returns [Error::ReductionStalled] if the iteration cap is hit, in which
/// case the caller should fall back to the unreduced matrix, and
/// [Error::SingularBasis] for inputs with no invertible real cell.
pub fn reduce(ub: &UbMatrix) -> Result<UbMatrix> {
    let [mut a, mut b, mut c] = ub.real_cell()?;

    for _ in 0..MAX_ITERATIONS {
        let m = Metric::from_edges(&a, &b, &c);
        let eps = RELATIVE_EPSILON * (m.aa + m.bb + m.cc) / 3.0;

        // step 1: order the first two edges by length
        if m.aa > m.bb + eps || ((m.aa - m.bb).abs() <= eps && m.xi.abs() > m.eta.abs() + eps) {
            (a, b) = (-b, -a);
            c = -c;
            continue;
        }

        // step 2: order the last two edges by length
        if m.bb > m.cc + eps || ((m.bb - m.cc).abs() <= eps && m.eta.abs() > m.zeta.abs() + eps) {
            (b, c) = (-c, -b);
            a = -a;
            continue;
        }

        // steps 3/4: fix the signs of the off-diagonal metric terms
        let (i, j, k) = normalise_signs(m.xi, m.eta, m.zeta, eps);
        if (i, j, k) != (1.0, 1.0, 1.0) {
            a *= i;
            b *= j;
            c *= k;
            continue;
        }

        // step 5: shear c by b when xi is out of range
        if m.xi.abs() > m.bb + eps
            || ((m.xi - m.bb).abs() <= eps && 2.0 * m.eta < m.zeta - eps)
            || ((m.xi + m.bb).abs() <= eps && m.zeta < -eps)
        {
            c -= m.xi.signum() * b;
            continue;
        }

        // step 6: shear c by a when eta is out of range
        if m.eta.abs() > m.aa + eps
            || ((m.eta - m.aa).abs() <= eps && 2.0 * m.xi < m.zeta - eps)
            || ((m.eta + m.aa).abs() <= eps && m.zeta < -eps)
        {
            c -= m.eta.signum() * a;
            continue;
        }

        // step 7: shear b by a when zeta is out of range
        if m.zeta.abs() > m.aa + eps
            || ((m.zeta - m.aa).abs() <= eps && 2.0 * m.xi < m.eta - eps)
            || ((m.zeta + m.aa).abs() <= eps && m.eta < -eps)
        {
            b -= m.zeta.signum() * a;
            continue;
        }

        // step 8: fold the body diagonal back into c
        let total = m.xi + m.eta + m.zeta + m.aa + m.bb;
        if total < -eps || (total.abs() <= eps && 2.0 * (m.aa + m.eta) + m.zeta > eps) {
            c = a + b + c;
            continue;
        }

        // all conditions satisfied, the basis is Niggli reduced
        return UbMatrix::from_real_cell(&a, &b, &c);
    }

    Err(Error::ReductionStalled {
        iterations: MAX_ITERATIONS,
    })
}

/// Choose edge sign flips so the off-diagonal terms are all positive or all
/// non-positive
///
/// Flipping the signs of edges `(a, b, c)` by `(i, j, k)` maps the metric
/// terms to `(jk·xi, ik·eta, ij·zeta)`, and any achievable combination of
/// term flips has an even number of minus signs. When one of the terms is
/// zero within tolerance its flip is a free choice, which is what makes an
/// odd flip pattern resolvable.
fn normalise_signs(xi: f64, eta: f64, zeta: f64, eps: f64) -> (f64, f64, f64) {
    let mut flips = [1.0_f64; 3];
    let mut free: Option<usize> = None;

    if xi * eta * zeta > 0.0 {
        // step 3: make them all positive
        for (flip, term) in flips.iter_mut().zip([xi, eta, zeta]) {
            if term < -eps {
                *flip = -1.0;
            }
        }
    } else {
        // step 4: make them all non-positive
        for (idx, (flip, term)) in flips.iter_mut().zip([xi, eta, zeta]).enumerate() {
            if term > eps {
                *flip = -1.0;
            } else if term >= -eps {
                free = Some(idx);
            }
        }

        // an odd number of flips is only requested when a term is zero
        if flips[0] * flips[1] * flips[2] < 0.0 {
            if let Some(idx) = free {
                flips[idx] = -flips[idx];
            }
        }
    }

    // translate term flips into edge sign changes (determinant +1)
    (
        flips[1] * flips[2],
        flips[0] * flips[2],
        flips[0] * flips[1],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn skewed_cubic(edge: f64) -> UbMatrix {
        UbMatrix::from_real_cell(
            &Vector3::new(edge, 0.0, 0.0),
            &Vector3::new(edge, edge, 0.0),
            &Vector3::new(edge, edge, edge),
        )
        .unwrap()
    }

    #[rstest]
    #[case(5.0)]
    #[case(8.5)]
    #[case(12.0)]
    fn skewed_cubic_reduces_to_cube(#[case] edge: f64) {
        let reduced = reduce(&skewed_cubic(edge)).unwrap();
        let cell = reduced.cell_parameters().unwrap();

        assert!((cell.a - edge).abs() < 1e-9);
        assert!((cell.b - edge).abs() < 1e-9);
        assert!((cell.c - edge).abs() < 1e-9);
        assert!((cell.alpha - 90.0).abs() < 1e-7);
        assert!((cell.beta - 90.0).abs() < 1e-7);
        assert!((cell.gamma - 90.0).abs() < 1e-7);
    }

    #[test]
    fn volume_is_preserved() {
        let ub = skewed_cubic(7.0);
        let reduced = reduce(&ub).unwrap();

        let before = ub.cell_parameters().unwrap().volume;
        let after = reduced.cell_parameters().unwrap().volume;
        assert!((before - after).abs() < 1e-8 * before);
    }

    #[test]
    fn reduction_is_a_fixed_point() {
        let once = reduce(&skewed_cubic(9.0)).unwrap();
        let twice = reduce(&once).unwrap();

        for (x, y) in once.matrix().iter().zip(twice.matrix().iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn edges_come_out_sorted() {
        // a reduced description exists with edges 6, 7, 9
        let ub = UbMatrix::from_real_cell(
            &Vector3::new(9.0, 0.0, 0.0),
            &Vector3::new(0.0, 6.0, 0.0),
            &Vector3::new(9.0, 6.0, 7.0),
        )
        .unwrap();

        let cell = reduce(&ub).unwrap().cell_parameters().unwrap();
        assert!(cell.a <= cell.b + 1e-9);
        assert!(cell.b <= cell.c + 1e-9);
        assert!((cell.a - 6.0).abs() < 1e-9);
        assert!((cell.b - 7.0).abs() < 1e-9);
        assert!((cell.c - 9.0).abs() < 1e-9);
    }

    #[test]
    fn already_reduced_monoclinic_is_unchanged() {
        let beta: f64 = 100.0_f64.to_radians();
        let ub = UbMatrix::from_real_cell(
            &Vector3::new(8.0, 0.0, 0.0),
            &Vector3::new(0.0, 10.0, 0.0),
            &Vector3::new(12.0 * beta.cos(), 0.0, 12.0 * beta.sin()),
        )
        .unwrap();

        let cell = reduce(&ub).unwrap().cell_parameters().unwrap();
        assert!((cell.a - 8.0).abs() < 1e-9);
        assert!((cell.b - 10.0).abs() < 1e-9);
        assert!((cell.c - 12.0).abs() < 1e-9);
        assert!((cell.beta - 100.0).abs() < 1e-7);
    }
}
