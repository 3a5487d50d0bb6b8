//! Hemisphere direction scan with FFT period detection
//!
//! Stage one of the pipeline. Unit direction vectors covering a hemisphere
//! are sampled at a fixed angular step (one hemisphere is enough because a
//! direction and its negative index identically). The peaks are projected
//! onto each direction, the projections are binned into a histogram, and
//! the magnitude spectrum of the histogram is searched for a dominant
//! frequency. A clear peak means the projections repeat with some period,
//! which is exactly what the scattering vectors of a single crystal do
//! along a real lattice direction.
//!
//! Every direction is evaluated independently against the same immutable
//! peak list, so the scan maps across a thread pool and the surviving
//! trial vectors are merged by plain concatenation. Nothing downstream
//! depends on their order.

// internal modules
use crate::index::QVector;
use crate::pipeline::IndexSettings;

// external crates
use nalgebra::Vector3;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

// extended slice helpers
use ubtools_utils::SliceExt;

use std::f64::consts::TAU;
use std::sync::Arc;

/// Number of histogram bins, and therefore FFT points, per direction
const FFT_SIZE: usize = 512;

/// Minimum spectrum peak magnitude as a fraction of the DC term
///
/// The DC term of the histogram spectrum is simply the number of peaks, so
/// this is the fraction of peaks that must contribute coherently to the
/// detected period before a direction is kept.
const PEAK_FRACTION: f64 = 0.4;

/// Scattering vectors shorter than this are unusable noise (1/angstrom)
pub(crate) const MIN_Q_NORM: f64 = 1.0e-6;

/// Scan a hemisphere of directions for real-space lattice periodicity
///
/// Returns one trial edge vector (direction scaled by the detected repeat
/// length) per direction with a detectable period in `[min_d, max_d]`.
/// Directions with a flat or noisy spectrum are dropped. The list is
/// unordered and unrefined; stage two cleans it up.
pub fn scan_directions(q_vectors: &[QVector], settings: &IndexSettings) -> Vec<Vector3<f64>> {
    let directions = hemisphere_directions(settings.degrees_per_step);

    // fixed projection-to-bin scale shared by every direction so the
    // frequency to length mapping is uniform across the scan
    let magnitudes: Vec<f64> = q_vectors.iter().map(|q| q.norm() / TAU).collect();
    let max_magnitude = match magnitudes.try_max() {
        Ok(value) if value > MIN_Q_NORM => value,
        _ => return Vec::new(),
    };
    let scale = (FFT_SIZE - 1) as f64 / max_magnitude;

    // one FFT plan shared read-only across the worker threads
    let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);

    directions
        .par_iter()
        .filter_map(|direction| {
            detect_period(q_vectors, direction, scale, fft.clone(), settings)
                .map(|length| direction * length)
        })
        .collect()
}

/// Enumerate unit vectors covering the `z >= 0` hemisphere
///
/// The polar angle steps from the pole to the equator at the requested
/// resolution and the azimuthal step is scaled by sin(theta) to keep the
/// areal density of directions roughly uniform.
fn hemisphere_directions(degrees_per_step: f64) -> Vec<Vector3<f64>> {
    let n_theta = (90.0 / degrees_per_step).round().max(1.0) as usize;

    let mut directions = Vec::new();
    for i in 0..=n_theta {
        let theta = std::f64::consts::FRAC_PI_2 * i as f64 / n_theta as f64;
        let n_phi = ((360.0 * theta.sin() / degrees_per_step).round() as usize).max(1);

        for j in 0..n_phi {
            let phi = TAU * j as f64 / n_phi as f64;
            directions.push(Vector3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            ));
        }
    }
    directions
}

/// Look for a dominant projection period along a single direction
///
/// The projections `|q·d|/2π` are histogrammed at `scale` bins per
/// reciprocal angstrom and the FFT magnitude spectrum of the histogram is
/// searched over the frequency band corresponding to repeat lengths in
/// `[min_d, max_d]`. A peak at (fractional, parabolic-interpolated) bin `k`
/// maps back to a repeat length of `k·scale/N`.
///
/// Returns the repeat length in angstroms, or `None` when the spectrum has
/// no acceptable peak or the projections span less than one period.
fn detect_period(
    q_vectors: &[QVector],
    direction: &Vector3<f64>,
    scale: f64,
    fft: Arc<dyn Fft<f64>>,
    settings: &IndexSettings,
) -> Option<f64> {
    let mut histogram = vec![0.0_f64; FFT_SIZE];
    let mut max_projection = 0.0_f64;

    for q in q_vectors {
        let projection = (q.dot(direction) / TAU).abs();
        max_projection = max_projection.max(projection);

        let bin = (projection * scale) as usize;
        if bin < FFT_SIZE {
            histogram[bin] += 1.0;
        }
    }

    // directions nearly perpendicular to all peaks see less than one full
    // repeat of even the largest allowed cell edge
    if max_projection < 1.0 / settings.max_d {
        return None;
    }

    let spectrum = magnitude_spectrum(&histogram, fft);

    // frequency band implied by the real-space length bounds
    let low = (FFT_SIZE as f64 * settings.min_d / scale).ceil() as usize;
    let high = ((FFT_SIZE as f64 * settings.max_d / scale).floor() as usize).min(spectrum.len() - 1);
    if low < 1 || low > high {
        return None;
    }

    let (peak_bin, peak_magnitude) = spectrum[low..=high]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(offset, magnitude)| (low + offset, *magnitude))?;

    if peak_magnitude < PEAK_FRACTION * spectrum[0] {
        return None;
    }

    let k = interpolate_peak(&spectrum, peak_bin);
    Some(k * scale / FFT_SIZE as f64)
}

/// Magnitude spectrum of a real-valued histogram up to the Nyquist bin
fn magnitude_spectrum(histogram: &[f64], fft: Arc<dyn Fft<f64>>) -> Vec<f64> {
    let mut buffer: Vec<Complex<f64>> = histogram
        .iter()
        .map(|&count| Complex::new(count, 0.0))
        .collect();

    fft.process(&mut buffer);

    buffer
        .iter()
        .take(histogram.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Parabolic sub-bin interpolation of a spectrum peak position
///
/// A single FFT bin is far too coarse to seed the least-squares refinement,
/// so the peak position is refined by fitting a parabola through the peak
/// bin and its two neighbours.
fn interpolate_peak(spectrum: &[f64], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= spectrum.len() {
        return bin as f64;
    }

    let (left, centre, right) = (spectrum[bin - 1], spectrum[bin], spectrum[bin + 1]);
    let curvature = left - 2.0 * centre + right;
    if curvature.abs() < f64::EPSILON {
        return bin as f64;
    }

    bin as f64 + 0.5 * (left - right) / curvature
}

#[cfg(test)]
mod tests {
    use super::*;
    use ubtools_lattice::UbMatrix;

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

    #[test]
    fn hemisphere_coverage() {
        let directions = hemisphere_directions(1.5);

        // all unit length, all in the upper hemisphere
        for d in &directions {
            assert!((d.norm() - 1.0).abs() < 1e-12);
            assert!(d.z >= -1e-12);
        }

        // roughly 2π/(step²) directions for a uniform areal density
        assert!(directions.len() > 5000);
        assert!(directions.len() < 15000);
    }

    #[test]
    fn finds_edges_of_a_known_lattice() {
        let ub = UbMatrix::from_real_cell(
            &Vector3::new(8.5, 0.0, 0.0),
            &Vector3::new(0.0, 9.5, 0.0),
            &Vector3::new(0.0, 0.0, 11.0),
        )
        .unwrap();
        let peaks = lattice_peaks(&ub, 3);

        let settings = IndexSettings::new(7.0, 13.0);
        let trials = scan_directions(&peaks, &settings);
        assert!(!trials.is_empty());

        // each real cell edge should be detected to within a few percent
        for edge in [8.5, 9.5, 11.0] {
            let best = trials
                .iter()
                .map(|t| (t.norm() - edge).abs() / edge)
                .fold(f64::INFINITY, f64::min);
            assert!(best < 0.05, "no trial vector near {edge} A (best {best})");
        }
    }

    #[test]
    fn perpendicular_data_is_dropped() {
        // peaks confined to the xy plane leave the z direction silent
        let ub = UbMatrix::from_real_cell(
            &Vector3::new(9.0, 0.0, 0.0),
            &Vector3::new(0.0, 10.0, 0.0),
            &Vector3::new(0.0, 0.0, 11.0),
        )
        .unwrap();

        let mut peaks = Vec::new();
        for h in -3..=3 {
            for k in -3..=3 {
                if (h, k) == (0, 0) {
                    continue;
                }
                peaks.push(ub.hkl_to_q(&Vector3::new(h as f64, k as f64, 0.0)));
            }
        }

        let settings = IndexSettings::new(7.0, 13.0);
        for trial in scan_directions(&peaks, &settings) {
            let out_of_plane = trial.normalize().z.abs();
            assert!(out_of_plane < 0.9, "picked up a near-z direction {trial}");
        }
    }

    #[test]
    fn empty_input_yields_no_directions() {
        let settings = IndexSettings::new(7.0, 13.0);
        assert!(scan_directions(&[], &settings).is_empty());
    }
}
