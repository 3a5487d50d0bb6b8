//! Pipeline driver tying the indexing stages together
//!
//! The stages run strictly downstream with a single abort point: a failed
//! triple selection. Everything after that degrades gracefully, so once a
//! plausible cell exists the caller always receives an orientation.

// internal modules
use crate::candidate::refine_candidates;
use crate::error::{Error, Result};
use crate::index::{num_indexed, QVector};
use crate::refine::optimize_ub;
use crate::search::{scan_directions, MIN_Q_NORM};
use crate::triple::select_triple;

// crystallography toolkit
use ubtools_lattice::{niggli, CellErrors, UbMatrix};

// external crates
use log::{info, warn};

/// Fewest usable q-vectors worth searching at all
const MIN_QVECTORS: usize = 4;

/// Parameters steering the lattice search
///
/// Only the real-space length window is mandatory; the rest default to the
/// values that work for typical single-crystal data. All fields are public
/// for when they need adjusting.
///
/// ```rust
/// use ubtools_indexer::IndexSettings;
///
/// let mut settings = IndexSettings::new(8.0, 13.0);
/// settings.tolerance = 0.12;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct IndexSettings {
    /// Shortest real-space cell edge considered (angstroms)
    pub min_d: f64,
    /// Longest real-space cell edge considered (angstroms)
    pub max_d: f64,
    /// Maximum per-component Miller index deviation for an indexed peak
    pub tolerance: f64,
    /// Angular resolution of the hemisphere direction scan (degrees)
    pub degrees_per_step: f64,
    /// Smallest acceptable cell volume (cubic angstroms)
    pub min_volume: f64,
}

impl IndexSettings {
    /// Settings for a cell with edges in `[min_d, max_d]` angstroms
    ///
    /// Defaults: indexing tolerance 0.15, scan step 1.5 degrees, and a
    /// volume floor of `min_d³/4` (generous enough for any plausible cell
    /// in the window while rejecting flat ones).
    pub fn new(min_d: f64, max_d: f64) -> Self {
        Self {
            min_d,
            max_d,
            tolerance: 0.15,
            degrees_per_step: 1.5,
            min_volume: min_d.powi(3) / 4.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let reason = if !(self.min_d > 0.0) {
            "min_d must be positive"
        } else if !(self.max_d > self.min_d) {
            "max_d must be greater than min_d"
        } else if !(self.tolerance > 0.0) {
            "tolerance must be positive"
        } else if !(self.degrees_per_step > 0.0 && self.degrees_per_step <= 90.0) {
            "degrees_per_step must be in (0, 90]"
        } else if !(self.min_volume > 0.0) {
            "min_volume must be positive"
        } else {
            return Ok(());
        };

        Err(Error::InvalidSettings {
            reason: reason.to_string(),
        })
    }
}

/// Final output of a successful lattice search
///
/// Everything the caller needs to record the crystal orientation: the
/// Niggli-reduced UB matrix, how many peaks it indexes at the requested
/// tolerance, the refinement residual, and the lattice parameter
/// uncertainties.
#[derive(Debug, Clone, Copy)]
pub struct IndexingResult {
    /// Niggli-reduced orientation matrix
    pub ub: UbMatrix,
    /// Peaks indexed by `ub` at the search tolerance
    pub num_indexed: usize,
    /// Root-mean-square residual of the least-squares refinement
    ///
    /// `None` when the selected triple indexed too few peaks for the
    /// refinement to run; the orientation is then the unrefined one.
    pub fit_error: Option<f64>,
    /// One-sigma errors on the six lattice parameters
    pub cell_errors: CellErrors,
}

/// Find the UB matrix of the lattice behind a set of peak q-vectors
///
/// Runs the full search-then-refine pipeline: FFT direction scan,
/// candidate refinement, triple selection, global least-squares
/// refinement, and Niggli reduction. The peak list is read-only
/// throughout and the result is deterministic for fixed inputs.
///
/// # Errors
///
/// * [Error::InvalidSettings] - nonsensical search parameters
/// * [Error::InsufficientData] - fewer than four usable peaks, or no
///   direction shows any periodicity
/// * [Error::DegenerateTriple] - no independent triple of candidate
///   vectors spans an acceptable cell (e.g. collinear or coplanar peaks)
/// * [Error::InvalidUb] - the final matrix failed the validity check and
///   must not be persisted
///
/// All of these are ordinary values; the pipeline never panics on bad
/// data, so a failed search leaves no state to clean up.
pub fn find_ub(q_vectors: &[QVector], settings: &IndexSettings) -> Result<IndexingResult> {
    settings.validate()?;

    // zero-length vectors carry no lattice information at all
    let usable: Vec<QVector> = q_vectors
        .iter()
        .filter(|q| q.norm() > MIN_Q_NORM)
        .copied()
        .collect();

    if usable.len() < MIN_QVECTORS {
        return Err(Error::InsufficientData {
            found: usable.len(),
        });
    }

    info!(
        "searching for cell edges of {}-{} A over {} peaks",
        settings.min_d,
        settings.max_d,
        usable.len()
    );

    let trial_vectors = scan_directions(&usable, settings);
    if trial_vectors.is_empty() {
        info!("no direction shows real-space periodicity - could not find UB");
        return Err(Error::InsufficientData {
            found: usable.len(),
        });
    }

    let candidates = refine_candidates(&trial_vectors, &usable, settings.tolerance);
    info!(
        "{} candidate edge vectors from {} periodic directions",
        candidates.len(),
        trial_vectors.len()
    );

    if candidates.len() < 3 {
        warn!("fewer than three distinct edge vectors - peaks may not be linearly independent");
        return Err(Error::DegenerateTriple);
    }

    let raw_ub = select_triple(&candidates, &usable, settings.tolerance, settings.min_volume)?;
    let (refined, fit_error, cell_errors) = optimize_ub(&raw_ub, &usable, settings.tolerance);

    // reduction failure is not fatal, the refined cell is still usable
    let final_ub = match niggli::reduce(&refined) {
        Ok(reduced) => reduced,
        Err(error) => {
            warn!("cell reduction failed ({error}) - keeping the unreduced cell");
            refined
        }
    };

    if !final_ub.is_valid() {
        warn!("final UB failed the validity check - UB NOT SAVED");
        return Err(Error::InvalidUb);
    }

    let indexed = num_indexed(&final_ub, &usable, settings.tolerance);
    info!(
        "indexed {} of {} peaks at tolerance {}",
        indexed,
        usable.len(),
        settings.tolerance
    );

    Ok(IndexingResult {
        ub: final_ub,
        num_indexed: indexed,
        fit_error,
        cell_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let settings = IndexSettings::new(8.0, 13.0);
        assert_eq!(settings.tolerance, 0.15);
        assert_eq!(settings.degrees_per_step, 1.5);
        assert_eq!(settings.min_volume, 128.0);
    }

    #[test]
    fn bad_settings_are_rejected() {
        let mut settings = IndexSettings::new(13.0, 8.0);
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSettings { .. })
        ));

        settings = IndexSettings::new(8.0, 13.0);
        settings.tolerance = -0.1;
        assert!(settings.validate().is_err());

        settings = IndexSettings::new(8.0, 13.0);
        settings.degrees_per_step = 0.0;
        assert!(settings.validate().is_err());
    }
}
