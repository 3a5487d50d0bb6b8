use crate::error::{Error, Result};

/// Extends functionality for slices of float arrays
pub trait SliceExt<T> {
    /// Find the maximum value in float arrays
    ///
    /// Only provides the maximum value from a collection of valid numbers. Any
    /// NAN values, infinite values, or empty slices will return an error.
    ///
    /// ```rust
    /// # use ubtools_utils::SliceExt;
    /// # use ubtools_utils::Error;
    /// // Successful cases
    /// assert_eq!([1.1, 0.5, 2.2].try_max(), Ok(2.2));
    ///
    /// // Error cases
    /// assert_eq!([1.1, f64::INFINITY, 2.2].try_max(), Err(Error::SliceContainsUndefinedValues));
    /// assert_eq!(Vec::<f64>::new().try_max(), Err(Error::SliceContainsNoValues));
    /// ```
    ///
    /// The float primitives (`f32`/`f64`) do not implement `Ord` due to `NaN`
    /// being incomparable, so calling `max()` on a collection of floats is
    /// not implemented in the standard library.
    ///
    /// This extension uses `total_cmp` to always produce an ordering in
    /// accordance to the totalOrder predicate as defined in the IEEE 754 (2008
    /// revision) floating point standard.
    fn try_max(&self) -> Result<T>;
}

impl SliceExt<f64> for [f64] {
    fn try_max(&self) -> Result<f64> {
        if self.iter().any(|v| !v.is_finite()) {
            return Err(Error::SliceContainsUndefinedValues);
        };

        if let Some(v) = self.iter().max_by(|a, b| a.total_cmp(b)).copied() {
            Ok(v)
        } else {
            Err(Error::SliceContainsNoValues)
        }
    }
}
