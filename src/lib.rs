//! `ubtools` is a semi-modular toolkit of fast and reliable libraries for
//! single-crystal diffraction indexing
//!
#![doc = include_str!("../readme.md")]
#![deny(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

// Re-exports of toolkit crates.
#[doc(inline)]
pub use ubtools_utils as utils;

#[cfg(feature = "indexer")]
#[cfg_attr(docsrs, doc(cfg(feature = "indexer")))]
#[doc(inline)]
pub use ubtools_indexer as indexer;

#[cfg(feature = "lattice")]
#[cfg_attr(docsrs, doc(cfg(feature = "lattice")))]
#[doc(inline)]
pub use ubtools_lattice as lattice;
