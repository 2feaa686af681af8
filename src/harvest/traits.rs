//! Shared options and error types for the extent harvest.
//!
//! - Extraction switches via [`ExtractOptions`]
//! - Top-level failures via [`ExtentError`]
//! - Capability failures via [`ArchiveError`] and [`CrsError`]

use crate::model::CrsId;
use crate::providers::ProviderError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Extraction Options
// ============================================================================

/// Which extents to extract and how much detail to report.
///
/// At least one of `bbox` and `tbox` must be set; every entry point rejects
/// options that request nothing before doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Extract the spatial extent
    pub bbox: bool,

    /// Extract the temporal extent
    pub tbox: bool,

    /// Attach per-child records to directory, archive and repository results
    pub details: bool,

    /// Rows sampled to detect the time format of tabular files
    pub sample_size: Option<usize>,
}

impl ExtractOptions {
    pub fn new(bbox: bool, tbox: bool) -> Self {
        Self {
            bbox,
            tbox,
            details: false,
            sample_size: None,
        }
    }

    /// Both spatial and temporal extent.
    pub fn all() -> Self {
        Self::new(true, true)
    }

    pub fn with_details(mut self, details: bool) -> Self {
        self.details = details;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    /// Fails with [`ExtentError::NoExtractionOptions`] when nothing is requested.
    pub fn ensure_requested(&self) -> Result<(), ExtentError> {
        if self.bbox || self.tbox {
            Ok(())
        } else {
            Err(ExtentError::NoExtractionOptions)
        }
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::all()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the public entry points.
#[derive(Error, Debug)]
pub enum ExtentError {
    /// Neither bbox nor tbox extraction was requested
    #[error("No extraction options enabled: at least one of bbox and tbox is required")]
    NoExtractionOptions,

    /// No content provider recognizes the reference
    #[error("Unsupported repository reference '{reference}'")]
    UnsupportedRepositoryReference { reference: String },

    /// The selected content provider failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The input archive could not be unpacked
    #[error("Failed to unpack archive '{}': {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    /// The input path could not be read
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging directory could not be created
    #[error("Failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),
}

/// Errors that can occur while unpacking an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Failed to create or write the scratch directory
    #[error("I/O error during unpacking: {0}")]
    Io(#[from] std::io::Error),

    /// Archive format is not supported by this handler
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Archive file is corrupted or malformed
    #[error("Corrupted archive: {0}")]
    Corrupted(String),

    /// An entry would escape the scratch directory
    #[error("Path traversal attempt rejected: '{attempted}'")]
    PathTraversal { attempted: String },
}

/// Errors raised while bringing a bounding box into WGS84.
#[derive(Error, Debug)]
pub enum CrsError {
    /// The CRS is unknown to the transform backend
    #[error("{0} is not a supported coordinate reference system")]
    UnknownCrs(CrsId),

    /// The transform backend failed
    #[error("Transform from {crs} to EPSG:4326 failed: {reason}")]
    Transform { crs: CrsId, reason: String },

    /// The box stays outside WGS84 bounds, even with swapped axes
    #[error("Bounding box {bbox:?} is outside WGS84 bounds, also with flipped axes")]
    OutOfRange { bbox: [f64; 4] },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_require_an_extent() {
        assert!(ExtractOptions::new(false, false).ensure_requested().is_err());
        assert!(ExtractOptions::new(true, false).ensure_requested().is_ok());
        assert!(ExtractOptions::new(false, true).ensure_requested().is_ok());
    }

    #[test]
    fn test_options_builders() {
        let options = ExtractOptions::all().with_details(true).with_sample_size(10);
        assert!(options.bbox && options.tbox && options.details);
        assert_eq!(options.sample_size, Some(10));
    }

    #[test]
    fn test_unsupported_reference_message_names_reference() {
        let err = ExtentError::UnsupportedRepositoryReference {
            reference: "https://example.org/x".to_string(),
        };
        assert!(err.to_string().contains("https://example.org/x"));
    }
}
