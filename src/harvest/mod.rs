//! Harvest module - extent extraction from files, directories and archives.
//!
//! This module provides the building blocks behind [`crate::GeoExtent`]:
//! - **Extraction**: per-file extents via [`extract::FileExtractor`]
//! - **Aggregation**: envelope and interval merging plus WGS84 reconciliation
//! - **Traversal**: budgeted directory/archive walks via [`pipeline::TraversalEngine`]
//! - **Formats**: built-in handlers in [`formats`]
//! - **Errors**: [`ExtentError`] and the capability errors

pub mod aggregate;
pub mod archive;
pub mod extract;
pub mod formats;
pub mod pipeline;
pub mod projection;
pub mod traits;

// Re-export commonly used types
pub use traits::{ArchiveError, CrsError, ExtentError, ExtractOptions};

pub use aggregate::{flip, merge_bbox, merge_tbox, reconcile, validate_wgs84};
pub use archive::ZipArchives;
pub use extract::FileExtractor;
pub use formats::{CsvHandler, FormatRegistry, GeoJsonHandler};
pub use pipeline::{TempExtraction, TimeBudget, TraversalEngine};
pub use projection::Proj4Transform;
