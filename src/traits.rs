use crate::harvest::pipeline::TempExtraction;
use crate::harvest::traits::{ArchiveError, CrsError};
use crate::model::{BBox, CrsId, SpatialExtent, TimeInterval};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Failed to parse content: {0}")]
    InvalidContent(String),
    #[error("No {0} information found")]
    MissingExtent(&'static str),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Broad family of a format handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Vector,
    Raster,
    /// Tabular handlers are the only ones that honour a sample size.
    Tabular,
}

/// Reads spatial and temporal extent from one file format.
///
/// Handlers are blocking; callers run them on the blocking thread pool.
pub trait FormatHandler: Send + Sync {
    /// Returns the handler name reported in extracted records (e.g., "handleCSV").
    fn name(&self) -> &str;

    fn kind(&self) -> HandlerKind;

    /// Cheap check whether this handler can read `path`.
    fn supports(&self, path: &Path) -> bool;

    /// Bounding box in the file's native CRS.
    fn bounding_box(&self, path: &Path) -> Result<SpatialExtent, HandlerError>;

    /// Temporal extent. `sample_size` is only ever passed to tabular handlers.
    fn temporal_extent(
        &self,
        path: &Path,
        sample_size: Option<usize>,
    ) -> Result<TimeInterval, HandlerError>;
}

/// Reprojects bounding boxes into WGS84.
pub trait CrsTransform: Send + Sync {
    fn to_wgs84(&self, crs: CrsId, bbox: BBox) -> Result<BBox, CrsError>;
}

/// Detects and unpacks archives.
pub trait ArchiveHandler: Send + Sync {
    fn is_archive(&self, path: &Path) -> bool;

    /// Unpacks `path` into a fresh scratch directory owned by the returned value.
    fn unpack(&self, path: &Path) -> Result<TempExtraction, ArchiveError>;
}
