//! Folding child extents into a parent extent, and bringing raw bounding
//! boxes into WGS84.

use tracing::debug;

use crate::harvest::traits::CrsError;
use crate::model::{BBox, CrsId, ExtentDetails, SpatialExtent, TimeInterval};
use crate::traits::CrsTransform;

/// Envelope of every child bbox, `None` if no child has one.
///
/// Children are reconciled to WGS84 individually before they get here, so
/// their boxes share one CRS.
pub fn merge_bbox(children: &ExtentDetails) -> Option<SpatialExtent> {
    let bbox = children
        .values()
        .filter_map(|child| child.bbox)
        .reduce(|acc, b| acc.union(&b))?;

    Some(SpatialExtent {
        bbox,
        crs: CrsId::WGS84,
    })
}

/// Earliest start and latest end over every child tbox.
pub fn merge_tbox(children: &ExtentDetails) -> Option<TimeInterval> {
    children
        .values()
        .filter_map(|child| child.tbox)
        .reduce(|acc, t| acc.union(&t))
}

/// Whether the box is finite, ordered and inside WGS84 bounds.
pub fn validate_wgs84(bbox: &BBox) -> bool {
    let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
    let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);

    bbox.is_finite()
        && bbox.min_lon <= bbox.max_lon
        && bbox.min_lat <= bbox.max_lat
        && lon_ok(bbox.min_lon)
        && lon_ok(bbox.max_lon)
        && lat_ok(bbox.min_lat)
        && lat_ok(bbox.max_lat)
}

/// Swaps longitude and latitude.
pub fn flip(bbox: &BBox) -> BBox {
    BBox::new(bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon)
}

/// Brings a raw extraction into WGS84.
///
/// WGS84 input is taken as-is, anything else goes through `transform`. A box
/// that fails validation gets its axes swapped once; if that does not help
/// either the extraction is rejected with [`CrsError::OutOfRange`].
pub fn reconcile(
    raw: SpatialExtent,
    transform: &dyn CrsTransform,
) -> Result<SpatialExtent, CrsError> {
    let bbox = if raw.crs == CrsId::WGS84 {
        raw.bbox
    } else {
        transform.to_wgs84(raw.crs, raw.bbox)?
    };

    if validate_wgs84(&bbox) {
        return Ok(SpatialExtent {
            bbox,
            crs: CrsId::WGS84,
        });
    }

    let flipped = flip(&bbox);
    debug!(bbox = ?bbox, flipped = ?flipped, "Bounding box out of range, trying flipped axes");
    if validate_wgs84(&flipped) {
        Ok(SpatialExtent {
            bbox: flipped,
            crs: CrsId::WGS84,
        })
    } else {
        Err(CrsError::OutOfRange { bbox: bbox.into() })
    }
}
