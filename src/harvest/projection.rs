//! Reprojection of bounding boxes into WGS84 using pure Rust (proj4rs + crs-definitions).

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::harvest::traits::CrsError;
use crate::model::{BBox, CrsId};
use crate::traits::CrsTransform;

/// [`CrsTransform`] backed by the crs-definitions EPSG database.
///
/// All four corners are projected and the envelope of the results is
/// returned, so rotated or sheared projections still yield a covering box.
#[derive(Debug, Default, Clone, Copy)]
pub struct Proj4Transform;

impl Proj4Transform {
    pub fn new() -> Self {
        Self
    }
}

/// PROJ4 string for an EPSG code, if the database knows it.
pub fn proj_string(crs: CrsId) -> Option<&'static str> {
    u16::try_from(crs.epsg())
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Whether the CRS is a geographic (lon/lat) system
pub fn is_geographic(crs: CrsId) -> bool {
    match proj_string(crs) {
        Some(s) => s.contains("+proj=longlat"),
        None => crs == CrsId::WGS84,
    }
}

impl CrsTransform for Proj4Transform {
    fn to_wgs84(&self, crs: CrsId, bbox: BBox) -> Result<BBox, CrsError> {
        if crs == CrsId::WGS84 {
            return Ok(bbox);
        }

        let source_str = proj_string(crs).ok_or(CrsError::UnknownCrs(crs))?;
        let target_str = proj_string(CrsId::WGS84).ok_or(CrsError::UnknownCrs(CrsId::WGS84))?;

        let source = Proj::from_proj_string(source_str).map_err(|e| CrsError::Transform {
            crs,
            reason: format!("invalid source projection: {e:?}"),
        })?;
        let target = Proj::from_proj_string(target_str).map_err(|e| CrsError::Transform {
            crs,
            reason: format!("invalid target projection: {e:?}"),
        })?;

        // proj4rs works in radians for geographic systems
        let source_geographic = is_geographic(crs);

        let mut projected = Vec::with_capacity(4);
        for (x, y) in bbox.corners() {
            let mut point = if source_geographic {
                (x.to_radians(), y.to_radians(), 0.0)
            } else {
                (x, y, 0.0)
            };
            transform(&source, &target, &mut point).map_err(|e| CrsError::Transform {
                crs,
                reason: format!("{e:?}"),
            })?;
            projected.push((point.0.to_degrees(), point.1.to_degrees()));
        }

        let out = BBox::from_points(projected).ok_or_else(|| CrsError::Transform {
            crs,
            reason: "no points projected".to_string(),
        })?;
        if !out.is_finite() {
            return Err(CrsError::Transform {
                crs,
                reason: "projection produced non-finite coordinates".to_string(),
            });
        }
        Ok(out)
    }
}
