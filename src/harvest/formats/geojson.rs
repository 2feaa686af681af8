//! GeoJSON vector handler.

use geojson::{GeoJson, Geometry, JsonObject};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

use crate::harvest::formats::time::parse_timestamp;
use crate::model::{BBox, CrsId, SpatialExtent, TimeInterval};
use crate::traits::{FormatHandler, HandlerError, HandlerKind};

const GEOJSON_TYPES: &[&str] = &[
    "FeatureCollection",
    "Feature",
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

/// Bytes inspected by `supports`.
const SNIFF_LEN: u64 = 4096;

/// Reads `.geojson` and GeoJSON `.json` files.
///
/// The CRS comes from the legacy `crs` member when present and defaults to
/// WGS84 otherwise. The temporal extent spans every timestamp-like string
/// found in feature properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonHandler;

impl GeoJsonHandler {
    pub fn new() -> Self {
        Self
    }

    fn read(path: &Path) -> Result<GeoJson, HandlerError> {
        let text = std::fs::read_to_string(path)?;
        text.parse::<GeoJson>()
            .map_err(|e| HandlerError::InvalidContent(e.to_string()))
    }
}

impl FormatHandler for GeoJsonHandler {
    fn name(&self) -> &str {
        "handleVector"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Vector
    }

    /// Extension check plus a look for a GeoJSON `"type"` member near the
    /// start of the file.
    fn supports(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        if !matches!(extension.as_deref(), Some("geojson") | Some("json")) {
            return false;
        }

        let mut head = Vec::new();
        let read = std::fs::File::open(path)
            .and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut head));
        read.is_ok() && declares_geojson_type(&String::from_utf8_lossy(&head))
    }

    fn bounding_box(&self, path: &Path) -> Result<SpatialExtent, HandlerError> {
        let doc = Self::read(path)?;

        let mut positions = Vec::new();
        match &doc {
            GeoJson::FeatureCollection(fc) => fc
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .for_each(|g| collect_positions(g, &mut positions)),
            GeoJson::Feature(f) => {
                if let Some(g) = &f.geometry {
                    collect_positions(g, &mut positions);
                }
            }
            GeoJson::Geometry(g) => collect_positions(g, &mut positions),
        }
        let bbox = BBox::from_points(positions).ok_or(HandlerError::MissingExtent("spatial"))?;

        let crs = match legacy_crs_name(&doc) {
            Some(name) => CrsId::parse(name)
                .ok_or_else(|| HandlerError::InvalidContent(format!("unknown crs '{name}'")))?,
            None => CrsId::WGS84,
        };

        Ok(SpatialExtent { bbox, crs })
    }

    fn temporal_extent(
        &self,
        path: &Path,
        _sample_size: Option<usize>,
    ) -> Result<TimeInterval, HandlerError> {
        let properties: Vec<JsonObject> = match Self::read(path)? {
            GeoJson::FeatureCollection(fc) => {
                fc.features.into_iter().filter_map(|f| f.properties).collect()
            }
            GeoJson::Feature(f) => f.properties.into_iter().collect(),
            GeoJson::Geometry(_) => Vec::new(),
        };

        let instants = properties
            .iter()
            .flat_map(|p| p.values())
            .filter_map(Value::as_str)
            .filter_map(parse_timestamp);

        TimeInterval::spanning(instants).ok_or(HandlerError::MissingExtent("temporal"))
    }
}

/// Whether `head` holds a `"type": "<GeoJSON type>"` member.
fn declares_geojson_type(head: &str) -> bool {
    if !head.trim_start().starts_with('{') {
        return false;
    }
    head.match_indices("\"type\"").any(|(at, key)| {
        let rest = head[at + key.len()..].trim_start();
        let Some(rest) = rest.strip_prefix(':') else {
            return false;
        };
        let Some(rest) = rest.trim_start().strip_prefix('"') else {
            return false;
        };
        rest.split('"')
            .next()
            .is_some_and(|name| GEOJSON_TYPES.contains(&name))
    })
}

/// Name in the pre-RFC 7946 `crs` member of the top-level object.
fn legacy_crs_name(doc: &GeoJson) -> Option<&str> {
    let members = match doc {
        GeoJson::FeatureCollection(fc) => fc.foreign_members.as_ref(),
        GeoJson::Feature(f) => f.foreign_members.as_ref(),
        GeoJson::Geometry(g) => g.foreign_members.as_ref(),
    }?;
    members
        .get("crs")
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(Value::as_str)
}

fn collect_positions(geometry: &Geometry, out: &mut Vec<(f64, f64)>) {
    use geojson::Value as Shape;

    match &geometry.value {
        Shape::Point(p) => push_position(p, out),
        Shape::MultiPoint(points) | Shape::LineString(points) => {
            for p in points {
                push_position(p, out);
            }
        }
        Shape::MultiLineString(lines) | Shape::Polygon(lines) => {
            for p in lines.iter().flatten() {
                push_position(p, out);
            }
        }
        Shape::MultiPolygon(polygons) => {
            for p in polygons.iter().flatten().flatten() {
                push_position(p, out);
            }
        }
        Shape::GeometryCollection(geometries) => {
            for g in geometries {
                collect_positions(g, out);
            }
        }
    }
}

fn push_position(position: &[f64], out: &mut Vec<(f64, f64)>) {
    if let [x, y, ..] = position {
        out.push((*x, *y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "a", "observed": "2018-04-01"},
             "geometry": {"type": "Point", "coordinates": [7.6, 51.9]}},
            {"type": "Feature", "properties": {"observed": "2018-09-30T12:00:00Z"},
             "geometry": {"type": "LineString", "coordinates": [[7.0, 51.0], [8.5, 52.5]]}},
            {"type": "Feature", "properties": null, "geometry": null}
        ]
    }"#;

    fn write(content: &str, name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_supports_geojson_only() {
        let (_d, good) = write(COLLECTION, "data.geojson");
        let (_e, other_json) = write(r#"{"type": "Unrelated"}"#, "config.json");
        let (_f, broken) = write("{not json", "broken.geojson");

        assert!(GeoJsonHandler.supports(&good));
        assert!(!GeoJsonHandler.supports(&other_json));
        assert!(!GeoJsonHandler.supports(&broken));
    }

    #[test]
    fn test_supports_reads_only_the_head() {
        let padding = " ".repeat(SNIFF_LEN as usize);
        let late = format!("{{{padding}\"type\": \"FeatureCollection\", \"features\": []}}");
        let (_d, path) = write(&late, "late.geojson");
        assert!(!GeoJsonHandler.supports(&path));

        let (_e, truncated) = write(r#"{"type": "Feature", "geometry": "#, "cut.geojson");
        assert!(GeoJsonHandler.supports(&truncated));
        assert!(GeoJsonHandler.bounding_box(&truncated).is_err());
    }

    #[test]
    fn test_bbox_of_geometry_collection() {
        let doc = r#"{"type": "GeometryCollection", "geometries": [
            {"type": "Point", "coordinates": [-3.0, 40.0, 650.0]},
            {"type": "MultiPolygon", "coordinates": [[[[1, 1], [2, 1], [2, 45], [1, 1]]]]}
        ]}"#;
        let (_d, path) = write(doc, "mixed.geojson");
        let extent = GeoJsonHandler.bounding_box(&path).unwrap();
        assert_eq!(extent.bbox, BBox::new(-3.0, 1.0, 2.0, 45.0));
        assert!(GeoJsonHandler.temporal_extent(&path, None).is_err());
    }

    #[test]
    fn test_bbox_of_collection() {
        let (_d, path) = write(COLLECTION, "data.geojson");
        let extent = GeoJsonHandler.bounding_box(&path).unwrap();
        assert_eq!(extent.bbox, BBox::new(7.0, 51.0, 8.5, 52.5));
        assert_eq!(extent.crs, CrsId::WGS84);
    }

    #[test]
    fn test_bbox_reads_legacy_crs() {
        let doc = r#"{"type": "Feature",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [10, 0], [10, 20], [0, 0]]]}}"#;
        let (_d, path) = write(doc, "mercator.geojson");
        let extent = GeoJsonHandler.bounding_box(&path).unwrap();
        assert_eq!(extent.crs, CrsId(3857));
        assert_eq!(extent.bbox, BBox::new(0.0, 0.0, 10.0, 20.0));
    }

    #[test]
    fn test_tbox_from_properties() {
        let (_d, path) = write(COLLECTION, "data.geojson");
        let tbox = GeoJsonHandler.temporal_extent(&path, None).unwrap();
        assert_eq!(tbox.start, Utc.with_ymd_and_hms(2018, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(tbox.end, Utc.with_ymd_and_hms(2018, 9, 30, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_extents_are_errors() {
        let doc = r#"{"type": "FeatureCollection", "features": []}"#;
        let (_d, path) = write(doc, "empty.geojson");
        assert!(GeoJsonHandler.bounding_box(&path).is_err());
        assert!(GeoJsonHandler.temporal_extent(&path, None).is_err());
    }
}
