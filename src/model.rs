use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Ordered mapping of child name to its extent record.
pub type ExtentDetails = BTreeMap<String, ExtentRecord>;

/// What a record was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtentKind {
    File,
    Folder,
    Archive,
    Repository,
}

impl ExtentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtentKind::File => "file",
            ExtentKind::Folder => "folder",
            ExtentKind::Archive => "archive",
            ExtentKind::Repository => "repository",
        }
    }
}

/// Extent metadata for one file, directory, archive or repository.
///
/// Serializes to the geoextent output object. Its `format` member is the
/// file extension for files and the kind (`"folder"`, `"archive"`,
/// `"repository"`) otherwise; `timeout` is the exhausted budget in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RecordJson")]
pub struct ExtentRecord {
    pub kind: ExtentKind,

    /// File extension, only set for `File` records
    pub format: Option<String>,

    pub bbox: Option<BBox>,
    pub crs: Option<CrsId>,
    pub tbox: Option<TimeInterval>,
    pub handler_name: Option<String>,
    pub children: Option<ExtentDetails>,

    /// Budget that ran out, set on the top-level record only
    pub timeout: Option<Duration>,
}

impl ExtentRecord {
    /// Creates an empty record of the given kind.
    pub fn new(kind: ExtentKind) -> Self {
        Self {
            kind,
            format: None,
            bbox: None,
            crs: None,
            tbox: None,
            handler_name: None,
            children: None,
            timeout: None,
        }
    }

    /// Whether the traversal stopped early because its budget ran out.
    pub fn timed_out(&self) -> bool {
        self.timeout.is_some()
    }

    /// Value of the `format` member.
    pub fn format_name(&self) -> &str {
        match self.kind {
            ExtentKind::File => self.format.as_deref().unwrap_or_default(),
            kind => kind.as_str(),
        }
    }

    /// Spatial part of the record, when both bbox and CRS are known.
    pub fn spatial(&self) -> Option<SpatialExtent> {
        match (self.bbox, self.crs) {
            (Some(bbox), Some(crs)) => Some(SpatialExtent { bbox, crs }),
            _ => None,
        }
    }

    pub fn set_spatial(&mut self, extent: Option<SpatialExtent>) {
        self.bbox = extent.map(|e| e.bbox);
        self.crs = extent.map(|e| e.crs);
    }
}

impl Serialize for ExtentRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("format", self.format_name())?;
        if let Some(handler) = &self.handler_name {
            map.serialize_entry("geoextent_handler", handler)?;
        }
        if let Some(bbox) = &self.bbox {
            map.serialize_entry("bbox", bbox)?;
        }
        if let Some(crs) = &self.crs {
            map.serialize_entry("crs", crs)?;
        }
        if let Some(tbox) = &self.tbox {
            map.serialize_entry("tbox", tbox)?;
        }
        if let Some(children) = &self.children {
            map.serialize_entry("details", children)?;
        }
        if let Some(timeout) = self.timeout {
            map.serialize_entry("timeout", &timeout.as_secs_f64())?;
        }
        map.end()
    }
}

/// Deserialized form of an output object.
#[derive(Deserialize)]
struct RecordJson {
    format: String,
    #[serde(default)]
    geoextent_handler: Option<String>,
    #[serde(default)]
    bbox: Option<BBox>,
    #[serde(default)]
    crs: Option<CrsId>,
    #[serde(default)]
    tbox: Option<TimeInterval>,
    #[serde(default)]
    details: Option<ExtentDetails>,
    #[serde(default)]
    timeout: Option<f64>,
}

impl From<RecordJson> for ExtentRecord {
    fn from(json: RecordJson) -> Self {
        let kind = match json.format.as_str() {
            "folder" => ExtentKind::Folder,
            "archive" => ExtentKind::Archive,
            "repository" => ExtentKind::Repository,
            _ => ExtentKind::File,
        };
        Self {
            kind,
            format: (kind == ExtentKind::File).then_some(json.format),
            bbox: json.bbox,
            crs: json.crs,
            tbox: json.tbox,
            handler_name: json.geoextent_handler,
            children: json.details,
            timeout: json
                .timeout
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }
}

/// Axis-aligned bounding box `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Smallest box covering the given points, `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc: Option<BBox>, (x, y)| {
            let point = BBox::new(x, y, x, y);
            Some(match acc {
                Some(b) => b.union(&point),
                None => point,
            })
        })
    }

    /// Component-wise envelope of two boxes.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_lon, self.min_lat),
            (self.min_lon, self.max_lat),
            (self.max_lon, self.min_lat),
            (self.max_lon, self.max_lat),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.min_lon.is_finite()
            && self.min_lat.is_finite()
            && self.max_lon.is_finite()
            && self.max_lat.is_finite()
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.min_lon, b.min_lat, b.max_lon, b.max_lat]
    }
}

/// EPSG code of a coordinate reference system, serialized as `"4326"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CrsId(pub u32);

impl CrsId {
    pub const WGS84: CrsId = CrsId(4326);

    pub fn epsg(&self) -> u32 {
        self.0
    }

    /// Parses `"4326"`, `"EPSG:4326"`, `"epsg:4326"` and OGC URNs such as
    /// `"urn:ogc:def:crs:EPSG::3857"`. `OGC CRS84` maps to WGS84.
    pub fn parse(s: &str) -> Option<CrsId> {
        let s = s.trim();
        if s.ends_with("CRS84") {
            return Some(CrsId::WGS84);
        }
        let code = s.rsplit(':').next().unwrap_or(s);
        code.parse::<u32>().ok().map(CrsId)
    }
}

impl From<CrsId> for String {
    fn from(crs: CrsId) -> Self {
        crs.0.to_string()
    }
}

impl TryFrom<String> for CrsId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        CrsId::parse(&s).ok_or_else(|| format!("invalid crs '{s}'"))
    }
}

impl fmt::Display for CrsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// A bounding box together with the CRS it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialExtent {
    pub bbox: BBox,
    pub crs: CrsId,
}

/// Inclusive time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[DateTime<Utc>; 2]", into = "[DateTime<Utc>; 2]")]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Builds an interval, swapping the bounds if they arrive reversed.
    pub fn new(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    /// Smallest interval covering all instants, `None` for an empty iterator.
    pub fn spanning<I>(instants: I) -> Option<Self>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        instants.into_iter().fold(None, |acc: Option<TimeInterval>, t| {
            Some(match acc {
                Some(i) => i.union(&TimeInterval::new(t, t)),
                None => TimeInterval::new(t, t),
            })
        })
    }

    pub fn union(&self, other: &TimeInterval) -> TimeInterval {
        TimeInterval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<[DateTime<Utc>; 2]> for TimeInterval {
    fn from(v: [DateTime<Utc>; 2]) -> Self {
        TimeInterval::new(v[0], v[1])
    }
}

impl From<TimeInterval> for [DateTime<Utc>; 2] {
    fn from(t: TimeInterval) -> Self {
        [t.start, t.end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
    }

    #[test]
    fn test_crs_parse_variants() {
        assert_eq!(CrsId::parse("4326"), Some(CrsId::WGS84));
        assert_eq!(CrsId::parse("EPSG:3857"), Some(CrsId(3857)));
        assert_eq!(CrsId::parse("urn:ogc:def:crs:EPSG::25832"), Some(CrsId(25832)));
        assert_eq!(CrsId::parse("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(CrsId::WGS84));
        assert_eq!(CrsId::parse("not a crs"), None);
    }

    #[test]
    fn test_time_interval_orders_bounds() {
        let a = Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let interval = TimeInterval::new(a, b);
        assert_eq!(interval.start, b);
        assert_eq!(interval.end, a);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = ExtentRecord::new(ExtentKind::Folder);
        record.bbox = Some(BBox::new(0.0, 0.0, 1.0, 1.0));
        record.crs = Some(CrsId::WGS84);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["format"], "folder");
        assert_eq!(value["crs"], "4326");
        assert!(value.get("details").is_none());
        assert!(value.get("timeout").is_none());

        let back: ExtentRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_file_record_reports_extension() {
        let mut file = ExtentRecord::new(ExtentKind::File);
        file.format = Some("csv".to_string());
        file.handler_name = Some("handleCSV".to_string());
        file.bbox = Some(BBox::new(2.0, 1.0, 2.0, 1.0));
        file.crs = Some(CrsId::WGS84);

        let mut root = ExtentRecord::new(ExtentKind::Folder);
        root.children = Some(ExtentDetails::from([("a.csv".to_string(), file)]));
        root.timeout = Some(Duration::from_secs(30));

        let value = serde_json::to_value(&root).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "format": "folder",
                "details": {
                    "a.csv": {
                        "format": "csv",
                        "geoextent_handler": "handleCSV",
                        "bbox": [2.0, 1.0, 2.0, 1.0],
                        "crs": "4326"
                    }
                },
                "timeout": 30.0
            })
        );

        let back: ExtentRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, root);
        assert!(back.timed_out());
    }

    #[test]
    fn test_crs_rejects_garbage_on_read() {
        assert_eq!(serde_json::from_str::<CrsId>(r#""EPSG:3857""#).unwrap(), CrsId(3857));
        assert!(serde_json::from_str::<CrsId>(r#""nowhere""#).is_err());
    }
}
