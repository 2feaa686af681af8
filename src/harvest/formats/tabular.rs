//! CSV handler for point tables with coordinate and/or time columns.

use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::harvest::formats::time::detect_format;
use crate::model::{BBox, CrsId, SpatialExtent, TimeInterval};
use crate::traits::{FormatHandler, HandlerError, HandlerKind};

const LON_COLUMNS: &[&str] = &["longitude", "long", "lon", "lng", "x"];
const LAT_COLUMNS: &[&str] = &["latitude", "lat", "y"];
const TIME_COLUMNS: &[&str] = &["time", "date", "datetime", "timestamp"];

/// Reads `.csv` files whose header names longitude/latitude or time columns.
///
/// Coordinates are taken as WGS84. The time format is detected on the first
/// `sample_size` non-empty values of the time column (all values when no
/// sample size is given) and then applied to the whole column.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvHandler;

impl CsvHandler {
    pub fn new() -> Self {
        Self
    }

    fn reader(path: &Path) -> Result<csv::Reader<File>, HandlerError> {
        let delimiter = sniff_delimiter(path)?;
        ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_error)
    }
}

impl FormatHandler for CsvHandler {
    fn name(&self) -> &str {
        "handleCSV"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Tabular
    }

    fn supports(&self, path: &Path) -> bool {
        let is_csv = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return false;
        }

        let Ok(mut reader) = Self::reader(path) else {
            return false;
        };
        match reader.headers() {
            Ok(headers) => {
                let spatial = find_column(headers, LON_COLUMNS).is_some()
                    && find_column(headers, LAT_COLUMNS).is_some();
                spatial || find_column(headers, TIME_COLUMNS).is_some()
            }
            Err(_) => false,
        }
    }

    fn bounding_box(&self, path: &Path) -> Result<SpatialExtent, HandlerError> {
        let mut reader = Self::reader(path)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let lon = find_column(&headers, LON_COLUMNS).ok_or(HandlerError::MissingExtent("longitude"))?;
        let lat = find_column(&headers, LAT_COLUMNS).ok_or(HandlerError::MissingExtent("latitude"))?;

        let mut points = Vec::new();
        for row in reader.records() {
            let row = row.map_err(csv_error)?;
            let x = row.get(lon).and_then(|v| v.parse::<f64>().ok());
            let y = row.get(lat).and_then(|v| v.parse::<f64>().ok());
            if let (Some(x), Some(y)) = (x, y) {
                points.push((x, y));
            }
        }

        let bbox = BBox::from_points(points).ok_or(HandlerError::MissingExtent("spatial"))?;
        Ok(SpatialExtent {
            bbox,
            crs: CrsId::WGS84,
        })
    }

    fn temporal_extent(
        &self,
        path: &Path,
        sample_size: Option<usize>,
    ) -> Result<TimeInterval, HandlerError> {
        let mut reader = Self::reader(path)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let column = find_column(&headers, TIME_COLUMNS).ok_or(HandlerError::MissingExtent("time"))?;

        let mut values = Vec::new();
        for row in reader.records() {
            let row = row.map_err(csv_error)?;
            if let Some(v) = row.get(column).filter(|v| !v.is_empty()) {
                values.push(v.to_string());
            }
        }

        let sample_len = sample_size.unwrap_or(values.len()).min(values.len());
        let format = detect_format(values[..sample_len].iter().map(String::as_str))
            .ok_or_else(|| HandlerError::InvalidContent("time format not recognized".to_string()))?;

        TimeInterval::spanning(values.iter().filter_map(|v| format.parse(v)))
            .ok_or(HandlerError::MissingExtent("temporal"))
    }
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

/// `;` when the header line has semicolons but no commas, `,` otherwise.
fn sniff_delimiter(path: &Path) -> Result<u8, HandlerError> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    if first.contains(';') && !first.contains(',') {
        Ok(b';')
    } else {
        Ok(b',')
    }
}

fn csv_error(e: csv::Error) -> HandlerError {
    HandlerError::InvalidContent(e.to_string())
}
