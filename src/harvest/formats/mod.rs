//! Format handler implementations and their registry.
//!
//! Built-in handlers:
//! - `tabular` - CSV files with coordinate and/or time columns
//! - `geojson` - GeoJSON feature collections, features and geometries
//!
//! Further handlers (e.g. GDAL-backed raster readers) plug in through
//! [`FormatRegistry::register`].

pub mod geojson;
pub mod tabular;
pub mod time;

use std::path::Path;
use std::sync::Arc;

use crate::traits::FormatHandler;

pub use self::geojson::GeoJsonHandler;
pub use self::tabular::CsvHandler;

/// Ordered list of format handlers.
///
/// Lookup returns the first handler whose `supports` check accepts a file, so
/// registration order is the priority order.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    handlers: Vec<Arc<dyn FormatHandler>>,
}

impl FormatRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers: CSV first, then GeoJSON.
    pub fn with_defaults() -> Self {
        Self::new().register(CsvHandler::new()).register(GeoJsonHandler::new())
    }

    /// Appends a handler with the lowest priority so far.
    pub fn register<H>(mut self, handler: H) -> Self
    where
        H: FormatHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// First handler that supports `path`.
    pub fn find(&self, path: &Path) -> Option<Arc<dyn FormatHandler>> {
        self.handlers.iter().find(|h| h.supports(path)).cloned()
    }

    /// Handler names in priority order
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["handleCSV", "handleVector"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("points.csv");
        std::fs::write(&csv, "lat,lon\n1,2\n").unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hello").unwrap();

        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.find(&csv).unwrap().name(), "handleCSV");
        assert!(registry.find(&txt).is_none());
        assert!(FormatRegistry::new().find(&csv).is_none());
    }
}
