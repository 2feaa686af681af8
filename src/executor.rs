use crate::harvest::archive::ZipArchives;
use crate::harvest::extract::FileExtractor;
use crate::harvest::formats::FormatRegistry;
use crate::harvest::pipeline::TraversalEngine;
use crate::harvest::projection::Proj4Transform;
use crate::harvest::traits::{ExtentError, ExtractOptions};
use crate::model::ExtentRecord;
use crate::providers::ProviderRegistry;
use crate::repository::RepositoryOrchestrator;
use crate::traits::{ArchiveHandler, CrsTransform};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Entry points for extent extraction.
///
/// `new()` wires the built-in collaborators: CSV and GeoJSON handlers,
/// proj4rs reprojection, zip archives and the Dryad, Figshare and Zenodo
/// providers. Each can be replaced through the `with_*` methods.
#[derive(Clone)]
pub struct GeoExtent {
    handlers: Arc<FormatRegistry>,
    transform: Arc<dyn CrsTransform>,
    archives: Arc<dyn ArchiveHandler>,
    providers: ProviderRegistry,
}

impl GeoExtent {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(FormatRegistry::with_defaults()),
            transform: Arc::new(Proj4Transform::new()),
            archives: Arc::new(ZipArchives::new()),
            providers: ProviderRegistry::standard(),
        }
    }

    pub fn with_handlers(mut self, handlers: FormatRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: CrsTransform + 'static,
    {
        self.transform = Arc::new(transform);
        self
    }

    pub fn with_archives<A>(mut self, archives: A) -> Self
    where
        A: ArchiveHandler + 'static,
    {
        self.archives = Arc::new(archives);
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn file_extractor(&self) -> FileExtractor {
        FileExtractor::new(Arc::clone(&self.handlers), Arc::clone(&self.transform))
    }

    pub fn traversal(&self) -> TraversalEngine {
        TraversalEngine::new(self.file_extractor(), Arc::clone(&self.archives))
    }

    pub fn repositories(&self) -> RepositoryOrchestrator {
        RepositoryOrchestrator::new(self.traversal(), self.providers.clone())
    }

    /// Extent of a single file; `Ok(None)` when no handler supports it.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn from_file(
        &self,
        path: &Path,
        options: &ExtractOptions,
    ) -> Result<Option<ExtentRecord>, ExtentError> {
        options.ensure_requested()?;
        if !path.is_file() {
            return Err(ExtentError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file"),
            });
        }

        info!("Extracting from file");
        Ok(self.file_extractor().extract(path, options).await)
    }

    /// Merged extent of a directory or archive, optionally bounded by `timeout`.
    ///
    /// A zero `timeout` is treated like `None`.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn from_directory(
        &self,
        path: &Path,
        options: &ExtractOptions,
        timeout: Option<Duration>,
    ) -> Result<ExtentRecord, ExtentError> {
        self.traversal().walk(path, options, timeout).await
    }

    /// Merged extent of a repository record (Dryad, Figshare, Zenodo URL).
    #[instrument(skip(self, options))]
    pub async fn from_repository(
        &self,
        reference: &str,
        options: &ExtractOptions,
        throttle: bool,
        timeout: Option<Duration>,
    ) -> Result<ExtentRecord, ExtentError> {
        self.repositories()
            .resolve(reference, options, throttle, timeout)
            .await
    }
}

impl Default for GeoExtent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::traits::CrsError;
    use crate::model::{BBox, CrsId, ExtentKind};

    const MERCATOR_POINTS: &str = r#"{"type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "EPSG:3857"}},
        "features": [{"type": "Feature", "properties": {},
            "geometry": {"type": "MultiPoint", "coordinates": [[0, 0], [1113194.9, 1118890.0]]}}]}"#;

    /// Rejects every CRS.
    struct NoTransform;

    impl CrsTransform for NoTransform {
        fn to_wgs84(&self, crs: CrsId, _bbox: BBox) -> Result<BBox, CrsError> {
            Err(CrsError::UnknownCrs(crs))
        }
    }

    #[tokio::test]
    async fn test_from_file_reprojects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mercator.geojson");
        std::fs::write(&path, MERCATOR_POINTS).unwrap();

        let record = GeoExtent::new()
            .from_file(&path, &ExtractOptions::new(true, false))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.kind, ExtentKind::File);
        assert_eq!(record.crs, Some(CrsId::WGS84));
        let bbox = record.bbox.unwrap();
        assert!(bbox.min_lon.abs() < 1e-6 && bbox.min_lat.abs() < 1e-6);
        assert!((bbox.max_lon - 10.0).abs() < 1e-3);
        assert!((bbox.max_lat - 10.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn test_custom_transform_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mercator.geojson");
        std::fs::write(&path, MERCATOR_POINTS).unwrap();

        let record = GeoExtent::new()
            .with_transform(NoTransform)
            .from_file(&path, &ExtractOptions::new(true, false))
            .await
            .unwrap()
            .unwrap();
        assert!(record.bbox.is_none());
    }

    #[tokio::test]
    async fn test_from_file_unsupported_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let geo = GeoExtent::default();
        assert!(geo
            .from_file(&path, &ExtractOptions::all())
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            geo.from_file(&dir.path().join("gone.csv"), &ExtractOptions::all()).await,
            Err(ExtentError::Io { .. })
        ));
        assert!(matches!(
            geo.from_file(&path, &ExtractOptions::new(false, false)).await,
            Err(ExtentError::NoExtractionOptions)
        ));
    }

    #[tokio::test]
    async fn test_from_directory_with_custom_handlers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "lat,lon\n10,20\n").unwrap();
        std::fs::write(dir.path().join("b.geojson"), MERCATOR_POINTS).unwrap();

        let csv_only = GeoExtent::new()
            .with_handlers(FormatRegistry::new().register(crate::harvest::formats::CsvHandler::new()));
        let record = csv_only
            .from_directory(dir.path(), &ExtractOptions::new(true, false).with_details(true), None)
            .await
            .unwrap();

        assert_eq!(record.bbox, Some(BBox::new(20.0, 10.0, 20.0, 10.0)));
        assert_eq!(record.children.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_from_repository_rejects_unknown_reference() {
        let result = GeoExtent::new()
            .from_repository("https://example.com/x", &ExtractOptions::all(), false, None)
            .await;
        assert!(matches!(
            result,
            Err(ExtentError::UnsupportedRepositoryReference { .. })
        ));
    }
}
