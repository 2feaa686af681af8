//! Per-file extraction: spatial and temporal extent side by side.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::harvest::aggregate::reconcile;
use crate::harvest::formats::FormatRegistry;
use crate::harvest::traits::ExtractOptions;
use crate::model::{ExtentKind, ExtentRecord, SpatialExtent, TimeInterval};
use crate::traits::{CrsTransform, FormatHandler, HandlerKind};

type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Extracts the extent of single files.
///
/// The bbox and tbox of a file are computed by two independent blocking tasks
/// that each return their own result; the record is assembled only after both
/// have finished. A failure in one task never affects the other and is never
/// returned to the caller: the field simply stays empty.
#[derive(Clone)]
pub struct FileExtractor {
    handlers: Arc<FormatRegistry>,
    transform: Arc<dyn CrsTransform>,
}

impl FileExtractor {
    pub fn new(handlers: Arc<FormatRegistry>, transform: Arc<dyn CrsTransform>) -> Self {
        Self {
            handlers,
            transform,
        }
    }

    /// Extracts the requested extents of `path`.
    ///
    /// Returns `None` when no registered handler supports the file.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn extract(&self, path: &Path, options: &ExtractOptions) -> Option<ExtentRecord> {
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let handlers = Arc::clone(&self.handlers);
        let file = path.to_path_buf();
        let handler = match tokio::task::spawn_blocking(move || handlers.find(&file)).await {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                info!(format = %format, "Did not find a compatible handler");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Task join error looking up a handler");
                return None;
            }
        };
        info!(handler = handler.name(), "Inspecting file");

        let (spatial, temporal) = tokio::join!(
            self.spatial_task(&handler, path, options),
            self.temporal_task(&handler, path, options),
        );

        let mut record = ExtentRecord::new(ExtentKind::File);
        record.format = Some(format);
        record.handler_name = Some(handler.name().to_string());
        record.set_spatial(spatial);
        record.tbox = temporal;

        debug!(record = ?record, "Extraction finished");
        Some(record)
    }

    async fn spatial_task(
        &self,
        handler: &Arc<dyn FormatHandler>,
        path: &Path,
        options: &ExtractOptions,
    ) -> Option<SpatialExtent> {
        if !options.bbox {
            return None;
        }

        let handler = Arc::clone(handler);
        let transform = Arc::clone(&self.transform);
        let file = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || -> Result<SpatialExtent, TaskError> {
            let raw = handler.bounding_box(&file)?;
            Ok(reconcile(raw, transform.as_ref())?)
        })
        .await;

        settle(outcome, path, "bbox")
    }

    async fn temporal_task(
        &self,
        handler: &Arc<dyn FormatHandler>,
        path: &Path,
        options: &ExtractOptions,
    ) -> Option<TimeInterval> {
        if !options.tbox {
            return None;
        }

        let sample_size = match (handler.kind(), options.sample_size) {
            (HandlerKind::Tabular, sample) => sample,
            (_, Some(_)) => {
                warn!("sample_size is ignored, it only applies to tabular files");
                None
            }
            (_, None) => None,
        };

        let handler = Arc::clone(handler);
        let file: PathBuf = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || -> Result<TimeInterval, TaskError> {
            Ok(handler.temporal_extent(&file, sample_size)?)
        })
        .await;

        settle(outcome, path, "tbox")
    }
}

/// Turns a task outcome into an optional field, logging any failure.
fn settle<T>(
    outcome: Result<Result<T, TaskError>, tokio::task::JoinError>,
    path: &Path,
    task: &str,
) -> Option<T> {
    match outcome {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Error extracting {}", task);
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Task join error extracting {}", task);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::traits::CrsError;
    use crate::model::{BBox, CrsId};
    use crate::traits::HandlerError;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    type SampleLog = Arc<Mutex<Vec<Option<usize>>>>;

    struct Identity;

    impl CrsTransform for Identity {
        fn to_wgs84(&self, _crs: CrsId, bbox: BBox) -> Result<BBox, CrsError> {
            Ok(bbox)
        }
    }

    /// Handler scripted per test; records the sample sizes it is given.
    struct Scripted {
        kind: HandlerKind,
        bbox: Option<[f64; 4]>,
        tbox: bool,
        panic_on_bbox: bool,
        samples: SampleLog,
    }

    impl Scripted {
        fn new(kind: HandlerKind) -> Self {
            Self {
                kind,
                bbox: Some([0.0, 0.0, 1.0, 1.0]),
                tbox: true,
                panic_on_bbox: false,
                samples: SampleLog::default(),
            }
        }
    }

    impl FormatHandler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> HandlerKind {
            self.kind
        }

        fn supports(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "dat")
        }

        fn bounding_box(&self, _path: &Path) -> Result<SpatialExtent, HandlerError> {
            if self.panic_on_bbox {
                panic!("reader crashed");
            }
            self.bbox
                .map(|b| SpatialExtent {
                    bbox: b.into(),
                    crs: CrsId::WGS84,
                })
                .ok_or(HandlerError::MissingExtent("spatial"))
        }

        fn temporal_extent(
            &self,
            _path: &Path,
            sample_size: Option<usize>,
        ) -> Result<TimeInterval, HandlerError> {
            self.samples.lock().unwrap().push(sample_size);
            if self.tbox {
                Ok(TimeInterval::new(
                    Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2018, 12, 31, 0, 0, 0).unwrap(),
                ))
            } else {
                Err(HandlerError::InvalidContent("no time column".to_string()))
            }
        }
    }

    fn build(handler: Scripted) -> FileExtractor {
        FileExtractor::new(
            Arc::new(FormatRegistry::new().register(handler)),
            Arc::new(Identity),
        )
    }

    #[tokio::test]
    async fn test_unsupported_file_is_absent() {
        let extractor = build(Scripted::new(HandlerKind::Vector));
        let record = extractor
            .extract(Path::new("readme.md"), &ExtractOptions::all())
            .await;
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_both_extents_extracted() {
        let extractor = build(Scripted::new(HandlerKind::Vector));
        let record = extractor
            .extract(Path::new("data.dat"), &ExtractOptions::all())
            .await
            .unwrap();

        assert_eq!(record.kind, ExtentKind::File);
        assert_eq!(record.format.as_deref(), Some("dat"));
        assert_eq!(record.handler_name.as_deref(), Some("scripted"));
        assert_eq!(record.bbox, Some(BBox::new(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(record.crs, Some(CrsId::WGS84));
        assert!(record.tbox.is_some());
    }

    #[tokio::test]
    async fn test_tbox_failure_keeps_bbox() {
        let mut handler = Scripted::new(HandlerKind::Vector);
        handler.tbox = false;
        let extractor = build(handler);

        let record = extractor
            .extract(Path::new("data.dat"), &ExtractOptions::all())
            .await
            .unwrap();
        assert!(record.bbox.is_some());
        assert!(record.tbox.is_none());
    }

    #[tokio::test]
    async fn test_bbox_panic_keeps_tbox() {
        let mut handler = Scripted::new(HandlerKind::Vector);
        handler.panic_on_bbox = true;
        let extractor = build(handler);

        let record = extractor
            .extract(Path::new("data.dat"), &ExtractOptions::all())
            .await
            .unwrap();
        assert!(record.bbox.is_none());
        assert!(record.crs.is_none());
        assert!(record.tbox.is_some());
    }

    #[tokio::test]
    async fn test_bbox_invalid_after_flip_is_absent() {
        let mut handler = Scripted::new(HandlerKind::Vector);
        handler.bbox = Some([100.0, 200.0, 120.0, 220.0]);
        let extractor = build(handler);

        let record = extractor
            .extract(Path::new("data.dat"), &ExtractOptions::new(true, false))
            .await
            .unwrap();
        assert!(record.bbox.is_none());
        assert!(record.tbox.is_none());
    }

    #[tokio::test]
    async fn test_sample_size_only_for_tabular() {
        let options = ExtractOptions::new(false, true).with_sample_size(5);

        let vector = Scripted::new(HandlerKind::Vector);
        let vector_log = Arc::clone(&vector.samples);
        let extractor = build(vector);
        extractor.extract(Path::new("a.dat"), &options).await.unwrap();

        let tabular = Scripted::new(HandlerKind::Tabular);
        let tabular_log = Arc::clone(&tabular.samples);
        let extractor = build(tabular);
        extractor.extract(Path::new("a.dat"), &options).await.unwrap();

        assert_eq!(*vector_log.lock().unwrap(), vec![None]);
        assert_eq!(*tabular_log.lock().unwrap(), vec![Some(5)]);
    }
}
