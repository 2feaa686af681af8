//! Extent extraction for records hosted on research data repositories.

use std::time::Duration;
use tracing::{error, info, instrument};

use crate::harvest::pipeline::TraversalEngine;
use crate::harvest::traits::{ExtentError, ExtractOptions};
use crate::model::{ExtentKind, ExtentRecord};
use crate::providers::{select_provider, ProviderRegistry};

/// Stages a repository record locally and walks it like a directory.
///
/// Providers are tried in registry order and the first one that validates the
/// reference is used; once one has validated there is no fallback to the
/// others. The staging directory lives in the platform temp location and is
/// removed on every exit path.
#[derive(Clone)]
pub struct RepositoryOrchestrator {
    engine: TraversalEngine,
    providers: ProviderRegistry,
}

impl RepositoryOrchestrator {
    pub fn new(engine: TraversalEngine, providers: ProviderRegistry) -> Self {
        Self { engine, providers }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Extracts the merged extent of the record behind `reference`.
    ///
    /// `throttle` delays every provider request; `budget` bounds the
    /// traversal of the staged files.
    #[instrument(skip(self, options))]
    pub async fn resolve(
        &self,
        reference: &str,
        options: &ExtractOptions,
        throttle: bool,
        budget: Option<Duration>,
    ) -> Result<ExtentRecord, ExtentError> {
        options.ensure_requested()?;

        let candidates = self.providers.instantiate(throttle)?;
        let Some(mut provider) = select_provider(candidates, reference) else {
            error!(
                reference,
                "Content provider not supported. Check the reference for typos and that the \
                 repository exists; supported providers are Dryad, Figshare and Zenodo"
            );
            return Err(ExtentError::UnsupportedRepositoryReference {
                reference: reference.to_string(),
            });
        };
        info!(
            provider = provider.name(),
            record = provider.record_id().unwrap_or_default(),
            "Selected content provider"
        );

        let staging = tempfile::Builder::new()
            .prefix("geoextent-staging-")
            .tempdir()
            .map_err(ExtentError::Staging)?;

        provider.download(staging.path()).await?;
        info!(staging = %staging.path().display(), "Record staged, extracting");

        let mut record = self.engine.walk(staging.path(), options, budget).await?;
        record.kind = ExtentKind::Repository;
        Ok(record)
    }
}
