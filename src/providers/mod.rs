//! Research data repositories that can stage a record's files locally.
//!
//! - [`ContentProvider`]: validate a reference, fetch metadata, download files
//! - [`ProviderRegistry`]: ordered set of provider constructors
//! - [`select_provider`]: first provider that accepts a reference
//!
//! Built-in providers: [`Dryad`], [`Figshare`], [`Zenodo`].

pub mod client;
pub mod dryad;
pub mod figshare;
pub mod zenodo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::harvest::traits::ArchiveError;

pub use client::{ProviderClient, ProviderConfig};
pub use dryad::Dryad;
pub use figshare::Figshare;
pub use zenodo::Zenodo;

// ============================================================================
// Records and Errors
// ============================================================================

/// Platform metadata of one record, as returned by the platform API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub body: Value,
}

/// One downloadable file of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLink {
    pub url: String,

    /// Local file name, already reduced to a single path component
    pub file_name: String,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Metadata request failed or returned a non-success status
    #[error("Record '{reference}' does not exist or could not be retrieved: {source}")]
    RecordNotFound {
        reference: String,
        #[source]
        source: reqwest::Error,
    },

    /// The record lists no files that can be downloaded
    #[error("Record '{reference}' does not have open access files, verify its access rights")]
    NoAccessibleFiles { reference: String },

    /// An operation needed a record id before `validate` accepted a reference
    #[error("{provider} has not validated a reference")]
    NotValidated { provider: &'static str },

    /// A file could not be fetched
    #[error("Failed to download '{url}': {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A downloaded file could not be written
    #[error("Failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A downloaded bundle could not be unpacked
    #[error("Failed to unpack downloaded bundle: {0}")]
    Archive(#[from] ArchiveError),
}

// ============================================================================
// Provider Trait
// ============================================================================

/// A research data repository.
///
/// An instance handles a single reference: [`validate`](Self::validate)
/// parses and keeps the record id, and the metadata fetched afterwards is
/// cached for the lifetime of the instance.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Platform name (e.g., "Zenodo")
    fn name(&self) -> &'static str;

    /// Checks whether `reference` points into this platform and keeps its
    /// record id. Does not touch the network.
    fn validate(&mut self, reference: &str) -> bool;

    /// Record id parsed by the last successful `validate`.
    fn record_id(&self) -> Option<&str>;

    /// Platform metadata of the validated record, fetched once.
    async fn fetch_metadata(&mut self) -> Result<&ProviderRecord, ProviderError>;

    /// Files of the validated record, in download order.
    async fn file_links(&mut self) -> Result<Vec<FileLink>, ProviderError>;

    /// Downloads every file of the record into `target_dir`.
    ///
    /// Any failure aborts the whole download.
    async fn download(&mut self, target_dir: &Path) -> Result<(), ProviderError>;
}

// ============================================================================
// Registry
// ============================================================================

type ProviderBuilder = Arc<dyn Fn(&ProviderClient) -> Box<dyn ContentProvider> + Send + Sync>;

/// Ordered provider constructors sharing one [`ProviderConfig`].
///
/// Selection tries providers in registration order, so order is priority.
#[derive(Clone)]
pub struct ProviderRegistry {
    config: ProviderConfig,
    builders: Vec<ProviderBuilder>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            builders: Vec::new(),
        }
    }

    /// Dryad, Figshare and Zenodo with the default configuration.
    pub fn standard() -> Self {
        Self::new(ProviderConfig::default())
            .register(|client| Box::new(Dryad::new(client.clone())))
            .register(|client| Box::new(Figshare::new(client.clone())))
            .register(|client| Box::new(Zenodo::new(client.clone())))
    }

    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a provider constructor with the lowest priority so far.
    pub fn register<F>(mut self, builder: F) -> Self
    where
        F: Fn(&ProviderClient) -> Box<dyn ContentProvider> + Send + Sync + 'static,
    {
        self.builders.push(Arc::new(builder));
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Fresh provider instances, in priority order, sharing one client.
    pub fn instantiate(&self, throttle: bool) -> Result<Vec<Box<dyn ContentProvider>>, ProviderError> {
        let client = ProviderClient::new(self.config.clone())?.with_throttle(throttle);
        Ok(self.builders.iter().map(|build| build(&client)).collect())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// First provider that validates `reference`, or `None`.
pub fn select_provider(
    providers: Vec<Box<dyn ContentProvider>>,
    reference: &str,
) -> Option<Box<dyn ContentProvider>> {
    providers
        .into_iter()
        .find_map(|mut provider| provider.validate(reference).then_some(provider))
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Path segments following the first matching host prefix, or `None` when
/// `reference` starts with none of `hosts`.
pub(crate) fn record_segments<'a>(reference: &'a str, hosts: &[&str]) -> Option<Vec<&'a str>> {
    let rest = hosts.iter().find_map(|host| reference.strip_prefix(host))?;
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    Some(rest.split('/').filter(|s| !s.is_empty()).collect())
}

/// Path segments of a URL after the scheme and host, without query or fragment.
pub(crate) fn path_segments(url: &str) -> Vec<&str> {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    let path = url.split_once("://").map_or(url, |(_, rest)| rest);
    path.split('/').skip(1).filter(|s| !s.is_empty()).collect()
}

/// Last meaningful path segment of a file URL; a trailing `content` segment
/// is skipped.
pub(crate) fn trailing_segment(url: &str) -> Option<&str> {
    let segments = path_segments(url);
    match segments.as_slice() {
        [.., name, "content"] => Some(*name),
        [.., name] => Some(*name),
        [] => None,
    }
}

/// Reduces a file name to a single, non-special path component.
pub(crate) fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

/// `dir/name`, or `dir/stem-N.ext` when that file already exists.
pub(crate) fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Builds links from the `files` array of a record body.
///
/// `url_of` picks the download URL of one entry and `name_key` names the
/// member holding its file name. A missing or empty `files` array, or an
/// entry without a URL, means the record has no accessible files.
pub(crate) fn links_from_files(
    body: &Value,
    reference: &str,
    url_of: impl Fn(&Value) -> Option<&str>,
    name_key: &str,
) -> Result<Vec<FileLink>, ProviderError> {
    let no_files = || ProviderError::NoAccessibleFiles {
        reference: reference.to_string(),
    };
    let files = body
        .get("files")
        .and_then(Value::as_array)
        .filter(|files| !files.is_empty())
        .ok_or_else(no_files)?;

    files
        .iter()
        .map(|file| {
            let url = url_of(file).ok_or_else(no_files)?;
            let file_name = file
                .get(name_key)
                .and_then(Value::as_str)
                .or_else(|| trailing_segment(url))
                .and_then(sanitize_file_name)
                .ok_or_else(no_files)?;
            Ok(FileLink {
                url: url.to_string(),
                file_name,
            })
        })
        .collect()
}

/// Fetches the record body at `url`, mapping any failure to
/// [`ProviderError::RecordNotFound`].
pub(crate) async fn request_record(
    client: &ProviderClient,
    url: &str,
    reference: &str,
    id: &str,
) -> Result<ProviderRecord, ProviderError> {
    match client.get_json(url).await {
        Ok(body) => Ok(ProviderRecord {
            id: id.to_string(),
            body,
        }),
        Err(source) => Err(ProviderError::RecordNotFound {
            reference: reference.to_string(),
            source,
        }),
    }
}

/// Downloads `links` one after the other into `target_dir`.
///
/// Returns the written paths in link order.
pub(crate) async fn download_links(
    client: &ProviderClient,
    links: &[FileLink],
    target_dir: &Path,
) -> Result<Vec<PathBuf>, ProviderError> {
    let total = links.len();
    let mut written = Vec::with_capacity(total);

    for (index, link) in links.iter().enumerate() {
        let dest = unique_destination(target_dir, &link.file_name);
        let bytes = client.download_to(&link.url, &dest).await?;
        debug!(url = %link.url, path = %dest.display(), bytes, "File downloaded");
        info!("{} of {} files downloaded", index + 1, total);
        written.push(dest);
    }

    Ok(written)
}

// ============================================================================
// Test Support
// ============================================================================
