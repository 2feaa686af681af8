use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use tracing::debug;

use crate::harvest::archive::unpack_zip_into;
use crate::harvest::traits::ArchiveError;
use crate::providers::client::ProviderClient;
use crate::providers::{
    download_links, record_segments, request_record, ContentProvider, FileLink, ProviderError,
    ProviderRecord,
};

const HOSTS: &[&str] = &["https://datadryad.org/dataset/", "http://datadryad.org/dataset/"];
const API: &str = "https://datadryad.org/api/v2/datasets/";

/// Everything but unreserved characters, so the DOI's `:` and `/` are encoded.
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Dryad datasets, e.g. `https://datadryad.org/dataset/doi:10.5061/dryad.0k6djhb7x`.
///
/// The record id is the DOI made of the last two path segments. Files are
/// fetched as one zip bundle per dataset, unpacked into a sub-directory named
/// after the id, and the bundle itself is removed.
pub struct Dryad {
    client: ProviderClient,
    api: String,
    reference: Option<String>,
    record_id: Option<String>,
    record: Option<ProviderRecord>,
}

impl Dryad {
    pub fn new(client: ProviderClient) -> Self {
        Self {
            client,
            api: API.to_string(),
            reference: None,
            record_id: None,
            record: None,
        }
    }

    pub fn with_api_base(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    fn validated(&self) -> Result<(&str, &str), ProviderError> {
        match (&self.reference, &self.record_id) {
            (Some(reference), Some(id)) => Ok((reference, id)),
            _ => Err(ProviderError::NotValidated { provider: "Dryad" }),
        }
    }

    fn api_url(&self, id: &str) -> String {
        format!("{}{}", self.api, utf8_percent_encode(id, ID_ENCODE_SET))
    }
}

/// File-system friendly form of a record id.
fn bundle_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ContentProvider for Dryad {
    fn name(&self) -> &'static str {
        "Dryad"
    }

    fn validate(&mut self, reference: &str) -> bool {
        let Some(segments) = record_segments(reference, HOSTS) else {
            return false;
        };
        let [.., prefix, suffix] = segments.as_slice() else {
            return false;
        };
        self.reference = Some(reference.to_string());
        self.record_id = Some(format!("{prefix}/{suffix}"));
        self.record = None;
        true
    }

    fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    async fn fetch_metadata(&mut self) -> Result<&ProviderRecord, ProviderError> {
        let record = match self.record.take() {
            Some(record) => record,
            None => {
                let (reference, id) = self.validated()?;
                let url = self.api_url(id);
                request_record(&self.client, &url, reference, id).await?
            }
        };
        Ok(self.record.insert(record))
    }

    /// The dataset's zip bundle; no metadata request is made.
    async fn file_links(&mut self) -> Result<Vec<FileLink>, ProviderError> {
        let (_, id) = self.validated()?;
        Ok(vec![FileLink {
            url: format!("{}/download", self.api_url(id)),
            file_name: format!("{}.zip", bundle_stem(id)),
        }])
    }

    async fn download(&mut self, target_dir: &Path) -> Result<(), ProviderError> {
        debug!(record = ?self.record_id, "Downloading Dryad dataset");
        let links = self.file_links().await?;
        let bundles = download_links(&self.client, &links, target_dir).await?;

        let (_, id) = self.validated()?;
        let dest = target_dir.join(bundle_stem(id));
        for bundle in bundles {
            let (source, into) = (bundle.clone(), dest.clone());
            let entries = tokio::task::spawn_blocking(move || unpack_zip_into(&source, &into))
                .await
                .map_err(|e| ArchiveError::Corrupted(format!("Task join error: {}", e)))??;
            debug!(bundle = %bundle.display(), entries, "Dryad bundle unpacked");

            tokio::fs::remove_file(&bundle)
                .await
                .map_err(|source| ProviderError::Io {
                    path: bundle.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{serve, Route};
    use crate::providers::ProviderConfig;
    use std::io::Write;

    fn dryad() -> Dryad {
        Dryad::new(ProviderClient::new(ProviderConfig::default()).unwrap())
    }

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in files {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_validate_takes_doi() {
        let mut provider = dryad();
        assert!(provider.validate("https://datadryad.org/dataset/doi:10.5061/dryad.0k6djhb7x"));
        assert_eq!(provider.record_id(), Some("doi:10.5061/dryad.0k6djhb7x"));
        assert!(!provider.validate("https://datadryad.org/dataset/single"));
        assert!(!provider.validate("https://datadryad.org/search?q=x"));
    }

    #[tokio::test]
    async fn test_bundle_link_is_encoded() {
        let mut provider = dryad();
        provider.validate("https://datadryad.org/dataset/doi:10.5061/dryad.0k6djhb7x");

        let links = provider.file_links().await.unwrap();
        assert_eq!(
            links,
            vec![FileLink {
                url: "https://datadryad.org/api/v2/datasets/doi%3A10.5061%2Fdryad.0k6djhb7x/download"
                    .to_string(),
                file_name: "doi_10.5061_dryad.0k6djhb7x.zip".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_download_unpacks_bundle() {
        let bundle = zip_bytes(&[("data/sites.csv", "lat,lon\n1,2\n"), ("README.md", "hi")]);
        let server = serve(vec![Route::bytes(
            "/api/v2/datasets/doi%3A10.5061%2Fdryad.abc/download",
            bundle,
        )])
        .await;
        let mut provider = dryad().with_api_base(server.url("/api/v2/datasets/"));
        provider.validate("https://datadryad.org/dataset/doi:10.5061/dryad.abc");

        let dir = tempfile::tempdir().unwrap();
        provider.download(dir.path()).await.unwrap();

        let unpacked = dir.path().join("doi_10.5061_dryad.abc");
        assert!(unpacked.join("data/sites.csv").is_file());
        assert!(!dir.path().join("doi_10.5061_dryad.abc.zip").exists());
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let server = serve(vec![]).await;
        let mut provider = dryad().with_api_base(server.url("/api/v2/datasets/"));
        provider.validate("https://datadryad.org/dataset/doi:10.5061/dryad.none");

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            provider.download(dir.path()).await,
            Err(ProviderError::Download { .. })
        ));
        assert!(matches!(
            provider.fetch_metadata().await,
            Err(ProviderError::RecordNotFound { .. })
        ));
    }
}
