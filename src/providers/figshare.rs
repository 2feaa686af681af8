use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::providers::client::ProviderClient;
use crate::providers::{
    download_links, links_from_files, record_segments, request_record, ContentProvider,
    FileLink, ProviderError, ProviderRecord,
};

const HOSTS: &[&str] = &["https://figshare.com/articles/", "http://figshare.com/articles/"];
const API: &str = "https://api.figshare.com/v2/articles/";

/// Figshare articles such as
/// `https://figshare.com/articles/dataset/<title>/12345`; the trailing
/// number is the article id.
pub struct Figshare {
    client: ProviderClient,
    api: String,
    reference: Option<String>,
    record_id: Option<String>,
    record: Option<ProviderRecord>,
}

impl Figshare {
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
            _ => Err(ProviderError::NotValidated {
                provider: "Figshare",
            }),
        }
    }
}

#[async_trait]
impl ContentProvider for Figshare {
    fn name(&self) -> &'static str {
        "Figshare"
    }

    fn validate(&mut self, reference: &str) -> bool {
        let Some(id) = record_segments(reference, HOSTS)
            .and_then(|segments| segments.last().map(|s| s.to_string()))
        else {
            return false;
        };
        self.reference = Some(reference.to_string());
        self.record_id = Some(id);
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
                let url = format!("{}{}", self.api, id);
                request_record(&self.client, &url, reference, id).await?
            }
        };
        Ok(self.record.insert(record))
    }

    async fn file_links(&mut self) -> Result<Vec<FileLink>, ProviderError> {
        let reference = self.validated()?.0.to_string();
        let record = self.fetch_metadata().await?;
        links_from_files(
            &record.body,
            &reference,
            |file| file.get("download_url").and_then(Value::as_str),
            "name",
        )
    }

    async fn download(&mut self, target_dir: &Path) -> Result<(), ProviderError> {
        debug!(record = ?self.record_id, "Downloading Figshare article");
        let links = self.file_links().await?;
        download_links(&self.client, &links, target_dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{serve, Route};
    use crate::providers::ProviderConfig;

    fn figshare() -> Figshare {
        Figshare::new(ProviderClient::new(ProviderConfig::default()).unwrap())
    }

    #[test]
    fn test_validate() {
        let mut provider = figshare();
        assert!(provider.validate("https://figshare.com/articles/dataset/Landslides/19248626"));
        assert_eq!(provider.record_id(), Some("19248626"));
        assert!(!provider.validate("https://zenodo.org/records/1"));
    }

    #[tokio::test]
    async fn test_file_links_named_from_metadata() {
        let server = serve(vec![Route::json(
            "/v2/articles/5",
            r#"{"files": [
                {"name": "sites.csv", "download_url": "https://ndownloader.figshare.com/files/111"},
                {"download_url": "https://ndownloader.figshare.com/files/222"}
            ]}"#,
        )])
        .await;
        let mut provider = figshare().with_api_base(server.url("/v2/articles/"));
        provider.validate("https://figshare.com/articles/dataset/x/5");

        let links = provider.file_links().await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].file_name, "sites.csv");
        assert_eq!(links[0].url, "https://ndownloader.figshare.com/files/111");
        assert_eq!(links[1].file_name, "222");
    }

    #[tokio::test]
    async fn test_failed_download_aborts() {
        let server = serve(vec![
            Route::json(
                "/v2/articles/6",
                r#"{"files": [
                    {"name": "a.csv", "download_url": "{base}/files/1"},
                    {"name": "b.csv", "download_url": "{base}/files/2"}
                ]}"#,
            ),
            Route::bytes("/files/1", b"time\n2020-01-01\n".to_vec()),
        ])
        .await;
        let mut provider = figshare().with_api_base(server.url("/v2/articles/"));
        provider.validate("https://figshare.com/articles/dataset/x/6");

        let dir = tempfile::tempdir().unwrap();
        let result = provider.download(dir.path()).await;
        assert!(matches!(result, Err(ProviderError::Download { .. })));
        assert!(dir.path().join("a.csv").is_file());
        assert!(!dir.path().join("b.csv").exists());
    }
}
