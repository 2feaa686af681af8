use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::providers::client::ProviderClient;
use crate::providers::{
    download_links, links_from_files, record_segments, request_record, ContentProvider,
    FileLink, ProviderError, ProviderRecord,
};

const HOSTS: &[&str] = &[
    "https://zenodo.org/records/",
    "http://zenodo.org/records/",
    "https://zenodo.org/api/records/",
];
const API: &str = "https://zenodo.org/api/records/";

/// Zenodo records, e.g. `https://zenodo.org/records/820562`.
pub struct Zenodo {
    client: ProviderClient,
    api: String,
    reference: Option<String>,
    record_id: Option<String>,
    record: Option<ProviderRecord>,
}

impl Zenodo {
    pub fn new(client: ProviderClient) -> Self {
        Self {
            client,
            api: API.to_string(),
            reference: None,
            record_id: None,
            record: None,
        }
    }

    /// Uses another API root (ending in `/`) for metadata requests.
    pub fn with_api_base(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    fn validated(&self) -> Result<(&str, &str), ProviderError> {
        match (&self.reference, &self.record_id) {
            (Some(reference), Some(id)) => Ok((reference, id)),
            _ => Err(ProviderError::NotValidated { provider: "Zenodo" }),
        }
    }
}

#[async_trait]
impl ContentProvider for Zenodo {
    fn name(&self) -> &'static str {
        "Zenodo"
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
            |file| file.pointer("/links/self").and_then(Value::as_str),
            "key",
        )
    }

    async fn download(&mut self, target_dir: &Path) -> Result<(), ProviderError> {
        debug!(record = ?self.record_id, throttle = self.client.is_throttled(), "Downloading Zenodo record");
        let links = self.file_links().await?;
        download_links(&self.client, &links, target_dir).await?;
        Ok(())
    }
}
