//! Best-effort scan persistence.
//!
//! The scheduler writes through this trait on its throttled windows; write
//! failures are logged and never abort a scan.

use crate::types::{ExtractionResult, Result, WebsiftError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Serializable deep-scan progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepScanState {
    pub running: bool,
    pub current_depth: usize,
    pub max_depth: usize,
    pub scanned_count: usize,
    pub processed_count: usize,
}

/// Key-value persistence consumed by the scheduler.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn save_scan_results(
        &self,
        site: &str,
        results: &ExtractionResult,
        page_url: &str,
        title: Option<&str>,
    ) -> Result<()>;

    async fn save_deep_scan_state(&self, site: &str, state: &DeepScanState) -> Result<()>;
}

/// JSON files under a directory, one pair per site.
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn site_path(&self, site: &str, kind: &str) -> PathBuf {
        let encoded = urlencoding::encode(site).into_owned();
        self.directory.join(format!("{}.{}.json", encoded, kind))
    }

    async fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| WebsiftError::StorageError(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| WebsiftError::StorageError(e.to_string()))?;
        debug!("persisted {:?}", path);
        Ok(())
    }
}

#[async_trait]
impl ScanStore for JsonFileStore {
    async fn save_scan_results(
        &self,
        site: &str,
        results: &ExtractionResult,
        page_url: &str,
        title: Option<&str>,
    ) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Envelope<'a> {
            page_url: &'a str,
            title: Option<&'a str>,
            results: &'a ExtractionResult,
        }

        self.write_json(
            self.site_path(site, "results"),
            &Envelope {
                page_url,
                title,
                results,
            },
        )
        .await
    }

    async fn save_deep_scan_state(&self, site: &str, state: &DeepScanState) -> Result<()> {
        self.write_json(self.site_path(site, "state"), state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, DetectionType};

    #[tokio::test]
    async fn test_json_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("websift-store-{}", std::process::id()));
        let store = JsonFileStore::new(dir.clone());

        let mut results = ExtractionResult::default();
        results.insert(
            "domains",
            Detection::regex(DetectionType::Domain, "example.com", "https://example.com/"),
        );

        store
            .save_scan_results("example.com", &results, "https://example.com/", Some("Demo"))
            .await
            .unwrap();
        store
            .save_deep_scan_state(
                "example.com",
                &DeepScanState {
                    running: true,
                    current_depth: 1,
                    max_depth: 2,
                    scanned_count: 3,
                    processed_count: 3,
                },
            )
            .await
            .unwrap();

        let results_path = dir.join("example.com.results.json");
        let written = tokio::fs::read_to_string(&results_path).await.unwrap();
        assert!(written.contains("example.com"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
