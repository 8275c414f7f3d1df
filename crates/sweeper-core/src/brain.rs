//! Client for the external suggestion service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::orchestrator::CleanupSuggestion;

/// Failures talking to the suggestion service. Always recovered by the caller.
#[derive(Error, Debug)]
pub enum BrainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("suggestion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("suggestion request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub folder_path: PathBuf,
    pub file_names: Vec<String>,
    pub session_id: Uuid,
    pub query_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionItem {
    pub file_path: PathBuf,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub safe_to_delete: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

impl From<SuggestionItem> for CleanupSuggestion {
    fn from(item: SuggestionItem) -> Self {
        Self {
            file_path: item.file_path,
            size_bytes: item.size_bytes,
            category: item.category,
            safe_to_delete: item.safe_to_delete,
            reason: item.reason,
            // Unsafe items are never auto-approved.
            auto_approve: item.auto_approve && item.safe_to_delete,
            confidence: item.confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggestionResponse {
    pub items: Vec<SuggestionItem>,
    pub total_bytes_to_free: u64,
    pub reasoning: String,
}

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(&self, request: SuggestionRequest) -> Result<SuggestionResponse, BrainError>;
}

/// Posts requests as JSON to `{base_url}/suggest`.
pub struct HttpSuggestionProvider {
    client: Client,
    base_url: String,
}

impl HttpSuggestionProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BrainError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn suggest_url(&self) -> String {
        format!("{}/suggest", self.base_url)
    }
}

#[async_trait]
impl SuggestionProvider for HttpSuggestionProvider {
    async fn suggest(&self, request: SuggestionRequest) -> Result<SuggestionResponse, BrainError> {
        debug!(
            "Requesting suggestions for {} ({} files)",
            request.folder_path.display(),
            request.file_names.len()
        );
        let response = self
            .client
            .post(self.suggest_url())
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BrainError::Status { status, body });
        }

        response
            .json::<SuggestionResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrainError::Timeout
                } else {
                    BrainError::Decode(e.to_string())
                }
            })
    }
}

fn map_transport_error(e: reqwest::Error) -> BrainError {
    if e.is_timeout() {
        BrainError::Timeout
    } else {
        BrainError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> SuggestionRequest {
        SuggestionRequest {
            folder_path: PathBuf::from("/proj/node_modules"),
            file_names: vec!["big.bin".to_string()],
            session_id: Uuid::new_v4(),
            query_hint: "journal:volatile".to_string(),
        }
    }

    #[tokio::test]
    async fn test_suggest_parses_camel_case_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/suggest"))
            .and(body_partial_json(serde_json::json!({ "fileNames": ["big.bin"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "filePath": "/proj/node_modules/big.bin",
                    "sizeBytes": 42,
                    "category": "PackageCache",
                    "safeToDelete": true,
                    "reason": "reinstallable",
                    "autoApprove": false
                }],
                "totalBytesToFree": 42,
                "reasoning": "cache"
            })))
            .mount(&server)
            .await;

        let provider = HttpSuggestionProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let response = provider.suggest(request()).await.unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.total_bytes_to_free, 42);
        assert_eq!(response.items[0].confidence, 0.5);

        let suggestion = CleanupSuggestion::from(response.items[0].clone());
        assert!(suggestion.safe_to_delete);
        assert_eq!(suggestion.category, "PackageCache");
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let provider = HttpSuggestionProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();
        match provider.suggest(request()).await {
            Err(BrainError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let provider =
            HttpSuggestionProvider::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let result = provider.suggest(request()).await;
        assert!(matches!(result, Err(BrainError::Timeout)), "{:?}", result);
    }

    #[test]
    fn test_unsafe_item_never_auto_approved() {
        let item = SuggestionItem {
            file_path: PathBuf::from("/x"),
            size_bytes: 1,
            category: "Documents".to_string(),
            safe_to_delete: false,
            reason: String::new(),
            auto_approve: true,
            confidence: 3.0,
        };
        let suggestion = CleanupSuggestion::from(item);
        assert!(!suggestion.auto_approve);
        assert_eq!(suggestion.confidence, 1.0);
    }
}
