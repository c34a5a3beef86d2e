use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::rpc::RpcError;

/// One entry of the external credits document.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PodCredits {
    pub pod_id: String,
    pub credits: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CreditsDocument {
    #[serde(default)]
    pods_credits: Vec<PodCredits>,
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
}

/// Client for the external pod credits endpoint.
#[derive(Clone)]
pub struct CreditsClient {
    http: Client,
    url: String,
    timeout: Duration,
}

impl CreditsClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder().build().expect("reqwest client");
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    /// Fetch the credits document. Transport and HTTP failures surface as
    /// errors; a syntactically broken payload degrades to an empty list so a
    /// bad publish upstream cannot wedge the credits cycle.
    pub async fn get_storage_credits(&self) -> Result<Vec<PodCredits>, RpcError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|err| self.classify(err))?;
        match serde_json::from_slice::<CreditsDocument>(&body) {
            Ok(document) => Ok(document.pods_credits),
            Err(err) => {
                warn!(
                    target: "credits",
                    url = %self.url,
                    error = %err,
                    "credits document is malformed, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    fn classify(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout {
                url: self.url.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RpcError::Transport {
                url: self.url.clone(),
                source: err,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_credits_document() {
        let raw = r#"{"pods_credits":[{"pod_id":"abc","credits":12.5}],"status":"ok"}"#;
        let document: CreditsDocument = serde_json::from_str(raw).expect("parse");
        assert_eq!(document.pods_credits.len(), 1);
        assert_eq!(document.pods_credits[0].pod_id, "abc");
        assert!((document.pods_credits[0].credits - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_list_defaults_to_empty() {
        let document: CreditsDocument = serde_json::from_str(r#"{"status":"ok"}"#).expect("parse");
        assert!(document.pods_credits.is_empty());
    }
}
