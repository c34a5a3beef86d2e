use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

/// JSON-RPC failure taxonomy. Callers branch on the kind: a seed-level error
/// zeroes that seed's metrics, a probe-level error feeds the backoff path.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with HTTP {status}")]
    HttpStatus { url: String, status: StatusCode },
    #[error("rpc error {code} from {url}: {message}")]
    Rpc {
        url: String,
        code: i64,
        message: String,
    },
    #[error("malformed rpc response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("invalid rpc url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// One pod entry from a seed's gossip view, normalized from either wire shape.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PodInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_seen_timestamp: Option<i64>,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub storage_committed: Option<i64>,
    #[serde(default)]
    pub storage_used: Option<i64>,
    #[serde(default)]
    pub storage_usage_percent: Option<f64>,
    #[serde(default)]
    pub uptime: Option<i64>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// Raw counters returned by a direct `get-stats` probe. Rates are derived
/// later against the previous persisted sample.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StatsReading {
    #[serde(default)]
    pub uptime: Option<i64>,
    #[serde(default)]
    pub packets_received: Option<i64>,
    #[serde(default)]
    pub packets_sent: Option<i64>,
    #[serde(default)]
    pub total_bytes: Option<i64>,
    #[serde(default)]
    pub active_streams: Option<i32>,
}

// Seeds answer `get-pods-with-stats` either with an envelope or, in the
// legacy form, with a bare array. Both are accepted silently.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GossipResult {
    Envelope {
        pods: Vec<PodInfo>,
        #[serde(default)]
        #[allow(dead_code)]
        total_count: Option<u64>,
    },
    Bare(Vec<PodInfo>),
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcEnvelope<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

pub const GET_PODS_METHOD: &str = "get-pods-with-stats";
pub const GET_STATS_METHOD: &str = "get-stats";

/// JSON-RPC 2.0 client for seed and pNode endpoints.
#[derive(Clone)]
pub struct PodRpcClient {
    http: Client,
    timeout: Duration,
}

impl PodRpcClient {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder().build().expect("reqwest client");
        Self { http, timeout }
    }

    /// Fetch a seed's gossip view.
    pub async fn get_pods(&self, base_url: &str) -> Result<Vec<PodInfo>, RpcError> {
        self.get_pods_with_timeout(base_url, self.timeout).await
    }

    /// Fetch a seed's gossip view with a caller-supplied deadline. Used by the
    /// startup seed validation, which probes with a looser timeout.
    pub async fn get_pods_with_timeout(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Vec<PodInfo>, RpcError> {
        let view: GossipResult = self.call(base_url, GET_PODS_METHOD, timeout).await?;
        Ok(match view {
            GossipResult::Envelope { pods, .. } => pods,
            GossipResult::Bare(pods) => pods,
        })
    }

    /// Probe one pNode directly for its live stats.
    pub async fn get_stats(&self, base_url: &str) -> Result<StatsReading, RpcError> {
        self.call(base_url, GET_STATS_METHOD, self.timeout).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        base_url: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let url = rpc_url(base_url)?;
        let payload = json!({ "jsonrpc": "2.0", "method": method, "id": 1 });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify_request_error(&url, timeout, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus {
                url: url.clone(),
                status,
            });
        }

        // The per-request timeout also covers body streaming; a deadline hit
        // here drops the partial body.
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_request_error(&url, timeout, err))?;

        let envelope: RpcEnvelope<T> =
            serde_json::from_slice(&body).map_err(|err| RpcError::Malformed {
                url: url.clone(),
                reason: err.to_string(),
            })?;

        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc {
                url,
                code: error.code,
                message: error.message,
            });
        }

        envelope.result.ok_or_else(|| RpcError::Malformed {
            url,
            reason: "response carries neither result nor error".to_string(),
        })
    }
}

fn classify_request_error(url: &str, timeout: Duration, err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        RpcError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}

fn rpc_url(base_url: &str) -> Result<String, RpcError> {
    let parsed = Url::parse(base_url).map_err(|err| RpcError::InvalidUrl {
        url: base_url.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RpcError::InvalidUrl {
            url: base_url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(format!("{}/rpc", base_url.trim_end_matches('/')))
}

/// Derive the direct probe endpoint from a gossip address: the gossip port is
/// replaced with the fixed stats port, the transport is always plain http.
pub fn probe_base_url(gossip_address: &str, probe_port: u16) -> String {
    let host = gossip_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(gossip_address);
    format!("http://{host}:{probe_port}")
}
