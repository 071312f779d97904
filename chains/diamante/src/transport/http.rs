use async_trait::async_trait;
use core_logic::NetworkError;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Method, Transport, TransportRequest, TransportResponse, CLOUDFLARE_BLOCK};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// One client per proxy URL; the empty key is the direct client.
static CLIENT_CACHE: OnceLock<RwLock<HashMap<String, reqwest::Client>>> = OnceLock::new();

/// Native transport built on reqwest.
///
/// No browser TLS fingerprint, so endpoints behind Cloudflare may answer
/// with a challenge page; that case maps to the same marker the helper uses.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }

    async fn client_for(proxy: Option<&str>) -> Result<reqwest::Client, String> {
        let key = proxy.unwrap_or_default().to_string();
        let cache = CLIENT_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

        if let Some(client) = cache.read().await.get(&key).cloned() {
            return Ok(client);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT);
        if let Some(url) = proxy {
            let proxy = reqwest::Proxy::all(url).map_err(|e| format!("Bad proxy config: {}", e))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        cache.write().await.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, request: TransportRequest) -> TransportResponse {
        let client = match Self::client_for(request.proxy.as_deref()).await {
            Ok(c) => c,
            Err(reason) => return TransportResponse::failure(reason),
        };

        let mut builder = match request.method {
            Method::Get => client.get(&request.endpoint),
            Method::Post => client.post(&request.endpoint),
        };
        for (name, value) in &request.headers {
            // reqwest negotiates compression itself
            if name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        debug!("{} {}", request.method, request.endpoint);
        let resp = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Request to {} failed: {}", request.endpoint, e);
                let err = if e.is_timeout() {
                    NetworkError::Timeout {
                        timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
                        endpoint: request.endpoint,
                    }
                } else {
                    NetworkError::ConnectionFailed {
                        endpoint: request.endpoint,
                        reason: e.to_string(),
                    }
                };
                return err.into();
            }
        };

        let status = resp.status().as_u16();
        let mut headers = std::collections::BTreeMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers
                    .entry(name.as_str().to_ascii_lowercase())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(v);
                    })
                    .or_insert_with(|| v.to_string());
            }
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                return NetworkError::InvalidResponse {
                    endpoint: request.endpoint,
                    reason: format!("failed to read body: {}", e),
                }
                .into();
            }
        };

        if status == 403 && body.contains("<html") {
            return TransportResponse {
                status_code: 403,
                json: None,
                raw_text: CLOUDFLARE_BLOCK.to_string(),
                headers,
            };
        }

        let mut response = TransportResponse::from_body(status, body);
        response.headers = headers;
        response
    }
}
