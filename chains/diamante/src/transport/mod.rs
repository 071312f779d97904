//! Request transport for the campaign API.
//!
//! The engine never talks HTTP directly. It hands a [`TransportRequest`] to a
//! [`Transport`] and always gets a [`TransportResponse`] back; transport-level
//! failures come back as status `0` with the reason in `raw_text`.

pub mod command;
pub mod http;

use async_trait::async_trait;
use core_logic::NetworkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use command::CommandTransport;
pub use http::HttpTransport;

/// Body marker the helper returns when Cloudflare serves an HTML challenge.
pub const CLOUDFLARE_BLOCK: &str = "CLOUDFLARE_BLOCK_API";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub endpoint: String,
    pub method: Method,
    pub payload: Option<Value>,
    pub headers: BTreeMap<String, String>,
    /// Full proxy URL with credentials, if any
    pub proxy: Option<String>,
}

impl TransportRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Get,
            payload: None,
            headers: BTreeMap::new(),
            proxy: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Post,
            payload: Some(payload),
            headers: BTreeMap::new(),
            proxy: None,
        }
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    /// HTTP status, or `0` when no response was obtained
    pub status_code: u16,
    pub json: Option<Value>,
    pub raw_text: String,
    /// Response headers with lowercase names
    pub headers: BTreeMap<String, String>,
}

impl TransportResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            json: None,
            raw_text: reason.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Builds a response from a status and body, parsing the body as JSON when possible.
    pub fn from_body(status_code: u16, body: impl Into<String>) -> Self {
        let raw_text = body.into();
        let json = serde_json::from_str(&raw_text).ok();
        Self {
            status_code,
            json,
            raw_text,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }

    pub fn is_cloudflare_block(&self) -> bool {
        self.status_code == 403 && self.raw_text.contains(CLOUDFLARE_BLOCK)
    }
}

impl From<NetworkError> for TransportResponse {
    fn from(err: NetworkError) -> Self {
        Self::failure(err.to_string())
    }
}

/// Executes one request. Never fails; failures are encoded in the response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, request: TransportRequest) -> TransportResponse;
}
