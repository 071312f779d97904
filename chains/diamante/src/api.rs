//! Campaign API endpoints and the tolerant response decode.
//!
//! Every response is normalized here into [`LoginOutcome`] or [`ApiOutcome`];
//! nothing above this module looks at raw response shapes.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::transport::{Transport, TransportRequest, TransportResponse};
use core_logic::ProxyConfig;

pub const API_BASE_URL: &str = "https://campapi.diamante.io/api/v1";
const ORIGIN: &str = "https://campaign.diamante.io";
const REFERER: &str = "https://campaign.diamante.io/";

static ACCESS_TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn access_token_from_cookie(cookie: &str) -> Option<String> {
    ACCESS_TOKEN_RE
        .get_or_init(|| Regex::new(r"access_token=([^;]+)").ok())
        .as_ref()?
        .captures(cookie)
        .map(|c| c[1].to_string())
}

/// Remote user id. The API returns it either as a number or a string and
/// expects it back in the same shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserId(Value);

impl UserId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(value.clone())),
            Value::Number(_) => Some(Self(value.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Token obtained. `registered` is false until the wallet completed
    /// the social verification step.
    Authenticated { session: Session, registered: bool },
    Blocked,
    NoData(String),
    NoToken,
}

impl LoginOutcome {
    pub fn decode(resp: &TransportResponse) -> Self {
        if resp.status_code == 403 {
            return LoginOutcome::Blocked;
        }

        let data = resp
            .json
            .as_ref()
            .and_then(|j| j.get("data").filter(|d| d.is_object()).or(Some(j)))
            .filter(|d| d.is_object());
        let Some(data) = data else {
            let preview: String = resp.raw_text.chars().take(50).collect();
            return LoginOutcome::NoData(if preview.is_empty() {
                "No Data".to_string()
            } else {
                preview
            });
        };

        let token = data
            .get("accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| resp.header("set-cookie").and_then(access_token_from_cookie));
        let Some(token) = token else {
            return LoginOutcome::NoToken;
        };

        let user_id = data
            .get("userId")
            .and_then(UserId::from_value)
            .or_else(|| data.pointer("/user/userId").and_then(UserId::from_value));
        let Some(user_id) = user_id else {
            return LoginOutcome::NoData("Missing userId".to_string());
        };

        let registered = data.get("isSocialExists").and_then(Value::as_str) == Some("VERIFIED");

        LoginOutcome::Authenticated {
            session: Session { token, user_id },
            registered,
        }
    }
}

/// Normalized result of a non-login call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// The `data` object, or the whole body when there is none
    Success(Value),
    BusinessError { status: u16, message: String },
    HttpError(u16),
}

impl ApiOutcome {
    pub fn from_response(resp: &TransportResponse) -> Self {
        let Some(json) = resp.json.as_ref() else {
            return ApiOutcome::HttpError(resp.status_code);
        };
        if resp.status_code == 0 {
            return ApiOutcome::HttpError(0);
        }

        let message = json.get("message").and_then(Value::as_str);
        let success = json.get("success").and_then(Value::as_bool).unwrap_or(false);
        if success || message == Some("Success") {
            let data = json.get("data").cloned().unwrap_or_else(|| json.clone());
            return ApiOutcome::Success(data);
        }

        match message {
            Some(m) => ApiOutcome::BusinessError {
                status: resp.status_code,
                message: m.to_string(),
            },
            None => ApiOutcome::HttpError(resp.status_code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiOutcome::Success(_) => 200,
            ApiOutcome::BusinessError { status, .. } => *status,
            ApiOutcome::HttpError(status) => *status,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiOutcome::Success(_) => "Success".to_string(),
            ApiOutcome::BusinessError { message, .. } => message.clone(),
            ApiOutcome::HttpError(status) => format!("Status {}", status),
        }
    }

    fn number_field(&self, key: &str) -> Option<f64> {
        let ApiOutcome::Success(data) = self else {
            return None;
        };
        match data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn balance(&self) -> Option<f64> {
        self.number_field("balance")
    }

    pub fn funded_amount(&self) -> Option<f64> {
        self.number_field("fundedAmount")
    }
}

/// Endpoint bindings for one identity behind one proxy.
#[derive(Clone)]
pub struct DiamanteApi {
    transport: Arc<dyn Transport>,
    proxy: Option<String>,
}

impl DiamanteApi {
    pub fn new(transport: Arc<dyn Transport>, proxy: Option<&ProxyConfig>) -> Self {
        Self {
            transport,
            proxy: proxy.map(ProxyConfig::full_url),
        }
    }

    fn base_headers() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Accept".to_string(), "application/json, text/plain, */*".to_string()),
            ("Accept-Encoding".to_string(), "gzip, deflate, br, zstd".to_string()),
            ("Origin".to_string(), ORIGIN.to_string()),
            ("Access-Token".to_string(), "key".to_string()),
            ("Referer".to_string(), REFERER.to_string()),
        ])
    }

    fn session_headers(session: &Session, json_body: bool) -> BTreeMap<String, String> {
        let mut headers = Self::base_headers();
        headers.insert("Cookie".to_string(), format!("access_token={}", session.token));
        if json_body {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        headers
    }

    async fn call(&self, request: TransportRequest) -> TransportResponse {
        self.transport.invoke(request.proxy(self.proxy.clone())).await
    }

    /// Fixed device and geolocation payload sent on login.
    pub fn login_payload(address: &str, device_id: &str) -> Value {
        json!({
            "address": address,
            "deviceId": device_id,
            "deviceSource": "web_app",
            "deviceType": "Windows",
            "browser": "Chrome",
            "ipAddress": "0.0.0.0",
            "latitude": 12.9715987,
            "longitude": 77.5945627,
            "countryCode": "Unknown",
            "country": "Unknown",
            "continent": "Unknown",
            "continentCode": "Unknown",
            "region": "Unknown",
            "regionCode": "Unknown",
            "city": "Unknown"
        })
    }

    pub async fn connect_wallet(&self, address: &str, device_id: &str) -> LoginOutcome {
        let headers = BTreeMap::from([
            ("Accept".to_string(), "application/json, text/plain, */*".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Origin".to_string(), ORIGIN.to_string()),
            ("Referer".to_string(), REFERER.to_string()),
        ]);
        let request = TransportRequest::post(
            format!("{}/user/connect-wallet", API_BASE_URL),
            Self::login_payload(address, device_id),
        )
        .headers(headers);
        LoginOutcome::decode(&self.call(request).await)
    }

    pub async fn balance(&self, session: &Session) -> ApiOutcome {
        let request = TransportRequest::get(format!(
            "{}/transaction/get-balance/{}",
            API_BASE_URL, session.user_id
        ))
        .headers(Self::session_headers(session, false));
        ApiOutcome::from_response(&self.call(request).await)
    }

    pub async fn fund_wallet(&self, session: &Session) -> ApiOutcome {
        let request = TransportRequest::get(format!(
            "{}/transaction/fund-wallet/{}",
            API_BASE_URL, session.user_id
        ))
        .headers(Self::session_headers(session, false));
        ApiOutcome::from_response(&self.call(request).await)
    }

    pub async fn transfer(&self, session: &Session, to_address: &str, amount: f64) -> ApiOutcome {
        let payload = json!({
            "toAddress": to_address,
            "amount": amount,
            "userId": session.user_id,
        });
        let request = TransportRequest::post(format!("{}/transaction/transfer", API_BASE_URL), payload)
            .headers(Self::session_headers(session, true));
        ApiOutcome::from_response(&self.call(request).await)
    }

    pub async fn register(
        &self,
        session: &Session,
        wallet_address: &str,
        handle: &str,
        referral_code: &str,
    ) -> ApiOutcome {
        let payload = json!({
            "userId": session.user_id,
            "walletAddress": wallet_address,
            "socialHandle": handle,
            "referralCode": referral_code,
        });
        let request = TransportRequest::post(format!("{}/auth/register", API_BASE_URL), payload)
            .headers(Self::session_headers(session, true));
        ApiOutcome::from_response(&self.call(request).await)
    }
}
