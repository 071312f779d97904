#![allow(dead_code)]

use async_trait::async_trait;
use core_logic::ActivityMetrics;
use diamante::config::DailyConfig;
use diamante::engine::{AccountEngine, EngineContext};
use diamante::recipients::RecipientPool;
use diamante::store::IdentityStore;
use diamante::transport::{Transport, TransportRequest, TransportResponse};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const ME: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const OTHER: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

struct Route {
    fragment: String,
    queue: VecDeque<TransportResponse>,
}

/// In-memory transport answering by URL fragment.
///
/// Each route serves its queue in order; the last response repeats once
/// the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, fragment: &str, responses: Vec<TransportResponse>) {
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|r| r.fragment != fragment);
        routes.push(Route {
            fragment: fragment.to_string(),
            queue: responses.into(),
        });
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint.contains(fragment))
            .collect()
    }

    pub fn calls(&self, fragment: &str) -> usize {
        self.requests_to(fragment).len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn invoke(&self, request: TransportRequest) -> TransportResponse {
        self.requests.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes
            .iter_mut()
            .find(|r| request.endpoint.contains(&r.fragment))
        else {
            return TransportResponse::failure("no route");
        };
        if route.queue.len() > 1 {
            route.queue.pop_front().unwrap()
        } else {
            route
                .queue
                .front()
                .cloned()
                .unwrap_or_else(|| TransportResponse::failure("empty route"))
        }
    }
}

pub fn json_response(status: u16, body: Value) -> TransportResponse {
    TransportResponse::from_body(status, body.to_string())
}

pub fn login_ok() -> TransportResponse {
    json_response(
        200,
        json!({"success": true, "data": {"accessToken": "tok", "userId": "user-1", "isSocialExists": "VERIFIED"}}),
    )
}

pub fn login_unregistered() -> TransportResponse {
    json_response(
        200,
        json!({"success": true, "data": {"accessToken": "tok", "userId": "user-1", "isSocialExists": "NONE"}}),
    )
}

pub fn blocked() -> TransportResponse {
    TransportResponse::from_body(403, "CLOUDFLARE_BLOCK_API")
}

pub fn balance(amount: f64) -> TransportResponse {
    json_response(200, json!({"success": true, "data": {"balance": amount}}))
}

pub fn faucet_ok() -> TransportResponse {
    json_response(200, json!({"success": true, "data": {"fundedAmount": 10}}))
}

pub fn business_error(status: u16, message: &str) -> TransportResponse {
    json_response(status, json!({"success": false, "message": message}))
}

pub fn transfer_ok() -> TransportResponse {
    json_response(200, json!({"success": true, "message": "Success"}))
}

pub fn unauthorized() -> TransportResponse {
    json_response(401, json!({"success": false, "message": "Unauthorized"}))
}

/// Transport scripted for a clean cycle: login, balance, faucet, transfers.
pub fn happy_transport(balance_amount: f64) -> Arc<ScriptedTransport> {
    let transport = ScriptedTransport::new();
    transport.on("connect-wallet", vec![login_ok()]);
    transport.on("get-balance", vec![balance(balance_amount)]);
    transport.on("fund-wallet", vec![faucet_ok()]);
    transport.on("transaction/transfer", vec![transfer_ok()]);
    transport
}

pub struct Harness {
    pub engine: Arc<AccountEngine>,
    pub store: Arc<IdentityStore>,
    pub metrics: Arc<ActivityMetrics>,
}

pub async fn harness(
    dir: &Path,
    config: DailyConfig,
    recipients: Vec<&str>,
    transport: Arc<ScriptedTransport>,
) -> Harness {
    let store = Arc::new(IdentityStore::load(dir.join("account_data.json")).await);
    harness_with_store(store, config, recipients, transport)
}

pub fn harness_with_store(
    store: Arc<IdentityStore>,
    config: DailyConfig,
    recipients: Vec<&str>,
    transport: Arc<ScriptedTransport>,
) -> Harness {
    let metrics = Arc::new(ActivityMetrics::default());
    let ctx = EngineContext {
        store: Arc::clone(&store),
        recipients: RecipientPool::new(recipients.into_iter().map(str::to_string).collect()),
        transport,
        metrics: Arc::clone(&metrics),
    };
    let engine = Arc::new(AccountEngine::new(1, ME, None, Arc::new(config), &ctx));
    Harness {
        engine,
        store,
        metrics,
    }
}

pub fn config(repetitions: u32, min: f64, max: f64) -> DailyConfig {
    DailyConfig {
        send_diam_repetitions: repetitions,
        min_send_amount: min,
        max_send_amount: max,
        ..Default::default()
    }
}
