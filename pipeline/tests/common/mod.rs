//! In-process stand-in for the balance aggregation API.
#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};

use balance_pipeline::{PipelineConfig, StreamUpdate};

/// What the balance stream sends for one wallet address.
#[derive(Clone, Default)]
pub struct StreamScript {
    pub events: Vec<(String, String)>,
    /// keep the connection open after the last event
    pub hold_open: bool,
    pub delay: Duration,
    /// held before the response headers go out
    pub header_delay: Duration,
    pub status: Option<StatusCode>,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, name: &str, data: impl Into<String>) -> Self {
        self.events.push((name.to_string(), data.into()));
        self
    }

    pub fn balance(self, payload: Value) -> Self {
        self.event("balance", payload.to_string())
    }

    pub fn end(self) -> Self {
        self.event("end", "{}")
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stall_headers(mut self, delay: Duration) -> Self {
        self.header_delay = delay;
        self
    }

    pub fn rejected(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// How the GraphQL endpoint answers for one NFT owner.
#[derive(Clone)]
pub enum OwnerScript {
    Items { count: usize, delay: Duration },
    /// first page answers at once, later pages wait `delay`
    StallAfterFirstPage { count: usize, delay: Duration },
    GraphQlErrors(String),
    Status(StatusCode),
}

#[derive(Default)]
pub struct MockApi {
    streams: HashMap<String, StreamScript>,
    owners: HashMap<String, OwnerScript>,
    pub stream_opens: AtomicUsize,
    pub graphql_calls: AtomicUsize,
    pub stream_queries: Mutex<Vec<HashMap<String, String>>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, address: &str, script: StreamScript) -> Self {
        self.streams.insert(address.to_string(), script);
        self
    }

    pub fn with_owner(mut self, owner: &str, script: OwnerScript) -> Self {
        self.owners.insert(owner.to_string(), script);
        self
    }

    pub fn opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    /// Bind to an ephemeral port and return the base url.
    pub async fn serve(self) -> (String, Arc<MockApi>) {
        let api = Arc::new(self);
        let app = Router::new()
            .route("/v2/balances", get(balances))
            .route("/graphql", post(graphql))
            .with_state(Arc::clone(&api));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), api)
    }
}

async fn balances(State(api): State<Arc<MockApi>>, Query(params): Query<HashMap<String, String>>) -> Response {
    api.stream_opens.fetch_add(1, Ordering::SeqCst);
    let address = params.get("addresses[0]").cloned().unwrap_or_default();
    api.stream_queries.lock().unwrap().push(params);

    let script = match api.streams.get(&address) {
        Some(script) => script.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    tokio::time::sleep(script.header_delay).await;
    if let Some(status) = script.status {
        return (status, "rejected").into_response();
    }

    let delay = script.delay;
    let events = stream::iter(script.events).then(move |(name, data)| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(Event::default().event(name).data(data))
    });
    let events: BoxStream<'static, Result<Event, Infallible>> = if script.hold_open {
        events.chain(stream::pending()).boxed()
    } else {
        events.boxed()
    };
    Sse::new(events).into_response()
}

async fn graphql(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Response {
    api.graphql_calls.fetch_add(1, Ordering::SeqCst);

    let document = body["query"].as_str().unwrap_or_default();
    let field = if document.contains("nftUsersTokens") {
        "nftUsersTokens"
    } else {
        "nftUsersCollections"
    };
    let variables = &body["variables"];
    let owner = variables["owners"][0].as_str().unwrap_or_default().to_string();

    let first = variables["first"].as_u64().unwrap_or(24) as usize;
    let after = variables["after"].as_str().and_then(|cursor| cursor.parse::<usize>().ok());
    let page = |count: usize| {
        let start = after.map(|cursor| cursor + 1).unwrap_or(0);
        let end = (start + first).min(count);
        (start..end).map(|i| edge(field, &owner, i)).collect::<Vec<_>>()
    };

    let edges = match api.owners.get(&owner).cloned() {
        Some(OwnerScript::Items { count, delay }) => {
            tokio::time::sleep(delay).await;
            page(count)
        }
        Some(OwnerScript::StallAfterFirstPage { count, delay }) => {
            if after.is_some() {
                tokio::time::sleep(delay).await;
            }
            page(count)
        }
        Some(OwnerScript::GraphQlErrors(message)) => {
            return Json(json!({ "data": null, "errors": [{ "message": message }] })).into_response();
        }
        Some(OwnerScript::Status(status)) => return (status, "upstream unavailable").into_response(),
        None => Vec::new(),
    };

    let mut data = Map::new();
    data.insert(field.to_string(), json!({ "edges": edges }));
    Json(json!({ "data": data })).into_response()
}

fn edge(field: &str, owner: &str, index: usize) -> Value {
    let node = if field == "nftUsersTokens" {
        json!({
            "id": format!("{}-token-{}", owner, index),
            "tokenId": index.to_string(),
            "name": format!("Token #{}", index),
            "estimatedValueEth": "0.1",
            "collection": { "name": "Mock Collection", "address": "0xcollection", "network": "ETHEREUM_MAINNET" }
        })
    } else {
        json!({
            "id": format!("{}-collection-{}", owner, index),
            "name": format!("Collection {}", index),
            "network": "ETHEREUM_MAINNET",
            "address": format!("0x{:040x}", index)
        })
    };
    json!({ "cursor": index.to_string(), "balanceUSD": 1.5, "node": node })
}

pub fn config_for(base_url: &str) -> PipelineConfig {
    PipelineConfig {
        base_url: base_url.to_string(),
        handshake_timeout_secs: 5,
        fetch_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn wallet_payload(network: &str, usd: f64) -> Value {
    json!({
        "appId": "tokens",
        "network": network,
        "addresses": ["0xabc"],
        "balance": { "wallet": { "0xtoken": { "balanceUSD": usd } } },
        "totals": [{ "key": "0xtoken", "type": "token", "network": network, "balanceUSD": usd }],
        "errors": []
    })
}

pub fn app_payload(app_id: &str, network: &str, usd: f64) -> Value {
    json!({
        "appId": app_id,
        "network": network,
        "addresses": ["0xabc"],
        "app": { "appId": app_id, "network": network },
        "totals": [{ "network": network, "balanceUSD": usd }],
        "errors": []
    })
}

/// Wait for the first update matching `pred`.
pub async fn next_update<F>(updates: &mut broadcast::Receiver<StreamUpdate>, mut pred: F) -> StreamUpdate
where
    F: FnMut(&StreamUpdate) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("update channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for stream update")
}
