use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{ErrorInfo, PipelineError, Result};
use crate::fingerprint::fingerprint;
use crate::types::{BalanceChunk, Network};

/// Identifying parameters of one balance stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceParams {
    pub addresses: Vec<String>,
    pub networks: Vec<Network>,
}

impl BalanceParams {
    pub fn new(addresses: Vec<String>, networks: Vec<Network>) -> Self {
        Self { addresses, networks }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self)
    }

    /// `{base}/v2/balances?addresses[i]=..&networks[i]=..&nonNilOnly=true&...`
    pub fn stream_url(&self, config: &PipelineConfig) -> Result<Url> {
        let mut url = Url::parse(&config.endpoint("v2/balances"))
            .map_err(|e| PipelineError::Config(format!("invalid stream url: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (index, address) in self.addresses.iter().enumerate() {
                query.append_pair(&format!("addresses[{}]", index), address);
            }
            for (index, network) in self.networks.iter().enumerate() {
                query.append_pair(&format!("networks[{}]", index), network.as_str());
            }
            query.append_pair("nonNilOnly", "true");
            query.append_pair("useNewBalancesFormat", "true");
            query.append_pair("useNftService", "true");
        }
        Ok(url)
    }
}

/// Notification sent to subscribers whenever the accumulated state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    Reset {
        session_id: Uuid,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },
    Chunk {
        session_id: Uuid,
        generation: u64,
        network: Network,
        source_id: String,
        total_usd: f64,
        timestamp: DateTime<Utc>,
    },
    Ended {
        session_id: Uuid,
        chunk_count: usize,
        timestamp: DateTime<Utc>,
    },
    Failed {
        session_id: Uuid,
        error: ErrorInfo,
        /// false when only one event was dropped and the stream keeps going
        terminal: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Chunks received for the active parameter set, in arrival order.
#[derive(Debug, Clone)]
pub struct AccumulatedState {
    session_id: Option<Uuid>,
    fingerprint: Option<String>,
    chunks: Arc<Vec<BalanceChunk>>,
    latest: Option<BalanceChunk>,
    syncing: bool,
    last_error: Option<ErrorInfo>,
    generation: u64,
    updated_at: DateTime<Utc>,
}

impl Default for AccumulatedState {
    fn default() -> Self {
        Self {
            session_id: None,
            fingerprint: None,
            chunks: Arc::new(Vec::new()),
            latest: None,
            syncing: false,
            last_error: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

impl AccumulatedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and hand ownership to a new session.
    pub fn reset(&mut self, session_id: Uuid, fingerprint: String) {
        self.session_id = Some(session_id);
        self.fingerprint = Some(fingerprint);
        self.chunks = Arc::new(Vec::new());
        self.latest = None;
        self.syncing = false;
        self.last_error = None;
        self.touch();
    }

    /// Release ownership so late writes from the closed session are ignored.
    pub fn detach(&mut self) {
        self.session_id = None;
        self.syncing = false;
        self.touch();
    }

    pub fn is_owned_by(&self, session_id: Uuid) -> bool {
        self.session_id == Some(session_id)
    }

    /// Append a chunk. Returns `false` (and changes nothing) for a stale session.
    pub fn push_chunk(&mut self, session_id: Uuid, chunk: BalanceChunk) -> bool {
        if !self.is_owned_by(session_id) {
            return false;
        }
        Arc::make_mut(&mut self.chunks).push(chunk.clone());
        self.latest = Some(chunk);
        self.syncing = true;
        self.touch();
        true
    }

    pub fn mark_ended(&mut self, session_id: Uuid) -> bool {
        if !self.is_owned_by(session_id) {
            return false;
        }
        self.syncing = false;
        self.touch();
        true
    }

    /// Record an error. Terminal errors also clear the syncing flag.
    pub fn record_error(&mut self, session_id: Uuid, error: ErrorInfo, terminal: bool) -> bool {
        if !self.is_owned_by(session_id) {
            return false;
        }
        self.last_error = Some(error);
        if terminal {
            self.syncing = false;
        }
        self.touch();
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            fingerprint: self.fingerprint.clone(),
            chunks: Arc::clone(&self.chunks),
            latest: self.latest.clone(),
            syncing: self.syncing,
            last_error: self.last_error.clone(),
            generation: self.generation,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}

/// Point-in-time copy of the accumulated state.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub fingerprint: Option<String>,
    pub chunks: Arc<Vec<BalanceChunk>>,
    pub latest: Option<BalanceChunk>,
    pub syncing: bool,
    pub last_error: Option<ErrorInfo>,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn chunks(&self) -> &[BalanceChunk] {
        &self.chunks
    }
}
