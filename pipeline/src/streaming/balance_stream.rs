use chrono::Utc;
use futures::StreamExt;
use reqwest::{header, Client};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sse::{SseDecoder, SseEvent};
use super::types::*;
use crate::config::PipelineConfig;
use crate::error::{ErrorInfo, PipelineError, Result};
use crate::types::BalanceChunk;

const BALANCE_EVENT: &str = "balance";
const END_EVENT: &str = "end";

struct ActiveSession {
    params: BalanceParams,
    fingerprint: String,
    session_id: Uuid,
    handle: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("🔌 Closed balance stream session {}", self.session_id);
        }
    }
}

/// Owns the balance stream for one consumer.
///
/// At most one connection is live at a time, and it always belongs to the
/// most recent parameter set passed to [`set_params`](Self::set_params).
pub struct BalanceStreamController {
    config: Arc<PipelineConfig>,
    client: Client,
    state: Arc<RwLock<AccumulatedState>>,
    active: Mutex<Option<ActiveSession>>,
    updates: broadcast::Sender<StreamUpdate>,
}

impl BalanceStreamController {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: PipelineConfig, client: Client) -> Self {
        let (updates, _) = broadcast::channel(config.update_buffer_size.max(1));
        Self {
            config: Arc::new(config),
            client,
            state: Arc::new(RwLock::new(AccumulatedState::new())),
            active: Mutex::new(None),
            updates,
        }
    }

    /// Point the stream at a parameter set.
    ///
    /// Returns `true` when a new connection was opened. Passing the parameter
    /// set that is already active does nothing.
    pub async fn set_params(&self, params: BalanceParams) -> bool {
        let fingerprint = params.fingerprint();
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.fingerprint == fingerprint {
                debug!("Balance stream already open for {}", fingerprint);
                return false;
            }
        }

        self.open_session(&mut active, params, fingerprint).await
    }

    /// Close and reopen the stream for the current parameter set.
    pub async fn reconnect(&self) -> bool {
        let mut active = self.active.lock().await;
        let params = match active.as_ref() {
            Some(current) => current.params.clone(),
            None => return false,
        };
        let fingerprint = params.fingerprint();
        self.open_session(&mut active, params, fingerprint).await
    }

    /// Close the live connection, keeping whatever was accumulated.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        if let Some(mut session) = active.take() {
            session.close();
        }
        self.state.write().await.detach();
    }

    pub async fn snapshot(&self) -> BalanceSnapshot {
        self.state.read().await.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamUpdate> {
        self.updates.subscribe()
    }

    pub async fn current_params(&self) -> Option<BalanceParams> {
        self.active.lock().await.as_ref().map(|s| s.params.clone())
    }

    /// Whether a connection task is still running.
    pub async fn is_connected(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.handle.as_ref())
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    async fn open_session(
        &self,
        active: &mut Option<ActiveSession>,
        params: BalanceParams,
        fingerprint: String,
    ) -> bool {
        if let Some(mut previous) = active.take() {
            previous.close();
        }

        let session_id = Uuid::new_v4();
        self.state.write().await.reset(session_id, fingerprint.clone());
        let _ = self.updates.send(StreamUpdate::Reset {
            session_id,
            fingerprint: fingerprint.clone(),
            timestamp: Utc::now(),
        });

        let handle = if params.addresses.is_empty() {
            debug!("No addresses requested, balance stream stays closed");
            None
        } else {
            let session = StreamSession {
                session_id,
                params: params.clone(),
                config: Arc::clone(&self.config),
                client: self.client.clone(),
                state: Arc::clone(&self.state),
                updates: self.updates.clone(),
            };
            info!(
                "🚀 Opening balance stream {} for {} address(es) on {} network(s)",
                session_id,
                params.addresses.len(),
                params.networks.len()
            );
            Some(tokio::spawn(session.run()))
        };

        let opened = handle.is_some();
        *active = Some(ActiveSession {
            params,
            fingerprint,
            session_id,
            handle,
        });
        opened
    }
}

impl Drop for BalanceStreamController {
    fn drop(&mut self) {
        if let Some(mut session) = self.active.get_mut().take() {
            session.close();
        }
    }
}

/// Everything one connection task needs; dropped when the task ends.
struct StreamSession {
    session_id: Uuid,
    params: BalanceParams,
    config: Arc<PipelineConfig>,
    client: Client,
    state: Arc<RwLock<AccumulatedState>>,
    updates: broadcast::Sender<StreamUpdate>,
}

impl StreamSession {
    async fn run(self) {
        let response = match self.connect().await {
            Ok(response) => response,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        if let Err(e) = self.consume(response).await {
            self.fail(e).await;
        }
    }

    async fn connect(&self) -> Result<reqwest::Response> {
        let url = self.params.stream_url(&self.config)?;
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(api_key) = &self.config.api_key {
            request = request.header(header::AUTHORIZATION, format!("Basic {}", api_key));
        }

        let timeout = self.config.handshake_timeout();
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| PipelineError::Timeout(format!("stream handshake exceeded {:?}", timeout)))?
            .map_err(|e| PipelineError::Connection(format!("failed to open balance stream: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Connection(format!(
                "balance stream rejected with status {}",
                response.status()
            )));
        }

        info!("✅ Balance stream {} connected", self.session_id);
        Ok(response)
    }

    /// Read events until `end`. Returns `Ok` once the stream is done with.
    async fn consume(&self, response: reqwest::Response) -> Result<()> {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(next) = body.next().await {
            let bytes = next.map_err(|e| PipelineError::Connection(format!("balance stream dropped: {}", e)))?;
            for event in decoder.push(&bytes)? {
                match self.handle_event(event).await {
                    EventOutcome::Continue => {}
                    EventOutcome::Stop => return Ok(()),
                }
            }
        }

        Err(PipelineError::Connection("balance stream closed before end event".to_string()))
    }

    async fn handle_event(&self, event: SseEvent) -> EventOutcome {
        match event.event.as_str() {
            BALANCE_EVENT => match BalanceChunk::from_json(&event.data) {
                Ok(chunk) => self.apply_chunk(chunk).await,
                Err(e) => {
                    warn!("⚠️ Dropping malformed balance event on stream {}: {}", self.session_id, e);
                    self.record_error(&e, false).await
                }
            },
            END_EVENT => {
                let (owned, chunk_count) = {
                    let mut state = self.state.write().await;
                    (state.mark_ended(self.session_id), state.len())
                };
                if owned {
                    info!("🏁 Balance stream {} finished with {} chunk(s)", self.session_id, chunk_count);
                    let _ = self.updates.send(StreamUpdate::Ended {
                        session_id: self.session_id,
                        chunk_count,
                        timestamp: Utc::now(),
                    });
                }
                EventOutcome::Stop
            }
            other => {
                debug!("Ignoring {} event on balance stream {}", other, self.session_id);
                EventOutcome::Continue
            }
        }
    }

    async fn apply_chunk(&self, chunk: BalanceChunk) -> EventOutcome {
        let network = chunk.network();
        let source_id = chunk.source_id().to_string();
        let total_usd = chunk.total_usd();

        let generation = {
            let mut state = self.state.write().await;
            if !state.push_chunk(self.session_id, chunk) {
                return EventOutcome::Stop;
            }
            state.generation()
        };

        debug!("Balance chunk {} on {}: ${:.2}", source_id, network, total_usd);
        let _ = self.updates.send(StreamUpdate::Chunk {
            session_id: self.session_id,
            generation,
            network,
            source_id,
            total_usd,
            timestamp: Utc::now(),
        });
        EventOutcome::Continue
    }

    async fn record_error(&self, err: &PipelineError, terminal: bool) -> EventOutcome {
        let info = ErrorInfo::from(err);
        let owned = self
            .state
            .write()
            .await
            .record_error(self.session_id, info.clone(), terminal);
        if !owned {
            return EventOutcome::Stop;
        }

        let _ = self.updates.send(StreamUpdate::Failed {
            session_id: self.session_id,
            error: info,
            terminal,
            timestamp: Utc::now(),
        });
        if terminal {
            EventOutcome::Stop
        } else {
            EventOutcome::Continue
        }
    }

    async fn fail(&self, err: PipelineError) {
        error!("❌ Balance stream {} failed: {}", self.session_id, err);
        self.record_error(&err, true).await;
    }
}

enum EventOutcome {
    Continue,
    Stop,
}
