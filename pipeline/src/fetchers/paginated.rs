use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::graphql::PageSource;
use super::queries::{Edge, PagedQuery};
use crate::error::{ErrorInfo, PipelineError, Result};

/// How a fetched page is merged into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Append each page to the running list ("load more").
    Accumulate,
    /// Replace the list with the page just fetched.
    Replace,
}

/// What happened to a fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { received: usize, total: usize },
    /// This page was already requested for the active parameter set.
    Skipped,
    /// The parameters changed while the request was in flight; result dropped.
    Stale,
}

#[derive(Debug, Clone)]
pub struct PageSnapshot<N> {
    pub items: Vec<Edge<N>>,
    pub is_loading: bool,
    pub is_reaching_end: bool,
    pub error: Option<ErrorInfo>,
    pub generation: u64,
}

struct ListState<Q: PagedQuery> {
    query: Option<Q>,
    fingerprint: Option<String>,
    items: Vec<Edge<Q::Node>>,
    requested: HashSet<Option<String>>,
    last_page_len: Option<usize>,
    in_flight: usize,
    latest_request: u64,
    error: Option<ErrorInfo>,
    generation: u64,
    /// Bumped whenever the list is restarted; responses from an older session are dropped.
    session: u64,
}

impl<Q: PagedQuery> ListState<Q> {
    fn new() -> Self {
        Self {
            query: None,
            fingerprint: None,
            items: Vec::new(),
            requested: HashSet::new(),
            last_page_len: None,
            in_flight: 0,
            latest_request: 0,
            error: None,
            generation: 0,
            session: 0,
        }
    }

    fn reset(&mut self, query: Q, fingerprint: String) {
        self.query = Some(query);
        self.fingerprint = Some(fingerprint);
        self.items.clear();
        self.requested.clear();
        self.last_page_len = None;
        self.in_flight = 0;
        self.error = None;
        self.generation += 1;
        self.session += 1;
    }

    fn is_active(&self, fingerprint: &str) -> bool {
        self.fingerprint.as_deref() == Some(fingerprint)
    }

    fn is_current(&self, fingerprint: &str, session: u64) -> bool {
        self.is_active(fingerprint) && self.session == session
    }

    fn is_reaching_end(&self) -> bool {
        match (&self.query, self.last_page_len) {
            (Some(query), Some(len)) => len < query.page_size() as usize,
            _ => false,
        }
    }
}

/// Cursor-paginated list of NFT edges for one parameter set at a time.
///
/// In [`FetchMode::Accumulate`] each `(parameters, cursor)` pair is fetched
/// at most once. Changing any parameter empties the list before page one is
/// requested, and responses for parameters that are no longer active are
/// dropped without touching state.
pub struct PagedFetcher<Q: PagedQuery, S: PageSource<Q>> {
    source: Arc<S>,
    mode: FetchMode,
    state: RwLock<ListState<Q>>,
}

impl<Q: PagedQuery, S: PageSource<Q>> PagedFetcher<Q, S> {
    pub fn new(source: Arc<S>, mode: FetchMode) -> Self {
        Self {
            source,
            mode,
            state: RwLock::new(ListState::new()),
        }
    }

    pub fn accumulating(source: Arc<S>) -> Self {
        Self::new(source, FetchMode::Accumulate)
    }

    pub fn replacing(source: Arc<S>) -> Self {
        Self::new(source, FetchMode::Replace)
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Fetch the page after `after` (page one when `None` or empty).
    pub async fn fetch(&self, query: Q, after: Option<String>) -> Result<FetchOutcome> {
        let network = query.network();
        if !network.supports_nfts() {
            warn!("⚠️ {} is not served on {}", Q::FIELD, network);
            return Err(PipelineError::UnsupportedNetwork(network));
        }

        let fingerprint = query.fingerprint();
        let after = after.filter(|cursor| !cursor.is_empty());

        let (request_id, session) = {
            let mut state = self.state.write().await;
            if !state.is_active(&fingerprint) {
                debug!("Parameters changed, restarting {} pagination", Q::FIELD);
                state.reset(query.clone(), fingerprint.clone());
            }
            if self.mode == FetchMode::Accumulate && !state.requested.insert(after.clone()) {
                debug!("Page after {:?} already requested, skipping", after);
                return Ok(FetchOutcome::Skipped);
            }
            state.in_flight += 1;
            state.latest_request += 1;
            state.error = None;
            (state.latest_request, state.session)
        };

        let result = self.source.fetch_page(&query, after.as_deref()).await;

        let mut state = self.state.write().await;
        if !state.is_current(&fingerprint, session) {
            debug!("Dropping stale {} response", Q::FIELD);
            return Ok(FetchOutcome::Stale);
        }
        state.in_flight = state.in_flight.saturating_sub(1);

        match result {
            Ok(edges) => {
                if self.mode == FetchMode::Replace && request_id != state.latest_request {
                    debug!("Dropping superseded {} response", Q::FIELD);
                    return Ok(FetchOutcome::Stale);
                }
                let received = edges.len();
                match self.mode {
                    FetchMode::Accumulate => state.items.extend(edges),
                    FetchMode::Replace => state.items = edges,
                }
                state.last_page_len = Some(received);
                state.generation += 1;
                info!("📦 Loaded {} {} item(s), {} in list", received, Q::FIELD, state.items.len());
                Ok(FetchOutcome::Applied {
                    received,
                    total: state.items.len(),
                })
            }
            Err(e) => {
                warn!("❌ {} fetch failed: {}", Q::FIELD, e);
                // let the caller retry the same page
                state.requested.remove(&after);
                state.error = Some(ErrorInfo::from(&e));
                state.generation += 1;
                Err(e)
            }
        }
    }

    /// Fetch the page following the last item in the list.
    pub async fn load_more(&self) -> Result<FetchOutcome> {
        let (query, cursor) = {
            let state = self.state.read().await;
            match &state.query {
                Some(query) => (query.clone(), state.items.last().map(|edge| edge.cursor.clone())),
                None => return Ok(FetchOutcome::Skipped),
            }
        };
        self.fetch(query, cursor).await
    }

    /// Empty the list while keeping the active parameters.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.items.clear();
        state.requested.clear();
        state.last_page_len = None;
        state.in_flight = 0;
        state.error = None;
        state.generation += 1;
        state.session += 1;
    }

    pub async fn items(&self) -> Vec<Edge<Q::Node>> {
        self.state.read().await.items.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    pub async fn next_cursor(&self) -> Option<String> {
        self.state.read().await.items.last().map(|edge| edge.cursor.clone())
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.in_flight > 0
    }

    pub async fn is_reaching_end(&self) -> bool {
        self.state.read().await.is_reaching_end()
    }

    pub async fn error(&self) -> Option<ErrorInfo> {
        self.state.read().await.error.clone()
    }

    pub async fn snapshot(&self) -> PageSnapshot<Q::Node> {
        let state = self.state.read().await;
        PageSnapshot {
            items: state.items.clone(),
            is_loading: state.in_flight > 0,
            is_reaching_end: state.is_reaching_end(),
            error: state.error.clone(),
            generation: state.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::queries::{CollectionsQuery, UserCollectionNode};
    use crate::types::Network;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves `total` items per owner in pages of `first`, cursors are offsets.
    struct FakeSource {
        total: usize,
        calls: AtomicUsize,
        fail_next: AtomicUsize,
        /// per-call latency in ms, consumed in call order
        delays: Mutex<VecDeque<u64>>,
    }

    impl FakeSource {
        fn new(total: usize) -> Arc<Self> {
            Arc::new(Self {
                total,
                calls: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                delays: Mutex::new(VecDeque::new()),
            })
        }

        fn with_delays(total: usize, delays: &[u64]) -> Arc<Self> {
            let source = Self::new(total);
            source.delays.lock().unwrap().extend(delays.iter().copied());
            source
        }
    }

    #[async_trait]
    impl PageSource<CollectionsQuery> for FakeSource {
        async fn fetch_page(
            &self,
            query: &CollectionsQuery,
            after: Option<&str>,
        ) -> Result<Vec<Edge<UserCollectionNode>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or(0);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_next.swap(0, Ordering::SeqCst) > 0 {
                return Err(PipelineError::Fetch("upstream unavailable".to_string()));
            }
            let start = after.map(|c| c.parse::<usize>().unwrap() + 1).unwrap_or(0);
            let end = (start + query.first as usize).min(self.total);
            Ok((start..end)
                .map(|i| Edge {
                    cursor: i.to_string(),
                    node: UserCollectionNode {
                        id: format!("{}-{}", query.address, i),
                        ..Default::default()
                    },
                    balance: None,
                    balance_usd: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_accumulates_pages_until_short_page() {
        let source = FakeSource::new(34);
        let fetcher = PagedFetcher::accumulating(source.clone());
        let query = CollectionsQuery::new("0xowner", Network::Ethereum);

        let first = fetcher.fetch(query.clone(), None).await.unwrap();
        assert_eq!(first, FetchOutcome::Applied { received: 24, total: 24 });
        assert!(!fetcher.is_reaching_end().await);

        let second = fetcher.load_more().await.unwrap();
        assert_eq!(second, FetchOutcome::Applied { received: 10, total: 34 });
        assert!(fetcher.is_reaching_end().await);
        assert_eq!(fetcher.next_cursor().await.as_deref(), Some("33"));
    }

    #[tokio::test]
    async fn test_same_page_is_fetched_once() {
        let source = FakeSource::new(100);
        let fetcher = PagedFetcher::accumulating(source.clone());
        let query = CollectionsQuery::new("0xowner", Network::Ethereum);

        fetcher.fetch(query.clone(), None).await.unwrap();
        let again = fetcher.fetch(query.clone(), Some(String::new())).await.unwrap();

        assert_eq!(again, FetchOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.len().await, 24);
    }

    #[tokio::test]
    async fn test_filter_change_resets_list() {
        let source = FakeSource::new(100);
        let fetcher = PagedFetcher::accumulating(source.clone());
        let query = CollectionsQuery::new("0xowner", Network::Ethereum);

        fetcher.fetch(query.clone(), None).await.unwrap();
        fetcher.load_more().await.unwrap();
        assert_eq!(fetcher.len().await, 48);

        let narrowed = query.with_first(5);
        fetcher.fetch(narrowed, None).await.unwrap();
        assert_eq!(fetcher.len().await, 5);
        assert_eq!(fetcher.items().await[0].cursor, "0");
    }

    #[tokio::test]
    async fn test_failure_keeps_prior_pages_and_allows_retry() {
        let source = FakeSource::new(100);
        let fetcher = PagedFetcher::accumulating(source.clone());
        let query = CollectionsQuery::new("0xowner", Network::Ethereum);

        fetcher.fetch(query.clone(), None).await.unwrap();
        source.fail_next.store(1, Ordering::SeqCst);

        let failed = fetcher.load_more().await;
        assert!(matches!(failed, Err(PipelineError::Fetch(_))));
        assert_eq!(fetcher.len().await, 24);
        assert!(fetcher.error().await.is_some());

        let retried = fetcher.load_more().await.unwrap();
        assert_eq!(retried, FetchOutcome::Applied { received: 24, total: 48 });
        assert!(fetcher.error().await.is_none());
    }

    #[tokio::test]
    async fn test_replacing_mode_keeps_only_latest_page() {
        let source = FakeSource::new(30);
        let fetcher = PagedFetcher::replacing(source.clone());
        let query = CollectionsQuery::new("0xowner", Network::Optimism).with_first(20);

        fetcher.fetch(query.clone(), None).await.unwrap();
        assert_eq!(fetcher.len().await, 20);

        let cursor = fetcher.next_cursor().await;
        fetcher.fetch(query.clone(), cursor).await.unwrap();
        let items = fetcher.items().await;
        assert_eq!(items.len(), 10);
        assert_eq!(items[0].cursor, "20");

        // replacing mode has no once-only latch
        fetcher.fetch(query, None).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unsupported_network_is_rejected() {
        let source = FakeSource::new(10);
        let fetcher = PagedFetcher::accumulating(source.clone());

        let result = fetcher
            .fetch(CollectionsQuery::new("0xowner", Network::Polygon), None)
            .await;

        assert!(matches!(result, Err(PipelineError::UnsupportedNetwork(Network::Polygon))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_network_leaves_active_list_alone() {
        let source = FakeSource::new(10);
        let fetcher = PagedFetcher::accumulating(source.clone());
        fetcher
            .fetch(CollectionsQuery::new("0xowner", Network::Ethereum), None)
            .await
            .unwrap();

        let result = fetcher
            .fetch(CollectionsQuery::new("0xowner", Network::Fantom), None)
            .await;

        assert!(result.is_err());
        assert_eq!(fetcher.len().await, 10);
        assert!(fetcher.error().await.is_none());
    }

    #[tokio::test]
    async fn test_response_from_earlier_session_is_dropped() {
        // old 0xX page is slow, then 0xY, then 0xX again (slower still)
        let source = FakeSource::with_delays(3, &[200, 0, 400]);
        let fetcher = PagedFetcher::accumulating(source.clone());
        let x = CollectionsQuery::new("0xX", Network::Ethereum);
        let y = CollectionsQuery::new("0xY", Network::Ethereum);

        let (old_x, y_result, new_x, loading_mid_flight) = tokio::join!(
            fetcher.fetch(x.clone(), None),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                fetcher.fetch(y, None).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                fetcher.fetch(x.clone(), None).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                fetcher.is_loading().await
            }
        );

        assert_eq!(old_x.unwrap(), FetchOutcome::Stale);
        assert_eq!(y_result.unwrap(), FetchOutcome::Applied { received: 3, total: 3 });
        assert_eq!(new_x.unwrap(), FetchOutcome::Applied { received: 3, total: 3 });
        assert!(loading_mid_flight);
        assert!(!fetcher.is_loading().await);

        let ids: Vec<String> = fetcher.items().await.into_iter().map(|e| e.node.id).collect();
        assert_eq!(ids, vec!["0xX-0", "0xX-1", "0xX-2"]);
    }
}
