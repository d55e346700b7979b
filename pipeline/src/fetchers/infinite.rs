use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::graphql::PageSource;
use super::queries::{Edge, PagedQuery};
use crate::error::{ErrorInfo, PipelineError, Result};

/// Request for one page of an infinite list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKey {
    pub page_index: usize,
    pub after: Option<String>,
    /// Serialized request body; equal keys mean identical requests.
    pub body: String,
}

/// Derive the request for `page_index` from the page before it.
///
/// Returns `None` once the previous page came back empty or shorter than the
/// page size, or when a later page is asked for without its predecessor.
pub fn page_key<Q: PagedQuery>(
    query: &Q,
    page_index: usize,
    previous_page: Option<&[Edge<Q::Node>]>,
) -> Option<PageKey> {
    if let Some(previous) = previous_page {
        if previous.is_empty() || previous.len() < query.page_size() as usize {
            return None;
        }
    }

    let after = if page_index == 0 {
        None
    } else {
        Some(previous_page?.last()?.cursor.clone())
    };

    let body = serde_json::to_string(&query.request(after.as_deref())).ok()?;
    Some(PageKey {
        page_index,
        after,
        body,
    })
}

#[derive(Debug, Clone)]
pub struct InfiniteSnapshot<N> {
    pub data: Vec<Edge<N>>,
    pub size: usize,
    pub page_count: usize,
    pub is_loading_initial: bool,
    pub is_loading_more: bool,
    pub is_reaching_end: bool,
    pub is_refreshing: bool,
    pub is_empty: bool,
    pub error: Option<ErrorInfo>,
}

struct InfiniteState<Q: PagedQuery> {
    query: Option<Q>,
    fingerprint: Option<String>,
    pages: Vec<Vec<Edge<Q::Node>>>,
    size: usize,
    loading: bool,
    refreshing: bool,
    error: Option<ErrorInfo>,
    /// Bumped on every parameter change; pages fetched for an older session are dropped.
    session: u64,
}

impl<Q: PagedQuery> InfiniteState<Q> {
    fn is_empty(&self) -> bool {
        self.pages.first().map(|page| page.is_empty()).unwrap_or(false)
    }

    fn is_reaching_end(&self) -> bool {
        let page_size = match &self.query {
            Some(query) => query.page_size() as usize,
            None => return false,
        };
        self.is_empty() || self.pages.last().map(|page| page.len() < page_size).unwrap_or(false)
    }
}

/// Page list whose cursors are chained from the last item of each page.
///
/// `size` is the number of pages wanted; raising it with
/// [`load_more`](Self::load_more) fetches the missing pages in order.
pub struct InfiniteFetcher<Q: PagedQuery, S: PageSource<Q>> {
    source: Arc<S>,
    state: RwLock<InfiniteState<Q>>,
}

impl<Q: PagedQuery, S: PageSource<Q>> InfiniteFetcher<Q, S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            state: RwLock::new(InfiniteState {
                query: None,
                fingerprint: None,
                pages: Vec::new(),
                size: 0,
                loading: false,
                refreshing: false,
                error: None,
                session: 0,
            }),
        }
    }

    /// Switch to a parameter set and load its first page.
    ///
    /// The same parameters again are a no-op.
    pub async fn set_query(&self, query: Q) -> Result<()> {
        let network = query.network();
        if !network.supports_nfts() {
            warn!("⚠️ {} is not served on {}", Q::FIELD, network);
            return Err(PipelineError::UnsupportedNetwork(network));
        }

        let fingerprint = query.fingerprint();
        {
            let mut state = self.state.write().await;
            if state.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                return Ok(());
            }
            state.query = Some(query);
            state.fingerprint = Some(fingerprint);
            state.pages.clear();
            state.size = 1;
            state.loading = false;
            state.refreshing = false;
            state.error = None;
            state.session += 1;
        }
        self.fill().await
    }

    pub async fn set_size(&self, size: usize) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.query.is_none() {
                return Ok(());
            }
            state.size = size;
            state.pages.truncate(size);
        }
        self.fill().await
    }

    /// Ask for one more page.
    pub async fn load_more(&self) -> Result<()> {
        let size = self.state.read().await.size;
        self.set_size(size + 1).await
    }

    /// Refetch every page currently wanted.
    ///
    /// Loaded pages stay readable until the whole refetch succeeds; a failed
    /// refresh keeps them and records the error.
    pub async fn refresh(&self) -> Result<()> {
        let (query, session, wanted) = {
            let mut state = self.state.write().await;
            let query = match &state.query {
                Some(query) => query.clone(),
                None => return Ok(()),
            };
            state.refreshing = true;
            state.error = None;
            (query, state.session, state.size)
        };

        let mut fresh: Vec<Vec<Edge<Q::Node>>> = Vec::new();
        let mut failure = None;
        while fresh.len() < wanted {
            let key = match page_key(&query, fresh.len(), fresh.last().map(|p| p.as_slice())) {
                Some(key) => key,
                None => break,
            };
            match self.source.fetch_page(&query, key.after.as_deref()).await {
                Ok(page) => fresh.push(page),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut state = self.state.write().await;
        if state.session != session {
            debug!("Dropping stale {} refresh", Q::FIELD);
            return Ok(());
        }
        state.refreshing = false;
        match failure {
            None => {
                info!("🔄 {} refreshed {} page(s)", Q::FIELD, fresh.len());
                state.pages = fresh;
                Ok(())
            }
            Some(e) => {
                warn!("❌ {} refresh failed, keeping {} page(s): {}", Q::FIELD, state.pages.len(), e);
                state.error = Some(ErrorInfo::from(&e));
                Err(e)
            }
        }
    }

    /// Fetch pages until `size` pages are loaded or the end is reached.
    async fn fill(&self) -> Result<()> {
        loop {
            let (query, session, key) = {
                let mut state = self.state.write().await;
                let query = match &state.query {
                    Some(query) => query.clone(),
                    None => return Ok(()),
                };
                let index = state.pages.len();
                if index >= state.size {
                    return Ok(());
                }
                let key = match page_key(&query, index, state.pages.last().map(|p| p.as_slice())) {
                    Some(key) => key,
                    None => {
                        debug!("{} reached the last page at index {}", Q::FIELD, index);
                        return Ok(());
                    }
                };
                state.loading = true;
                state.error = None;
                (query, state.session, key)
            };

            let result = self.source.fetch_page(&query, key.after.as_deref()).await;

            let mut state = self.state.write().await;
            if state.session != session {
                debug!("Dropping stale {} page {}", Q::FIELD, key.page_index);
                return Ok(());
            }
            state.loading = false;
            if state.pages.len() != key.page_index {
                // a concurrent fill already stored this page
                continue;
            }

            match result {
                Ok(page) => {
                    info!("📄 {} page {} loaded with {} item(s)", Q::FIELD, key.page_index, page.len());
                    state.pages.push(page);
                }
                Err(e) => {
                    warn!("❌ {} page {} failed: {}", Q::FIELD, key.page_index, e);
                    state.error = Some(ErrorInfo::from(&e));
                    return Err(e);
                }
            }
        }
    }

    /// All loaded pages, flattened.
    pub async fn data(&self) -> Vec<Edge<Q::Node>> {
        self.state.read().await.pages.iter().flatten().cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.size
    }

    pub async fn is_reaching_end(&self) -> bool {
        self.state.read().await.is_reaching_end()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> InfiniteSnapshot<Q::Node> {
        let state = self.state.read().await;
        InfiniteSnapshot {
            data: state.pages.iter().flatten().cloned().collect(),
            size: state.size,
            page_count: state.pages.len(),
            is_loading_initial: state.pages.is_empty() && state.loading,
            is_loading_more: state.loading,
            is_reaching_end: state.is_reaching_end(),
            is_refreshing: state.refreshing,
            is_empty: state.is_empty(),
            error: state.error.clone(),
        }
    }
}
