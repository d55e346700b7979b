//! Portfolio views folded from accumulated balance chunks.
//!
//! Every function here is pure: the same chunk list always produces the same
//! view, and views are rebuilt from scratch rather than patched.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::streaming::BalanceSnapshot;
use crate::types::{BalanceChunk, Network, WalletBreakdown};

/// Summed USD value of one source key plus the details seen last for it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceAggregate<D> {
    pub total_usd: f64,
    pub details: D,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SourceTotals {
    /// Direct wallet holdings, one entry per chain.
    pub wallets: BTreeMap<Network, SourceAggregate<WalletBreakdown>>,
    /// Protocol positions, one entry per app id regardless of chain.
    pub apps: BTreeMap<String, SourceAggregate<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSelection {
    All,
    Chain(Network),
}

pub fn compute_grand_total(chunks: &[BalanceChunk]) -> f64 {
    chunks.iter().map(BalanceChunk::total_usd).sum()
}

/// USD per supported chain. Every chain in [`Network::TOTALS_CHAINS`] is
/// present; totals on other chains are left out.
pub fn compute_totals_by_chain(chunks: &[BalanceChunk]) -> BTreeMap<Network, f64> {
    let mut totals: BTreeMap<Network, f64> = Network::TOTALS_CHAINS.iter().map(|n| (*n, 0.0)).collect();

    for total in chunks.iter().flat_map(|chunk| chunk.totals()) {
        if let Some(sum) = totals.get_mut(&total.network) {
            *sum += total.balance_usd;
        }
    }
    totals
}

pub fn compute_totals_by_source(chunks: &[BalanceChunk]) -> SourceTotals {
    let mut view = SourceTotals::default();

    for chunk in chunks {
        let chunk_total = chunk.total_usd();
        match chunk {
            BalanceChunk::Wallet {
                network,
                wallet_breakdown,
                ..
            } => {
                let entry = view.wallets.entry(*network).or_insert_with(|| SourceAggregate {
                    total_usd: 0.0,
                    details: WalletBreakdown::new(),
                });
                entry.total_usd += chunk_total;
                entry.details = wallet_breakdown.clone();
            }
            BalanceChunk::App {
                source_id,
                app_breakdown,
                ..
            } => {
                let entry = view.apps.entry(source_id.clone()).or_insert_with(|| SourceAggregate {
                    total_usd: 0.0,
                    details: Value::Null,
                });
                entry.total_usd += chunk_total;
                entry.details = app_breakdown.clone();
            }
        }
    }
    view
}

/// Grand total, or the sum of totals entries on one chain.
pub fn compute_selected_total(chunks: &[BalanceChunk], selection: ChainSelection) -> f64 {
    match selection {
        ChainSelection::All => compute_grand_total(chunks),
        ChainSelection::Chain(network) => chunks
            .iter()
            .flat_map(|chunk| chunk.totals())
            .filter(|total| total.network == network)
            .map(|total| total.balance_usd)
            .sum(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PortfolioView {
    pub grand_total: f64,
    pub by_chain: BTreeMap<Network, f64>,
    pub by_source: SourceTotals,
    pub chunk_count: usize,
}

impl PortfolioView {
    pub fn from_chunks(chunks: &[BalanceChunk]) -> Self {
        Self {
            grand_total: compute_grand_total(chunks),
            by_chain: compute_totals_by_chain(chunks),
            by_source: compute_totals_by_source(chunks),
            chunk_count: chunks.len(),
        }
    }
}

/// Memoizes the portfolio view of the last snapshot it saw.
#[derive(Debug, Default)]
pub struct AggregateCache {
    key: Option<(Option<String>, u64)>,
    view: Option<Arc<PortfolioView>>,
    recomputations: u64,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// View for `snapshot`, recomputed only when the chunk list changed.
    pub fn view(&mut self, snapshot: &BalanceSnapshot) -> Arc<PortfolioView> {
        let key = (snapshot.fingerprint.clone(), snapshot.generation);
        if self.key.as_ref() == Some(&key) {
            if let Some(view) = &self.view {
                return Arc::clone(view);
            }
        }

        let view = Arc::new(PortfolioView::from_chunks(snapshot.chunks()));
        self.key = Some(key);
        self.view = Some(Arc::clone(&view));
        self.recomputations += 1;
        view
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}
