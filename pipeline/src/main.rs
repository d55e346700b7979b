use anyhow::Context;
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};

use balance_pipeline::aggregates::AggregateCache;
use balance_pipeline::fetchers::{CollectionsQuery, FetchOutcome, GraphQlClient, PagedFetcher};
use balance_pipeline::{BalanceParams, BalanceStreamController, Network, PipelineConfig, StreamUpdate};

fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let addresses = parse_list("PIPELINE_ADDRESSES");
    if addresses.is_empty() {
        anyhow::bail!("PIPELINE_ADDRESSES must list at least one wallet address");
    }

    let mut networks = Vec::new();
    for raw in parse_list("PIPELINE_NETWORKS") {
        match Network::from_str(&raw) {
            Some(network) => networks.push(network),
            None => warn!("⚠️ Ignoring unknown network {}", raw),
        }
    }
    if networks.is_empty() {
        networks = Network::TOTALS_CHAINS.to_vec();
    }

    info!("🚀 Streaming balances for {} address(es) from {}", addresses.len(), config.base_url);

    if let Some(network) = env::var("PIPELINE_NFT_NETWORK").ok().and_then(|n| Network::from_str(&n)) {
        let client = Arc::new(GraphQlClient::new(config.clone())?);
        let collections = PagedFetcher::accumulating(client);
        let query = CollectionsQuery::new(addresses[0].clone(), network).with_first(config.page_size);
        match collections.fetch(query, None).await {
            Ok(FetchOutcome::Applied { received, .. }) => {
                info!("🖼️ {} NFT collection(s) on {}", received, network.display_name());
                for edge in collections.items().await {
                    info!(
                        "   {} ({})",
                        edge.node.name.unwrap_or_else(|| edge.node.id.clone()),
                        edge.balance_usd.map(|usd| format!("${:.2}", usd)).unwrap_or_default()
                    );
                }
            }
            Ok(outcome) => info!("NFT collections fetch: {:?}", outcome),
            Err(e) => error!("❌ NFT collections fetch failed: {}", e),
        }
    }

    let controller = BalanceStreamController::new(config)?;
    let mut updates = controller.subscribe();
    controller.set_params(BalanceParams::new(addresses, networks)).await;

    let mut cache = AggregateCache::new();
    loop {
        match updates.recv().await {
            Ok(StreamUpdate::Chunk { network, source_id, total_usd, .. }) => {
                let view = cache.view(&controller.snapshot().await);
                info!(
                    "💰 {} on {}: ${:.2} (portfolio ${:.2} across {} chunk(s))",
                    source_id, network, total_usd, view.grand_total, view.chunk_count
                );
            }
            Ok(StreamUpdate::Ended { .. }) => break,
            Ok(StreamUpdate::Failed { error, terminal, .. }) => {
                if terminal {
                    controller.shutdown().await;
                    anyhow::bail!("balance stream failed: {}", error);
                }
                warn!("⚠️ Skipped event: {}", error);
            }
            Ok(StreamUpdate::Reset { .. }) => {}
            Err(RecvError::Lagged(skipped)) => warn!("⚠️ Missed {} stream update(s)", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    let view = cache.view(&controller.snapshot().await);
    info!("📊 Portfolio total: ${:.2}", view.grand_total);
    for (network, total) in view.by_chain.iter().filter(|(_, total)| **total > 0.0) {
        info!("   {}: ${:.2}", network.display_name(), total);
    }
    for (network, wallet) in &view.by_source.wallets {
        info!("   wallet on {}: ${:.2} in {} position(s)", network, wallet.total_usd, wallet.details.len());
    }
    for (app_id, app) in &view.by_source.apps {
        info!("   {}: ${:.2}", app_id, app.total_usd);
    }

    controller.shutdown().await;
    Ok(())
}
