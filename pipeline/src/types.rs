use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

/// Chains known to the balance aggregation API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Ethereum,
    Polygon,
    Optimism,
    Gnosis,
    BinanceSmartChain,
    Fantom,
    Avalanche,
    Arbitrum,
    Celo,
    Harmony,
    Moonriver,
    Bitcoin,
    Cronos,
    Aurora,
    Evmos,
}

impl Network {
    pub const ALL: [Network; 15] = [
        Network::Ethereum,
        Network::Polygon,
        Network::Optimism,
        Network::Gnosis,
        Network::BinanceSmartChain,
        Network::Fantom,
        Network::Avalanche,
        Network::Arbitrum,
        Network::Celo,
        Network::Harmony,
        Network::Moonriver,
        Network::Bitcoin,
        Network::Cronos,
        Network::Aurora,
        Network::Evmos,
    ];

    /// Chains reported by the per-chain totals view, always in this order.
    pub const TOTALS_CHAINS: [Network; 9] = [
        Network::Ethereum,
        Network::Polygon,
        Network::Optimism,
        Network::BinanceSmartChain,
        Network::Fantom,
        Network::Avalanche,
        Network::Arbitrum,
        Network::Cronos,
        Network::Aurora,
    ];

    /// Chains the NFT indexer can be queried for.
    pub const NFT_CHAINS: [Network; 3] = [Network::Ethereum, Network::Arbitrum, Network::Optimism];

    /// Slug used in stream URLs and chunk payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Optimism => "optimism",
            Network::Gnosis => "gnosis",
            Network::BinanceSmartChain => "binance-smart-chain",
            Network::Fantom => "fantom",
            Network::Avalanche => "avalanche",
            Network::Arbitrum => "arbitrum",
            Network::Celo => "celo",
            Network::Harmony => "harmony",
            Network::Moonriver => "moonriver",
            Network::Bitcoin => "bitcoin",
            Network::Cronos => "cronos",
            Network::Aurora => "aurora",
            Network::Evmos => "evmos",
        }
    }

    /// Enum key expected by the GraphQL `network` argument.
    pub fn graphql_name(&self) -> &'static str {
        match self {
            Network::Ethereum => "ETHEREUM_MAINNET",
            Network::Polygon => "POLYGON_MAINNET",
            Network::Optimism => "OPTIMISM_MAINNET",
            Network::Gnosis => "GNOSIS_MAINNET",
            Network::BinanceSmartChain => "BINANCE_SMART_CHAIN_MAINNET",
            Network::Fantom => "FANTOM_OPERA_MAINNET",
            Network::Avalanche => "AVALANCHE_MAINNET",
            Network::Arbitrum => "ARBITRUM_MAINNET",
            Network::Celo => "CELO_MAINNET",
            Network::Harmony => "HARMONY_MAINNET",
            Network::Moonriver => "MOONRIVER_MAINNET",
            Network::Bitcoin => "BITCOIN_MAINNET",
            Network::Cronos => "CRONOS_MAINNET",
            Network::Aurora => "AURORA_MAINNET",
            Network::Evmos => "EVMOS_MAINNET",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Ethereum => "Ethereum",
            Network::Polygon => "Polygon",
            Network::Optimism => "Optimism",
            Network::Gnosis => "Gnosis",
            Network::BinanceSmartChain => "BNB Chain",
            Network::Fantom => "Fantom",
            Network::Avalanche => "Avalanche",
            Network::Arbitrum => "Arbitrum",
            Network::Celo => "Celo",
            Network::Harmony => "Harmony",
            Network::Moonriver => "Moonriver",
            Network::Bitcoin => "Bitcoin",
            Network::Cronos => "Cronos",
            Network::Aurora => "Aurora",
            Network::Evmos => "Evmos",
        }
    }

    /// Accepts either the slug or the GraphQL key, case-insensitively.
    pub fn from_str(s: &str) -> Option<Self> {
        let needle = s.trim();
        Network::ALL.into_iter().find(|network| {
            network.as_str().eq_ignore_ascii_case(needle)
                || network.graphql_name().eq_ignore_ascii_case(needle)
        })
    }

    pub fn supports_nfts(&self) -> bool {
        Network::NFT_CHAINS.contains(self)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source id the API uses for plain wallet holdings.
pub const WALLET_SOURCE_ID: &str = "tokens";

/// Per-position details of a wallet chunk, keyed by position key.
pub type WalletBreakdown = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceTotal {
    pub network: Network,
    #[serde(rename = "balanceUSD")]
    pub balance_usd: f64,
}

/// Payload of one `balance` event, as sent by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBalancePayload {
    pub app_id: String,
    pub network: Network,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub balance: Option<RawBalanceSection>,
    #[serde(default)]
    pub app: Option<Value>,
    #[serde(default)]
    pub totals: Vec<BalanceTotal>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBalanceSection {
    #[serde(default)]
    pub wallet: WalletBreakdown,
}

/// One balance record scoped to one network and one source.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceChunk {
    Wallet {
        network: Network,
        totals: Vec<BalanceTotal>,
        wallet_breakdown: WalletBreakdown,
    },
    App {
        source_id: String,
        network: Network,
        totals: Vec<BalanceTotal>,
        app_breakdown: Value,
    },
}

impl BalanceChunk {
    /// Decode the JSON body of a `balance` event.
    pub fn from_json(data: &str) -> Result<Self> {
        let raw: RawBalancePayload = serde_json::from_str(data)
            .map_err(|e| PipelineError::Decode(format!("invalid balance payload: {}", e)))?;
        Ok(raw.into())
    }

    pub fn network(&self) -> Network {
        match self {
            BalanceChunk::Wallet { network, .. } | BalanceChunk::App { network, .. } => *network,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            BalanceChunk::Wallet { .. } => WALLET_SOURCE_ID,
            BalanceChunk::App { source_id, .. } => source_id,
        }
    }

    pub fn totals(&self) -> &[BalanceTotal] {
        match self {
            BalanceChunk::Wallet { totals, .. } | BalanceChunk::App { totals, .. } => totals,
        }
    }

    pub fn is_wallet(&self) -> bool {
        matches!(self, BalanceChunk::Wallet { .. })
    }

    /// Sum of this chunk's partial totals.
    pub fn total_usd(&self) -> f64 {
        self.totals().iter().map(|t| t.balance_usd).sum()
    }
}

impl From<RawBalancePayload> for BalanceChunk {
    fn from(raw: RawBalancePayload) -> Self {
        if raw.app_id == WALLET_SOURCE_ID {
            BalanceChunk::Wallet {
                network: raw.network,
                totals: raw.totals,
                wallet_breakdown: raw.balance.unwrap_or_default().wallet,
            }
        } else {
            BalanceChunk::App {
                source_id: raw.app_id,
                network: raw.network,
                totals: raw.totals,
                app_breakdown: raw.app.unwrap_or(Value::Null),
            }
        }
    }
}
