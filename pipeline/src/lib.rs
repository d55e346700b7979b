pub mod aggregates;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod fingerprint;
pub mod streaming;
pub mod types;

pub use aggregates::{AggregateCache, ChainSelection, PortfolioView};
pub use config::PipelineConfig;
pub use error::{ErrorInfo, PipelineError, Result};
pub use streaming::{BalanceParams, BalanceStreamController, StreamUpdate};
pub use types::{BalanceChunk, Network};
