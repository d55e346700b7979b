pub mod balance_stream;
pub mod sse;
pub mod types;

pub use balance_stream::BalanceStreamController;
pub use sse::{SseDecoder, SseEvent};
pub use types::*;
