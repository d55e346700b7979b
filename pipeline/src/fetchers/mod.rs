pub mod graphql;
pub mod infinite;
pub mod paginated;
pub mod queries;

pub use graphql::{GraphQlClient, PageSource};
pub use infinite::{page_key, InfiniteFetcher, InfiniteSnapshot, PageKey};
pub use paginated::{FetchMode, FetchOutcome, PageSnapshot, PagedFetcher};
pub use queries::*;

