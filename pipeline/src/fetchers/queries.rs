use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::fingerprint::fingerprint;
use crate::types::Network;

pub const NFT_USERS_COLLECTIONS: &str = r#"query NftUsersCollections($owners: [Address!]!, $network: Network, $minCollectionValueUsd: Float, $search: String, $collections: [Address!], $first: Int, $after: String) {
  nftUsersCollections(owners: $owners, network: $network, minCollectionValueUsd: $minCollectionValueUsd, search: $search, collections: $collections, first: $first, after: $after) {
    edges {
      cursor
      balance
      balanceUSD
      node {
        id
        name
        network
        address
        floorPriceEth
        logoImageUrl
      }
    }
  }
}"#;

pub const NFT_USERS_TOKENS: &str = r#"query NftUsersTokens($owners: [Address!]!, $network: Network, $minEstimatedValueUsd: Float, $collections: [Address!], $first: Int, $after: String) {
  nftUsersTokens(owners: $owners, network: $network, minEstimatedValueUsd: $minEstimatedValueUsd, collections: $collections, first: $first, after: $after) {
    edges {
      cursor
      balance
      node {
        id
        tokenId
        name
        estimatedValueEth
        collection {
          name
          address
          network
        }
      }
    }
  }
}"#;

/// Body of a GraphQL POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphQlRequest {
    pub query: String,
    pub variables: Value,
}

/// One element of a connection's `edges` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge<N> {
    pub cursor: String,
    pub node: N,
    #[serde(default)]
    pub balance: Option<Value>,
    #[serde(rename = "balanceUSD", default)]
    pub balance_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserCollectionNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub floor_price_eth: Option<String>,
    #[serde(default)]
    pub logo_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserTokenNode {
    pub id: String,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub estimated_value_eth: Option<String>,
    #[serde(default)]
    pub collection: Option<CollectionRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectionRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// A cursor-paginated GraphQL query over one owner's NFTs.
pub trait PagedQuery: Clone + Serialize + Send + Sync + 'static {
    type Node: DeserializeOwned + Clone + Send + Sync + 'static;

    /// Top-level response field holding the connection.
    const FIELD: &'static str;
    const DOCUMENT: &'static str;

    fn network(&self) -> Network;

    fn page_size(&self) -> u32;

    /// Query variables without the cursor.
    fn base_variables(&self) -> Map<String, Value>;

    fn variables(&self, after: Option<&str>) -> Value {
        let mut variables = self.base_variables();
        if let Some(cursor) = after.filter(|c| !c.is_empty()) {
            variables.insert("after".to_string(), json!(cursor));
        }
        Value::Object(variables)
    }

    fn request(&self, after: Option<&str>) -> GraphQlRequest {
        GraphQlRequest {
            query: Self::DOCUMENT.to_string(),
            variables: self.variables(after),
        }
    }

    /// Identity of the parameter set; a change restarts pagination.
    fn fingerprint(&self) -> String {
        fingerprint(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionsQuery {
    pub address: String,
    pub network: Network,
    pub min_collection_value_usd: f64,
    pub first: u32,
    pub collections: Vec<String>,
    pub search: String,
}

impl CollectionsQuery {
    pub fn new(address: impl Into<String>, network: Network) -> Self {
        Self {
            address: address.into(),
            network,
            min_collection_value_usd: 0.0,
            first: DEFAULT_PAGE_SIZE,
            collections: Vec::new(),
            search: String::new(),
        }
    }

    pub fn with_first(mut self, first: u32) -> Self {
        self.first = first;
        self
    }

    pub fn with_min_value_usd(mut self, min: f64) -> Self {
        self.min_collection_value_usd = min;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }
}

impl PagedQuery for CollectionsQuery {
    type Node = UserCollectionNode;

    const FIELD: &'static str = "nftUsersCollections";
    const DOCUMENT: &'static str = NFT_USERS_COLLECTIONS;

    fn network(&self) -> Network {
        self.network
    }

    fn page_size(&self) -> u32 {
        self.first
    }

    fn base_variables(&self) -> Map<String, Value> {
        let mut variables = Map::new();
        variables.insert("owners".to_string(), json!([self.address]));
        variables.insert("network".to_string(), json!(self.network.graphql_name()));
        variables.insert("minCollectionValueUsd".to_string(), json!(self.min_collection_value_usd));
        variables.insert("first".to_string(), json!(self.first));
        variables.insert("collections".to_string(), json!(self.collections));
        variables.insert("search".to_string(), json!(self.search));
        variables
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokensQuery {
    pub address: String,
    pub network: Network,
    pub min_estimated_value_usd: f64,
    pub first: u32,
    pub collections: Vec<String>,
}

impl TokensQuery {
    pub fn new(address: impl Into<String>, network: Network) -> Self {
        Self {
            address: address.into(),
            network,
            min_estimated_value_usd: 0.0,
            first: DEFAULT_PAGE_SIZE,
            collections: Vec::new(),
        }
    }

    pub fn with_first(mut self, first: u32) -> Self {
        self.first = first;
        self
    }

    pub fn with_min_value_usd(mut self, min: f64) -> Self {
        self.min_estimated_value_usd = min;
        self
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }
}

impl PagedQuery for TokensQuery {
    type Node = UserTokenNode;

    const FIELD: &'static str = "nftUsersTokens";
    const DOCUMENT: &'static str = NFT_USERS_TOKENS;

    fn network(&self) -> Network {
        self.network
    }

    fn page_size(&self) -> u32 {
        self.first
    }

    fn base_variables(&self) -> Map<String, Value> {
        let mut variables = Map::new();
        variables.insert("owners".to_string(), json!([self.address]));
        variables.insert("network".to_string(), json!(self.network.graphql_name()));
        variables.insert("minEstimatedValueUsd".to_string(), json!(self.min_estimated_value_usd));
        variables.insert("first".to_string(), json!(self.first));
        variables.insert("collections".to_string(), json!(self.collections));
        variables
    }
}
