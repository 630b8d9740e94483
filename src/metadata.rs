//! Token image and trait lookup.
//!
//! The metadata pointer comes from `tokenURI(uint256)`, falling back to the
//! ERC-1155 style `uri(uint256)`. Content-addressed (`ipfs://`) pointers and
//! images are resolved against an ordered list of mirror gateways: each is
//! probed with a time-boxed HEAD request and the first one that answers wins.
//! When none answer, the first gateway's URL is used anyway.
//!
//! Results are cached per `(contract, token id)` for the life of the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::MetadataError;
use crate::models::Trait;
use crate::rpc::ChainRpc;

sol! {
    interface ITokenMetadata {
        function tokenURI(uint256 tokenId) external view returns (string);
        function uri(uint256 id) external view returns (string);
    }
}

/// HTTP access used for gateway probes and metadata documents
pub trait MetadataHttp: Send + Sync {
    /// HEAD request; `Ok(true)` on a success status
    fn probe(&self, url: &str) -> impl Future<Output = Result<bool, MetadataError>> + Send;

    fn fetch_json(&self, url: &str) -> impl Future<Output = Result<Value, MetadataError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpMetadataClient {
    client: Client,
}

impl HttpMetadataClient {
    pub fn new(request_timeout: Duration) -> Result<Self, MetadataError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

impl MetadataHttp for HttpMetadataClient {
    async fn probe(&self, url: &str) -> Result<bool, MetadataError> {
        let resp = self.client.head(url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, MetadataError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(MetadataError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    attributes: Vec<RawTrait>,
}

#[derive(Debug, Deserialize)]
struct RawTrait {
    #[serde(default)]
    trait_type: String,
    #[serde(default)]
    value: Value,
}

impl From<RawTrait> for Trait {
    fn from(raw: RawTrait) -> Self {
        // values are strings or numbers depending on the collection
        let value = match raw.value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Trait {
            trait_type: raw.trait_type,
            value,
        }
    }
}

/// Cached display data for one token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub image_url: Option<String>,
    pub traits: Vec<Trait>,
}

/// `ipfs://<cid>`, `ipfs://ipfs/<cid>` or `/ipfs/<cid>` → `<cid>`
pub fn content_hash(uri: &str) -> Option<&str> {
    if let Some(rest) = uri.strip_prefix("ipfs://") {
        return Some(rest.strip_prefix("ipfs/").unwrap_or(rest));
    }
    uri.strip_prefix("/ipfs/")
}

pub struct MetadataResolver<R, H> {
    rpc: Arc<R>,
    http: H,
    gateways: Vec<String>,
    probe_timeout: Duration,
    cache: Mutex<HashMap<(Address, U256), TokenMetadata>>,
}

impl<R: ChainRpc, H: MetadataHttp> MetadataResolver<R, H> {
    pub fn new(rpc: Arc<R>, http: H, gateways: Vec<String>, probe_timeout: Duration) -> Self {
        Self {
            rpc,
            http,
            gateways,
            probe_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &(Address, U256)) -> Option<TokenMetadata> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Display image for a token; `None` if its metadata could not be read
    pub async fn image_url(&self, contract: Address, token_id: U256) -> Option<String> {
        match self.lookup(contract, token_id).await {
            Ok(meta) => meta.image_url,
            Err(e) => {
                warn!("Error fetching NFT image for {} #{}: {}", contract, token_id, e);
                None
            }
        }
    }

    /// Trait list for a token; empty if its metadata could not be read
    pub async fn traits(&self, contract: Address, token_id: U256) -> Vec<Trait> {
        match self.lookup(contract, token_id).await {
            Ok(meta) => meta.traits,
            Err(e) => {
                warn!("Error fetching NFT traits for {} #{}: {}", contract, token_id, e);
                Vec::new()
            }
        }
    }

    pub fn cached_tokens(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn lookup(&self, contract: Address, token_id: U256) -> Result<TokenMetadata, MetadataError> {
        let key = (contract, token_id);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let meta = self.fetch_metadata(contract, token_id).await?;

        // failures never reach here, so a broken token is retried next sale
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, meta.clone());
        Ok(meta)
    }

    async fn fetch_metadata(&self, contract: Address, token_id: U256) -> Result<TokenMetadata, MetadataError> {
        let mut metadata_url = self.token_uri(contract, token_id).await?;
        if content_hash(&metadata_url).is_some() {
            metadata_url = self.resolve_content_uri(&metadata_url).await;
        }

        let doc = self.http.fetch_json(&metadata_url).await?;
        let raw: RawMetadata = serde_json::from_value(doc)?;

        let image_url = match raw.image {
            Some(image) if content_hash(&image).is_some() => Some(self.resolve_content_uri(&image).await),
            Some(image) if !image.is_empty() => Some(image),
            _ => None,
        };

        Ok(TokenMetadata {
            image_url,
            traits: raw.attributes.into_iter().map(Trait::from).collect(),
        })
    }

    async fn token_uri(&self, contract: Address, token_id: U256) -> Result<String, MetadataError> {
        let call = ITokenMetadata::tokenURICall { tokenId: token_id };
        let primary = match self.rpc.call(contract, call.abi_encode()).await {
            Ok(out) => ITokenMetadata::tokenURICall::abi_decode_returns(&out)
                .map_err(|e| format!("undecodable return: {e}")),
            Err(e) => Err(e.to_string()),
        };
        match primary {
            Ok(uri) => return Ok(uri),
            Err(reason) => debug!("tokenURI failed for #{} ({}), trying uri()", token_id, reason),
        }

        let call = ITokenMetadata::uriCall { id: token_id };
        let out = self
            .rpc
            .call(contract, call.abi_encode())
            .await
            .map_err(MetadataError::TokenUri)?;
        ITokenMetadata::uriCall::abi_decode_returns(&out)
            .map_err(|e| MetadataError::UriDecode(e.to_string()))
    }

    /// Map a content-addressed URI onto the first gateway that answers a
    /// probe, or onto the first gateway when none do. Other URIs pass through.
    pub async fn resolve_content_uri(&self, uri: &str) -> String {
        let Some(hash) = content_hash(uri) else {
            return uri.to_string();
        };

        for gateway in &self.gateways {
            let url = format!("{gateway}{hash}");
            match timeout(self.probe_timeout, self.http.probe(&url)).await {
                Ok(Ok(true)) => {
                    info!("Resolved IPFS URL using gateway: {}", gateway);
                    return url;
                }
                Ok(Ok(false)) => debug!("Gateway {} has no {}, trying next...", gateway, hash),
                Ok(Err(e)) => debug!("Gateway {} failed ({}), trying next...", gateway, e),
                Err(_) => debug!("Gateway {} timed out, trying next...", gateway),
            }
        }

        warn!("All gateways failed for {}, falling back to first gateway", hash);
        let first = self.gateways.first().map(String::as_str).unwrap_or("https://ipfs.io/ipfs/");
        format!("{first}{hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockHttp};
    use serde_json::json;

    const GATEWAYS: [&str; 5] = [
        "https://g1.test/ipfs/",
        "https://g2.test/ipfs/",
        "https://g3.test/ipfs/",
        "https://g4.test/ipfs/",
        "https://g5.test/ipfs/",
    ];

    fn resolver(chain: Arc<MockChain>, http: MockHttp) -> MetadataResolver<MockChain, MockHttp> {
        MetadataResolver::new(
            chain,
            http,
            GATEWAYS.iter().map(|g| g.to_string()).collect(),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn extracts_content_hash() {
        assert_eq!(content_hash("ipfs://QmAbc/1.json"), Some("QmAbc/1.json"));
        assert_eq!(content_hash("ipfs://ipfs/QmAbc"), Some("QmAbc"));
        assert_eq!(content_hash("/ipfs/QmAbc"), Some("QmAbc"));
        assert_eq!(content_hash("https://example.com/1.json"), None);
    }

    #[tokio::test]
    async fn third_gateway_wins_and_is_cached() {
        let chain = Arc::new(MockChain::default());
        let contract = Address::repeat_byte(0x11);
        chain.set_token_uri(7, "https://meta.test/7.json");

        let http = MockHttp::default();
        http.set_json("https://meta.test/7.json", json!({ "image": "ipfs://QmImage7" }));
        http.fail_probe("https://g1.test/ipfs/QmImage7");
        http.fail_probe("https://g2.test/ipfs/QmImage7");

        let resolver = resolver(chain, http.clone());
        let first = resolver.image_url(contract, U256::from(7)).await;
        assert_eq!(first.as_deref(), Some("https://g3.test/ipfs/QmImage7"));
        assert_eq!(http.probe_count(), 3);

        let again = resolver.image_url(contract, U256::from(7)).await;
        assert_eq!(again, first);
        assert_eq!(http.probe_count(), 3);
        assert_eq!(http.fetch_count(), 1);
    }

    #[tokio::test]
    async fn all_gateways_down_falls_back_to_first() {
        let chain = Arc::new(MockChain::default());
        let http = MockHttp::default();
        for g in GATEWAYS {
            http.fail_probe(&format!("{g}QmDead"));
        }
        let resolver = resolver(chain, http.clone());

        let url = resolver.resolve_content_uri("ipfs://QmDead").await;
        assert_eq!(url, "https://g1.test/ipfs/QmDead");
        assert_eq!(http.probe_count(), 5);
    }

    #[tokio::test]
    async fn hung_gateway_is_skipped() {
        let chain = Arc::new(MockChain::default());
        let http = MockHttp::default();
        http.hang_probe("https://g1.test/ipfs/QmSlow");
        let resolver = resolver(chain, http.clone());

        let url = resolver.resolve_content_uri("ipfs://QmSlow").await;
        assert_eq!(url, "https://g2.test/ipfs/QmSlow");
    }

    #[tokio::test]
    async fn undecodable_token_uri_falls_back_to_uri() {
        let chain = Arc::new(MockChain::default());
        chain.set_empty_token_uri(1);
        chain.set_uri_only(1, "https://meta.test/1.json");
        let http = MockHttp::default();
        http.set_json("https://meta.test/1.json", json!({ "image": "https://img.test/1.png" }));
        let resolver = resolver(chain.clone(), http);

        let image = resolver.image_url(Address::repeat_byte(0x22), U256::from(1)).await;
        assert_eq!(image.as_deref(), Some("https://img.test/1.png"));
        assert_eq!(chain.call_count(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_uri_and_reads_traits() {
        let chain = Arc::new(MockChain::default());
        chain.set_uri_only(3, "ipfs://QmMeta/3");
        let http = MockHttp::default();
        http.set_json(
            "https://g1.test/ipfs/QmMeta/3",
            json!({
                "image": "https://img.test/3.png",
                "attributes": [
                    { "trait_type": "Fur", "value": "Gold" },
                    { "trait_type": "Level", "value": 4 }
                ]
            }),
        );
        let resolver = resolver(chain.clone(), http.clone());

        let traits = resolver.traits(Address::repeat_byte(0x22), U256::from(3)).await;
        assert_eq!(
            traits,
            vec![
                Trait { trait_type: "Fur".into(), value: "Gold".into() },
                Trait { trait_type: "Level".into(), value: "4".into() },
            ]
        );
        // image comes from the same cached document
        let image = resolver.image_url(Address::repeat_byte(0x22), U256::from(3)).await;
        assert_eq!(image.as_deref(), Some("https://img.test/3.png"));
        assert_eq!(http.fetch_count(), 1);
        assert_eq!(chain.call_count(), 2);
    }

    #[tokio::test]
    async fn failures_are_empty_and_not_cached() {
        let chain = Arc::new(MockChain::default());
        chain.fail_calls();
        let resolver = resolver(chain, MockHttp::default());

        assert!(resolver.image_url(Address::ZERO, U256::from(1)).await.is_none());
        assert!(resolver.traits(Address::ZERO, U256::from(1)).await.is_empty());
        assert_eq!(resolver.cached_tokens(), 0);
    }
}
