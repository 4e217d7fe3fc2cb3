//! Cached USD price oracle for native and payment tokens.
//!
//! Settlement economics divide by these prices, so the oracle never returns
//! zero or non-finite values upward: every lookup degrades from live feed to
//! last-known cache entry to a static fallback, in that order. Testnets
//! (except Filecoin Calibration, whose FEVM gas regime needs real quotes)
//! short-circuit to static prices so demo payments run without a feed.
//!
//! The upstream feed is pluggable behind [`PriceFeed`]; the production
//! implementation is a plain HTTP GET, tests inject fakes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::OracleConfig;
use crate::network::Network;

/// Which price a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PriceKind {
    Native,
    PaymentToken,
}

/// Error from the upstream price feed.
#[derive(Debug, thiserror::Error)]
pub enum PriceFeedError {
    #[error("price feed request failed: {0}")]
    Request(String),
    #[error("price feed returned unusable value: {0}")]
    Unusable(f64),
}

/// Upstream quote source. `symbol` is a ticker like `ETH` or `USDC`.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn usd_price(&self, symbol: &str) -> Result<f64, PriceFeedError>;
}

/// HTTP price feed: `GET {base_url}?symbol=<SYMBOL>` returning `{"usd": <price>}`.
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        HttpPriceFeed { client, base_url }
    }
}

#[derive(serde::Deserialize)]
struct FeedQuote {
    usd: f64,
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn usd_price(&self, symbol: &str) -> Result<f64, PriceFeedError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| PriceFeedError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| PriceFeedError::Request(e.to_string()))?;
        let quote: FeedQuote = response
            .json()
            .await
            .map_err(|e| PriceFeedError::Request(e.to_string()))?;
        if !quote.usd.is_finite() || quote.usd <= 0.0 {
            return Err(PriceFeedError::Unusable(quote.usd));
        }
        Ok(quote.usd)
    }
}

/// Static fallback for a native token symbol.
fn static_native_usd(network: Network) -> f64 {
    match network.native_token() {
        "ETH" => 3000.0,
        "POL" => 0.5,
        "AVAX" => 30.0,
        "FIL" => 5.0,
        _ => 1.0,
    }
}

/// Payment tokens are USD stablecoins; the static fallback is parity.
const STATIC_TOKEN_USD: f64 = 1.0;

struct CacheEntry {
    value: f64,
    fetched_at: Instant,
}

/// Per-network USD price cache with TTL and background refresh.
pub struct PriceOracle {
    feed: Option<Arc<dyn PriceFeed>>,
    cache: DashMap<(Network, PriceKind), CacheEntry>,
    ttl: Duration,
    refresh_interval: Duration,
    enabled: bool,
}

impl PriceOracle {
    pub fn new(feed: Option<Arc<dyn PriceFeed>>, config: &OracleConfig) -> Self {
        PriceOracle {
            feed,
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.price_ttl_seconds),
            refresh_interval: Duration::from_secs(config.price_refresh_seconds),
            enabled: config.price_enabled,
        }
    }

    /// USD price of the network's native token. Never `<= 0` or non-finite.
    pub async fn native_usd(&self, network: Network) -> f64 {
        self.lookup(network, PriceKind::Native).await
    }

    /// USD price of the network's default payment token.
    pub async fn token_usd(&self, network: Network) -> f64 {
        self.lookup(network, PriceKind::PaymentToken).await
    }

    /// Drop every cached entry. Exposed for the shutdown path and tests.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn symbol(network: Network, kind: PriceKind) -> &'static str {
        match kind {
            PriceKind::Native => network.native_token(),
            PriceKind::PaymentToken => "USDC",
        }
    }

    fn static_price(network: Network, kind: PriceKind) -> f64 {
        match kind {
            PriceKind::Native => static_native_usd(network),
            PriceKind::PaymentToken => STATIC_TOKEN_USD,
        }
    }

    async fn lookup(&self, network: Network, kind: PriceKind) -> f64 {
        // Demo chains run on static quotes; Filecoin Calibration is the
        // exception because FEVM settlements are priced for real.
        if network.is_testnet() && network != Network::FilecoinCalibration {
            return Self::static_price(network, kind);
        }
        let feed = match (&self.feed, self.enabled) {
            (Some(feed), true) => Arc::clone(feed),
            _ => return Self::static_price(network, kind),
        };

        if let Some(entry) = self.cache.get(&(network, kind)) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.value;
            }
        }

        match self.fetch(&feed, network, kind).await {
            Some(value) => value,
            None => {
                // Serve the stale entry if we ever had one; static otherwise.
                match self.cache.get(&(network, kind)) {
                    Some(stale) => {
                        tracing::warn!(
                            network = %network,
                            value = stale.value,
                            "price feed unavailable, serving stale quote"
                        );
                        stale.value
                    }
                    None => {
                        tracing::warn!(
                            network = %network,
                            "price feed unavailable, serving static fallback"
                        );
                        Self::static_price(network, kind)
                    }
                }
            }
        }
    }

    /// Fetch from the feed with one inline retry; only read paths retry.
    /// Returns `None` when both attempts fail.
    async fn fetch(
        &self,
        feed: &Arc<dyn PriceFeed>,
        network: Network,
        kind: PriceKind,
    ) -> Option<f64> {
        let symbol = Self::symbol(network, kind);
        for attempt in 0..2u8 {
            match feed.usd_price(symbol).await {
                Ok(value) if value.is_finite() && value > 0.0 => {
                    self.cache.insert(
                        (network, kind),
                        CacheEntry {
                            value,
                            fetched_at: Instant::now(),
                        },
                    );
                    return Some(value);
                }
                Ok(value) => {
                    tracing::warn!(symbol, value, "price feed returned unusable quote");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(symbol, attempt, error = %e, "price fetch failed");
                }
            }
        }
        None
    }

    /// Spawn the background refresher that keeps entries warm for the given
    /// networks until `cancel` fires.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        networks: Vec<Network>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let oracle = Arc::clone(self);
        tokio::spawn(async move {
            if oracle.refresh_interval.is_zero() || !oracle.enabled {
                return;
            }
            let mut ticker = tokio::time::interval(oracle.refresh_interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for network in &networks {
                            // Touching both kinds repopulates expired entries.
                            let _ = oracle.native_usd(*network).await;
                            let _ = oracle.token_usd(*network).await;
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!("Stopping price refresher");
                        oracle.clear();
                        break;
                    }
                }
            }
        })
    }
}
