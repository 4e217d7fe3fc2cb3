//! Cached gas-price oracle.
//!
//! Samples `eth_gasPrice` per network through the chain client and caches
//! the result with a short TTL, with the same degradation order as the price
//! oracle: live sample, last-known entry, static fallback. Sampled prices
//! are clamped to a configured floor; some endpoints report zero between
//! blocks and a zero gas price would collapse the fee economics downstream.
//!
//! Consumed only by the fee & gas-limit engine.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain::ChainMap;
use crate::config::OracleConfig;
use crate::network::Network;

struct CacheEntry {
    price: u128,
    fetched_at: Instant,
}

/// Per-network gas price cache.
pub struct GasOracle {
    chains: Arc<ChainMap>,
    cache: DashMap<Network, CacheEntry>,
    ttl: Duration,
    enabled: bool,
    floor_wei: u128,
    fallback_wei: u128,
}

impl GasOracle {
    pub fn new(chains: Arc<ChainMap>, config: &OracleConfig) -> Self {
        GasOracle {
            chains,
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.gas_ttl_seconds),
            enabled: config.gas_enabled,
            floor_wei: config.gas_floor_wei,
            fallback_wei: config.gas_fallback_wei,
        }
    }

    /// Current gas price for `network` in wei, clamped to the floor.
    pub async fn gas_price(&self, network: Network) -> u128 {
        if !self.enabled {
            return self.fallback_wei.max(self.floor_wei);
        }

        if let Some(entry) = self.cache.get(&network) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.price;
            }
        }

        match self.sample(network).await {
            Some(price) => {
                let clamped = price.max(self.floor_wei);
                if clamped != price {
                    tracing::debug!(
                        network = %network,
                        sampled = price,
                        floor = self.floor_wei,
                        "gas price clamped to floor"
                    );
                }
                self.cache.insert(
                    network,
                    CacheEntry {
                        price: clamped,
                        fetched_at: Instant::now(),
                    },
                );
                clamped
            }
            None => match self.cache.get(&network) {
                Some(stale) => {
                    tracing::warn!(
                        network = %network,
                        price = stale.price,
                        "gas sampling failed, serving stale price"
                    );
                    stale.price
                }
                None => {
                    tracing::warn!(
                        network = %network,
                        fallback = self.fallback_wei,
                        "gas sampling failed, serving static fallback"
                    );
                    self.fallback_wei.max(self.floor_wei)
                }
            },
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// One sample with a single inline retry; reads are safe to retry.
    async fn sample(&self, network: Network) -> Option<u128> {
        let chain = self.chains.by_network(network)?;
        for attempt in 0..2u8 {
            match chain.gas_price().await {
                Ok(price) => return Some(price),
                Err(e) => {
                    tracing::debug!(network = %network, attempt, error = %e, "gas sample failed");
                }
            }
        }
        None
    }
}
