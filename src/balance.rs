//! Cached ERC-20 balance checks.
//!
//! Consulted twice per settlement: once during verification and once
//! defensively just before submission. The cache TTL is short because
//! balances move; a stale positive only costs a reverted simulation.
//!
//! A checker *failure* (RPC trouble) is reported as such and never turned
//! into an `insufficient_funds` verdict — a broken endpoint must not block
//! payments that would otherwise verify.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::chain::{ChainError, SettlementChain};
use crate::config::BalanceConfig;
use crate::network::Network;

/// Result of one balance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCheck {
    pub has_sufficient: bool,
    pub balance: U256,
    pub required: U256,
    /// Whether the balance came from cache rather than a live read.
    pub cached: bool,
}

struct CacheEntry {
    balance: U256,
    fetched_at: Instant,
}

/// Short-TTL cache over ERC-20 `balanceOf` reads.
pub struct BalanceChecker {
    cache: DashMap<(Network, Address, Address), CacheEntry>,
    ttl: Duration,
}

impl BalanceChecker {
    pub fn new(config: &BalanceConfig) -> Self {
        BalanceChecker {
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.cache_ttl_seconds),
        }
    }

    /// Check whether `payer` holds at least `required` of `token`.
    ///
    /// Reads retry once inline; a final failure propagates as
    /// [`ChainError`] for the caller to swallow or surface per its own
    /// policy.
    pub async fn check_balance(
        &self,
        chain: &dyn SettlementChain,
        payer: Address,
        token: Address,
        required: U256,
        network: Network,
    ) -> Result<BalanceCheck, ChainError> {
        let key = (network, payer, token);
        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(BalanceCheck {
                    has_sufficient: entry.balance >= required,
                    balance: entry.balance,
                    required,
                    cached: true,
                });
            }
        }

        let mut last_err = None;
        for attempt in 0..2u8 {
            match chain.balance_of(token, payer).await {
                Ok(balance) => {
                    self.cache.insert(
                        key,
                        CacheEntry {
                            balance,
                            fetched_at: Instant::now(),
                        },
                    );
                    return Ok(BalanceCheck {
                        has_sufficient: balance >= required,
                        balance,
                        required,
                        cached: false,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        network = %network,
                        payer = %payer,
                        attempt,
                        error = %e,
                        "balance read failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ChainError::RpcProvider("balance read failed".into())))
    }

    /// Drop every cached entry. Exposed for the shutdown path and tests.
    pub fn clear(&self) {
        self.cache.clear();
    }
}
