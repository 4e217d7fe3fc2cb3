//! Per-chain rotating pool of privileged signers.
//!
//! Every settlement borrows exactly one key for the duration of its on-chain
//! work. Leases are exclusive: a key is used by at most one in-flight
//! transaction at any time, which is the single enforcement point for
//! per-key nonce discipline — callers never set transaction nonces.
//!
//! When every key is leased, `acquire` suspends in a FIFO queue until a key
//! is released or the configured timeout fires. Keys that fail consecutively
//! are quarantined for a cooldown window before re-entering rotation.

use alloy::primitives::Address;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, timeout};

use crate::config::SignerPoolConfig;
use crate::network::Network;

/// How a settlement attempt ended, reported on lease release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The transaction confirmed (or the lease did its read-only job).
    Success,
    /// The attempt failed in a way that implicates the key (submission
    /// error, receipt timeout). Counts toward quarantine.
    Failure,
    /// The attempt was abandoned before the key mattered (pre-submit
    /// validation failure, caller cancelled). Does not count.
    Aborted,
}

/// Error from [`SignerPool::acquire`].
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("no signers configured for {0}")]
    NotConfigured(Network),
    #[error("no signer available for {0} within {1:?}")]
    Timeout(Network, Duration),
}

struct KeyState {
    address: Address,
    leased: bool,
    consecutive_failures: u32,
    quarantined_until: Option<Instant>,
}

struct PoolState {
    keys: Vec<KeyState>,
    /// FIFO queue of suspended `acquire` calls. Entries whose receiver was
    /// dropped (timeout) are skipped at hand-over time.
    waiters: VecDeque<oneshot::Sender<usize>>,
}

struct NetworkPool {
    network: Network,
    state: Mutex<PoolState>,
    quarantine_threshold: u32,
    quarantine_cooldown: Duration,
}

impl NetworkPool {
    /// Find a leasable key: not leased, not quarantined (expired quarantine
    /// is lifted here).
    fn try_lease(&self) -> Option<(usize, Address)> {
        let mut state = self.state.lock().expect("signer pool poisoned");
        let now = Instant::now();
        for (index, key) in state.keys.iter_mut().enumerate() {
            if key.leased {
                continue;
            }
            if let Some(until) = key.quarantined_until {
                if now < until {
                    continue;
                }
                tracing::info!(
                    network = %self.network,
                    signer = %key.address,
                    "quarantine expired, key back in rotation"
                );
                key.quarantined_until = None;
                key.consecutive_failures = 0;
            }
            key.leased = true;
            return Some((index, key.address));
        }
        None
    }

    fn enqueue_waiter(&self) -> oneshot::Receiver<usize> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().expect("signer pool poisoned");
        state.waiters.push_back(tx);
        rx
    }

    fn release(&self, index: usize, outcome: LeaseOutcome) {
        let mut state = self.state.lock().expect("signer pool poisoned");
        let threshold = self.quarantine_threshold;
        let cooldown = self.quarantine_cooldown;

        let (quarantined, address) = {
            let key = &mut state.keys[index];
            match outcome {
                LeaseOutcome::Success => {
                    key.consecutive_failures = 0;
                }
                LeaseOutcome::Failure => {
                    key.consecutive_failures += 1;
                    if threshold > 0 && key.consecutive_failures >= threshold {
                        key.quarantined_until = Some(Instant::now() + cooldown);
                    }
                }
                LeaseOutcome::Aborted => {}
            }
            (key.quarantined_until.is_some(), key.address)
        };

        if quarantined {
            tracing::warn!(
                network = %self.network,
                signer = %address,
                cooldown_secs = cooldown.as_secs(),
                "signer quarantined after consecutive failures"
            );
            state.keys[index].leased = false;
            return;
        }

        // Hand the key to the oldest live waiter; the key stays leased
        // through the hand-over so no third party can steal it.
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(index).is_ok() {
                return;
            }
        }
        state.keys[index].leased = false;
    }
}

/// An exclusive right to use one private key for one settlement attempt.
///
/// Dropping the lease without an explicit [`SignerLease::release`] records
/// [`LeaseOutcome::Aborted`], so cancelled requests return their key without
/// penalizing it.
pub struct SignerLease {
    pool: Arc<NetworkPool>,
    index: usize,
    address: Address,
    released: bool,
}

impl SignerLease {
    /// The EVM account this lease pins.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn network(&self) -> Network {
        self.pool.network
    }

    /// Record the settlement outcome and return the key to the pool.
    pub fn release(mut self, outcome: LeaseOutcome) {
        self.released = true;
        self.pool.release(self.index, outcome);
    }
}

impl Drop for SignerLease {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release(self.index, LeaseOutcome::Aborted);
        }
    }
}

/// The process-wide signer pool, one sub-pool per configured network.
pub struct SignerPool {
    pools: HashMap<Network, Arc<NetworkPool>>,
    acquire_timeout: Duration,
}

impl SignerPool {
    pub fn new(keys_by_network: HashMap<Network, Vec<Address>>, config: &SignerPoolConfig) -> Self {
        let quarantine_cooldown = Duration::from_secs(config.quarantine_cooldown_seconds);
        let pools = keys_by_network
            .into_iter()
            .filter(|(_, addresses)| !addresses.is_empty())
            .map(|(network, addresses)| {
                tracing::info!(
                    network = %network,
                    signers = addresses.len(),
                    "signer pool initialized"
                );
                let keys = addresses
                    .into_iter()
                    .map(|address| KeyState {
                        address,
                        leased: false,
                        consecutive_failures: 0,
                        quarantined_until: None,
                    })
                    .collect();
                (
                    network,
                    Arc::new(NetworkPool {
                        network,
                        state: Mutex::new(PoolState {
                            keys,
                            waiters: VecDeque::new(),
                        }),
                        quarantine_threshold: config.quarantine_threshold,
                        quarantine_cooldown,
                    }),
                )
            })
            .collect();
        SignerPool {
            pools,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds),
        }
    }

    /// Networks with at least one key.
    pub fn configured_networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.pools.keys().copied().collect();
        networks.sort_by_key(|n| n.to_string());
        networks
    }

    /// Acquire an exclusive lease on a signer for `network`.
    ///
    /// Suspends FIFO behind earlier callers when every key is busy; fails
    /// with [`AcquireError::Timeout`] when the bounded wait elapses.
    pub async fn acquire(&self, network: Network) -> Result<SignerLease, AcquireError> {
        let pool = self
            .pools
            .get(&network)
            .ok_or(AcquireError::NotConfigured(network))?;

        if let Some((index, address)) = pool.try_lease() {
            return Ok(SignerLease {
                pool: Arc::clone(pool),
                index,
                address,
                released: false,
            });
        }

        let rx = pool.enqueue_waiter();
        match timeout(self.acquire_timeout, rx).await {
            Ok(Ok(index)) => {
                let address = {
                    let state = pool.state.lock().expect("signer pool poisoned");
                    state.keys[index].address
                };
                Ok(SignerLease {
                    pool: Arc::clone(pool),
                    index,
                    address,
                    released: false,
                })
            }
            // Sender dropped without a hand-over: the pool shut down.
            Ok(Err(_)) => Err(AcquireError::NotConfigured(network)),
            Err(_) => Err(AcquireError::Timeout(network, self.acquire_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn addresses(n: u8) -> Vec<Address> {
        (1..=n)
            .map(|i| {
                let mut bytes = [0u8; 20];
                bytes[19] = i;
                Address::from(bytes)
            })
            .collect()
    }

    fn pool_with(n_keys: u8, config: SignerPoolConfig) -> SignerPool {
        let mut keys = HashMap::new();
        keys.insert(Network::Sepolia, addresses(n_keys));
        SignerPool::new(keys, &config)
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let pool = pool_with(1, SignerPoolConfig::default());
        let lease = pool.acquire(Network::Sepolia).await.unwrap();

        // The only key is out: a second acquire must not obtain it
        // synchronously.
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            pool.acquire(Network::Sepolia),
        )
        .await;
        assert!(second.is_err(), "second lease handed out while first held");

        lease.release(LeaseOutcome::Success);
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Success);
    }

    #[tokio::test]
    async fn test_waiters_are_fifo() {
        let pool = Arc::new(pool_with(1, SignerPoolConfig::default()));
        let lease = pool.acquire(Network::Sepolia).await.unwrap();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel::<u8>();

        let pool_a = Arc::clone(&pool);
        let tx_a = order_tx.clone();
        let waiter_a = tokio::spawn(async move {
            let lease = pool_a.acquire(Network::Sepolia).await.unwrap();
            tx_a.send(1).unwrap();
            lease.release(LeaseOutcome::Success);
        });
        // Make sure A queues before B.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pool_b = Arc::clone(&pool);
        let tx_b = order_tx;
        let waiter_b = tokio::spawn(async move {
            let lease = pool_b.acquire(Network::Sepolia).await.unwrap();
            tx_b.send(2).unwrap();
            lease.release(LeaseOutcome::Success);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        lease.release(LeaseOutcome::Success);
        waiter_a.await.unwrap();
        waiter_b.await.unwrap();

        assert_eq!(order_rx.recv().await, Some(1));
        assert_eq!(order_rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let config = SignerPoolConfig {
            acquire_timeout_seconds: 1,
            ..SignerPoolConfig::default()
        };
        let pool = pool_with(1, config);
        let _lease = pool.acquire(Network::Sepolia).await.unwrap();

        let result = pool.acquire(Network::Sepolia).await;
        assert!(matches!(result, Err(AcquireError::Timeout(..))));
    }

    #[tokio::test]
    async fn test_unconfigured_network() {
        let pool = pool_with(1, SignerPoolConfig::default());
        let result = pool.acquire(Network::Base).await;
        assert!(matches!(result, Err(AcquireError::NotConfigured(..))));
    }

    #[tokio::test]
    async fn test_empty_key_list_not_registered() {
        let mut keys = HashMap::new();
        keys.insert(Network::Sepolia, Vec::new());
        let pool = SignerPool::new(keys, &SignerPoolConfig::default());
        assert!(pool.configured_networks().is_empty());
    }

    #[tokio::test]
    async fn test_quarantine_after_consecutive_failures() {
        let config = SignerPoolConfig {
            acquire_timeout_seconds: 1,
            quarantine_threshold: 2,
            quarantine_cooldown_seconds: 3600,
        };
        let pool = pool_with(1, config);

        for _ in 0..2 {
            let lease = pool.acquire(Network::Sepolia).await.unwrap();
            lease.release(LeaseOutcome::Failure);
        }

        // Both failures consumed: the key is cooling down.
        let result = pool.acquire(Network::Sepolia).await;
        assert!(matches!(result, Err(AcquireError::Timeout(..))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let config = SignerPoolConfig {
            acquire_timeout_seconds: 1,
            quarantine_threshold: 2,
            quarantine_cooldown_seconds: 3600,
        };
        let pool = pool_with(1, config);

        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Failure);
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Success);
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Failure);

        // One failure since the success: still in rotation.
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quarantine_cooldown_expires() {
        let config = SignerPoolConfig {
            acquire_timeout_seconds: 1,
            quarantine_threshold: 1,
            quarantine_cooldown_seconds: 30,
        };
        let pool = pool_with(1, config);

        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Failure);

        // Quarantined: nothing available.
        assert!(pool.acquire(Network::Sepolia).await.is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Success);
    }

    #[tokio::test]
    async fn test_dropped_lease_returns_key_without_penalty() {
        let config = SignerPoolConfig {
            acquire_timeout_seconds: 1,
            quarantine_threshold: 1,
            quarantine_cooldown_seconds: 3600,
        };
        let pool = pool_with(1, config);

        {
            let _lease = pool.acquire(Network::Sepolia).await.unwrap();
            // Dropped here: records Aborted, not Failure.
        }

        // Key is back and unquarantined despite threshold 1.
        let lease = pool.acquire(Network::Sepolia).await.unwrap();
        lease.release(LeaseOutcome::Success);
    }

    #[tokio::test]
    async fn test_two_keys_serve_two_concurrent_leases() {
        let pool = pool_with(2, SignerPoolConfig::default());
        let a = pool.acquire(Network::Sepolia).await.unwrap();
        let b = pool.acquire(Network::Sepolia).await.unwrap();
        assert_ne!(a.address(), b.address());
        a.release(LeaseOutcome::Success);
        b.release(LeaseOutcome::Success);
    }
}
