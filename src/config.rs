//! Configuration file parsing for facilitator tunables.
//!
//! This module handles loading and parsing the `config.toml` file for
//! oracle TTLs, fee-engine constants, signer-pool behavior, and per-chain
//! transaction timeouts. Secrets (RPC URLs, signer keys) never live here;
//! they come from the environment via [`crate::from_env`].
//!
//! Configuration is optional and every section defaults to values that run a
//! demo facilitator out of the box.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Complete facilitator configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FacilitatorConfig {
    pub oracle: OracleConfig,
    pub fees: FeeConfig,
    pub signer_pool: SignerPoolConfig,
    pub balance: BalanceConfig,
    pub transaction: TransactionConfig,
    pub request: RequestConfig,
    pub cors: CorsConfig,
}

impl FacilitatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(config_path)
    }
}

/// Price and gas oracle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Enable live USD price lookups. When disabled, static fallbacks apply.
    pub price_enabled: bool,
    /// TTL for cached USD prices in seconds.
    pub price_ttl_seconds: u64,
    /// Background refresh interval in seconds. Zero disables the refresher.
    pub price_refresh_seconds: u64,
    /// Base URL of the price feed. The feed contract is
    /// `GET {url}?symbol=<SYMBOL>` returning `{"usd": <price>}`.
    pub price_feed_url: Option<String>,
    /// Enable live gas-price sampling. When disabled, static fallbacks apply.
    pub gas_enabled: bool,
    /// TTL for cached gas prices in seconds.
    pub gas_ttl_seconds: u64,
    /// Floor for sampled gas prices in wei. Guards against RPC endpoints
    /// reporting zero during congestion lulls.
    pub gas_floor_wei: u128,
    /// Static fallback gas price in wei used when sampling fails.
    pub gas_fallback_wei: u128,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            price_enabled: true,
            price_ttl_seconds: 60,
            price_refresh_seconds: 45,
            price_feed_url: None,
            gas_enabled: true,
            gas_ttl_seconds: 15,
            gas_floor_wei: 100_000_000, // 0.1 gwei
            gas_fallback_wei: 20_000_000_000, // 20 gwei
        }
    }
}

/// Fee-engine constants. The defaults are tuned for USDC-like 6-decimal
/// payment tokens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Baseline gas for a router settlement with no hook overhead.
    pub min_gas_limit: u64,
    /// Hard ceiling defending against adversarial hooks.
    pub max_gas_limit: u64,
    /// Multiplier applied to estimated settlement cost when quoting fees.
    pub safety_multiplier: f64,
    /// Fraction of the facilitator fee reserved as profit when bounding gas.
    pub profit_margin: f64,
    /// Minimum fee in USD on testnets.
    pub min_fee_usd_testnet: f64,
    /// Minimum fee in USD on mainnets.
    pub min_fee_usd_mainnet: f64,
    /// Reject hooks that are not in the network's hook registry.
    pub hook_whitelist_enabled: bool,
    /// Lift the single-asset restriction and accept any address listed in
    /// the network's `supported_assets`. Off by default: the broader set has
    /// not been audited for fee-quoting correctness.
    pub allow_any_supported_asset: bool,
    /// Per-network minimum gas limit overrides, keyed by network name.
    #[serde(default)]
    pub network_min_gas_limit: HashMap<String, u64>,
    /// Per-hook-kind gas overhead added on top of the base settlement.
    pub hook_gas_overhead: HookGasOverhead,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            min_gas_limit: 130_000,
            max_gas_limit: 3_000_000,
            safety_multiplier: 1.2,
            profit_margin: 0.10,
            min_fee_usd_testnet: 0.001,
            min_fee_usd_mainnet: 0.01,
            hook_whitelist_enabled: false,
            allow_any_supported_asset: false,
            network_min_gas_limit: HashMap::new(),
            hook_gas_overhead: HookGasOverhead::default(),
        }
    }
}

/// Gas overhead per hook kind, added after the economic bound is computed so
/// the hook has headroom once base settlement is paid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HookGasOverhead {
    pub transfer: u64,
    pub split: u64,
    pub mint: u64,
    pub reward: u64,
}

impl Default for HookGasOverhead {
    fn default() -> Self {
        Self {
            transfer: 45_000,
            split: 90_000,
            mint: 160_000,
            reward: 70_000,
        }
    }
}

/// Signer pool behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignerPoolConfig {
    /// How long `acquire` waits for a free key before failing the settlement.
    pub acquire_timeout_seconds: u64,
    /// Consecutive failures before a key is quarantined.
    pub quarantine_threshold: u32,
    /// Quarantine cooldown in seconds.
    pub quarantine_cooldown_seconds: u64,
}

impl Default for SignerPoolConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_seconds: 10,
            quarantine_threshold: 3,
            quarantine_cooldown_seconds: 30,
        }
    }
}

/// Balance-checker cache behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// TTL for cached balances in seconds. Short: balances move.
    pub cache_ttl_seconds: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 5,
        }
    }
}

/// Chain-specific configuration for transaction timeouts and block times.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// Average block time for this chain in seconds.
    pub block_time_seconds: u64,
    /// Number of blocks to wait when polling for transaction receipt.
    /// Receipt timeout = block_time_seconds * receipt_timeout_blocks.
    pub receipt_timeout_blocks: u64,
    /// Timeout for individual RPC requests in seconds.
    pub rpc_request_timeout_seconds: u64,
}

impl ChainConfig {
    /// Get the total receipt timeout duration.
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.block_time_seconds * self.receipt_timeout_blocks)
    }

    /// Get the RPC request timeout duration.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_request_timeout_seconds)
    }
}

/// Transaction-related configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Default RPC request timeout in seconds, used when no chain-specific
    /// configuration is provided.
    pub default_rpc_timeout_seconds: u64,
    /// HTTP connection establishment timeout in seconds.
    pub connection_timeout_seconds: u64,
    /// Default receipt timeout in seconds for unconfigured chains.
    pub default_receipt_timeout_seconds: u64,
    /// Per-chain configuration overrides, keyed by network name.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_rpc_timeout_seconds: 30,
            connection_timeout_seconds: 10,
            default_receipt_timeout_seconds: 120,
            chains: HashMap::new(),
        }
    }
}

impl TransactionConfig {
    /// Effective RPC timeout for a network.
    pub fn rpc_timeout_for(&self, network: &str) -> Duration {
        self.chains
            .get(network)
            .map(|c| c.rpc_timeout())
            .unwrap_or(Duration::from_secs(self.default_rpc_timeout_seconds))
    }

    /// Effective receipt timeout for a network.
    pub fn receipt_timeout_for(&self, network: &str) -> Duration {
        self.chains
            .get(network)
            .map(|c| c.receipt_timeout())
            .unwrap_or(Duration::from_secs(self.default_receipt_timeout_seconds))
    }
}

/// Request validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum request body size in bytes (default 1MB).
    pub max_body_size_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_body_size_bytes: 1_048_576, // 1MB
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// List of allowed origins. Empty list means allow all (*).
    pub allowed_origins: Vec<String>,
}
