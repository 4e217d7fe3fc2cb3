//! Fee and gas-limit economics.
//!
//! Two decisions are made here: the minimum facilitator fee worth accepting
//! for a settlement, and the gas ceiling granted to the submitted
//! transaction. Both derive from live gas prices and USD quotes, bounded so
//! that a hostile hook cannot burn more gas than the signed fee pays for.
//!
//! The Filecoin FEVM family bypasses the economics entirely: USDC on FEVM
//! executes through a delegatecall proxy, making every authorization check
//! and transfer multiples more expensive, so those networks run with a
//! hard-coded 150M gas floor and ceiling.

use alloy::primitives::{Address, U256};
use std::sync::Arc;

use crate::config::FeeConfig;
use crate::gas::GasOracle;
use crate::network::{HookKind, Network, NetworkRegistry, UnsupportedNetworkError};
use crate::price::PriceOracle;

/// Fixed gas bound for FEVM networks.
pub const FEVM_GAS_LIMIT: u64 = 150_000_000;

/// A quoted minimum fee in both token base units and USD.
#[derive(Debug, Clone, PartialEq)]
pub struct MinFee {
    pub base_units: U256,
    pub usd: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("hook {hook} is not whitelisted on {network}")]
    HookNotAllowed { network: Network, hook: Address },
    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetworkError),
}

/// Computes fee quotes and transaction gas ceilings.
pub struct FeeEngine {
    config: FeeConfig,
    registry: Arc<NetworkRegistry>,
    price_oracle: Arc<PriceOracle>,
    gas_oracle: Arc<GasOracle>,
}

impl FeeEngine {
    pub fn new(
        config: FeeConfig,
        registry: Arc<NetworkRegistry>,
        price_oracle: Arc<PriceOracle>,
        gas_oracle: Arc<GasOracle>,
    ) -> Self {
        FeeEngine {
            config,
            registry,
            price_oracle,
            gas_oracle,
        }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Gas overhead granted to a hook kind on top of base settlement.
    pub fn hook_overhead(&self, kind: HookKind) -> u64 {
        match kind {
            HookKind::Transfer => self.config.hook_gas_overhead.transfer,
            HookKind::Split => self.config.hook_gas_overhead.split,
            HookKind::Mint => self.config.hook_gas_overhead.mint,
            HookKind::Reward => self.config.hook_gas_overhead.reward,
        }
    }

    /// The per-network minimum gas limit: operator override or the global
    /// baseline.
    fn min_gas_limit_for(&self, network: Network) -> u64 {
        self.config
            .network_min_gas_limit
            .get(&network.to_string())
            .copied()
            .unwrap_or(self.config.min_gas_limit)
    }

    /// The minimum facilitator fee accepted for settling through `hook` on
    /// `network`, in token base units and USD.
    ///
    /// Cost model: hook-specific gas limit × current gas price × safety
    /// multiplier, converted to USD, raised to the per-environment floor
    /// (testnet $0.001, mainnet $0.01), then divided by the payment token's
    /// USD price.
    pub async fn min_facilitator_fee(
        &self,
        network: Network,
        hook: Address,
        token_decimals: u8,
    ) -> Result<MinFee, FeeError> {
        let config = self.registry.get(network)?;
        if self.config.hook_whitelist_enabled && !config.hooks.contains(hook) {
            return Err(FeeError::HookNotAllowed { network, hook });
        }
        let kind = config.hooks.kind_of(hook).unwrap_or_default();

        let gas_limit = if network.is_fevm() {
            FEVM_GAS_LIMIT
        } else {
            self.min_gas_limit_for(network) + self.hook_overhead(kind)
        };

        let gas_price = self.gas_oracle.gas_price(network).await;
        let native_usd = self.price_oracle.native_usd(network).await;
        let token_usd = self.price_oracle.token_usd(network).await;

        let cost_native = (gas_limit as f64) * (gas_price as f64) / 1e18;
        let cost_usd = cost_native * native_usd * self.config.safety_multiplier;

        let floor_usd = if network.is_testnet() {
            self.config.min_fee_usd_testnet
        } else {
            self.config.min_fee_usd_mainnet
        };
        let fee_usd = cost_usd.max(floor_usd);

        let base_units_f = (fee_usd / token_usd * 10f64.powi(token_decimals as i32)).ceil();
        let base_units = U256::from(base_units_f.max(0.0) as u128);

        tracing::debug!(
            network = %network,
            hook = %hook,
            hook_kind = ?kind,
            gas_limit,
            gas_price,
            fee_usd,
            base_units = %base_units,
            "quoted minimum facilitator fee"
        );

        Ok(MinFee {
            base_units,
            usd: fee_usd,
        })
    }

    /// The gas ceiling for a settlement transaction, before hook overhead.
    ///
    /// Three simultaneous constraints:
    /// - a minimum: the transaction must run at all (per-network override
    ///   permitted),
    /// - a maximum: defence against adversarial hooks,
    /// - affordability: `fee_usd × (1 − margin) / native_usd × 1e18 / gas_price`.
    ///
    /// The result is `max(min, min(maximum, affordability))`. A non-finite or
    /// non-positive native price collapses to the minimum, which is the safe
    /// side. FEVM networks return the fixed bound and skip the economics.
    pub fn effective_gas_limit(
        &self,
        network: Network,
        facilitator_fee: U256,
        gas_price: u128,
        native_usd: f64,
        token_usd: f64,
        token_decimals: u8,
    ) -> u64 {
        if network.is_fevm() {
            return FEVM_GAS_LIMIT;
        }

        let min = self.min_gas_limit_for(network);
        let max = self.config.max_gas_limit;

        if !(native_usd.is_finite() && native_usd > 0.0) || gas_price == 0 {
            return min;
        }

        let fee_base_units: u128 = facilitator_fee.try_into().unwrap_or(u128::MAX);
        let fee_units = (fee_base_units as f64) / 10f64.powi(token_decimals as i32);
        let fee_usd = fee_units * token_usd;
        let spendable_usd = fee_usd * (1.0 - self.config.profit_margin);
        let affordable = spendable_usd / native_usd * 1e18 / (gas_price as f64);
        let affordable = if affordable.is_finite() && affordable > 0.0 {
            affordable.min(u64::MAX as f64) as u64
        } else {
            0
        };

        min.max(max.min(affordable))
    }

    /// The ceiling actually handed to the signer: the effective limit plus
    /// the hook's overhead, so the hook has headroom once base settlement is
    /// paid. FEVM networks stay pinned to the fixed bound.
    pub fn gas_limit_for_hook(
        &self,
        network: Network,
        hook_kind: HookKind,
        facilitator_fee: U256,
        gas_price: u128,
        native_usd: f64,
        token_usd: f64,
        token_decimals: u8,
    ) -> u64 {
        if network.is_fevm() {
            return FEVM_GAS_LIMIT;
        }
        let base = self.effective_gas_limit(
            network,
            facilitator_fee,
            gas_price,
            native_usd,
            token_usd,
            token_decimals,
        );
        base + self.hook_overhead(hook_kind)
    }
}
