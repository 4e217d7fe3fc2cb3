//! Network definitions and the per-chain configuration registry.
//!
//! This module defines the supported EVM networks, their chain IDs and
//! default EIP-3009 assets, the per-network hook registry, and the router
//! whitelist. The registry is assembled once at startup and frozen; every
//! lookup after init is a read against immutable data.

use alloy::primitives::{Address, address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Supported blockchain networks.
///
/// All variants are EVM chains; non-EVM settlement is out of scope. The
/// Filecoin pair forms the FEVM family, which carries its own gas regime
/// (see [`Network::is_fevm`]).
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum Sepolia testnet (chain ID 11155111).
    #[serde(rename = "sepolia")]
    Sepolia,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    /// Avalanche C-Chain mainnet (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    /// Filecoin FEVM mainnet (chain ID 314).
    #[serde(rename = "filecoin")]
    Filecoin,
    /// Filecoin Calibration testnet (chain ID 314159).
    #[serde(rename = "filecoin-calibration")]
    FilecoinCalibration,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Sepolia => write!(f, "sepolia"),
            Network::Base => write!(f, "base"),
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Polygon => write!(f, "polygon"),
            Network::PolygonAmoy => write!(f, "polygon-amoy"),
            Network::Avalanche => write!(f, "avalanche"),
            Network::AvalancheFuji => write!(f, "avalanche-fuji"),
            Network::Filecoin => write!(f, "filecoin"),
            Network::FilecoinCalibration => write!(f, "filecoin-calibration"),
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Sepolia,
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Filecoin,
            Network::FilecoinCalibration,
        ]
    }

    /// Numeric chain id used in transactions and EIP-712 domains.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Sepolia => 11155111,
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
            Network::Filecoin => 314,
            Network::FilecoinCalibration => 314159,
        }
    }

    /// Attempts to create a Network from an EVM chain ID.
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Network::variants()
            .iter()
            .copied()
            .find(|n| n.chain_id() == chain_id)
    }

    /// Returns true if this is a testnet.
    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            Network::Sepolia
                | Network::BaseSepolia
                | Network::PolygonAmoy
                | Network::AvalancheFuji
                | Network::FilecoinCalibration
        )
    }

    /// Returns true for the Filecoin FEVM family.
    ///
    /// USDC on FEVM executes through a delegatecall proxy, so every
    /// authorization check and transfer costs multiples of the usual gas.
    /// The fee engine hard-codes a 150M gas floor and ceiling for these.
    pub fn is_fevm(&self) -> bool {
        self.to_string().contains("filecoin")
    }

    /// The native token symbol, used by the price oracle.
    pub fn native_token(&self) -> &'static str {
        match self {
            Network::Sepolia | Network::Base | Network::BaseSepolia => "ETH",
            Network::Polygon | Network::PolygonAmoy => "POL",
            Network::Avalanche | Network::AvalancheFuji => "AVAX",
            Network::Filecoin | Network::FilecoinCalibration => "FIL",
        }
    }
}

/// EIP-712 domain metadata for a token deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712Config {
    pub name: String,
    pub version: String,
}

/// A token deployment on one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub address: Address,
    pub decimals: u8,
    /// Absent for tokens whose domain metadata is not known to this
    /// facilitator; the verifier then cannot recover the signer locally and
    /// reports a tolerated `invalid_scheme`.
    pub eip712: Option<Eip712Config>,
}

/// The kind of business logic a hook carries out. Unknown hook addresses
/// default to [`HookKind::Transfer`] for gas-overhead purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    #[default]
    Transfer,
    Split,
    Mint,
    Reward,
}

/// Per-network registry of known hook deployments.
///
/// Hooks are opaque callees: the facilitator allows or rejects them by
/// address and never interprets their semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookRegistry {
    pub transfer: Option<Address>,
    pub split: Option<Address>,
    pub mint: Option<Address>,
    pub reward: Option<Address>,
    /// Additional whitelisted hooks without a known kind.
    #[serde(default)]
    pub extra: Vec<Address>,
}

impl HookRegistry {
    /// The kind registered for `hook`, if any.
    pub fn kind_of(&self, hook: Address) -> Option<HookKind> {
        if self.transfer == Some(hook) {
            Some(HookKind::Transfer)
        } else if self.split == Some(hook) {
            Some(HookKind::Split)
        } else if self.mint == Some(hook) {
            Some(HookKind::Mint)
        } else if self.reward == Some(hook) {
            Some(HookKind::Reward)
        } else {
            None
        }
    }

    /// True if `hook` appears anywhere in the registry.
    pub fn contains(&self, hook: Address) -> bool {
        self.kind_of(hook).is_some() || self.extra.contains(&hook)
    }
}

/// Complete configuration for one supported network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network: Network,
    pub chain_id: u64,
    pub default_asset: AssetConfig,
    pub native_token: String,
    /// Whether the chain supports EIP-1559 fee-market transactions.
    pub supports_eip1559: bool,
    pub hooks: HookRegistry,
    /// The canonical SettlementRouter deployment for this network, if any.
    pub settlement_router: Option<Address>,
    /// All routers accepted for this network (the canonical one plus any
    /// operator-configured additions). Compared case-insensitively by way of
    /// byte-level [`Address`] equality.
    pub router_whitelist: Vec<Address>,
    /// Assets accepted when the single-asset restriction is lifted.
    pub supported_assets: Vec<Address>,
}

impl NetworkConfig {
    pub fn is_router_allowed(&self, router: Address) -> bool {
        self.router_whitelist.contains(&router)
    }
}

/// Statically known USDC deployment per network.
static DEFAULT_ASSETS: Lazy<HashMap<Network, AssetConfig>> = Lazy::new(|| {
    let usdc = |name: &str, version: &str| {
        Some(Eip712Config {
            name: name.into(),
            version: version.into(),
        })
    };
    HashMap::from([
        (
            Network::Sepolia,
            AssetConfig {
                address: address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
                decimals: 6,
                eip712: usdc("USDC", "2"),
            },
        ),
        (
            Network::Base,
            AssetConfig {
                address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
                decimals: 6,
                eip712: usdc("USD Coin", "2"),
            },
        ),
        (
            Network::BaseSepolia,
            AssetConfig {
                address: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
                decimals: 6,
                eip712: usdc("USDC", "2"),
            },
        ),
        (
            Network::Polygon,
            AssetConfig {
                address: address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
                decimals: 6,
                eip712: usdc("USDC", "2"),
            },
        ),
        (
            Network::PolygonAmoy,
            AssetConfig {
                address: address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582"),
                decimals: 6,
                eip712: usdc("USDC", "2"),
            },
        ),
        (
            Network::Avalanche,
            AssetConfig {
                address: address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
                decimals: 6,
                eip712: usdc("USD Coin", "2"),
            },
        ),
        (
            Network::AvalancheFuji,
            AssetConfig {
                address: address!("0x5425890298aed601595a70AB815c96711a31Bc65"),
                decimals: 6,
                eip712: usdc("USD Coin", "2"),
            },
        ),
        (
            // Bridged (Axelar) USDC; executes through the FEVM delegatecall proxy.
            Network::Filecoin,
            AssetConfig {
                address: address!("0xEB466342C4d449BC9f53A865D5Cb90586f405215"),
                decimals: 6,
                eip712: usdc("USD Coin", "1"),
            },
        ),
        (
            Network::FilecoinCalibration,
            AssetConfig {
                address: address!("0x2421db204968A367CC2C866CD057FA754Cb84EdF"),
                decimals: 6,
                eip712: usdc("USDC", "1"),
            },
        ),
    ])
});

/// Operator-supplied overrides applied on top of the static defaults.
///
/// Parsed from the environment by [`crate::from_env`]; kept as a plain struct
/// so tests can build a registry without touching process env.
#[derive(Debug, Clone, Default)]
pub struct RegistryOverrides {
    /// Canonical router per network.
    pub routers: HashMap<Network, Address>,
    /// Additional accepted routers per network.
    pub extra_routers: HashMap<Network, Vec<Address>>,
    /// Known hook deployments per network.
    pub hooks: HashMap<Network, HookRegistry>,
    /// Additional accepted assets per network.
    pub extra_assets: HashMap<Network, Vec<Address>>,
}

/// Error for lookups of networks this facilitator does not support.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported network: {0}")]
pub struct UnsupportedNetworkError(pub String);

/// Read-only lookup of [`NetworkConfig`] keyed by network.
///
/// Writes are init-time only; after construction the registry is immutable
/// and shared behind an `Arc` without locking.
#[derive(Debug)]
pub struct NetworkRegistry {
    configs: HashMap<Network, NetworkConfig>,
}

impl NetworkRegistry {
    /// Build the registry from static defaults plus operator overrides.
    pub fn new(overrides: RegistryOverrides) -> Self {
        let mut configs = HashMap::new();
        for network in Network::variants() {
            let default_asset = DEFAULT_ASSETS
                .get(network)
                .expect("every network variant has a default asset")
                .clone();
            let settlement_router = overrides.routers.get(network).copied();
            let mut router_whitelist: Vec<Address> = settlement_router.into_iter().collect();
            if let Some(extra) = overrides.extra_routers.get(network) {
                for router in extra {
                    if !router_whitelist.contains(router) {
                        router_whitelist.push(*router);
                    }
                }
            }
            let mut supported_assets = vec![default_asset.address];
            if let Some(extra) = overrides.extra_assets.get(network) {
                for asset in extra {
                    if !supported_assets.contains(asset) {
                        supported_assets.push(*asset);
                    }
                }
            }
            configs.insert(
                *network,
                NetworkConfig {
                    network: *network,
                    chain_id: network.chain_id(),
                    default_asset,
                    native_token: network.native_token().to_string(),
                    supports_eip1559: true,
                    hooks: overrides.hooks.get(network).cloned().unwrap_or_default(),
                    settlement_router,
                    router_whitelist,
                    supported_assets,
                },
            );
        }
        NetworkRegistry { configs }
    }

    /// Look up the configuration for `network`.
    pub fn get(&self, network: Network) -> Result<&NetworkConfig, UnsupportedNetworkError> {
        self.configs
            .get(&network)
            .ok_or_else(|| UnsupportedNetworkError(network.to_string()))
    }

    /// The authority consulted by the verifier and the settlement engine.
    pub fn supported_networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.configs.keys().copied().collect();
        networks.sort_by_key(|n| n.to_string());
        networks
    }
}
