//! Environment variable parsing for secrets and per-network wiring.
//!
//! Network-scoped variables use the network name uppercased with dashes
//! replaced by underscores, e.g. `RPC_URL_BASE_SEPOLIA`:
//!
//! - `RPC_URL_<NETWORK>` — comma-separated JSON-RPC endpoints
//! - `SIGNER_KEYS_<NETWORK>` (fallback `SIGNER_KEYS`) — comma-separated
//!   0x-prefixed private keys
//! - `SETTLEMENT_ROUTER_<NETWORK>` — canonical router deployment
//! - `ROUTER_WHITELIST_<NETWORK>` — additional accepted routers
//! - `HOOK_TRANSFER_<NETWORK>` / `HOOK_SPLIT_…` / `HOOK_MINT_…` /
//!   `HOOK_REWARD_…` — known hook deployments
//! - `HOOK_WHITELIST_<NETWORK>` — extra allowed hooks without a known kind
//! - `ASSET_WHITELIST_<NETWORK>` — extra accepted assets

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use url::Url;

use crate::network::{HookRegistry, Network, RegistryOverrides};

/// Error raised for malformed environment values. A *missing* variable is
/// never an error here; callers decide whether absence is fatal.
#[derive(Debug, thiserror::Error)]
pub enum FromEnvError {
    #[error("invalid value for {var}: {detail}")]
    Invalid { var: String, detail: String },
}

fn env_key(prefix: &str, network: Network) -> String {
    format!(
        "{prefix}_{}",
        network.to_string().to_uppercase().replace('-', "_")
    )
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_list<T: FromStr>(var: &str, raw: &str) -> Result<Vec<T>, FromEnvError>
where
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            T::from_str(s).map_err(|e| FromEnvError::Invalid {
                var: var.to_string(),
                detail: format!("{s:?}: {e}"),
            })
        })
        .collect()
}

/// RPC endpoints for `network`, in failover order. `None` when unconfigured.
pub fn rpc_urls(network: Network) -> Result<Option<Vec<Url>>, FromEnvError> {
    let var = env_key("RPC_URL", network);
    match env_var(&var) {
        Some(raw) => {
            let urls: Vec<Url> = parse_list(&var, &raw)?;
            Ok(if urls.is_empty() { None } else { Some(urls) })
        }
        None => Ok(None),
    }
}

/// Signer keys for `network`. Falls back to the global `SIGNER_KEYS` list so
/// a single operator key can serve every chain in demo setups.
pub fn signer_keys(network: Network) -> Result<Vec<PrivateKeySigner>, FromEnvError> {
    let var = env_key("SIGNER_KEYS", network);
    let raw = match env_var(&var).or_else(|| env_var("SIGNER_KEYS")) {
        Some(raw) => raw,
        None => return Ok(Vec::new()),
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            PrivateKeySigner::from_str(s).map_err(|e| FromEnvError::Invalid {
                var: var.clone(),
                detail: format!("not a valid private key: {e}"),
            })
        })
        .collect()
}

fn address_var(prefix: &str, network: Network) -> Result<Option<Address>, FromEnvError> {
    let var = env_key(prefix, network);
    match env_var(&var) {
        Some(raw) => Address::from_str(raw.trim())
            .map(Some)
            .map_err(|e| FromEnvError::Invalid {
                var,
                detail: format!("{raw:?}: {e}"),
            }),
        None => Ok(None),
    }
}

fn address_list_var(prefix: &str, network: Network) -> Result<Vec<Address>, FromEnvError> {
    let var = env_key(prefix, network);
    match env_var(&var) {
        Some(raw) => parse_list(&var, &raw),
        None => Ok(Vec::new()),
    }
}

/// Assemble [`RegistryOverrides`] from the environment for every network.
pub fn registry_overrides() -> Result<RegistryOverrides, FromEnvError> {
    let mut overrides = RegistryOverrides::default();
    for network in Network::variants().iter().copied() {
        if let Some(router) = address_var("SETTLEMENT_ROUTER", network)? {
            overrides.routers.insert(network, router);
        }
        let extra_routers = address_list_var("ROUTER_WHITELIST", network)?;
        if !extra_routers.is_empty() {
            overrides.extra_routers.insert(network, extra_routers);
        }

        let hooks = HookRegistry {
            transfer: address_var("HOOK_TRANSFER", network)?,
            split: address_var("HOOK_SPLIT", network)?,
            mint: address_var("HOOK_MINT", network)?,
            reward: address_var("HOOK_REWARD", network)?,
            extra: address_list_var("HOOK_WHITELIST", network)?,
        };
        let has_hooks = hooks.transfer.is_some()
            || hooks.split.is_some()
            || hooks.mint.is_some()
            || hooks.reward.is_some()
            || !hooks.extra.is_empty();
        if has_hooks {
            overrides.hooks.insert(network, hooks);
        }

        let extra_assets = address_list_var("ASSET_WHITELIST", network)?;
        if !extra_assets.is_empty() {
            overrides.extra_assets.insert(network, extra_assets);
        }
    }
    Ok(overrides)
}
