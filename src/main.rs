//! Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the x402
//! protocol interface for payment verification and settlement through a
//! hook-executing SettlementRouter on EVM networks.
//!
//! Endpoints:
//! - `GET /verify` – verify request descriptor
//! - `POST /verify` – verify a payment payload against requirements
//! - `GET /settle` – settle request descriptor
//! - `POST /settle` – settle an accepted payment payload on-chain
//! - `GET /supported` – supported payment kinds (scheme/network)
//! - `GET /metrics` – Prometheus metrics
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `RPC_URL_<NETWORK>`, `SIGNER_KEYS_<NETWORK>`, router and hook
//!   whitelists per network (see `from_env`)
//! - `CONFIG_FILE` points at the optional `config.toml`

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use axum::http::Method;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use router402_facilitator::balance::BalanceChecker;
use router402_facilitator::chain::evm::EvmChainClient;
use router402_facilitator::chain::{ChainMap, SettlementChain};
use router402_facilitator::config::FacilitatorConfig;
use router402_facilitator::fees::FeeEngine;
use router402_facilitator::from_env;
use router402_facilitator::gas::GasOracle;
use router402_facilitator::handlers::{self, AppState};
use router402_facilitator::metrics::CompositeSink;
use router402_facilitator::network::{Network, NetworkRegistry};
use router402_facilitator::price::{HttpPriceFeed, PriceFeed, PriceOracle};
use router402_facilitator::settlement::SettlementEngine;
use router402_facilitator::sig_down::SigDown;
use router402_facilitator::signer_pool::SignerPool;
use router402_facilitator::telemetry;
use router402_facilitator::verify::Verifier;

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init();

    let mut config = match FacilitatorConfig::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            tracing::info!("Using default configuration");
            FacilitatorConfig::default()
        }
    };
    // Env flags override the config file for deploy-time toggles.
    if let Some(enabled) = env_flag("PRICE_ORACLE_ENABLED") {
        config.oracle.price_enabled = enabled;
    }
    if let Some(enabled) = env_flag("GAS_ORACLE_ENABLED") {
        config.oracle.gas_enabled = enabled;
    }
    if let Some(enabled) = env_flag("HOOK_WHITELIST_ENABLED") {
        config.fees.hook_whitelist_enabled = enabled;
    }
    if let Some(ttl) = env_u64("PRICE_CACHE_TTL_SECONDS") {
        config.oracle.price_ttl_seconds = ttl;
    }
    if let Some(ttl) = env_u64("GAS_CACHE_TTL_SECONDS") {
        config.oracle.gas_ttl_seconds = ttl;
    }
    let config = Arc::new(config);

    let overrides = match from_env::registry_overrides() {
        Ok(overrides) => overrides,
        Err(e) => {
            tracing::error!("Invalid registry environment: {}", e);
            std::process::exit(1);
        }
    };
    let registry = Arc::new(NetworkRegistry::new(overrides));

    // One chain client per network that has an RPC URL. A network with an
    // RPC URL but no signer keys is a configuration error: refuse to start
    // rather than fail its requests one by one.
    let mut chains: HashMap<Network, Arc<dyn SettlementChain>> = HashMap::new();
    let mut signer_addresses: HashMap<Network, Vec<Address>> = HashMap::new();
    for network in Network::variants().iter().copied() {
        let urls = match from_env::rpc_urls(network) {
            Ok(Some(urls)) => urls,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(network = %network, "Invalid RPC configuration: {}", e);
                std::process::exit(1);
            }
        };
        let signers = match from_env::signer_keys(network) {
            Ok(signers) if !signers.is_empty() => signers,
            Ok(_) => {
                tracing::error!(
                    network = %network,
                    "RPC configured but no signer keys; refusing to start"
                );
                std::process::exit(1);
            }
            Err(e) => {
                tracing::error!(network = %network, "Invalid signer keys: {}", e);
                std::process::exit(1);
            }
        };

        let addresses: Vec<Address> = signers.iter().map(|s| s.address()).collect();
        let mut signers = signers.into_iter();
        let mut wallet = EthereumWallet::new(signers.next().expect("non-empty"));
        for signer in signers {
            wallet.register_signer(signer);
        }

        let supports_eip1559 = registry
            .get(network)
            .map(|c| c.supports_eip1559)
            .unwrap_or(true);
        match EvmChainClient::try_new(wallet, urls, network, supports_eip1559, &config).await {
            Ok(client) => {
                chains.insert(network, Arc::new(client));
                signer_addresses.insert(network, addresses);
            }
            Err(e) => {
                tracing::error!(network = %network, "Failed to create chain client: {}", e);
                std::process::exit(1);
            }
        }
    }
    if chains.is_empty() {
        tracing::error!("No networks configured; set at least one RPC_URL_<NETWORK>");
        std::process::exit(1);
    }
    let chains = Arc::new(ChainMap::new(chains));

    let signer_pool = Arc::new(SignerPool::new(signer_addresses, &config.signer_pool));

    let price_feed: Option<Arc<dyn PriceFeed>> = config
        .oracle
        .price_feed_url
        .clone()
        .or_else(|| std::env::var("PRICE_FEED_URL").ok())
        .map(|url| Arc::new(HttpPriceFeed::new(url)) as Arc<dyn PriceFeed>);
    let price_oracle = Arc::new(PriceOracle::new(price_feed, &config.oracle));
    let gas_oracle = Arc::new(GasOracle::new(Arc::clone(&chains), &config.oracle));
    let fee_engine = Arc::new(FeeEngine::new(
        config.fees.clone(),
        Arc::clone(&registry),
        Arc::clone(&price_oracle),
        Arc::clone(&gas_oracle),
    ));
    let balance_checker = Arc::new(BalanceChecker::new(&config.balance));
    let verifier = Arc::new(Verifier::new(
        Arc::clone(&registry),
        Arc::clone(&chains),
        Arc::clone(&balance_checker),
        true,
    ));
    let audit = Arc::new(CompositeSink::standard());

    let engine = Arc::new(SettlementEngine::new(
        Arc::clone(&registry),
        Arc::clone(&chains),
        verifier,
        balance_checker,
        signer_pool,
        Arc::clone(&price_oracle),
        gas_oracle,
        fee_engine,
        audit,
        Arc::clone(&config),
    ));

    let sig_down = SigDown::try_new()?;
    let refresher_token = sig_down.cancellation_token();
    let _refresher = price_oracle.spawn_refresher(chains.networks(), refresher_token);

    // Configure CORS
    let cors_layer = if config.cors.allowed_origins.is_empty() {
        tracing::info!("CORS: Allowing all origins (*)");
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any)
    } else {
        tracing::info!("CORS: Restricting to {:?}", config.cors.allowed_origins);
        let origins: Vec<_> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any)
    };

    let http_endpoints = handlers::routes(AppState { engine })
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            config.request.max_body_size_bytes,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::new(host.parse().expect("HOST must be a valid IP address"), port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
