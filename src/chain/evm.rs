//! Alloy-backed [`SettlementChain`] implementation.
//!
//! One [`EvmChainClient`] per configured network wraps a composed Alloy
//! provider (gas, nonce, chain-id fillers plus a wallet holding every pool
//! signer) and exposes the narrow surface the settlement pipeline needs:
//! balance reads, gas sampling, router views, simulation, submission, and
//! receipt polling.
//!
//! Invariants:
//! - Verification-path calls never persist state; only `submit_settle` and
//!   `claim_fees` produce transactions.
//! - The `from` address of every transaction is chosen by the signer pool;
//!   this module never picks a signer on its own.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::{SolCall, SolError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::chain::{ChainError, SettleCall, SettlementChain, SettlementReceipt, SimulationOutcome};
use crate::config::FacilitatorConfig;
use crate::network::Network;
use crate::types::TransactionHash;

sol! {
    /// The on-chain settlement contract: atomically validates the EIP-3009
    /// authorization, transfers funds, and invokes the hook.
    #[sol(rpc)]
    interface ISettlementRouter {
        function settleAndExecute(
            address token,
            address from,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature,
            bytes32 salt,
            address payTo,
            uint256 facilitatorFee,
            address hook,
            bytes hookData
        ) external returns (bytes32 contextKey);

        function isSettled(bytes32 contextKey) external view returns (bool);
        function calculateContextKey(address from, address token, bytes32 nonce)
            external pure returns (bytes32);
        function getPendingFees(address owner, address token) external view returns (uint256);
        function claimFees(address[] calldata tokens) external;

        event Settled(
            bytes32 indexed contextKey,
            address indexed from,
            address indexed payTo,
            uint256 value,
            uint256 facilitatorFee
        );
        event HookExecuted(bytes32 indexed contextKey, address indexed hook, bool success);

        error AlreadySettled();
        error UnsupportedToken();
        error HookNotAllowed();
        error InvalidAuthorization();
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// How often receipt polling re-queries the node.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One network's RPC client.
pub struct EvmChainClient {
    inner: DynProvider,
    network: Network,
    supports_eip1559: bool,
    receipt_timeout: Duration,
}

impl EvmChainClient {
    /// Build a client from a wallet (holding every pool signer for this
    /// network) and a failover-ordered list of RPC endpoints.
    ///
    /// With a single URL the endpoint is trusted as-is. With multiple URLs,
    /// each is probed for reachability and a matching `eth_chainId`; the
    /// first healthy endpoint wins and mismatching ones are excluded.
    pub async fn try_new(
        wallet: EthereumWallet,
        rpc_urls: Vec<Url>,
        network: Network,
        supports_eip1559: bool,
        config: &FacilitatorConfig,
    ) -> Result<Self, ChainError> {
        if rpc_urls.is_empty() {
            return Err(ChainError::RpcProvider(format!(
                "no RPC URL configured for {network}"
            )));
        }

        let network_str = network.to_string();
        let rpc_timeout = config.transaction.rpc_timeout_for(&network_str);
        let connect_timeout = Duration::from_secs(config.transaction.connection_timeout_seconds);
        let receipt_timeout = config.transaction.receipt_timeout_for(&network_str);

        let url = if rpc_urls.len() == 1 {
            rpc_urls.into_iter().next().unwrap()
        } else {
            probe_healthy_endpoint(&rpc_urls, network.chain_id()).await?
        };

        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| {
                ChainError::RpcProvider(format!("failed to build HTTP client for {url}: {e}"))
            })?;
        let transport = alloy::transports::http::Http::with_client(http_client, url.clone());
        let client = RpcClient::new(transport, false);

        let inner = ProviderBuilder::new()
            .wallet(wallet)
            .connect_client(client)
            .erased();

        tracing::info!(
            network = %network,
            rpc = %url,
            rpc_timeout_secs = rpc_timeout.as_secs(),
            receipt_timeout_secs = receipt_timeout.as_secs(),
            "Initialized chain client"
        );

        Ok(Self {
            inner,
            network,
            supports_eip1559,
            receipt_timeout,
        })
    }

    fn settle_request(
        &self,
        router: Address,
        call: &SettleCall,
        from: Address,
    ) -> TransactionRequest {
        let calldata = ISettlementRouter::settleAndExecuteCall {
            token: call.token,
            from: call.from,
            value: call.value,
            validAfter: call.valid_after,
            validBefore: call.valid_before,
            nonce: call.nonce,
            signature: call.signature.clone(),
            salt: call.salt,
            payTo: call.pay_to,
            facilitatorFee: call.facilitator_fee,
            hook: call.hook,
            hookData: call.hook_data.clone(),
        }
        .abi_encode();

        TransactionRequest::default()
            .with_to(router)
            .with_from(from)
            .with_input(calldata)
    }
}

/// Probe each endpoint's `eth_chainId`; return the first that is reachable
/// and reports the expected chain.
async fn probe_healthy_endpoint(urls: &[Url], expected_chain_id: u64) -> Result<Url, ChainError> {
    for (i, url) in urls.iter().enumerate() {
        let probe_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ChainError::RpcProvider(format!("probe client build failed: {e}")))?;
        let transport = alloy::transports::http::Http::with_client(probe_client, url.clone());
        let provider =
            RootProvider::<alloy::network::Ethereum>::new(RpcClient::new(transport, false));

        match provider.get_chain_id().await {
            Ok(id) if id == expected_chain_id => {
                tracing::info!(url = %url, chain_id = id, "RPC #{i} validated");
                return Ok(url.clone());
            }
            Ok(id) => {
                tracing::error!(
                    url = %url, expected = expected_chain_id, got = id,
                    "RPC #{i} chainId mismatch — excluded"
                );
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "RPC #{i} unreachable — excluded");
            }
        }
    }
    Err(ChainError::RpcProvider(
        "no healthy RPC endpoint with matching chainId".to_string(),
    ))
}

#[async_trait]
impl SettlementChain for EvmChainClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let erc20 = IERC20::new(token, &self.inner);
        erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| categorize_transport_error(e, "balance query"))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.inner
            .get_gas_price()
            .await
            .map_err(|e| categorize_transport_error(e, "gas price query"))
    }

    async fn is_settled(&self, router: Address, context_key: B256) -> Result<bool, ChainError> {
        let contract = ISettlementRouter::new(router, &self.inner);
        contract
            .isSettled(context_key)
            .call()
            .await
            .map_err(|e| categorize_transport_error(e, "isSettled query"))
    }

    async fn pending_fees(
        &self,
        router: Address,
        owner: Address,
        token: Address,
    ) -> Result<U256, ChainError> {
        let contract = ISettlementRouter::new(router, &self.inner);
        contract
            .getPendingFees(owner, token)
            .call()
            .await
            .map_err(|e| categorize_transport_error(e, "getPendingFees query"))
    }

    async fn simulate_settle(
        &self,
        router: Address,
        call: &SettleCall,
        from: Address,
        gas_limit: u64,
    ) -> Result<SimulationOutcome, ChainError> {
        let request = self
            .settle_request(router, call, from)
            .with_gas_limit(gas_limit);

        match self.inner.call(request).await {
            Ok(_) => Ok(SimulationOutcome::Ok),
            Err(e) => {
                let err_str = format!("{e:?}");
                if is_transport_failure(&err_str) {
                    return Err(categorize_transport_error(e, "settlement simulation"));
                }
                let decoded = extract_revert_data(&err_str).map(|data| decode_revert(&data));
                let (reason, deterministic) = match decoded {
                    Some((reason, deterministic)) => (Some(reason), deterministic),
                    None => (None, false),
                };
                tracing::warn!(
                    network = %self.network,
                    router = %router,
                    reason = ?reason,
                    deterministic,
                    "settlement simulation reverted"
                );
                Ok(SimulationOutcome::Reverted {
                    reason,
                    deterministic,
                })
            }
        }
    }

    async fn submit_settle(
        &self,
        router: Address,
        call: &SettleCall,
        from: Address,
        gas_limit: u64,
    ) -> Result<TransactionHash, ChainError> {
        let mut request = self
            .settle_request(router, call, from)
            .with_gas_limit(gas_limit);
        if !self.supports_eip1559 {
            let gas_price = self.gas_price().await?;
            request.set_gas_price(gas_price);
        }

        let send_start = std::time::Instant::now();
        let pending = self
            .inner
            .send_transaction(request)
            .await
            .map_err(|e| categorize_transport_error(e, "settleAndExecute submission"))?;
        let tx_hash = TransactionHash(*pending.tx_hash());
        tracing::info!(
            network = %self.network,
            from = %from,
            transaction = %tx_hash,
            send_tx_ms = send_start.elapsed().as_millis() as u64,
            "Transaction submitted"
        );
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        transaction: TransactionHash,
    ) -> Result<SettlementReceipt, ChainError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            match self.inner.get_transaction_receipt(transaction.0).await {
                Ok(Some(receipt)) => {
                    return Ok(SettlementReceipt {
                        transaction,
                        status: receipt.status(),
                        gas_used: receipt.gas_used,
                        effective_gas_price: receipt.effective_gas_price,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    // Transient read failures during polling are tolerated
                    // until the deadline; the transaction is already out.
                    tracing::warn!(
                        network = %self.network,
                        transaction = %transaction,
                        error = ?e,
                        "receipt poll failed"
                    );
                }
            }
            if Instant::now() >= deadline {
                return Err(ChainError::ReceiptTimeout(format!(
                    "no receipt for {transaction} within {:?}",
                    self.receipt_timeout
                )));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn claim_fees(
        &self,
        router: Address,
        tokens: Vec<Address>,
        from: Address,
    ) -> Result<TransactionHash, ChainError> {
        let calldata = ISettlementRouter::claimFeesCall { tokens }.abi_encode();
        let request = TransactionRequest::default()
            .with_to(router)
            .with_from(from)
            .with_input(calldata);
        let pending = self
            .inner
            .send_transaction(request)
            .await
            .map_err(|e| categorize_transport_error(e, "claimFees submission"))?;
        Ok(TransactionHash(*pending.tx_hash()))
    }
}

/// True when an error debug string points at the transport rather than the
/// contract.
fn is_transport_failure(err_str: &str) -> bool {
    err_str.contains("Connection refused")
        || err_str.contains("Connection reset")
        || err_str.contains("No route to host")
        || err_str.contains("timeout")
        || err_str.contains("Timeout")
        || err_str.contains("dns error")
}

/// Categorize transport/RPC errors for appropriate HTTP status mapping.
///
/// Distinguishes between:
/// - Network/connection errors (DNS, TCP, timeouts) -> RpcProvider (503)
/// - Contract execution errors -> ContractCall (502) with decoded reason
fn categorize_transport_error(e: impl std::fmt::Debug, context: &str) -> ChainError {
    let err_str = format!("{e:?}");

    if let Some(data) = extract_revert_data(&err_str) {
        let (reason, _) = decode_revert(&data);
        tracing::error!("{context}: contract reverted: {reason}");
        return ChainError::ContractCall(reason);
    }

    if is_transport_failure(&err_str) {
        tracing::error!("{context}: RPC connection error: {err_str}");
        ChainError::RpcProvider(format!("{context}: connection error"))
    } else {
        tracing::error!("{context}: contract call failed: {err_str}");
        ChainError::ContractCall(format!("{context}: call failed"))
    }
}

/// Pull `0x…` revert data out of an error debug string.
///
/// Alloy surfaces revert payloads as `data: Some(RawValue("0x…"))` inside the
/// error's debug output; this extracts the first hex run long enough to carry
/// a selector.
fn extract_revert_data(err_str: &str) -> Option<Vec<u8>> {
    let mut search = err_str;
    while let Some(idx) = search.find("0x") {
        let hex_run: String = search[idx + 2..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        if hex_run.len() >= 8 && hex_run.len() % 2 == 0 {
            if let Ok(bytes) = alloy::hex::decode(&hex_run) {
                return Some(bytes);
            }
        }
        search = &search[idx + 2..];
    }
    None
}

/// Decode revert data into a human-readable reason and whether the revert is
/// deterministic (holds at execution height too).
///
/// Supports the router's custom errors, `Error(string)` (0x08c379a0), and
/// `Panic(uint256)` (0x4e487b71); unknown selectors come back as hex.
fn decode_revert(data: &[u8]) -> (String, bool) {
    if data.len() < 4 {
        return (format!("0x{}", alloy::hex::encode(data)), false);
    }
    let selector: [u8; 4] = data[0..4].try_into().unwrap();

    if selector == ISettlementRouter::AlreadySettled::SELECTOR {
        return ("AlreadySettled".to_string(), true);
    }
    if selector == ISettlementRouter::UnsupportedToken::SELECTOR {
        return ("UnsupportedToken".to_string(), true);
    }
    if selector == ISettlementRouter::HookNotAllowed::SELECTOR {
        return ("HookNotAllowed".to_string(), true);
    }
    if selector == ISettlementRouter::InvalidAuthorization::SELECTOR {
        return ("InvalidAuthorization".to_string(), true);
    }

    // Error(string)
    if selector == [0x08, 0xc3, 0x79, 0xa0] && data.len() >= 68 {
        let len_bytes = &data[36..68];
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, &b| acc.saturating_mul(256).saturating_add(b as usize));
        if len <= 1024 && data.len() >= 68 + len {
            if let Ok(message) = String::from_utf8(data[68..68 + len].to_vec()) {
                return (message, false);
            }
        }
    }

    // Panic(uint256)
    if selector == [0x4e, 0x48, 0x7b, 0x71] && data.len() >= 36 {
        return (format!("Panic(0x{:02x})", data[35]), false);
    }

    (
        format!("UnknownError(0x{})", alloy::hex::encode(&data[0..4])),
        false,
    )
}
