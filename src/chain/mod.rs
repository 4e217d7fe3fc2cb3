//! Chain access for the settlement core.
//!
//! [`SettlementChain`] is the seam between the settlement pipeline and an
//! actual EVM network: balance reads, gas sampling, router idempotency
//! checks, simulation, submission, and receipt polling. The production
//! implementation lives in [`evm`]; tests substitute fakes so the pipeline
//! runs without an RPC endpoint.

pub mod evm;

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::network::Network;
use crate::types::TransactionHash;

/// Infrastructure-level chain errors. Validation failures never surface
/// here; they are reported through the wire-level error reasons instead.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Transport trouble: DNS, TCP, timeouts, rate limits.
    #[error("RPC provider error: {0}")]
    RpcProvider(String),
    /// The node answered but the call failed.
    #[error("contract call failed: {0}")]
    ContractCall(String),
    /// No receipt arrived within the configured window.
    #[error("transaction receipt timed out: {0}")]
    ReceiptTimeout(String),
}

/// Outcome of an advisory `eth_call` simulation of `settleAndExecute`.
#[derive(Debug, Clone)]
pub enum SimulationOutcome {
    Ok,
    /// The call reverted. `deterministic` marks reasons that will hold at
    /// execution height too (already settled, token or hook rejected by the
    /// router), as opposed to state a hook resolves only when mined.
    Reverted {
        reason: Option<String>,
        deterministic: bool,
    },
}

/// The full argument set of the router's `settleAndExecute` call.
///
/// `signature` carries the ERC-6492-unwrapped bytes; the router receives
/// them as plain `bytes`.
#[derive(Debug, Clone)]
pub struct SettleCall {
    pub token: Address,
    pub from: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: B256,
    pub signature: Bytes,
    pub salt: B256,
    pub pay_to: Address,
    pub facilitator_fee: U256,
    pub hook: Address,
    pub hook_data: Bytes,
}

/// Receipt summary for a submitted settlement transaction.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub transaction: TransactionHash,
    /// `true` when the transaction executed successfully.
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// Read and write access to one EVM network.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    fn network(&self) -> Network;

    /// ERC-20 `balanceOf`.
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// Current gas price in wei (`eth_gasPrice`).
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Router `isSettled(contextKey)` — the on-chain idempotency check.
    async fn is_settled(&self, router: Address, context_key: B256) -> Result<bool, ChainError>;

    /// Router `getPendingFees(owner, token)` — accrued facilitator fees.
    async fn pending_fees(
        &self,
        router: Address,
        owner: Address,
        token: Address,
    ) -> Result<U256, ChainError>;

    /// Simulate `settleAndExecute` without state changes.
    async fn simulate_settle(
        &self,
        router: Address,
        call: &SettleCall,
        from: Address,
        gas_limit: u64,
    ) -> Result<SimulationOutcome, ChainError>;

    /// Submit `settleAndExecute` and return the transaction hash without
    /// waiting for inclusion.
    async fn submit_settle(
        &self,
        router: Address,
        call: &SettleCall,
        from: Address,
        gas_limit: u64,
    ) -> Result<TransactionHash, ChainError>;

    /// Poll for the receipt of a previously submitted transaction.
    async fn await_receipt(
        &self,
        transaction: TransactionHash,
    ) -> Result<SettlementReceipt, ChainError>;

    /// Router `claimFees(tokens)` — sweep accrued fees to the signer.
    async fn claim_fees(
        &self,
        router: Address,
        tokens: Vec<Address>,
        from: Address,
    ) -> Result<TransactionHash, ChainError>;
}

/// Per-network map of chain clients, assembled at startup.
///
/// Networks without a configured RPC endpoint are simply absent; `/supported`
/// reflects exactly the keys present here.
pub struct ChainMap {
    chains: HashMap<Network, Arc<dyn SettlementChain>>,
}

impl ChainMap {
    pub fn new(chains: HashMap<Network, Arc<dyn SettlementChain>>) -> Self {
        ChainMap { chains }
    }

    pub fn by_network(&self, network: Network) -> Option<&Arc<dyn SettlementChain>> {
        self.chains.get(&network)
    }

    /// Networks with a live client, sorted by name for stable output.
    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.chains.keys().copied().collect();
        networks.sort_by_key(|n| n.to_string());
        networks
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
