//! Shared test harness: a scripted in-memory chain and request builders.
//!
//! The mock chain mirrors the router's observable behavior — balance reads,
//! `isSettled`, simulation, submission, receipts — so the full settlement
//! pipeline runs without an RPC endpoint. Submissions are recorded for
//! assertions and the in-flight counter exposes signer-exclusivity
//! violations.

use alloy::primitives::{Address, B256, Bytes, U256, address, b256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use router402_facilitator::balance::BalanceChecker;
use router402_facilitator::chain::{
    ChainError, ChainMap, SettleCall, SettlementChain, SettlementReceipt, SimulationOutcome,
};
use router402_facilitator::commitment::{CommitmentParams, compute_commitment, context_key};
use router402_facilitator::config::FacilitatorConfig;
use router402_facilitator::fees::FeeEngine;
use router402_facilitator::gas::GasOracle;
use router402_facilitator::metrics::CompositeSink;
use router402_facilitator::network::{HookRegistry, Network, NetworkRegistry, RegistryOverrides};
use router402_facilitator::price::PriceOracle;
use router402_facilitator::settlement::SettlementEngine;
use router402_facilitator::signer_pool::SignerPool;
use router402_facilitator::types::{
    Authorization, EvmSignature, ExactEvmPayload, HexEncodedNonce, PaymentPayload,
    PaymentRequirements, Scheme, SettleRequest, SettlementExtra, TokenAmount, TransactionHash,
    UnixTimestamp,
};
use router402_facilitator::verify::{Verifier, authorization_signing_hash};

pub const GWEI: u128 = 1_000_000_000;

pub fn router() -> Address {
    address!("0x2222222222222222222222222222222222222222")
}

pub fn transfer_hook() -> Address {
    address!("0x5555555555555555555555555555555555555555")
}

pub fn final_recipient() -> Address {
    address!("0x4444444444444444444444444444444444444444")
}

pub fn fixed_salt() -> B256 {
    b256!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
}

pub fn pool_signer(index: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[18] = 0xfa;
    bytes[19] = index;
    Address::from(bytes)
}

/// One recorded `settleAndExecute` submission.
pub struct SubmittedCall {
    pub call: SettleCall,
    pub from: Address,
    pub gas_limit: u64,
}

/// Scripted [`SettlementChain`] with router-equivalent idempotency: a
/// context key settles exactly once, replays revert `AlreadySettled`.
pub struct MockChain {
    pub network: Network,
    pub gas_price: u128,
    pub receipt_gas_used: u64,
    pub submit_delay: Duration,
    balances: Mutex<HashMap<Address, U256>>,
    settled: Mutex<HashSet<B256>>,
    pub submitted: Mutex<Vec<SubmittedCall>>,
    receipts: Mutex<HashMap<B256, SettlementReceipt>>,
    forced_simulation: Mutex<Option<SimulationOutcome>>,
    next_tx: AtomicU64,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockChain {
    pub fn new(network: Network, gas_price: u128, receipt_gas_used: u64) -> Self {
        MockChain {
            network,
            gas_price,
            receipt_gas_used,
            submit_delay: Duration::from_millis(0),
            balances: Mutex::new(HashMap::new()),
            settled: Mutex::new(HashSet::new()),
            submitted: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            forced_simulation: Mutex::new(None),
            next_tx: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn set_balance(&self, owner: Address, balance: U256) {
        self.balances.lock().unwrap().insert(owner, balance);
    }

    /// Force every simulation to the given outcome.
    pub fn force_simulation(&self, outcome: SimulationOutcome) {
        *self.forced_simulation.lock().unwrap() = Some(outcome);
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    fn next_hash(&self) -> B256 {
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        B256::from(bytes)
    }
}

#[async_trait]
impl SettlementChain for MockChain {
    fn network(&self) -> Network {
        self.network
    }

    async fn balance_of(&self, _token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&owner)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.gas_price)
    }

    async fn is_settled(&self, _router: Address, key: B256) -> Result<bool, ChainError> {
        Ok(self.settled.lock().unwrap().contains(&key))
    }

    async fn pending_fees(
        &self,
        _router: Address,
        _owner: Address,
        _token: Address,
    ) -> Result<U256, ChainError> {
        Ok(U256::ZERO)
    }

    async fn simulate_settle(
        &self,
        _router: Address,
        call: &SettleCall,
        _from: Address,
        _gas_limit: u64,
    ) -> Result<SimulationOutcome, ChainError> {
        if let Some(outcome) = self.forced_simulation.lock().unwrap().clone() {
            return Ok(outcome);
        }
        let key = context_key(call.from, call.token, call.nonce);
        if self.settled.lock().unwrap().contains(&key) {
            return Ok(SimulationOutcome::Reverted {
                reason: Some("AlreadySettled".to_string()),
                deterministic: true,
            });
        }
        Ok(SimulationOutcome::Ok)
    }

    async fn submit_settle(
        &self,
        _router: Address,
        call: &SettleCall,
        from: Address,
        gas_limit: u64,
    ) -> Result<TransactionHash, ChainError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let hash = self.next_hash();
        let key = context_key(call.from, call.token, call.nonce);
        let fresh = self.settled.lock().unwrap().insert(key);
        self.receipts.lock().unwrap().insert(
            hash,
            SettlementReceipt {
                transaction: TransactionHash(hash),
                status: fresh,
                gas_used: self.receipt_gas_used.min(gas_limit),
                effective_gas_price: self.gas_price,
            },
        );
        self.submitted.lock().unwrap().push(SubmittedCall {
            call: call.clone(),
            from,
            gas_limit,
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TransactionHash(hash))
    }

    async fn await_receipt(
        &self,
        transaction: TransactionHash,
    ) -> Result<SettlementReceipt, ChainError> {
        self.receipts
            .lock()
            .unwrap()
            .get(&transaction.0)
            .cloned()
            .ok_or_else(|| ChainError::ReceiptTimeout("unknown transaction".into()))
    }

    async fn claim_fees(
        &self,
        _router: Address,
        _tokens: Vec<Address>,
        _from: Address,
    ) -> Result<TransactionHash, ChainError> {
        Ok(TransactionHash(self.next_hash()))
    }
}

/// Registry overrides wiring the test router and transfer hook on Sepolia.
pub fn test_overrides() -> RegistryOverrides {
    let mut overrides = RegistryOverrides::default();
    overrides.routers.insert(Network::Sepolia, router());
    overrides.hooks.insert(
        Network::Sepolia,
        HookRegistry {
            transfer: Some(transfer_hook()),
            split: None,
            mint: None,
            reward: None,
            extra: Vec::new(),
        },
    );
    overrides
}

/// Assemble a [`SettlementEngine`] around the mock chain.
///
/// `signer_count` keys are registered for Sepolia; zero keys builds an
/// engine whose pool cannot serve the network.
pub fn engine_around(mock: &Arc<MockChain>, signer_count: u8) -> SettlementEngine {
    let config = Arc::new(FacilitatorConfig::default());
    let registry = Arc::new(NetworkRegistry::new(test_overrides()));

    let mut chains: HashMap<Network, Arc<dyn SettlementChain>> = HashMap::new();
    chains.insert(mock.network, Arc::clone(mock) as Arc<dyn SettlementChain>);
    let chains = Arc::new(ChainMap::new(chains));

    let mut keys = HashMap::new();
    keys.insert(
        Network::Sepolia,
        (0..signer_count).map(pool_signer).collect::<Vec<_>>(),
    );
    let signer_pool = Arc::new(SignerPool::new(keys, &config.signer_pool));

    let price_oracle = Arc::new(PriceOracle::new(None, &config.oracle));
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

    SettlementEngine::new(
        registry,
        chains,
        verifier,
        balance_checker,
        signer_pool,
        price_oracle,
        gas_oracle,
        fee_engine,
        Arc::new(CompositeSink::standard()),
        config,
    )
}

/// Parameters for building a signed settle request.
pub struct RequestSpec {
    pub value: u64,
    pub facilitator_fee: u64,
    pub salt: B256,
    /// Offset of `validBefore` relative to now, seconds (negative = expired).
    pub valid_before_offset: i64,
}

impl Default for RequestSpec {
    fn default() -> Self {
        RequestSpec {
            value: 1_000_000,
            facilitator_fee: 10_000,
            salt: fixed_salt(),
            valid_before_offset: 3600,
        }
    }
}

/// Build a fully signed settle request whose nonce is the commitment over
/// its settlement parameters, exactly as a conforming payer wallet would.
pub fn signed_settle_request(spec: &RequestSpec) -> (SettleRequest, PrivateKeySigner) {
    let signer = PrivateKeySigner::random();
    let payer = signer.address();

    let registry = NetworkRegistry::new(test_overrides());
    let config = registry.get(Network::Sepolia).unwrap();
    let asset = config.default_asset.address;

    let now = UnixTimestamp::now().0 as i64;
    let valid_after = U256::ZERO;
    let valid_before = U256::from((now + spec.valid_before_offset).max(0) as u64);
    let hook_data = Bytes::new();

    let nonce = compute_commitment(&CommitmentParams {
        chain_id: config.chain_id,
        router: router(),
        token: asset,
        from: payer,
        value: U256::from(spec.value),
        valid_after,
        valid_before,
        salt: spec.salt,
        pay_to: final_recipient(),
        facilitator_fee: U256::from(spec.facilitator_fee),
        hook: transfer_hook(),
        hook_data: hook_data.clone(),
    });

    let hash = authorization_signing_hash(
        config,
        asset,
        payer,
        router(),
        U256::from(spec.value),
        valid_after,
        valid_before,
        nonce,
    )
    .unwrap();
    let signature = signer.sign_hash_sync(&hash).unwrap();

    let request = SettleRequest {
        x402_version: 1,
        payment_payload: PaymentPayload {
            x402_version: 1,
            scheme: Scheme::Exact,
            network: Network::Sepolia,
            payload: ExactEvmPayload {
                signature: EvmSignature(signature.as_bytes().to_vec().into()),
                authorization: Authorization {
                    from: payer.into(),
                    to: router().into(),
                    value: TokenAmount(U256::from(spec.value)),
                    valid_after: UnixTimestamp(0),
                    valid_before: UnixTimestamp(valid_before.to::<u64>()),
                    nonce: HexEncodedNonce(nonce),
                },
                settlement_mode: None,
                salt: Some(spec.salt),
                pay_to: Some(final_recipient().into()),
                facilitator_fee: Some(TokenAmount(U256::from(spec.facilitator_fee))),
                hook: Some(transfer_hook().into()),
                hook_data: Some(hook_data.clone()),
            },
        },
        payment_requirements: PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::Sepolia,
            max_amount_required: TokenAmount(U256::from(spec.value)),
            resource: "https://example.com/api".into(),
            description: "integration test".into(),
            mime_type: "application/json".into(),
            pay_to: router().into(),
            max_timeout_seconds: 300,
            asset: asset.into(),
            extra: Some(SettlementExtra {
                settlement_router: router().into(),
                salt: spec.salt,
                pay_to: final_recipient().into(),
                facilitator_fee: TokenAmount(U256::from(spec.facilitator_fee)),
                hook: transfer_hook().into(),
                hook_data,
            }),
        },
    };
    (request, signer)
}
