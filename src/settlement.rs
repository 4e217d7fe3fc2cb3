//! The settlement state machine.
//!
//! A settle request moves through a directed acyclic pipeline:
//!
//! ```text
//! Received → Validated → Verified → CommitmentChecked → SignerLeased
//!         → GasPriced  → Simulated → Submitted         → Confirmed
//!         → Accounted  → Done
//!                      ↘  any step → Failed
//! ```
//!
//! Any failure drops to `Failed(reason)` and is reported; nothing is retried
//! silently. Pre-submit failures carry no transaction hash and are safe to
//! resubmit; once a hash exists it is always surfaced, revert or not, so
//! callers can audit the outcome on-chain.
//!
//! Idempotency is the router's job: `settleAndExecute` reverts
//! `AlreadySettled` for a known context key. The engine pre-checks
//! `isSettled` to fail fast but never maintains its own ledger.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::balance::BalanceChecker;
use crate::chain::{ChainMap, SettleCall, SettlementChain, SimulationOutcome};
use crate::commitment::{CommitmentParams, context_key, verify_commitment};
use crate::config::FacilitatorConfig;
use crate::fees::FeeEngine;
use crate::gas::GasOracle;
use crate::metrics::{AuditEvent, AuditSink, AuditStage};
use crate::network::{Network, NetworkConfig, NetworkRegistry};
use crate::price::PriceOracle;
use crate::signer_pool::{LeaseOutcome, SignerLease, SignerPool};
use crate::types::{
    ErrorReason, EvmAddress, GasMetrics, Scheme, SettleRequest, SettleResponse, SettlementExtra,
    SupportedPaymentKind, SupportedPaymentKindsResponse, TokenAmount, TransactionHash,
    VerifyRequest, VerifyResponse,
};
use crate::verify::{Verification, Verifier, unwrap_erc6492};

/// Everything the pipeline needs, wired once at startup.
pub struct SettlementEngine {
    registry: Arc<NetworkRegistry>,
    chains: Arc<ChainMap>,
    verifier: Arc<Verifier>,
    balance_checker: Arc<BalanceChecker>,
    signer_pool: Arc<SignerPool>,
    price_oracle: Arc<PriceOracle>,
    gas_oracle: Arc<GasOracle>,
    fee_engine: Arc<FeeEngine>,
    audit: Arc<dyn AuditSink>,
    config: Arc<FacilitatorConfig>,
}

/// Per-request pipeline context: identity, timing, and audit plumbing.
struct Pipeline {
    request_id: String,
    network: Network,
    started: Instant,
    payer: Option<EvmAddress>,
    hook: Option<Address>,
    audit: Arc<dyn AuditSink>,
}

impl Pipeline {
    fn emit(&self, stage: AuditStage, error_reason: Option<ErrorReason>) {
        self.audit.record(&AuditEvent {
            request_id: self.request_id.clone(),
            network: self.network,
            stage,
            payer: self.payer,
            hook: self.hook,
            error_reason,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    fn fail(&self, reason: ErrorReason, transaction: Option<TransactionHash>) -> SettleResponse {
        self.emit(AuditStage::Failed, Some(reason));
        SettleResponse {
            success: false,
            transaction,
            network: self.network,
            payer: self.payer,
            error_reason: Some(reason),
            gas_metrics: None,
        }
    }
}

impl SettlementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<NetworkRegistry>,
        chains: Arc<ChainMap>,
        verifier: Arc<Verifier>,
        balance_checker: Arc<BalanceChecker>,
        signer_pool: Arc<SignerPool>,
        price_oracle: Arc<PriceOracle>,
        gas_oracle: Arc<GasOracle>,
        fee_engine: Arc<FeeEngine>,
        audit: Arc<dyn AuditSink>,
        config: Arc<FacilitatorConfig>,
    ) -> Self {
        SettlementEngine {
            registry,
            chains,
            verifier,
            balance_checker,
            signer_pool,
            price_oracle,
            gas_oracle,
            fee_engine,
            audit,
            config,
        }
    }

    /// The `(scheme, network)` tuples this facilitator accepts: every
    /// network with a live chain client.
    pub fn supported(&self) -> SupportedPaymentKindsResponse {
        SupportedPaymentKindsResponse {
            kinds: self
                .chains
                .networks()
                .into_iter()
                .map(|network| SupportedPaymentKind {
                    scheme: Scheme::Exact,
                    network,
                })
                .collect(),
        }
    }

    /// Run verification and report timing to the sinks.
    pub async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
        let started = Instant::now();
        let network = request.payment_payload.network;
        let verdict = self.verifier.verify(request).await;
        let response = verdict.into_response();
        self.audit
            .observe_verify(network, response.is_valid, started.elapsed().as_secs_f64());
        response
    }

    /// Run the full settlement pipeline.
    pub async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let started = Instant::now();
        let network = request.payment_payload.network;
        let pipeline = Pipeline {
            request_id: Uuid::new_v4().to_string(),
            network,
            started,
            payer: Some(request.payment_payload.payload.authorization.from),
            hook: request
                .payment_requirements
                .extra
                .as_ref()
                .map(|extra| extra.hook.0),
            audit: Arc::clone(&self.audit),
        };
        pipeline.emit(AuditStage::Received, None);

        let response = self.run_pipeline(request, &pipeline).await;
        self.audit
            .observe_settle(network, response.success, started.elapsed().as_secs_f64());
        response
    }

    async fn run_pipeline(&self, request: &SettleRequest, pipeline: &Pipeline) -> SettleResponse {
        // --- Validated -----------------------------------------------------
        let (config, extra) = match self.validate(request) {
            Ok(validated) => validated,
            Err(reason) => return pipeline.fail(reason, None),
        };
        let chain = match self.chains.by_network(pipeline.network) {
            Some(chain) => Arc::clone(chain),
            None => return pipeline.fail(ErrorReason::UnsupportedNetwork, None),
        };
        pipeline.emit(AuditStage::Validated, None);

        // --- Verified ------------------------------------------------------
        // Deliberately re-run in full: merchants may call /settle without a
        // prior /verify. A tolerated invalid_scheme verdict passes through.
        let verdict = self.verifier.verify(request).await;
        if !verdict.is_acceptable() {
            let reason = match &verdict {
                Verification::Invalid { reason, .. } => *reason,
                _ => ErrorReason::UnexpectedSettleError,
            };
            return pipeline.fail(reason, None);
        }
        pipeline.emit(AuditStage::Verified, None);

        // --- CommitmentChecked ---------------------------------------------
        let authorization = &request.payment_payload.payload.authorization;
        let asset = request.payment_requirements.asset.0;
        let params = CommitmentParams {
            chain_id: config.chain_id,
            router: extra.settlement_router.0,
            token: asset,
            from: authorization.from.0,
            value: authorization.value.0,
            valid_after: authorization.valid_after.into(),
            valid_before: authorization.valid_before.into(),
            salt: extra.salt,
            pay_to: extra.pay_to.0,
            facilitator_fee: extra.facilitator_fee.0,
            hook: extra.hook.0,
            hook_data: extra.hook_data.clone(),
        };
        if !verify_commitment(&authorization.nonce.0, &params) {
            return pipeline.fail(ErrorReason::InvalidCommitment, None);
        }
        pipeline.emit(AuditStage::CommitmentChecked, None);

        // Idempotency fast path. Advisory: an RPC failure here falls through
        // to the router's own AlreadySettled revert.
        let key = context_key(authorization.from.0, asset, authorization.nonce.0);
        match chain.is_settled(extra.settlement_router.0, key).await {
            Ok(true) => return pipeline.fail(ErrorReason::AlreadySettled, None),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    request_id = %pipeline.request_id,
                    error = %e,
                    "isSettled pre-check failed, deferring to router"
                );
            }
        }

        // --- SignerLeased --------------------------------------------------
        let lease = match self.signer_pool.acquire(pipeline.network).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(request_id = %pipeline.request_id, error = %e, "no signer");
                return pipeline.fail(ErrorReason::NoSignerAvailable, None);
            }
        };
        pipeline.emit(AuditStage::SignerLeased, None);

        // --- GasPriced -----------------------------------------------------
        let gas_price = self.gas_oracle.gas_price(pipeline.network).await;
        let native_usd = self.price_oracle.native_usd(pipeline.network).await;
        let token_usd = self.price_oracle.token_usd(pipeline.network).await;
        let hook_kind = config.hooks.kind_of(extra.hook.0).unwrap_or_default();
        let token_decimals = config.default_asset.decimals;
        let gas_limit = self.fee_engine.gas_limit_for_hook(
            pipeline.network,
            hook_kind,
            extra.facilitator_fee.0,
            gas_price,
            native_usd,
            token_usd,
            token_decimals,
        );
        pipeline.emit(AuditStage::GasPriced, None);

        // Defensive balance re-check just before submission. A checker
        // failure is swallowed; a confirmed shortfall aborts.
        match self
            .balance_checker
            .check_balance(
                chain.as_ref(),
                authorization.from.0,
                asset,
                authorization.value.0,
                pipeline.network,
            )
            .await
        {
            Ok(check) if !check.has_sufficient => {
                return pipeline.fail(ErrorReason::InsufficientFunds, None);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    request_id = %pipeline.request_id,
                    error = %e,
                    "pre-settle balance check failed, proceeding"
                );
            }
        }

        // --- Build the router call -----------------------------------------
        let unwrapped = match unwrap_erc6492(&request.payment_payload.payload.signature.0) {
            Some(unwrapped) => unwrapped,
            None => return pipeline.fail(ErrorReason::InvalidSignature, None),
        };
        let call = SettleCall {
            token: asset,
            from: authorization.from.0,
            value: authorization.value.0,
            valid_after: authorization.valid_after.into(),
            valid_before: authorization.valid_before.into(),
            nonce: authorization.nonce.0,
            signature: unwrapped.inner,
            salt: extra.salt,
            pay_to: extra.pay_to.0,
            facilitator_fee: extra.facilitator_fee.0,
            hook: extra.hook.0,
            hook_data: extra.hook_data.clone(),
        };

        // --- Simulated -----------------------------------------------------
        // Advisory: some hooks read state only resolvable at execution
        // height. Abort only on reverts known to be deterministic.
        match chain
            .simulate_settle(extra.settlement_router.0, &call, lease.address(), gas_limit)
            .await
        {
            Ok(SimulationOutcome::Ok) => {}
            Ok(SimulationOutcome::Reverted {
                reason,
                deterministic,
            }) => {
                if deterministic {
                    let error_reason = match reason.as_deref() {
                        Some("AlreadySettled") => ErrorReason::AlreadySettled,
                        _ => ErrorReason::UnexpectedSettleError,
                    };
                    return pipeline.fail(error_reason, None);
                }
                tracing::warn!(
                    request_id = %pipeline.request_id,
                    reason = ?reason,
                    "advisory simulation reverted, submitting anyway"
                );
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %pipeline.request_id,
                    error = %e,
                    "simulation unavailable, submitting anyway"
                );
            }
        }
        pipeline.emit(AuditStage::Simulated, None);

        // --- Submitted → Confirmed → Accounted ------------------------------
        // Spawned so a disconnected caller never cancels an in-flight
        // on-chain transaction; the response is simply discarded.
        let submit_task = SubmitTask {
            chain,
            lease,
            call,
            router: extra.settlement_router.0,
            gas_limit,
            network: pipeline.network,
            request_id: pipeline.request_id.clone(),
            payer: pipeline.payer,
            hook: pipeline.hook,
            facilitator_fee: extra.facilitator_fee,
            native_usd,
            token_usd,
            token_decimals,
            started: pipeline.started,
            audit: Arc::clone(&self.audit),
        };
        match tokio::spawn(submit_task.run()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(request_id = %pipeline.request_id, error = %e, "submit task died");
                pipeline.fail(ErrorReason::UnexpectedSettleError, None)
            }
        }
    }

    /// Pre-flight request validation (the `Validated` transition).
    fn validate<'a>(
        &self,
        request: &'a SettleRequest,
    ) -> Result<(&NetworkConfig, &'a SettlementExtra), ErrorReason> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;

        if payload.network != requirements.network {
            return Err(ErrorReason::UnsupportedNetwork);
        }
        let config = self
            .registry
            .get(payload.network)
            .map_err(|_| ErrorReason::UnsupportedNetwork)?;

        let extra = requirements
            .extra
            .as_ref()
            .ok_or(ErrorReason::SettlementRouterNotConfigured)?;
        if !config.is_router_allowed(extra.settlement_router.0) {
            return Err(ErrorReason::SettlementRouterNotConfigured);
        }
        // The advertised receiver of the authorization must be the router
        // itself; the final recipient lives in `extra.pay_to`.
        if requirements.pay_to != extra.settlement_router {
            return Err(ErrorReason::InvalidRecipient);
        }

        let asset = requirements.asset.0;
        let asset_allowed = if self.config.fees.allow_any_supported_asset {
            config.supported_assets.contains(&asset)
        } else {
            asset == config.default_asset.address
        };
        if !asset_allowed {
            return Err(ErrorReason::InvalidParam);
        }
        Ok((config, extra))
    }

    /// Accrued facilitator fees for `owner` on the network's canonical
    /// router.
    pub async fn pending_fees(
        &self,
        network: Network,
        owner: Address,
        token: Address,
    ) -> Result<U256, ErrorReason> {
        let config = self
            .registry
            .get(network)
            .map_err(|_| ErrorReason::UnsupportedNetwork)?;
        let router = config
            .settlement_router
            .ok_or(ErrorReason::SettlementRouterNotConfigured)?;
        let chain = self
            .chains
            .by_network(network)
            .ok_or(ErrorReason::UnsupportedNetwork)?;
        chain
            .pending_fees(router, owner, token)
            .await
            .map_err(|_| ErrorReason::UnexpectedSettleError)
    }

    /// Sweep accrued fees for the given tokens using a pool signer.
    pub async fn claim_fees(
        &self,
        network: Network,
        tokens: Vec<Address>,
    ) -> Result<TransactionHash, ErrorReason> {
        let config = self
            .registry
            .get(network)
            .map_err(|_| ErrorReason::UnsupportedNetwork)?;
        let router = config
            .settlement_router
            .ok_or(ErrorReason::SettlementRouterNotConfigured)?;
        let chain = self
            .chains
            .by_network(network)
            .ok_or(ErrorReason::UnsupportedNetwork)?
            .clone();
        let lease = self
            .signer_pool
            .acquire(network)
            .await
            .map_err(|_| ErrorReason::NoSignerAvailable)?;
        match chain.claim_fees(router, tokens, lease.address()).await {
            Ok(transaction) => {
                lease.release(LeaseOutcome::Success);
                Ok(transaction)
            }
            Err(e) => {
                tracing::warn!(network = %network, error = %e, "claimFees failed");
                lease.release(LeaseOutcome::Failure);
                Err(ErrorReason::UnexpectedSettleError)
            }
        }
    }
}

/// The post-simulation tail of the pipeline, run on its own task so caller
/// disconnects cannot cancel a submitted transaction.
struct SubmitTask {
    chain: Arc<dyn SettlementChain>,
    lease: SignerLease,
    call: SettleCall,
    router: Address,
    gas_limit: u64,
    network: Network,
    request_id: String,
    payer: Option<EvmAddress>,
    hook: Option<Address>,
    facilitator_fee: TokenAmount,
    native_usd: f64,
    token_usd: f64,
    token_decimals: u8,
    started: Instant,
    audit: Arc<dyn AuditSink>,
}

impl SubmitTask {
    fn emit(&self, stage: AuditStage, error_reason: Option<ErrorReason>) {
        self.audit.record(&AuditEvent {
            request_id: self.request_id.clone(),
            network: self.network,
            stage,
            payer: self.payer,
            hook: self.hook,
            error_reason,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    fn fail(&self, reason: ErrorReason, transaction: Option<TransactionHash>) -> SettleResponse {
        self.emit(AuditStage::Failed, Some(reason));
        SettleResponse {
            success: false,
            transaction,
            network: self.network,
            payer: self.payer,
            error_reason: Some(reason),
            gas_metrics: None,
        }
    }

    async fn run(self) -> SettleResponse {
        // --- Submitted -----------------------------------------------------
        let signer = self.lease.address();
        let transaction = match self
            .chain
            .submit_settle(self.router, &self.call, signer, self.gas_limit)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) => {
                // No hash: no on-chain effect, callers are free to resubmit.
                tracing::warn!(
                    request_id = %self.request_id,
                    error = %e,
                    "submission failed"
                );
                let response = self.fail(ErrorReason::UnexpectedSettleError, None);
                self.lease.release(LeaseOutcome::Failure);
                return response;
            }
        };
        self.emit(AuditStage::Submitted, None);

        // --- Confirmed -----------------------------------------------------
        let receipt = match self.chain.await_receipt(transaction).await {
            Ok(receipt) => receipt,
            Err(e) => {
                // The hash exists; surface it even though the state is
                // unknown. The key sits out a quarantine-countable failure.
                tracing::error!(
                    request_id = %self.request_id,
                    transaction = %transaction,
                    error = %e,
                    "receipt wait failed"
                );
                let response = self.fail(ErrorReason::InvalidTransactionState, Some(transaction));
                self.lease.release(LeaseOutcome::Failure);
                return response;
            }
        };

        if !receipt.status {
            // Mined but reverted. Re-simulate once to classify; the router's
            // AlreadySettled is the interesting deterministic case.
            let reason = match self
                .chain
                .simulate_settle(self.router, &self.call, signer, self.gas_limit)
                .await
            {
                Ok(SimulationOutcome::Reverted {
                    reason: Some(reason),
                    ..
                }) if reason == "AlreadySettled" => ErrorReason::AlreadySettled,
                _ => ErrorReason::UnexpectedSettleError,
            };
            let response = self.fail(reason, Some(transaction));
            // The transaction mined; the key's nonce advanced cleanly.
            self.lease.release(LeaseOutcome::Success);
            return response;
        }
        self.emit(AuditStage::Confirmed, None);

        // --- Accounted -----------------------------------------------------
        let gas_metrics = self.account(receipt.gas_used, receipt.effective_gas_price);
        self.audit.observe_gas_used(self.network, receipt.gas_used);
        self.emit(AuditStage::Accounted, None);
        self.emit(AuditStage::Done, None);
        self.lease.release(LeaseOutcome::Success);

        SettleResponse {
            success: true,
            transaction: Some(transaction),
            network: self.network,
            payer: self.payer,
            error_reason: None,
            gas_metrics: Some(gas_metrics),
        }
    }

    /// Build [`GasMetrics`]. Accounting never mutates the settlement
    /// outcome; an unprofitable settlement still succeeded.
    fn account(&self, gas_used: u64, effective_gas_price: u128) -> GasMetrics {
        let cost_native = (gas_used as f64) * (effective_gas_price as f64) / 1e18;
        let cost_usd = cost_native * self.native_usd;

        let fee_base_units: u128 = self.facilitator_fee.0.try_into().unwrap_or(u128::MAX);
        let fee_usd =
            (fee_base_units as f64) / 10f64.powi(self.token_decimals as i32) * self.token_usd;

        let profit_usd = fee_usd - cost_usd;
        let profit_margin_percent = if fee_usd > 0.0 {
            profit_usd / fee_usd * 100.0
        } else {
            0.0
        };
        let profitable = profit_usd > 0.0;

        if !profitable {
            tracing::warn!(
                request_id = %self.request_id,
                network = %self.network,
                cost_usd,
                fee_usd,
                "unprofitable settlement honoured"
            );
        }

        GasMetrics {
            gas_used,
            effective_gas_price,
            actual_gas_cost_native: cost_native,
            actual_gas_cost_usd: cost_usd,
            facilitator_fee: self.facilitator_fee,
            facilitator_fee_usd: fee_usd,
            profit_usd,
            profit_margin_percent,
            profitable,
        }
    }
}
