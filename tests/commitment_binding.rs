//! Commitment binding: mutating any signed parameter refuses settlement.
//!
//! Settlement-parameter tampering (the `extra` struct) is covered in the
//! pipeline suite; this file exercises the authorization side. Mutating an
//! authorization field breaks the EIP-3009 signature itself, and mutating
//! the nonce breaks both the signature and the commitment — either way no
//! transaction may be submitted.

mod common;

use alloy::primitives::{U256, b256};
use common::*;
use router402_facilitator::network::Network;
use router402_facilitator::types::{
    ErrorReason, HexEncodedNonce, SettleRequest, TokenAmount, UnixTimestamp,
};
use std::sync::Arc;

async fn assert_refused_without_submission(
    mock: &Arc<MockChain>,
    engine: &router402_facilitator::settlement::SettlementEngine,
    request: &SettleRequest,
    case: &str,
) {
    let before = mock.submitted_count();
    let response = engine.settle(request).await;
    assert!(!response.success, "{case}: tampered request settled");
    assert!(
        response.transaction.is_none(),
        "{case}: transaction submitted for tampered request"
    );
    assert_eq!(mock.submitted_count(), before, "{case}: submission recorded");
}

#[tokio::test]
async fn tampered_authorization_value_is_refused() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(20_000_000u64));

    // Raise both the signed value and the advertised amount so the request
    // stays internally consistent; only the signature betrays the tamper.
    request.payment_payload.payload.authorization.value = TokenAmount(U256::from(5_000_000u64));
    request.payment_requirements.max_amount_required = TokenAmount(U256::from(5_000_000u64));

    let response = engine.settle(&request).await;
    assert_eq!(response.error_reason, Some(ErrorReason::InvalidSignature));
    assert_refused_without_submission(&mock, &engine, &request, "value").await;
}

#[tokio::test]
async fn tampered_validity_window_is_refused() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    request.payment_payload.payload.authorization.valid_before =
        UnixTimestamp(UnixTimestamp::now().0 + 7200);

    let response = engine.settle(&request).await;
    assert_eq!(response.error_reason, Some(ErrorReason::InvalidSignature));
    assert_refused_without_submission(&mock, &engine, &request, "valid_before").await;
}

#[tokio::test]
async fn swapped_nonce_is_refused() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    request.payment_payload.payload.authorization.nonce = HexEncodedNonce(b256!(
        "0xdddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd"
    ));

    assert_refused_without_submission(&mock, &engine, &request, "nonce").await;
}

#[tokio::test]
async fn commitment_is_bound_to_the_chain_id() {
    use alloy::signers::SignerSync;
    use router402_facilitator::commitment::{CommitmentParams, compute_commitment};
    use router402_facilitator::network::NetworkRegistry;
    use router402_facilitator::types::EvmSignature;
    use router402_facilitator::verify::authorization_signing_hash;

    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    // Recommit the same parameters under Base's chain id and re-sign, as a
    // wallet targeting Base would. Settling against Sepolia must fail the
    // commitment check even though the signature itself is sound.
    let registry = NetworkRegistry::new(test_overrides());
    let config = registry.get(Network::Sepolia).unwrap();
    let authorization = &request.payment_payload.payload.authorization;
    let cross_nonce = compute_commitment(&CommitmentParams {
        chain_id: Network::Base.chain_id(),
        router: router(),
        token: config.default_asset.address,
        from: signer.address(),
        value: authorization.value.0,
        valid_after: authorization.valid_after.into(),
        valid_before: authorization.valid_before.into(),
        salt: fixed_salt(),
        pay_to: final_recipient(),
        facilitator_fee: U256::from(10_000u64),
        hook: transfer_hook(),
        hook_data: alloy::primitives::Bytes::new(),
    });
    let hash = authorization_signing_hash(
        config,
        config.default_asset.address,
        signer.address(),
        router(),
        authorization.value.0,
        authorization.valid_after.into(),
        authorization.valid_before.into(),
        cross_nonce,
    )
    .unwrap();
    let signature = signer.sign_hash_sync(&hash).unwrap();
    request.payment_payload.payload.authorization.nonce = HexEncodedNonce(cross_nonce);
    request.payment_payload.payload.signature =
        EvmSignature(signature.as_bytes().to_vec().into());

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(response.error_reason, Some(ErrorReason::InvalidCommitment));
    assert_eq!(mock.submitted_count(), 0);
}
