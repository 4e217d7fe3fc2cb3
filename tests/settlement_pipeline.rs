//! End-to-end settlement pipeline scenarios over the scripted chain.
//!
//! These exercise the verify → commitment → lease → simulate → submit →
//! confirm → account pipeline with genuinely signed EIP-3009 authorizations
//! whose nonces carry real commitments.

mod common;

use alloy::primitives::{B256, U256, b256};
use common::*;
use router402_facilitator::chain::SimulationOutcome;
use router402_facilitator::network::Network;
use router402_facilitator::types::{ErrorReason, EvmAddress, TokenAmount};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn happy_path_settles_and_is_profitable() {
    // 175k gas at 10 gwei and $3000 ETH costs ~$5.25; a $10 fee clears it.
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 2);
    let spec = RequestSpec {
        value: 20_000_000,
        facilitator_fee: 10_000_000,
        ..RequestSpec::default()
    };
    let (request, signer) = signed_settle_request(&spec);
    mock.set_balance(signer.address(), U256::from(30_000_000u64));

    // Verify first, as a resource server would.
    let verify = engine.verify(&request).await;
    assert!(verify.is_valid, "verify rejected: {:?}", verify.invalid_reason);
    assert_eq!(verify.payer, Some(EvmAddress(signer.address())));

    let response = engine.settle(&request).await;
    assert!(response.success, "settle failed: {:?}", response.error_reason);
    assert!(response.transaction.is_some());
    assert_eq!(response.payer, Some(EvmAddress(signer.address())));

    let metrics = response.gas_metrics.expect("metrics accounted");
    assert!(metrics.profitable, "expected profit: {metrics:?}");
    assert!(metrics.profit_usd > 0.0);
    assert_eq!(metrics.gas_used, 175_000);
    assert_eq!(metrics.facilitator_fee, TokenAmount(U256::from(10_000_000u64)));

    // Exactly one submission, with the affordability-bounded gas limit plus
    // the transfer hook overhead: $10 × 0.9 / $3000 at 10 gwei = 300k gas,
    // plus 45k for the hook.
    assert_eq!(mock.submitted_count(), 1);
    let submitted = mock.submitted.lock().unwrap();
    assert_eq!(submitted[0].gas_limit, 345_000);
    assert_eq!(submitted[0].call.pay_to, final_recipient());
    assert_eq!(submitted[0].call.hook, transfer_hook());
}

#[tokio::test]
async fn commitment_tamper_is_rejected_without_submission() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    // Merchant substitutes the final recipient after signing. The signature
    // still verifies (it covers the original nonce), but the commitment no
    // longer matches.
    let extra = request.payment_requirements.extra.as_mut().unwrap();
    extra.pay_to = pool_signer(99).into();

    let verify = engine.verify(&request).await;
    assert!(verify.is_valid, "signature itself is still valid");

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(response.error_reason, Some(ErrorReason::InvalidCommitment));
    assert!(response.transaction.is_none());
    assert_eq!(mock.submitted_count(), 0, "no transaction may be submitted");
}

#[tokio::test]
async fn every_tampered_extra_field_breaks_the_commitment() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);

    let tamper_cases: Vec<Box<dyn Fn(&mut router402_facilitator::types::SettleRequest)>> = vec![
        Box::new(|r| {
            r.payment_requirements.extra.as_mut().unwrap().salt = b256!(
                "0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
            );
        }),
        Box::new(|r| {
            r.payment_requirements.extra.as_mut().unwrap().facilitator_fee =
                TokenAmount(U256::from(1u64));
        }),
        Box::new(|r| {
            r.payment_requirements.extra.as_mut().unwrap().hook = pool_signer(7).into();
        }),
        Box::new(|r| {
            r.payment_requirements.extra.as_mut().unwrap().hook_data =
                alloy::primitives::Bytes::from(vec![0x01]);
        }),
    ];

    for (i, tamper) in tamper_cases.into_iter().enumerate() {
        let (mut request, signer) = signed_settle_request(&RequestSpec::default());
        mock.set_balance(signer.address(), U256::from(2_000_000u64));
        tamper(&mut request);

        let response = engine.settle(&request).await;
        assert!(!response.success, "tamper case {i} settled");
        assert_eq!(
            response.error_reason,
            Some(ErrorReason::InvalidCommitment),
            "tamper case {i}"
        );
    }
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn replay_returns_already_settled() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let first = engine.settle(&request).await;
    assert!(first.success);
    assert_eq!(mock.submitted_count(), 1);

    // Same payload again: the isSettled pre-check fires, nothing is
    // resubmitted.
    let second = engine.settle(&request).await;
    assert!(!second.success);
    assert_eq!(second.error_reason, Some(ErrorReason::AlreadySettled));
    assert_eq!(mock.submitted_count(), 1, "no second on-chain settlement");
}

#[tokio::test]
async fn expired_authorization_refused_by_verify_and_settle() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let spec = RequestSpec {
        valid_before_offset: -60,
        ..RequestSpec::default()
    };
    let (request, signer) = signed_settle_request(&spec);
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let verify = engine.verify(&request).await;
    assert!(!verify.is_valid);
    assert_eq!(
        verify.invalid_reason,
        Some(ErrorReason::AuthorizationExpired)
    );

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(
        response.error_reason,
        Some(ErrorReason::AuthorizationExpired)
    );
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn insufficient_balance_short_circuits_both_paths() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    // Payer holds half the authorized value.
    mock.set_balance(signer.address(), U256::from(500_000u64));

    let verify = engine.verify(&request).await;
    assert!(!verify.is_valid);
    assert_eq!(verify.invalid_reason, Some(ErrorReason::InsufficientFunds));

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(response.error_reason, Some(ErrorReason::InsufficientFunds));
    assert_eq!(mock.submitted_count(), 0, "settle never submits");
}

#[tokio::test]
async fn unprofitable_settlement_is_honoured_with_warning_metrics() {
    // 500 gwei gas: the minimum 130k+45k gas costs ~$262 while the signed
    // fee is $0.01. Policy: honour signed authorizations anyway.
    let mock = Arc::new(MockChain::new(Network::Sepolia, 500 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let response = engine.settle(&request).await;
    assert!(response.success, "unprofitable settlements still settle");
    let metrics = response.gas_metrics.expect("metrics accounted");
    assert!(!metrics.profitable);
    assert!(metrics.profit_usd < 0.0);
    assert!(metrics.actual_gas_cost_usd > metrics.facilitator_fee_usd);

    // The tiny fee cannot afford the minimum; the minimum still applies.
    let submitted = mock.submitted.lock().unwrap();
    assert_eq!(submitted[0].gas_limit, 130_000 + 45_000);
}

#[tokio::test]
async fn overlapping_settlements_share_one_signer_serially() {
    let mock = Arc::new(
        MockChain::new(Network::Sepolia, 10 * GWEI, 175_000)
            .with_submit_delay(Duration::from_millis(100)),
    );
    let engine = Arc::new(engine_around(&mock, 1));

    // Distinct salts give distinct commitments and context keys.
    let salts: [B256; 2] = [
        b256!("0x0101010101010101010101010101010101010101010101010101010101010101"),
        b256!("0x0202020202020202020202020202020202020202020202020202020202020202"),
    ];
    let mut handles = Vec::new();
    for salt in salts {
        let (request, signer) = signed_settle_request(&RequestSpec {
            salt,
            ..RequestSpec::default()
        });
        mock.set_balance(signer.address(), U256::from(2_000_000u64));
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move { engine.settle(&request).await }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(response.success, "failed: {:?}", response.error_reason);
    }

    assert_eq!(mock.submitted_count(), 2);
    assert_eq!(
        mock.max_in_flight.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "two submissions overlapped on one signer key"
    );
    // Both went out from the single pool key.
    let submitted = mock.submitted.lock().unwrap();
    assert!(submitted.iter().all(|s| s.from == pool_signer(0)));
}

#[tokio::test]
async fn deterministic_simulation_revert_aborts_submission() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    mock.force_simulation(SimulationOutcome::Reverted {
        reason: Some("UnsupportedToken".to_string()),
        deterministic: true,
    });
    let engine = engine_around(&mock, 1);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(
        response.error_reason,
        Some(ErrorReason::UnexpectedSettleError)
    );
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn advisory_simulation_revert_still_submits() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    mock.force_simulation(SimulationOutcome::Reverted {
        reason: Some("HookStateNotYetResolvable".to_string()),
        deterministic: false,
    });
    let engine = engine_around(&mock, 1);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let response = engine.settle(&request).await;
    assert!(response.success, "advisory reverts must not abort");
    assert_eq!(mock.submitted_count(), 1);
}

#[tokio::test]
async fn unwhitelisted_router_is_refused() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let rogue = pool_signer(66);
    request
        .payment_requirements
        .extra
        .as_mut()
        .unwrap()
        .settlement_router = rogue.into();

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(
        response.error_reason,
        Some(ErrorReason::SettlementRouterNotConfigured)
    );
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn missing_extra_is_refused() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));
    request.payment_requirements.extra = None;

    let response = engine.settle(&request).await;
    assert_eq!(
        response.error_reason,
        Some(ErrorReason::SettlementRouterNotConfigured)
    );
}

#[tokio::test]
async fn no_signer_available_fails_the_settlement() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 0);
    let (request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(response.error_reason, Some(ErrorReason::NoSignerAvailable));
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn non_default_asset_is_refused_under_single_asset_policy() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let (mut request, signer) = signed_settle_request(&RequestSpec::default());
    mock.set_balance(signer.address(), U256::from(2_000_000u64));
    request.payment_requirements.asset = pool_signer(42).into();

    let response = engine.settle(&request).await;
    assert!(!response.success);
    assert_eq!(response.error_reason, Some(ErrorReason::InvalidParam));
    assert_eq!(mock.submitted_count(), 0);
}

#[tokio::test]
async fn supported_lists_the_configured_network() {
    let mock = Arc::new(MockChain::new(Network::Sepolia, 10 * GWEI, 175_000));
    let engine = engine_around(&mock, 1);
    let supported = engine.supported();
    assert_eq!(supported.kinds.len(), 1);
    assert_eq!(supported.kinds[0].network, Network::Sepolia);
}
