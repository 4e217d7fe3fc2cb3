//! Off-chain verification of EIP-3009 payment authorizations.
//!
//! The verifier runs the canonical facilitator checks — scheme and network
//! consistency, recipient, amount, validity window, EIP-712 signature
//! recovery — against the merchant-advertised requirements, without touching
//! any chain state-changing operation.
//!
//! Verdicts are three-valued (see [`Verification`]): `Valid`, `Invalid` with
//! a machine-readable reason, or `Tolerated` for payloads this facilitator
//! cannot check locally (unknown EIP-712 domain metadata, smart-account
//! signatures) but the router will still validate on-chain at settlement.
//! Only `invalid_scheme` is ever tolerated; no other reason passes through.
//!
//! Invalid input returns a verdict, never an error; failures of the optional
//! balance probe are swallowed so a broken RPC endpoint does not block
//! payments.

use alloy::primitives::{Address, B256, Bytes, Signature, U256};
use alloy::{hex, sol};
use alloy::sol_types::{Eip712Domain, SolStruct, SolValue};
use std::sync::Arc;

use crate::balance::BalanceChecker;
use crate::chain::ChainMap;
use crate::network::{NetworkConfig, NetworkRegistry};
use crate::types::{ErrorReason, EvmAddress, UnixTimestamp, VerifyRequest, VerifyResponse};

sol! {
    /// The ERC-3009 struct the payer signs.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// Prefix of an ERC-6492 wrapped signature:
    /// `(address factory, bytes factoryCalldata, bytes innerSig)`.
    struct Sig6492 {
        address factory;
        bytes factory_calldata;
        bytes inner_sig;
    }
}

/// The fixed 32-byte magic suffix defined by
/// [ERC-6492](https://eips.ethereum.org/EIPS/eip-6492). Any signature ending
/// with this constant carries deployment metadata for a counterfactual
/// wallet ahead of the inner signature.
const ERC6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// A signature with any ERC-6492 wrapper stripped.
#[derive(Debug, Clone)]
pub struct UnwrappedSignature {
    /// The bytes handed to the router (and to local recovery when 65 bytes).
    pub inner: Bytes,
    /// Whether a 6492 wrapper was removed.
    pub was_wrapped: bool,
}

/// Strip an ERC-6492 wrapper if present.
///
/// Returns `None` when the suffix matches but the prefix does not decode,
/// which is a malformed signature rather than a plain one.
pub fn unwrap_erc6492(signature: &Bytes) -> Option<UnwrappedSignature> {
    let bytes = signature.as_ref();
    let is_wrapped = bytes.len() >= 32 && bytes[bytes.len() - 32..] == ERC6492_MAGIC_SUFFIX;
    if !is_wrapped {
        return Some(UnwrappedSignature {
            inner: signature.clone(),
            was_wrapped: false,
        });
    }
    let body = &bytes[..bytes.len() - 32];
    let decoded = Sig6492::abi_decode_params(body).ok()?;
    Some(UnwrappedSignature {
        inner: decoded.inner_sig,
        was_wrapped: true,
    })
}

/// Outcome of verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every check passed; `payer` recovered from the signature.
    Valid { payer: EvmAddress },
    /// A check failed for a reportable reason.
    Invalid {
        reason: ErrorReason,
        payer: Option<EvmAddress>,
    },
    /// The payload could not be checked locally; the settlement path treats
    /// this as pass-through and defers to on-chain validation.
    Tolerated {
        reason: ErrorReason,
        payer: EvmAddress,
    },
}

impl Verification {
    /// Whether settlement may proceed on this verdict.
    pub fn is_acceptable(&self) -> bool {
        matches!(
            self,
            Verification::Valid { .. }
                | Verification::Tolerated {
                    reason: ErrorReason::InvalidScheme,
                    ..
                }
        )
    }

    pub fn payer(&self) -> Option<EvmAddress> {
        match self {
            Verification::Valid { payer } | Verification::Tolerated { payer, .. } => Some(*payer),
            Verification::Invalid { payer, .. } => *payer,
        }
    }

    /// Collapse to the wire response. Tolerated verdicts report valid while
    /// keeping the payer visible.
    pub fn into_response(self) -> VerifyResponse {
        match self {
            Verification::Valid { payer } | Verification::Tolerated { payer, .. } => {
                VerifyResponse::valid(payer)
            }
            Verification::Invalid { reason, payer } => VerifyResponse::invalid(payer, reason),
        }
    }
}

/// Compute the EIP-712 signing hash for an authorization under a token's
/// advertised domain.
pub fn authorization_signing_hash(
    config: &NetworkConfig,
    asset: Address,
    from: Address,
    to: Address,
    value: U256,
    valid_after: U256,
    valid_before: U256,
    nonce: B256,
) -> Option<B256> {
    let eip712 = config.default_asset.eip712.as_ref()?;
    let domain = Eip712Domain::new(
        Some(eip712.name.clone().into()),
        Some(eip712.version.clone().into()),
        Some(U256::from(config.chain_id)),
        Some(asset),
        None,
    );
    let transfer = TransferWithAuthorization {
        from,
        to,
        value,
        validAfter: valid_after,
        validBefore: valid_before,
        nonce,
    };
    Some(transfer.eip712_signing_hash(&domain))
}

/// The verifier service. Construction wires in the registry and, optionally,
/// chain access for balance probing.
pub struct Verifier {
    registry: Arc<NetworkRegistry>,
    chains: Arc<ChainMap>,
    balance_checker: Arc<BalanceChecker>,
    /// Probe the payer's balance during verification. Settlement re-checks
    /// defensively regardless.
    check_balance: bool,
}

impl Verifier {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        chains: Arc<ChainMap>,
        balance_checker: Arc<BalanceChecker>,
        check_balance: bool,
    ) -> Self {
        Verifier {
            registry,
            chains,
            balance_checker,
            check_balance,
        }
    }

    /// Verify a payment payload against the advertised requirements.
    pub async fn verify(&self, request: &VerifyRequest) -> Verification {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let authorization = &payload.payload.authorization;
        let payer = authorization.from;

        if payload.scheme != requirements.scheme {
            return Verification::Invalid {
                reason: ErrorReason::InvalidScheme,
                payer: Some(payer),
            };
        }
        if payload.network != requirements.network {
            return Verification::Invalid {
                reason: ErrorReason::UnsupportedNetwork,
                payer: Some(payer),
            };
        }
        let config = match self.registry.get(payload.network) {
            Ok(config) => config,
            Err(_) => {
                return Verification::Invalid {
                    reason: ErrorReason::UnsupportedNetwork,
                    payer: Some(payer),
                };
            }
        };

        // `to` must be the advertised settlement target (the router).
        if authorization.to != requirements.pay_to {
            return Verification::Invalid {
                reason: ErrorReason::InvalidRecipient,
                payer: Some(payer),
            };
        }
        // Exact scheme: the signed value is the advertised amount.
        if authorization.value != requirements.max_amount_required {
            return Verification::Invalid {
                reason: ErrorReason::InvalidParam,
                payer: Some(payer),
            };
        }

        let now = UnixTimestamp::now();
        if now < authorization.valid_after {
            return Verification::Invalid {
                reason: ErrorReason::AuthorizationNotYetValid,
                payer: Some(payer),
            };
        }
        if now > authorization.valid_before {
            return Verification::Invalid {
                reason: ErrorReason::AuthorizationExpired,
                payer: Some(payer),
            };
        }

        let mut verdict = self.verify_signature(config, requirements.asset.0, request, payer);

        if verdict.is_acceptable() && self.check_balance {
            if let Some(insufficient) = self.probe_balance(request, payer).await {
                verdict = insufficient;
            }
        }
        verdict
    }

    fn verify_signature(
        &self,
        config: &NetworkConfig,
        asset: Address,
        request: &VerifyRequest,
        payer: EvmAddress,
    ) -> Verification {
        let payload = &request.payment_payload.payload;
        let authorization = &payload.authorization;

        let unwrapped = match unwrap_erc6492(&payload.signature.0) {
            Some(unwrapped) => unwrapped,
            None => {
                return Verification::Invalid {
                    reason: ErrorReason::InvalidSignature,
                    payer: Some(payer),
                };
            }
        };

        let hash = authorization_signing_hash(
            config,
            asset,
            authorization.from.0,
            authorization.to.0,
            authorization.value.0,
            authorization.valid_after.into(),
            authorization.valid_before.into(),
            authorization.nonce.0,
        );
        let hash = match hash {
            Some(hash) => hash,
            None => {
                // No domain metadata for this token: the facilitator cannot
                // recompute the signing hash. Defer to on-chain validation.
                tracing::debug!(
                    network = %config.network,
                    asset = %asset,
                    "no EIP-712 domain metadata, tolerating payload"
                );
                return Verification::Tolerated {
                    reason: ErrorReason::InvalidScheme,
                    payer,
                };
            }
        };

        if unwrapped.inner.len() != 65 {
            // Smart-account signature (ERC-1271 style): not recoverable
            // locally, validated by the token contract during settlement.
            tracing::debug!(
                payer = %payer,
                len = unwrapped.inner.len(),
                wrapped = unwrapped.was_wrapped,
                "non-ECDSA signature, tolerating payload"
            );
            return Verification::Tolerated {
                reason: ErrorReason::InvalidScheme,
                payer,
            };
        }

        let signature = match Signature::try_from(unwrapped.inner.as_ref()) {
            Ok(signature) => signature,
            Err(_) => {
                return Verification::Invalid {
                    reason: ErrorReason::InvalidSignature,
                    payer: Some(payer),
                };
            }
        };
        match signature.recover_address_from_prehash(&hash) {
            Ok(recovered) if recovered == authorization.from.0 => {
                Verification::Valid { payer }
            }
            Ok(recovered) => {
                tracing::debug!(
                    expected = %authorization.from,
                    recovered = %recovered,
                    "signature recovered to a different address"
                );
                Verification::Invalid {
                    reason: ErrorReason::InvalidSignature,
                    payer: Some(payer),
                }
            }
            Err(_) => Verification::Invalid {
                reason: ErrorReason::InvalidSignature,
                payer: Some(payer),
            },
        }
    }

    /// Balance probe. Returns `Some(Invalid)` only on a confirmed shortfall;
    /// probe failures are logged and swallowed.
    async fn probe_balance(
        &self,
        request: &VerifyRequest,
        payer: EvmAddress,
    ) -> Option<Verification> {
        let requirements = &request.payment_requirements;
        let chain = self.chains.by_network(requirements.network)?;
        match self
            .balance_checker
            .check_balance(
                chain.as_ref(),
                payer.0,
                requirements.asset.0,
                requirements.max_amount_required.0,
                requirements.network,
            )
            .await
        {
            Ok(check) if !check.has_sufficient => {
                tracing::debug!(
                    payer = %payer,
                    balance = %check.balance,
                    required = %check.required,
                    "payer balance below required amount"
                );
                Some(Verification::Invalid {
                    reason: ErrorReason::InsufficientFunds,
                    payer: Some(payer),
                })
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "balance probe failed, not blocking verification");
                None
            }
        }
    }
}
