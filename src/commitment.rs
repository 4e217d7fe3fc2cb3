//! Commitment codec: the canonical digest binding settlement parameters.
//!
//! The payer signs an EIP-3009 authorization whose `nonce` is not random: it
//! is the keccak256 digest of every settlement parameter the merchant
//! advertised, computed over a packed encoding. Any post-signature mutation
//! of any parameter therefore invalidates the signature itself — this digest
//! is the sole cryptographic barrier against facilitator or merchant
//! tampering.
//!
//! The tag string, the field order, and the pre-hashing of `hookData` are
//! part of the wire contract shared with the on-chain router and the client
//! SDKs. Changing any of them is a protocol break.

use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use rand::RngCore;

/// Domain-separation tag prepended to the packed encoding.
pub const COMMITMENT_TAG: &str = "x402-router/settle/1";

/// Every parameter bound into the authorization nonce.
///
/// Field order here mirrors the packed encoding order; see
/// [`compute_commitment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentParams {
    pub chain_id: u64,
    pub router: Address,
    pub token: Address,
    pub from: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub salt: B256,
    pub pay_to: Address,
    pub facilitator_fee: U256,
    pub hook: Address,
    pub hook_data: Bytes,
}

/// Compute the settlement commitment digest.
///
/// Layout (solidity `abi.encodePacked` equivalent):
/// `tag ‖ chainId:u256 ‖ router:20 ‖ token:20 ‖ from:20 ‖ value:u256 ‖
/// validAfter:u256 ‖ validBefore:u256 ‖ salt:32 ‖ payTo:20 ‖
/// facilitatorFee:u256 ‖ hook:20 ‖ keccak256(hookData):32`.
///
/// `hookData` is pre-hashed so the commitment stays fixed-size regardless of
/// hook payload length, matching the router's on-chain recomputation.
pub fn compute_commitment(params: &CommitmentParams) -> B256 {
    let mut packed = Vec::with_capacity(COMMITMENT_TAG.len() + 32 * 6 + 20 * 4 + 32);
    packed.extend_from_slice(COMMITMENT_TAG.as_bytes());
    packed.extend_from_slice(&U256::from(params.chain_id).to_be_bytes::<32>());
    packed.extend_from_slice(params.router.as_slice());
    packed.extend_from_slice(params.token.as_slice());
    packed.extend_from_slice(params.from.as_slice());
    packed.extend_from_slice(&params.value.to_be_bytes::<32>());
    packed.extend_from_slice(&params.valid_after.to_be_bytes::<32>());
    packed.extend_from_slice(&params.valid_before.to_be_bytes::<32>());
    packed.extend_from_slice(params.salt.as_slice());
    packed.extend_from_slice(params.pay_to.as_slice());
    packed.extend_from_slice(&params.facilitator_fee.to_be_bytes::<32>());
    packed.extend_from_slice(params.hook.as_slice());
    packed.extend_from_slice(keccak256(&params.hook_data).as_slice());
    keccak256(&packed)
}

/// 32 random bytes contributed by the payer to bind a commitment to a unique
/// payment event.
pub fn generate_salt() -> B256 {
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    B256::from(salt)
}

/// Check that an authorization nonce equals the commitment over `params`.
pub fn verify_commitment(nonce: &B256, params: &CommitmentParams) -> bool {
    compute_commitment(params) == *nonce
}

/// The idempotency identifier mirrored on-chain by the router:
/// `keccak256(from ‖ token ‖ nonce)`.
pub fn context_key(from: Address, token: Address, nonce: B256) -> B256 {
    let mut packed = Vec::with_capacity(20 + 20 + 32);
    packed.extend_from_slice(from.as_slice());
    packed.extend_from_slice(token.as_slice());
    packed.extend_from_slice(nonce.as_slice());
    keccak256(&packed)
}
