//! Wire objects exchanged with clients and resource servers.
//!
//! These types define the JSON surface of the facilitator: payment payloads,
//! merchant requirements, and the verify/settle responses. Field names follow
//! the x402 conventions (camelCase on the wire), 256-bit integers are decimal
//! strings, and addresses are `0x`-prefixed hex compared case-insensitively.

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::network::Network;

/// Payment scheme identifier. Only `exact` is defined by this facilitator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    #[serde(rename = "exact")]
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An EVM address on the wire. Serialized as `0x`-prefixed hex; equality is
/// byte-level, which makes comparisons case-insensitive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvmAddress(pub Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Address> for EvmAddress {
    fn from(value: Address) -> Self {
        EvmAddress(value)
    }
}

impl From<EvmAddress> for Address {
    fn from(value: EvmAddress) -> Self {
        value.0
    }
}

/// A token amount in base units, serialized as a decimal string.
///
/// Accepts either a JSON string (`"1000000"`) or a JSON integer for
/// compatibility with lenient clients; always emits a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = TokenAmount;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or integer token amount")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                U256::from_str(v)
                    .map(TokenAmount)
                    .map_err(|e| E::custom(format!("invalid token amount {v:?}: {e}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(TokenAmount(U256::from(v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// A unix timestamp in seconds, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    /// Current wall-clock time. Falls back to zero before the epoch, which
    /// only happens on a badly broken clock.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        UnixTimestamp(secs)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TsVisitor;

        impl Visitor<'_> for TsVisitor {
            type Value = UnixTimestamp;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or integer unix timestamp")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse::<u64>()
                    .map(UnixTimestamp)
                    .map_err(|e| E::custom(format!("invalid timestamp {v:?}: {e}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(UnixTimestamp(v))
            }
        }

        deserializer.deserialize_any(TsVisitor)
    }
}

/// The 32-byte ERC-3009 nonce. Under this protocol it carries the settlement
/// commitment rather than random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HexEncodedNonce(pub B256);

impl Display for HexEncodedNonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw signature bytes: a 65-byte ECDSA signature, possibly ERC-6492 wrapped
/// for pre-deploy smart accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvmSignature(pub Bytes);

/// A transaction hash returned from settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionHash(pub B256);

impl Display for TransactionHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The EIP-3009 primitive: a signed permission to move `value` tokens from
/// `from` to `to` within a validity window, replay-protected by `nonce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// How the payer expects the authorization to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementMode {
    /// Settle through the SettlementRouter with hook execution.
    #[serde(rename = "router")]
    Router,
    /// Plain `transferWithAuthorization` directly against the token.
    #[serde(rename = "direct")]
    Direct,
}

/// The scheme-specific body of a [`PaymentPayload`].
///
/// The optional settlement fields echo what the payer signed into the
/// commitment; the authoritative copies live in
/// [`PaymentRequirements::extra`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: Authorization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_mode: Option<SettlementMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator_fee: Option<TokenAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_data: Option<Bytes>,
}

/// A client-submitted payment: scheme, network, and the signed authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(default = "default_x402_version", rename = "x402Version")]
    pub x402_version: u8,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactEvmPayload,
}

fn default_x402_version() -> u8 {
    1
}

/// Settlement parameters the merchant advertised and the payer committed to.
///
/// Every field here is bound into the authorization nonce; mutating any of
/// them after signing invalidates the EIP-3009 signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementExtra {
    pub settlement_router: EvmAddress,
    pub salt: B256,
    /// Final funds recipient, distinct from the router in
    /// [`PaymentRequirements::pay_to`].
    pub pay_to: EvmAddress,
    pub facilitator_fee: TokenAmount,
    pub hook: EvmAddress,
    #[serde(default)]
    pub hook_data: Bytes,
}

/// Merchant-advertised requirements for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// For router settlements this is the SettlementRouter address the
    /// authorization's `to` must equal.
    pub pay_to: EvmAddress,
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,
    pub asset: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<SettlementExtra>,
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

fn default_max_timeout() -> u64 {
    300
}

/// `POST /verify` and `POST /settle` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default = "default_x402_version", rename = "x402Version")]
    pub x402_version: u8,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// The settle request carries the same shape as the verify request.
pub type SettleRequest = VerifyRequest;

/// Machine-readable failure reasons surfaced verbatim to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidSignature,
    AuthorizationExpired,
    AuthorizationNotYetValid,
    InvalidRecipient,
    InsufficientFunds,
    InvalidScheme,
    InvalidCommitment,
    AlreadySettled,
    SettlementRouterNotConfigured,
    InvalidTransactionState,
    UnexpectedSettleError,
    UnsupportedNetwork,
    NoSignerAvailable,
    InvalidParam,
}

impl ErrorReason {
    /// The wire string, also used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidSignature => "invalid_signature",
            ErrorReason::AuthorizationExpired => "authorization_expired",
            ErrorReason::AuthorizationNotYetValid => "authorization_not_yet_valid",
            ErrorReason::InvalidRecipient => "invalid_recipient",
            ErrorReason::InsufficientFunds => "insufficient_funds",
            ErrorReason::InvalidScheme => "invalid_scheme",
            ErrorReason::InvalidCommitment => "invalid_commitment",
            ErrorReason::AlreadySettled => "already_settled",
            ErrorReason::SettlementRouterNotConfigured => "settlement_router_not_configured",
            ErrorReason::InvalidTransactionState => "invalid_transaction_state",
            ErrorReason::UnexpectedSettleError => "unexpected_settle_error",
            ErrorReason::UnsupportedNetwork => "unsupported_network",
            ErrorReason::NoSignerAvailable => "no_signer_available",
            ErrorReason::InvalidParam => "invalid_param",
        }
    }
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST /verify` response. Always HTTP 200 for both valid and invalid
/// outcomes; only malformed requests map to 4xx.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<EvmAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
}

impl VerifyResponse {
    pub fn valid(payer: EvmAddress) -> Self {
        VerifyResponse {
            is_valid: true,
            payer: Some(payer),
            invalid_reason: None,
        }
    }

    pub fn invalid(payer: Option<EvmAddress>, reason: ErrorReason) -> Self {
        VerifyResponse {
            is_valid: false,
            payer,
            invalid_reason: Some(reason),
        }
    }
}

/// Post-receipt settlement economics. Produced by the accounting step and
/// never fed back into the settlement outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasMetrics {
    pub gas_used: u64,
    pub effective_gas_price: u128,
    /// Gas cost in native token units (ether-scale, not wei).
    pub actual_gas_cost_native: f64,
    pub actual_gas_cost_usd: f64,
    pub facilitator_fee: TokenAmount,
    pub facilitator_fee_usd: f64,
    pub profit_usd: f64,
    pub profit_margin_percent: f64,
    pub profitable: bool,
}

/// `POST /settle` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    /// Always present once a transaction was submitted, regardless of revert
    /// status, so callers can audit the outcome on-chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<EvmAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_metrics: Option<GasMetrics>,
}

impl SettleResponse {
    pub fn failed(network: Network, payer: Option<EvmAddress>, reason: ErrorReason) -> Self {
        SettleResponse {
            success: false,
            transaction: None,
            network,
            payer,
            error_reason: Some(reason),
            gas_metrics: None,
        }
    }
}

/// One `(scheme, network)` tuple in the `GET /supported` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedPaymentKind {
    pub scheme: Scheme,
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// Generic JSON error body for 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
