//! Core of the router402 x402 facilitator.
//!
//! The facilitator mediates between a payer wallet, a resource server, and one
//! or more EVM networks. It accepts signed EIP-3009 authorizations whose nonce
//! is a commitment over every settlement parameter, verifies them against the
//! merchant-advertised requirements, and submits `settleAndExecute` calls to a
//! SettlementRouter contract that atomically moves funds and invokes a
//! merchant-chosen hook.
//!
//! Modules, leaves first:
//!
//! - [`commitment`] — canonical parameter digest used as the authorization nonce
//! - [`network`] — per-chain constants and the frozen network registry
//! - [`price`] / [`gas`] — cached USD price and gas-price oracles
//! - [`fees`] — minimum-fee and effective-gas-limit economics
//! - [`balance`] — cached ERC-20 balance checks
//! - [`signer_pool`] — exclusive per-key signer leases with quarantine
//! - [`verify`] — off-chain authorization verification
//! - [`settlement`] — the verify → commit → lease → submit → account pipeline
//! - [`metrics`] — audit sinks (tracing- and prometheus-backed)
//! - [`handlers`] — the Axum HTTP surface (`/verify`, `/settle`, `/supported`)

pub mod balance;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod fees;
pub mod from_env;
pub mod gas;
pub mod handlers;
pub mod metrics;
pub mod network;
pub mod price;
pub mod settlement;
pub mod sig_down;
pub mod signer_pool;
pub mod telemetry;
pub mod types;
pub mod verify;
