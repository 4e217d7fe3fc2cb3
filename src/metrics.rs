//! Metrics and audit sinks.
//!
//! Every settlement state transition is reported through the [`AuditSink`]
//! interface. Two implementations ship: [`LogSink`] emits structured tracing
//! events, [`PrometheusSink`] feeds the process-wide metric registry that
//! `GET /metrics` renders. [`CompositeSink`] fans out to both.

use alloy::primitives::Address;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec,
};

use crate::network::Network;
use crate::types::{ErrorReason, EvmAddress};

/// States of the settlement pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    Received,
    Validated,
    Verified,
    CommitmentChecked,
    SignerLeased,
    GasPriced,
    Simulated,
    Submitted,
    Confirmed,
    Accounted,
    Done,
    Failed,
}

impl AuditStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStage::Received => "received",
            AuditStage::Validated => "validated",
            AuditStage::Verified => "verified",
            AuditStage::CommitmentChecked => "commitment_checked",
            AuditStage::SignerLeased => "signer_leased",
            AuditStage::GasPriced => "gas_priced",
            AuditStage::Simulated => "simulated",
            AuditStage::Submitted => "submitted",
            AuditStage::Confirmed => "confirmed",
            AuditStage::Accounted => "accounted",
            AuditStage::Done => "done",
            AuditStage::Failed => "failed",
        }
    }
}

/// One structured audit event, emitted per state transition.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub request_id: String,
    pub network: Network,
    pub stage: AuditStage,
    pub payer: Option<EvmAddress>,
    pub hook: Option<Address>,
    pub error_reason: Option<ErrorReason>,
    /// Time since the request entered the pipeline.
    pub elapsed_ms: u64,
}

/// Abstract destination for audit events and timing observations.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
    fn observe_verify(&self, network: Network, valid: bool, seconds: f64);
    fn observe_settle(&self, network: Network, success: bool, seconds: f64);
    fn observe_gas_used(&self, network: Network, gas_used: u64);
}

// ---------------------------------------------------------------------------
// Prometheus registry statics
// ---------------------------------------------------------------------------

pub static VERIFY_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "facilitator_verify_total",
        "Total verification requests",
        &["network", "result"]
    )
    .unwrap()
});

pub static SETTLE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "facilitator_settle_total",
        "Total settlement requests",
        &["network", "result"]
    )
    .unwrap()
});

pub static SETTLE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "facilitator_settle_errors_total",
        "Settlement failures by machine-readable reason",
        &["network", "reason"]
    )
    .unwrap()
});

pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "facilitator_stage_transitions_total",
        "Settlement pipeline state transitions",
        &["network", "stage"]
    )
    .unwrap()
});

pub static VERIFY_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "facilitator_verify_duration_seconds",
        "Verification latency in seconds",
        &["network"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

pub static SETTLE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "facilitator_settle_duration_seconds",
        "Settlement latency in seconds",
        &["network"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0]
    )
    .unwrap()
});

pub static GAS_USED: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "facilitator_settle_gas_used",
        "Gas used by confirmed settlements",
        &["network"],
        vec![
            50_000.0,
            100_000.0,
            150_000.0,
            250_000.0,
            500_000.0,
            1_000_000.0,
            3_000_000.0,
            150_000_000.0
        ]
    )
    .unwrap()
});

/// Render the process registry in the Prometheus text format.
pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Tracing-backed sink.
#[derive(Debug, Default)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn record(&self, event: &AuditEvent) {
        match event.stage {
            AuditStage::Failed => tracing::warn!(
                request_id = %event.request_id,
                network = %event.network,
                stage = event.stage.as_str(),
                payer = ?event.payer,
                hook = ?event.hook,
                reason = ?event.error_reason.map(|r| r.as_str()),
                elapsed_ms = event.elapsed_ms,
                "settlement failed"
            ),
            _ => tracing::info!(
                request_id = %event.request_id,
                network = %event.network,
                stage = event.stage.as_str(),
                payer = ?event.payer,
                hook = ?event.hook,
                elapsed_ms = event.elapsed_ms,
                "settlement stage"
            ),
        }
    }

    fn observe_verify(&self, network: Network, valid: bool, seconds: f64) {
        tracing::debug!(network = %network, valid, seconds, "verify finished");
    }

    fn observe_settle(&self, network: Network, success: bool, seconds: f64) {
        tracing::debug!(network = %network, success, seconds, "settle finished");
    }

    fn observe_gas_used(&self, network: Network, gas_used: u64) {
        tracing::debug!(network = %network, gas_used, "settlement gas accounted");
    }
}

/// Metric-registry-backed sink.
#[derive(Debug, Default)]
pub struct PrometheusSink;

impl AuditSink for PrometheusSink {
    fn record(&self, event: &AuditEvent) {
        let network = event.network.to_string();
        STAGE_TRANSITIONS
            .with_label_values(&[&network, event.stage.as_str()])
            .inc();
        if event.stage == AuditStage::Failed {
            let reason = event
                .error_reason
                .map(|r| r.as_str())
                .unwrap_or("unexpected_settle_error");
            SETTLE_ERRORS.with_label_values(&[&network, reason]).inc();
        }
    }

    fn observe_verify(&self, network: Network, valid: bool, seconds: f64) {
        let network = network.to_string();
        let result = if valid { "valid" } else { "invalid" };
        VERIFY_REQUESTS.with_label_values(&[&network, result]).inc();
        VERIFY_LATENCY.with_label_values(&[&network]).observe(seconds);
    }

    fn observe_settle(&self, network: Network, success: bool, seconds: f64) {
        let network = network.to_string();
        let result = if success { "success" } else { "failure" };
        SETTLE_REQUESTS.with_label_values(&[&network, result]).inc();
        SETTLE_LATENCY.with_label_values(&[&network]).observe(seconds);
    }

    fn observe_gas_used(&self, network: Network, gas_used: u64) {
        GAS_USED
            .with_label_values(&[&network.to_string()])
            .observe(gas_used as f64);
    }
}

/// Fan-out sink. Writes are independent per backend; each backend's write is
/// atomic on its own.
pub struct CompositeSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        CompositeSink { sinks }
    }

    /// The standard production pair: logs plus metrics.
    pub fn standard() -> Self {
        CompositeSink::new(vec![Box::new(LogSink), Box::new(PrometheusSink)])
    }
}

impl AuditSink for CompositeSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }

    fn observe_verify(&self, network: Network, valid: bool, seconds: f64) {
        for sink in &self.sinks {
            sink.observe_verify(network, valid, seconds);
        }
    }

    fn observe_settle(&self, network: Network, success: bool, seconds: f64) {
        for sink in &self.sinks {
            sink.observe_settle(network, success, seconds);
        }
    }

    fn observe_gas_used(&self, network: Network, gas_used: u64) {
        for sink in &self.sinks {
            sink.observe_gas_used(network, gas_used);
        }
    }
}
