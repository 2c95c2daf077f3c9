//! Metrics for the OC controller session engine.
//!
//! Every metric the engine records is declared once here as a [`Metric`]
//! constant, so names cannot drift between the recording site and whatever
//! exporter the host application installs. The `metrics` crate is re-exported;
//! with no recorder installed, recording is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use occtl_metrics::{metric_defs, metrics, MetricLabels};
//!
//! let labels = MetricLabels::new("oven-1", "delimited");
//! metrics::counter!(metric_defs::FRAMES_DECODED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use occtl_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter("occtl.example.retries")
///     .with_description("Retries issued")
///     .with_unit(Unit::Count)
///     .with_labels(&["device"]);
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "occtl.rx.frames_decoded").
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the session engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every session metric.
    pub const STANDARD_LABELS: &[&str] = &["device", "framing"];

    // ========================================================================
    // Receive Path
    // ========================================================================

    pub const RX_BYTES: Metric = Metric::counter("occtl.rx.bytes")
        .with_description("Bytes read from the transport")
        .with_unit(Unit::Bytes)
        .with_labels(STANDARD_LABELS);

    pub const FRAMES_DECODED: Metric = Metric::counter("occtl.rx.frames_decoded")
        .with_description("Frames decoded and applied to session state")
        .with_unit(Unit::Count)
        .with_labels(STANDARD_LABELS);

    /// Frames that failed checksum or format checks and were dropped.
    pub const FRAMES_MALFORMED: Metric = Metric::counter("occtl.rx.frames_malformed")
        .with_description("Frames dropped as malformed")
        .with_unit(Unit::Count)
        .with_labels(STANDARD_LABELS);

    pub const RX_BUFFERED: Metric = Metric::gauge("occtl.rx.buffered_bytes")
        .with_description("Bytes held as a partial frame after a decode pass")
        .with_unit(Unit::Bytes)
        .with_labels(STANDARD_LABELS);

    // ========================================================================
    // Transmit Path
    // ========================================================================

    pub const COMMANDS_SENT: Metric = Metric::counter("occtl.tx.commands")
        .with_description("Commands written to the transport")
        .with_unit(Unit::Count)
        .with_labels(&["device", "framing", "command"]);

    pub const COMMANDS_REJECTED: Metric = Metric::counter("occtl.tx.commands_rejected")
        .with_description("Commands rejected before any I/O because of an invalid argument")
        .with_unit(Unit::Count)
        .with_labels(&["device", "framing", "command"]);

    // ========================================================================
    // Session
    // ========================================================================

    pub const FAULTS_DETECTED: Metric = Metric::counter("occtl.session.faults_detected")
        .with_description("Fault code transitions recorded in the fault queue")
        .with_unit(Unit::Count)
        .with_labels(&["device", "framing", "code"]);

    pub const STATUS_TIMEOUTS: Metric = Metric::counter("occtl.session.status_timeouts")
        .with_description("Status requests that received no frame within the poll budget")
        .with_unit(Unit::Count)
        .with_labels(STANDARD_LABELS);

    /// Read attempts a status request needed before a frame arrived.
    pub const STATUS_POLL_ATTEMPTS: Metric = Metric::histogram("occtl.session.status_poll_attempts")
        .with_description("Read attempts per answered status request")
        .with_unit(Unit::Count)
        .with_labels(STANDARD_LABELS);

    pub const LINK_LOST: Metric = Metric::counter("occtl.session.link_lost")
        .with_description("Transport failures that ended a session")
        .with_unit(Unit::Count)
        .with_labels(STANDARD_LABELS);

    pub const ALL: &[&Metric] = &[
        &RX_BYTES,
        &FRAMES_DECODED,
        &FRAMES_MALFORMED,
        &RX_BUFFERED,
        &COMMANDS_SENT,
        &COMMANDS_REJECTED,
        &FAULTS_DETECTED,
        &STATUS_TIMEOUTS,
        &STATUS_POLL_ATTEMPTS,
        &LINK_LOST,
    ];
}

/// Standard labels for one session.
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Configured device name.
    pub device: String,
    /// Framing rule of the codec in use.
    pub framing: String,
}

impl MetricLabels {
    pub fn new(device: impl Into<String>, framing: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            framing: framing.into(),
        }
    }

    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("device", self.device.clone()),
            ("framing", self.framing.clone()),
        ]
    }

    /// Standard labels plus `extra`.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Registers descriptions for every engine metric. Call once after installing
/// a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
