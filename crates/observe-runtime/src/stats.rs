//! Per-signal exporter health counters.

use chrono::{DateTime, Utc};
use observe_config::Protocol;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Queue limit reported when none is configured.
pub const DEFAULT_QUEUE_LIMIT: usize = 2048;

/// Telemetry signal an exporter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Spans.
    Traces,
    /// Metric data points.
    Metrics,
}

impl Signal {
    /// Returns the lowercase signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        }
    }
}

/// Most recent export failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportErrorRecord {
    /// Error message reported by the exporter.
    pub message: String,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

/// Health counters for one exporter.
///
/// `dropped` never decreases for the lifetime of the owning bundle, and
/// `last_error` only changes when an export fails.
#[derive(Debug)]
pub struct ExporterStats {
    signal: Signal,
    protocol: Protocol,
    endpoint: String,
    queue_limit: usize,
    dropped: AtomicU64,
    last_error: Mutex<Option<ExportErrorRecord>>,
}

impl ExporterStats {
    /// Creates counters for an exporter. A zero queue limit is reported as
    /// [`DEFAULT_QUEUE_LIMIT`].
    pub fn new(
        signal: Signal,
        protocol: Protocol,
        endpoint: impl Into<String>,
        queue_limit: usize,
    ) -> Self {
        Self {
            signal,
            protocol,
            endpoint: endpoint.into(),
            queue_limit: if queue_limit == 0 {
                DEFAULT_QUEUE_LIMIT
            } else {
                queue_limit
            },
            dropped: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Records a failed export of `records` items.
    pub fn record_failure(&self, records: usize, message: impl Into<String>) {
        let record = ExportErrorRecord {
            message: message.into(),
            timestamp: Utc::now(),
        };

        let mut last_error = self.last_error.lock();
        if records > 0 {
            self.dropped.fetch_add(records as u64, Ordering::Relaxed);
        }
        *last_error = Some(record);
    }

    /// Signal carried by the exporter.
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Items dropped by failed exports so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Most recent export failure, if any.
    pub fn last_error(&self) -> Option<ExportErrorRecord> {
        self.last_error.lock().clone()
    }

    /// Configured queue limit.
    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    /// Takes a consistent copy of every counter.
    pub fn status(&self) -> ExporterStatus {
        let last_error = self.last_error.lock();
        ExporterStatus {
            protocol: self.protocol.as_str().to_string(),
            endpoint: self.endpoint.clone(),
            queue_limit: self.queue_limit,
            dropped: self.dropped.load(Ordering::Relaxed),
            last_error: last_error.as_ref().map(|e| e.message.clone()),
            last_error_time: last_error.as_ref().map(|e| e.timestamp),
        }
    }
}

/// Serialisable view of [`ExporterStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExporterStatus {
    /// `grpc` or `http`.
    pub protocol: String,
    /// Collector endpoint.
    pub endpoint: String,
    /// Queue limit of the batching layer.
    pub queue_limit: usize,
    /// Items dropped by failed exports.
    pub dropped: u64,
    /// Most recent failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Time of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> ExporterStats {
        ExporterStats::new(Signal::Traces, Protocol::Grpc, "localhost:4317", 512)
    }

    #[test]
    fn test_new_stats_are_clean() {
        let stats = stats();

        assert_eq!(stats.dropped(), 0);
        assert!(stats.last_error().is_none());
        assert_eq!(stats.queue_limit(), 512);
        assert_eq!(stats.signal(), Signal::Traces);
    }

    #[test]
    fn test_zero_queue_limit_defaults() {
        let stats = ExporterStats::new(Signal::Traces, Protocol::Http, "collector", 0);
        assert_eq!(stats.queue_limit(), DEFAULT_QUEUE_LIMIT);
    }

    #[test]
    fn test_failure_adds_batch_size() {
        let stats = stats();

        stats.record_failure(5, "connection refused");
        stats.record_failure(3, "deadline exceeded");

        assert_eq!(stats.dropped(), 8);
        let last = stats.last_error().unwrap();
        assert_eq!(last.message, "deadline exceeded");
    }

    #[test]
    fn test_empty_failure_keeps_count_but_records_error() {
        let stats = stats();

        stats.record_failure(0, "exporter shut down");

        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.last_error().unwrap().message, "exporter shut down");
    }

    #[test]
    fn test_last_error_timestamp_advances() {
        let stats = stats();

        stats.record_failure(1, "first");
        let first = stats.last_error().unwrap().timestamp;
        stats.record_failure(1, "second");
        let second = stats.last_error().unwrap();

        assert_eq!(second.message, "second");
        assert!(second.timestamp >= first);
    }

    #[test]
    fn test_status_serialisation() {
        let stats = stats();
        let json = serde_json::to_value(stats.status()).unwrap();

        assert_eq!(json["protocol"], "grpc");
        assert_eq!(json["endpoint"], "localhost:4317");
        assert_eq!(json["queue_limit"], 512);
        assert_eq!(json["dropped"], 0);
        assert!(json.get("last_error").is_none());

        stats.record_failure(2, "unavailable");
        let json = serde_json::to_value(stats.status()).unwrap();
        assert_eq!(json["dropped"], 2);
        assert_eq!(json["last_error"], "unavailable");
        assert!(json["last_error_time"].is_string());
    }
}
