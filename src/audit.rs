//! Audit logging for session lifecycle events.
//!
//! Only hashes and categories are recorded, never raw peer identifiers or
//! plaintext payloads.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::time::current_time_millis;

/// Hash data for audit (privacy-preserving, no raw identifiers in logs).
pub fn hash_for_audit(data: &[u8]) -> String {
    hex::encode(&Sha3_256::digest(data)[..8])
}

/// Session lifecycle events recorded to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AuditEvent {
    /// Handshake entered (anonymous or certificate).
    HandshakeStarted,
    /// Handshake completed successfully, naming the final credential kind.
    HandshakeCompleted {
        /// `"anonymous"` or `"certificate"`.
        via: String,
    },
    /// Anonymous handshake transparently renegotiated to certificate auth.
    Renegotiated,
    /// A cookie verification attempt was rejected.
    CookieRejected,
    /// PMTU discovery completed; records the selected MTU.
    PmtudComplete {
        /// Final DTLS MTU selected.
        mtu: usize,
    },
    /// The FSM forced a shutdown, naming the trigger.
    ShutdownForced {
        /// Non-sensitive cause string.
        cause: String,
    },
}

/// Single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Timestamp (Unix ms).
    pub timestamp_ms: u64,
    /// Event type.
    pub event: AuditEvent,
}

impl AuditEntry {
    /// Create a new audit entry stamped with the current time.
    pub fn new(event: AuditEvent) -> Self {
        Self {
            timestamp_ms: current_time_millis(),
            event,
        }
    }
}

/// Pluggable audit sink.
pub trait AuditSink: Send + Sync {
    /// Record an audit entry.
    fn log(&self, entry: AuditEntry);
}

/// In-memory audit sink, for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty in-memory sink.
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Snapshot all logged entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

/// No-op sink, the default when no audit sink is configured.
#[derive(Debug, Default)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn log(&self, _entry: AuditEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_creation_stamps_time() {
        let entry = AuditEntry::new(AuditEvent::HandshakeStarted);
        assert!(entry.timestamp_ms > 0);
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        sink.log(AuditEntry::new(AuditEvent::HandshakeStarted));
        sink.log(AuditEntry::new(AuditEvent::HandshakeCompleted {
            via: "anonymous".to_string(),
        }));
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].event, AuditEvent::HandshakeStarted));
        assert!(matches!(
            entries[1].event,
            AuditEvent::HandshakeCompleted { .. }
        ));
    }

    #[test]
    fn noop_sink_drops_everything() {
        let sink = NoOpAuditSink;
        sink.log(AuditEntry::new(AuditEvent::CookieRejected));
    }

    #[test]
    fn hash_is_stable_and_short() {
        let h1 = hash_for_audit(b"peer-identifier");
        let h2 = hash_for_audit(b"peer-identifier");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16); // 8 bytes hex-encoded
    }
}
