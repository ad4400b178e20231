//! Process-wide diagnostic log registry
//!
//! Every provisioned interface keeps two bounded logs: state-machine records
//! and connectivity-packet records. Entries are created on first use and
//! dropped when the owning client shuts down. Nothing in here feeds back into
//! provisioning decisions.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Timestamped records per interface
//! - AU-4: Audit Log Storage Capacity - Logs are bounded ring buffers

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Maximum state-machine records kept per interface
pub const MAX_LOG_RECORDS: usize = 500;

/// Maximum connectivity-packet records kept per interface
pub const MAX_PACKET_LOG_RECORDS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
struct InterfaceLogs {
    log: VecDeque<LogRecord>,
    packet_log: VecDeque<LogRecord>,
}

static REGISTRY: Lazy<Mutex<HashMap<String, InterfaceLogs>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn push_bounded(buf: &mut VecDeque<LogRecord>, cap: usize, message: String) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(LogRecord {
        timestamp: Utc::now(),
        message,
    });
}

/// Append a state-machine record for `interface`
pub fn log(interface: &str, message: impl Into<String>) {
    let mut registry = REGISTRY.lock();
    let logs = registry.entry(interface.to_string()).or_default();
    push_bounded(&mut logs.log, MAX_LOG_RECORDS, message.into());
}

/// Append a connectivity-packet record for `interface`
pub fn log_packet(interface: &str, message: impl Into<String>) {
    let mut registry = REGISTRY.lock();
    let logs = registry.entry(interface.to_string()).or_default();
    push_bounded(&mut logs.packet_log, MAX_PACKET_LOG_RECORDS, message.into());
}

pub fn records(interface: &str) -> Vec<LogRecord> {
    REGISTRY
        .lock()
        .get(interface)
        .map(|logs| logs.log.iter().cloned().collect())
        .unwrap_or_default()
}

pub fn packet_records(interface: &str) -> Vec<LogRecord> {
    REGISTRY
        .lock()
        .get(interface)
        .map(|logs| logs.packet_log.iter().cloned().collect())
        .unwrap_or_default()
}

/// Drop both logs of `interface`
pub fn remove(interface: &str) -> bool {
    REGISTRY.lock().remove(interface).is_some()
}

pub fn contains(interface: &str) -> bool {
    REGISTRY.lock().contains_key(interface)
}

/// Every interface's logs as a JSON object keyed by interface name
pub fn dump_all_logs() -> serde_json::Result<String> {
    let registry = REGISTRY.lock();
    let sorted: BTreeMap<&str, &InterfaceLogs> =
        registry.iter().map(|(k, v)| (k.as_str(), v)).collect();
    serde_json::to_string_pretty(&sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-wide; each test uses its own interface name.

    #[test]
    fn test_log_is_bounded() {
        let iface = "test-bounded0";
        for i in 0..(MAX_LOG_RECORDS + 20) {
            log(iface, format!("record {}", i));
        }
        let records = records(iface);
        assert_eq!(records.len(), MAX_LOG_RECORDS);
        assert_eq!(records[0].message, "record 20");
        remove(iface);
    }

    #[test]
    fn test_packet_log_is_bounded() {
        let iface = "test-packets0";
        for i in 0..(MAX_PACKET_LOG_RECORDS + 5) {
            log_packet(iface, format!("packet {}", i));
        }
        assert_eq!(packet_records(iface).len(), MAX_PACKET_LOG_RECORDS);
        assert!(records(iface).is_empty());
        remove(iface);
    }

    #[test]
    fn test_remove_and_dump() {
        let iface = "test-dump0";
        log(iface, "hello");
        assert!(contains(iface));
        let json = dump_all_logs().unwrap();
        assert!(json.contains("test-dump0"));
        assert!(json.contains("hello"));
        assert!(remove(iface));
        assert!(!contains(iface));
        assert!(!remove(iface));
    }
}
