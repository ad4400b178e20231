//! Error types for ipclientd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use thiserror::Error;

/// Errors that can occur while provisioning an interface
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
/// - SI-11(b): Reveal only information necessary for error handling (no sensitive data exposure)
#[derive(Debug, Error)]
pub enum IpClientError {
    /// Daemon configuration could not be loaded or is out of range
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provisioning request rejected before the state machine starts
    /// NIST: SI-10 (Information Input Validation)
    #[error("Invalid provisioning configuration: {0}")]
    InvalidProvisioning(String),

    /// Interface lookup failed
    /// NIST: CM-8 (System Component Inventory) - Interface tracking
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Netlink socket error
    /// NIST: SC-7 (Boundary Protection) - Kernel interface errors
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// Writing or reading a per-interface sysctl failed
    #[error("Sysctl {name} failed: {reason}")]
    Sysctl { name: String, reason: String },

    /// Link-layer frame could not be sent
    #[error("Packet transmit error: {0}")]
    Transmit(String),

    /// A protocol client, monitor or filter refused to start
    #[error("Failed to start {component}: {reason}")]
    CollaboratorStart {
        component: &'static str,
        reason: String,
    },

    /// Malformed address or prefix text
    #[error("Address parse error: {0}")]
    AddressParse(String),

    /// IO error
    /// NIST: SI-11 (Error Handling) - System-level errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpClientError {
    /// Creates a sysctl error.
    pub fn sysctl(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sysctl {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a collaborator start error.
    pub fn start_failed(component: &'static str, reason: impl Into<String>) -> Self {
        Self::CollaboratorStart {
            component,
            reason: reason.into(),
        }
    }

    /// Side-channel failures that are logged and never escalated.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::Sysctl { .. } | Self::Transmit(_))
    }
}

/// Result type alias for ipclientd operations
pub type Result<T> = std::result::Result<T, IpClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IpClientError::sysctl("accept_ra", "permission denied");
        assert_eq!(err.to_string(), "Sysctl accept_ra failed: permission denied");

        let err = IpClientError::start_failed("dhcp client", "socket busy");
        assert_eq!(err.to_string(), "Failed to start dhcp client: socket busy");
    }

    #[test]
    fn test_best_effort_classification() {
        assert!(IpClientError::sysctl("dad_transmits", "x").is_best_effort());
        assert!(IpClientError::Transmit("ENETDOWN".into()).is_best_effort());
        assert!(!IpClientError::InterfaceNotFound("wlan0".into()).is_best_effort());
        assert!(!IpClientError::Netlink("EPERM".into()).is_best_effort());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IpClientError = io.into();
        assert!(matches!(err, IpClientError::Io(_)));
    }
}
