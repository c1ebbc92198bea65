//! Error types for the sensortag-ble crate.

use thiserror::Error;

/// Failure to turn a characteristic payload into a reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is shorter than the frame the firmware sends.
    #[error("Insufficient payload length: expected at least {expected} bytes, got {actual}")]
    InsufficientLength {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// The payload could not be interpreted at all.
    #[error("Invalid payload encoding: {reason}")]
    InvalidEncoding {
        /// Description of what was wrong with the encoding.
        reason: String,
    },
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The OS denied the permission required to scan.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// The transport reported an error while scanning.
    #[error("Scan failed: {reason}")]
    Scan {
        /// Description of the scan failure.
        reason: String,
    },

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    Connect {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service or characteristic enumeration failed after connecting.
    #[error("Service discovery failed: {reason}")]
    Discovery {
        /// Description of the discovery failure.
        reason: String,
    },

    /// Reading a characteristic failed at the transport level.
    #[error("Read of characteristic {characteristic} failed: {reason}")]
    Read {
        /// The characteristic UUID that was being read.
        characteristic: String,
        /// Description of the read failure.
        reason: String,
    },

    /// A characteristic payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The specified peripheral is not in the device registry.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but none is established.
    #[error("Peripheral not connected")]
    NotConnected,

    /// Another scan or connection currently owns the radio.
    #[error("Session busy: cannot {operation} while another session is active")]
    SessionBusy {
        /// The operation that was refused.
        operation: String,
    },

    /// A connection state change outside the allowed graph was requested.
    #[error("Invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        /// The state the session was in.
        from: String,
        /// The state that was requested.
        to: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is scoped to a single poll tick and polling continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Decode(_))
    }

    /// Whether the user can retry the failed operation after fixing the cause.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::Scan { .. } | Self::Connect { .. } | Self::Discovery { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
