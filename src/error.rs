//! Unified error type for switchlink.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! None of these errors is fatal: the controller logs them and falls back
//! to scanning.

use core::fmt;

/// Top-level error type used across the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every connection slot is occupied.  Scanning pauses until one frees.
    SlotExhausted,

    /// The radio could not establish the link.
    ConnectFailed,

    /// The target service or characteristic was not offered by the peer.
    DiscoveryMismatch,

    /// A write is already in flight on this link, or the peer refused it.
    WriteRejected,

    /// `release` was called with a handle the pool does not own.
    UnknownHandleRelease,

    /// Slot index out of range, or the slot is not in the expected state.
    InvalidSlot,

    /// The handle is already bound to another occupied slot.
    DuplicateHandle,

    /// A connect attempt or discovery outlived its deadline.
    Timeout,

    /// The radio layer returned an error.
    Ble(BleError),
}

/// Subset of radio-level errors we propagate (keeps the enum `Copy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// GAP / GATT raw error code from the stack.
    Raw(u32),
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery failed.
    DiscoveryFailed,
    /// GATT write failed or was refused by the peer.
    WriteFailed,
    /// The request queue towards the radio is full.
    QueueFull,
    /// No live link with the given handle.
    NotConnected,
}

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SlotExhausted => f.write_str("no free connection slot"),
            Error::ConnectFailed => f.write_str("connect failed"),
            Error::DiscoveryMismatch => f.write_str("target attribute not found"),
            Error::WriteRejected => f.write_str("write rejected"),
            Error::UnknownHandleRelease => f.write_str("release of unknown connection handle"),
            Error::InvalidSlot => f.write_str("invalid connection slot"),
            Error::DuplicateHandle => f.write_str("connection handle already bound"),
            Error::Timeout => f.write_str("operation timed out"),
            Error::Ble(e) => write!(f, "radio error: {}", e),
        }
    }
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleError::Raw(code) => write!(f, "stack error {:#x}", code),
            BleError::ScanFailed => f.write_str("scan failed"),
            BleError::ConnectFailed => f.write_str("connect failed"),
            BleError::DiscoveryFailed => f.write_str("discovery failed"),
            BleError::WriteFailed => f.write_str("write failed"),
            BleError::QueueFull => f.write_str("radio queue full"),
            BleError::NotConnected => f.write_str("not connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ble_error_converts_into_error() {
        let e: Error = BleError::ConnectFailed.into();
        assert_eq!(e, Error::Ble(BleError::ConnectFailed));
    }

    #[test]
    fn display_messages() {
        assert_eq!(Error::SlotExhausted.to_string(), "no free connection slot");
        assert_eq!(
            Error::Ble(BleError::Raw(0x3012)).to_string(),
            "radio error: stack error 0x3012"
        );
    }
}
