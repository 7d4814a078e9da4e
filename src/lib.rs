//! switchlink - BLE central that finds a switch peripheral, connects, and
//! drives its control characteristic.
//!
//! The controller core (scan filter, connection pool, discovery driver,
//! write actuator) is plain `no_std` logic that runs on the host:
//!
//! Usage: `cargo test`
//!
//! The nRF52840 firmware lives in `main.rs` behind the `embedded` feature
//! and plugs the SoftDevice radio and board I/O into the same core.

#![cfg_attr(not(test), no_std)]

// Must come first: the logging macros are used by every module below.
#[macro_use]
mod fmt;

pub mod actuator;
pub mod ble;
pub mod config;
pub mod error;
#[cfg(feature = "embedded")]
pub mod io;

pub use actuator::{Actuator, DelayedAction, PendingWrite, WriteActuator};
pub use ble::controller::{Controller, ControllerState, LinkPhase};
pub use ble::discovery::{DiscoverySession, DiscoveryStep, Phase};
pub use ble::pool::{ConnectionPool, ConnectionSlot};
pub use ble::scan_filter::{ScanDecision, ScanFilter, TargetIdentity};
pub use ble::{Event, Radio};
pub use config::ControllerConfig;
pub use error::{BleError, Error};
