//! Application-wide constants and compile-time configuration.
//!
//! Target identity, GATT UUIDs, the write payload, timing parameters and
//! pin assignments live here so they can be tuned in one place.

use crate::ble::scan_filter::TargetIdentity;
use crate::ble::{ScanMode, Uuid128};

// BLE

/// Maximum simultaneous BLE connections (size of the slot pool).
pub const MAX_CONNECTIONS: usize = 4;

/// Vendor service exposed by the switch peripheral.
pub const TARGET_SERVICE_UUID: Uuid128 =
    Uuid128::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// Writable characteristic inside [`TARGET_SERVICE_UUID`].
pub const TARGET_CHARACTERISTIC_UUID: Uuid128 =
    Uuid128::from_u128(0x12345678_1234_5678_1234_56789abcdef1);

/// Advertised name used when matching by name instead of service UUID.
pub const TARGET_NAME: &[u8] = b"Switch";

/// Payload written to the characteristic (little-endian duty value).
pub const WRITE_PAYLOAD: &[u8] = &[0x01, 0x02];

/// Largest payload a single write may carry (default ATT MTU minus header).
pub const MAX_WRITE_LEN: usize = 20;

/// Delay before the actuator is driven back to its resting position.
pub const REVERT_DELAY_MS: u32 = 500;

/// Give up on a connect attempt after this long.
pub const CONNECT_TIMEOUT_MS: u32 = 5_000;

/// Give up on GATT discovery after this long and drop the link.
pub const DISCOVERY_TIMEOUT_MS: u32 = 10_000;

/// BLE connection interval range (in 1.25 ms units).
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// How often a slot task polls its link for disconnection (ms).
pub const LINK_POLL_MS: u64 = 100;

// GPIO pin assignments (nRF52840-DK defaults)
//
//   Trigger button → P0.11 (Button 1)
//   Status LED     → P0.13 (LED 1, active-low)

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

/// Runtime view of the constants above, handed to the controller.
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    /// What the scan filter looks for in advertisements.
    pub target: TargetIdentity,
    /// Primary service searched for after link-up.
    pub service: Uuid128,
    /// Characteristic searched for inside the service.
    pub characteristic: Uuid128,
    /// Bytes written once the value handle is resolved.
    pub payload: &'static [u8],
    /// Delay between a confirmed write and the actuator's return to rest.
    pub revert_delay_ms: u32,
    /// `None` waits for the radio's own supervision timeout.
    pub connect_timeout_ms: Option<u32>,
    /// `None` lets a stalled discovery hold its slot until link loss.
    pub discovery_timeout_ms: Option<u32>,
    /// Ignore advertisements weaker than this (dBm).
    pub min_rssi: Option<i8>,
    pub scan_mode: ScanMode,
}

impl ControllerConfig {
    pub const fn new() -> Self {
        Self {
            target: TargetIdentity::Service(TARGET_SERVICE_UUID),
            service: TARGET_SERVICE_UUID,
            characteristic: TARGET_CHARACTERISTIC_UUID,
            payload: WRITE_PAYLOAD,
            revert_delay_ms: REVERT_DELAY_MS,
            connect_timeout_ms: Some(CONNECT_TIMEOUT_MS),
            discovery_timeout_ms: Some(DISCOVERY_TIMEOUT_MS),
            min_rssi: None,
            scan_mode: ScanMode::Active,
        }
    }

    /// Match peripherals by advertised name rather than service UUID.
    pub const fn with_target(mut self, target: TargetIdentity) -> Self {
        self.target = target;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}
