//! Bluetooth Low Energy central core.
//!
//! The controller runs in **Central** role and is written sans-IO: every
//! radio callback arrives as an [`Event`], and every radio operation goes
//! out through the [`Radio`] trait as a fire-and-forget request.
//!
//! 1. **Scan filter** - decides which advertisements name our peripheral.
//! 2. **Connection pool** - fixed set of connection slots.
//! 3. **Discovery driver** - walks primary service → characteristic.
//! 4. **Controller** - ties the three together with the write actuator.
//!
//! `timers` holds the bounded timer table behind `Radio::schedule_once`.
//!
//! The `softdevice` module (feature `embedded`) provides the `Radio`
//! implementation on top of the Nordic SoftDevice S140.

pub mod adv_parser;
pub mod controller;
pub mod discovery;
pub mod pool;
pub mod scan_filter;
pub mod timers;
#[cfg(feature = "embedded")]
pub mod softdevice;

use crate::error::BleError;

/// Monotonic milliseconds.  Supplied by the caller with every event; the
/// core never reads a clock.
pub type Millis = u64;

/// Connection identifier assigned by the radio at link-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnId(pub u16);

/// Index of a connection slot in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotId(pub u8);

impl SlotId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
    Anonymous,
}

/// BLE device address (little-endian bytes, as received over the air).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl Address {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

/// Advertising PDU type, reduced to what the scan filter cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisementKind {
    /// ADV_IND
    ConnectableUndirected,
    /// ADV_DIRECT_IND
    ConnectableDirected,
    /// Non-connectable, scannable-only, scan responses.
    Other,
}

impl AdvertisementKind {
    pub const fn is_connectable(self) -> bool {
        matches!(
            self,
            AdvertisementKind::ConnectableUndirected | AdvertisementKind::ConnectableDirected
        )
    }
}

/// One advertisement report.  Borrowed from the radio's buffer and only
/// valid for the duration of a single [`Event`] delivery.
#[derive(Clone, Copy, Debug)]
pub struct AdvertisementRecord<'a> {
    pub address: Address,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    pub kind: AdvertisementKind,
    /// Raw AD structures (`len`, `type`, `data...`)*.
    pub payload: &'a [u8],
}

/// 128-bit UUID in over-the-air (little-endian) byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// Bluetooth Base UUID `00000000-0000-1000-8000-00805F9B34FB`.
    const BASE: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

    /// Build from the canonical (big-endian) textual value.
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }

    /// Expand a SIG-assigned 16-bit UUID onto the Base UUID.
    pub const fn from_u16(short: u16) -> Self {
        Self::from_u128(Self::BASE | ((short as u128) << 96))
    }

    pub const fn as_le_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanMode {
    /// Request scan responses (carry the complete local name on most peripherals).
    Active,
    Passive,
}

/// Which GATT procedure a discovery request or result belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoverKind {
    PrimaryService,
    Characteristic,
}

/// A UUID-filtered attribute search over a handle range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverRequest {
    pub kind: DiscoverKind,
    pub uuid: Uuid128,
    pub start_handle: u16,
    pub end_handle: u16,
}

/// One-shot timers the controller asks the radio layer to run.
///
/// Scheduling replaces any pending id with the same [`slot_key`]: the
/// revert replaces the revert, and a slot's timeouts replace each other.
///
/// [`slot_key`]: TimerId::slot_key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Drive the actuator back to rest after a confirmed write.
    Revert,
    ConnectTimeout { slot: SlotId, epoch: u32 },
    DiscoveryTimeout { slot: SlotId, epoch: u32 },
}

/// Everything the radio layer reports back to the controller.
#[derive(Clone, Copy, Debug)]
pub enum Event<'a> {
    Advertisement(AdvertisementRecord<'a>),
    /// The connect request issued for `slot` produced a link to `address`.
    LinkUp {
        slot: SlotId,
        conn: ConnId,
        address: Address,
    },
    /// The connect request issued for `slot` failed.
    ConnectFailed { slot: SlotId, reason: BleError },
    /// HCI disconnect reason, when the stack exposes it.
    LinkDown { conn: ConnId, reason: Option<u8> },
    /// One attribute matched by an outstanding discovery request.
    Attribute {
        conn: ConnId,
        kind: DiscoverKind,
        handle: u16,
        uuid: Uuid128,
    },
    /// No more attributes for the outstanding request of this kind.
    DiscoveryDone { conn: ConnId, kind: DiscoverKind },
    WriteDone {
        conn: ConnId,
        result: Result<(), BleError>,
    },
    Timer(TimerId),
    /// External request (button press) to repeat the write on every ready link.
    Trigger,
}

/// Radio operations the controller depends on.
///
/// Every method is fire-and-forget: an `Ok` return only means the request
/// was accepted, and the outcome arrives later as an [`Event`].  Stopping,
/// cancelling and disconnecting must be idempotent.
pub trait Radio {
    fn start_scan(&mut self, mode: ScanMode) -> Result<(), BleError>;
    fn stop_scan(&mut self);
    fn connect(&mut self, slot: SlotId, address: Address) -> Result<(), BleError>;
    fn cancel_connect(&mut self, slot: SlotId);
    fn disconnect(&mut self, conn: ConnId);
    fn discover(&mut self, conn: ConnId, request: DiscoverRequest) -> Result<(), BleError>;
    fn write(&mut self, conn: ConnId, handle: u16, data: &[u8]) -> Result<(), BleError>;
    fn schedule_once(&mut self, delay_ms: u32, timer: TimerId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_from_u128_is_little_endian() {
        let uuid = Uuid128::from_u128(0x12345678_1234_5678_1234_56789abcdef0);
        assert_eq!(
            uuid.as_le_bytes(),
            &[
                0xf0, 0xde, 0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x78,
                0x56, 0x34, 0x12
            ]
        );
    }

    #[test]
    fn uuid_from_u16_uses_base_uuid() {
        // 0x2A4D → 00002a4d-0000-1000-8000-00805f9b34fb
        let uuid = Uuid128::from_u16(0x2a4d);
        assert_eq!(uuid, Uuid128::from_u128(0x00002a4d_0000_1000_8000_00805f9b34fb));
    }

    #[test]
    fn only_ind_and_direct_ind_are_connectable() {
        assert!(AdvertisementKind::ConnectableUndirected.is_connectable());
        assert!(AdvertisementKind::ConnectableDirected.is_connectable());
        assert!(!AdvertisementKind::Other.is_connectable());
    }
}
