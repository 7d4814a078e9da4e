//! GATT discovery driver.
//!
//! Walks the remote attribute table in two UUID-filtered searches:
//!
//! 1. Primary service search for the target service over `0x0001..=0xFFFF`.
//! 2. Characteristic search for the target characteristic, starting right
//!    after the service declaration.
//!
//! The characteristic value lives at declaration handle + 1, which is what
//! the session resolves.  A session runs once per link and never caches
//! handles across links.

use crate::ble::{ConnId, DiscoverKind, DiscoverRequest, Uuid128};

pub const FIRST_HANDLE: u16 = 0x0001;
pub const LAST_HANDLE: u16 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    AwaitingService,
    AwaitingCharacteristic,
    Done,
    Aborted,
}

impl Phase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

/// What the caller should do after feeding the session one callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryStep {
    /// Stale or out-of-phase delivery; nothing to do.
    Ignored,
    /// Issue this search next.
    Next(DiscoverRequest),
    /// Writable value handle found; discovery is over.
    Resolved(u16),
    /// Target not offered; discovery is over with nothing to write.
    Aborted,
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverySession {
    conn: ConnId,
    phase: Phase,
    service: Uuid128,
    characteristic: Uuid128,
    service_handle: Option<u16>,
    value_handle: Option<u16>,
}

impl DiscoverySession {
    pub const fn new(conn: ConnId, service: Uuid128, characteristic: Uuid128) -> Self {
        Self {
            conn,
            phase: Phase::AwaitingService,
            service,
            characteristic,
            service_handle: None,
            value_handle: None,
        }
    }

    /// The service search that opens the session.
    pub const fn first_request(&self) -> DiscoverRequest {
        DiscoverRequest {
            kind: DiscoverKind::PrimaryService,
            uuid: self.service,
            start_handle: FIRST_HANDLE,
            end_handle: LAST_HANDLE,
        }
    }

    pub const fn conn(&self) -> ConnId {
        self.conn
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn service_handle(&self) -> Option<u16> {
        self.service_handle
    }

    /// Resolved characteristic value handle, once `Done`.
    pub const fn value_handle(&self) -> Option<u16> {
        self.value_handle
    }

    /// Feed one attribute reported by the outstanding search.
    pub fn on_attribute(&mut self, kind: DiscoverKind, handle: u16, uuid: Uuid128) -> DiscoveryStep {
        if Some(kind) != self.expected_kind() {
            return DiscoveryStep::Ignored;
        }

        match self.phase {
            Phase::AwaitingService => {
                if uuid != self.service {
                    return self.fail();
                }
                let Some(start) = handle.checked_add(1) else {
                    return self.fail();
                };
                self.service_handle = Some(handle);
                self.phase = Phase::AwaitingCharacteristic;
                DiscoveryStep::Next(DiscoverRequest {
                    kind: DiscoverKind::Characteristic,
                    uuid: self.characteristic,
                    start_handle: start,
                    end_handle: LAST_HANDLE,
                })
            }
            Phase::AwaitingCharacteristic => {
                if uuid != self.characteristic {
                    return self.fail();
                }
                let Some(value) = handle.checked_add(1) else {
                    return self.fail();
                };
                self.value_handle = Some(value);
                self.phase = Phase::Done;
                DiscoveryStep::Resolved(value)
            }
            Phase::Done | Phase::Aborted => DiscoveryStep::Ignored,
        }
    }

    /// The search of `kind` reported no more attributes.
    pub fn on_done(&mut self, kind: DiscoverKind) -> DiscoveryStep {
        if Some(kind) != self.expected_kind() {
            return DiscoveryStep::Ignored;
        }
        self.fail()
    }

    /// Stop the session (timeout, link loss, radio error).  Returns `true`
    /// if the session was still running.
    pub fn abort(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Aborted;
        true
    }

    fn expected_kind(&self) -> Option<DiscoverKind> {
        match self.phase {
            Phase::AwaitingService => Some(DiscoverKind::PrimaryService),
            Phase::AwaitingCharacteristic => Some(DiscoverKind::Characteristic),
            Phase::Done | Phase::Aborted => None,
        }
    }

    fn fail(&mut self) -> DiscoveryStep {
        self.phase = Phase::Aborted;
        DiscoveryStep::Aborted
    }
}

/// First characteristic declaration in `request`'s range whose UUID is
/// `wanted`, out of `(declaration handle, uuid)` pairs an adapter collected.
///
/// Adapters that discover the whole service in one pass answer the
/// characteristic search with this, so a foreign UUID is never reported
/// as a hit.
pub fn find_declaration<U: PartialEq>(
    found: &[(u16, U)],
    request: &DiscoverRequest,
    wanted: &U,
) -> Option<u16> {
    found
        .iter()
        .filter(|(decl, _)| (request.start_handle..=request.end_handle).contains(decl))
        .find(|(_, uuid)| uuid == wanted)
        .map(|(decl, _)| *decl)
}
