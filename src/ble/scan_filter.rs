//! Advertisement filter - decides whether an advertisement names our target.
//!
//! Only connectable advertisements (`ADV_IND`, `ADV_DIRECT_IND`) are
//! considered.  The payload is walked record by record and evaluation stops
//! at the first record that satisfies the target.

use crate::ble::adv_parser::{
    AdStructures, AD_TYPE_COMPLETE_NAME, AD_TYPE_SHORT_NAME, AD_TYPE_UUID128_COMPLETE,
    AD_TYPE_UUID128_INCOMPLETE,
};
use crate::ble::{Address, AdvertisementRecord, Uuid128};

/// What identifies the peripheral we want to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetIdentity {
    /// Advertised local name (shortened or complete).
    ///
    /// Compared over `min(target, field)` bytes, so `"Switch"` also matches
    /// `"SwitchBoard"` and a truncated `"Swi"`.
    Name(&'static [u8]),
    /// 128-bit service UUID listed in the advertisement.
    Service(Uuid128),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanDecision {
    Match(Address),
    NoMatch,
}

#[derive(Clone, Copy, Debug)]
pub struct ScanFilter {
    target: TargetIdentity,
    min_rssi: Option<i8>,
}

impl ScanFilter {
    pub const fn new(target: TargetIdentity) -> Self {
        Self {
            target,
            min_rssi: None,
        }
    }

    /// Only accept peripherals in close proximity.
    pub const fn with_min_rssi(mut self, dbm: i8) -> Self {
        self.min_rssi = Some(dbm);
        self
    }

    pub fn target(&self) -> TargetIdentity {
        self.target
    }

    /// Pure decode-and-compare; reporting the decision is the caller's job.
    pub fn evaluate(&self, adv: &AdvertisementRecord<'_>) -> ScanDecision {
        if !adv.kind.is_connectable() {
            return ScanDecision::NoMatch;
        }
        if self.min_rssi.is_some_and(|floor| adv.rssi < floor) {
            return ScanDecision::NoMatch;
        }

        let mut records = AdStructures::new(adv.payload);
        if records.any(|(ad_type, body)| self.record_matches(ad_type, body)) {
            ScanDecision::Match(adv.address)
        } else {
            ScanDecision::NoMatch
        }
    }

    fn record_matches(&self, ad_type: u8, body: &[u8]) -> bool {
        match self.target {
            TargetIdentity::Name(name) => {
                matches!(ad_type, AD_TYPE_SHORT_NAME | AD_TYPE_COMPLETE_NAME)
                    && name_prefix_eq(name, body)
            }
            TargetIdentity::Service(uuid) => {
                matches!(ad_type, AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE)
                    && body
                        .chunks_exact(16)
                        .any(|chunk| chunk == uuid.as_le_bytes())
            }
        }
    }
}

/// Length-bounded comparison: only the shorter of the two lengths is checked.
fn name_prefix_eq(target: &[u8], field: &[u8]) -> bool {
    let n = target.len().min(field.len());
    target[..n] == field[..n]
}
