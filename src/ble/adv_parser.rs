//! Advertising Data (AD) structure parsing.
//!
//! Payload layout is a sequence of `[len][type][data; len - 1]` records.
//! A zero length byte terminates the payload early.

use crate::ble::Uuid128;
use heapless::String;

/// Incomplete list of 16-bit service UUIDs.
pub const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
/// Complete list of 16-bit service UUIDs.
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
/// Incomplete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_INCOMPLETE: u8 = 0x06;
/// Complete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
/// Shortened local name.
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// Complete local name.
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// Iterator over `(ad_type, data)` pairs.
///
/// Stops at the first zero-length record or at a record whose declared
/// length runs past the end of the buffer.
#[derive(Clone)]
pub struct AdStructures<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AdStructures<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.offset;
        let len = *self.data.get(i)? as usize;
        if len == 0 || i + len >= self.data.len() {
            self.offset = self.data.len();
            return None;
        }
        let ad_type = self.data[i + 1];
        let body = &self.data[i + 2..i + 1 + len];
        self.offset = i + len + 1;
        Some((ad_type, body))
    }
}

/// Check if raw advertisement data lists the given 128-bit service UUID.
pub fn contains_uuid128(data: &[u8], uuid: &Uuid128) -> bool {
    AdStructures::new(data)
        .filter(|(ad_type, _)| {
            matches!(*ad_type, AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE)
        })
        .any(|(_, body)| body.chunks_exact(16).any(|chunk| chunk == uuid.as_le_bytes()))
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    for (ad_type, body) in AdStructures::new(data) {
        if ad_type == AD_TYPE_SHORT_NAME || ad_type == AD_TYPE_COMPLETE_NAME {
            let mut name = String::new();
            for &b in body {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return name;
        }
    }

    let mut s = String::new();
    let _ = s.push_str("Unknown");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TARGET_SERVICE_UUID;

    #[test]
    fn iterates_records_in_order() {
        let ad_data = [
            0x02, 0x01, 0x06, // Flags
            0x03, 0x03, 0x0F, 0x18, // Battery Service UUID
        ];
        let mut it = AdStructures::new(&ad_data);
        assert_eq!(it.next(), Some((0x01, &[0x06][..])));
        assert_eq!(it.next(), Some((0x03, &[0x0F, 0x18][..])));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn empty_advertisement_data() {
        let ad_data: [u8; 0] = [];
        assert_eq!(AdStructures::new(&ad_data).count(), 0);
        assert!(!contains_uuid128(&ad_data, &TARGET_SERVICE_UUID));
    }

    #[test]
    fn malformed_ad_length_zero() {
        let ad_data = [0x00, 0x02, 0x01, 0x06]; // len=0 should stop parsing
        assert_eq!(AdStructures::new(&ad_data).count(), 0);
    }

    #[test]
    fn truncated_record_is_dropped() {
        // Second record claims 9 bytes but only 2 follow.
        let ad_data = [0x02, 0x01, 0x06, 0x09, 0x09, b'S', b'w'];
        let records: heapless::Vec<(u8, &[u8]), 4> = AdStructures::new(&ad_data).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, 0x01);
    }

    #[test]
    fn detect_uuid128_in_advertisement() {
        let mut ad_data = [0u8; 21];
        ad_data[0] = 0x11; // len=17
        ad_data[1] = AD_TYPE_UUID128_COMPLETE;
        ad_data[2..18].copy_from_slice(TARGET_SERVICE_UUID.as_le_bytes());
        ad_data[18] = 0x02;
        ad_data[19] = 0x01;
        ad_data[20] = 0x06;
        assert!(contains_uuid128(&ad_data, &TARGET_SERVICE_UUID));
    }

    #[test]
    fn uuid128_in_16_bit_list_is_ignored() {
        let mut ad_data = [0u8; 18];
        ad_data[0] = 0x11;
        ad_data[1] = AD_TYPE_UUID16_COMPLETE;
        ad_data[2..18].copy_from_slice(TARGET_SERVICE_UUID.as_le_bytes());
        assert!(!contains_uuid128(&ad_data, &TARGET_SERVICE_UUID));
    }

    #[test]
    fn extract_complete_local_name() {
        let ad_data = [
            0x07, 0x09, // len=7, type=0x09
            b'S', b'w', b'i', b't', b'c', b'h',
        ];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Switch");
    }

    #[test]
    fn extract_shortened_local_name() {
        let ad_data = [
            0x04, 0x08, // len=4, type=0x08
            b'S', b'w', b'i',
        ];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Swi");
    }

    #[test]
    fn no_name_in_advertisement() {
        let ad_data = [
            0x02, 0x01, 0x06, // Flags: LE General Discoverable
        ];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Unknown");
    }

    #[test]
    fn name_truncated_to_32_chars() {
        let mut ad_data = [0u8; 40];
        ad_data[0] = 35; // len
        ad_data[1] = AD_TYPE_COMPLETE_NAME;
        for b in ad_data[2..36].iter_mut() {
            *b = b'X';
        }
        assert_eq!(extract_device_name(&ad_data).len(), 32);
    }
}
