//! Bounded one-shot timer table behind [`Radio::schedule_once`].
//!
//! Entries are keyed by [`TimerId::slot_key`], so a connect or discovery
//! timeout replaces whatever timeout its slot still has pending.  With one
//! timeout per slot plus the revert, `2 * N + 1` entries never overflow.
//!
//! [`Radio::schedule_once`]: crate::ble::Radio::schedule_once

use heapless::Vec;

use crate::ble::{SlotId, TimerId};
use crate::config::MAX_CONNECTIONS;

/// Table size that holds every timer a `MAX_CONNECTIONS` controller can arm.
pub const TIMER_TABLE_LEN: usize = 2 * MAX_CONNECTIONS + 1;

/// Replacement key of a timer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKey {
    Revert,
    Slot(SlotId),
}

impl TimerId {
    /// Ids with the same key replace each other when scheduled.
    pub const fn slot_key(&self) -> TimerKey {
        match self {
            TimerId::Revert => TimerKey::Revert,
            TimerId::ConnectTimeout { slot, .. } | TimerId::DiscoveryTimeout { slot, .. } => {
                TimerKey::Slot(*slot)
            }
        }
    }
}

/// Pending deadlines, generic over the clock's instant type.
pub struct TimerTable<T, const N: usize = TIMER_TABLE_LEN> {
    pending: Vec<(TimerId, T), N>,
}

impl<T: Copy + Ord, const N: usize> TimerTable<T, N> {
    pub const fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Arm `timer` at `at`, dropping any pending entry with the same key.
    ///
    /// Returns the id back when the table is full.
    pub fn schedule(&mut self, timer: TimerId, at: T) -> Result<(), TimerId> {
        let key = timer.slot_key();
        self.pending.retain(|(id, _)| id.slot_key() != key);
        self.pending.push((timer, at)).map_err(|(id, _)| id)
    }

    pub fn next_deadline(&self) -> Option<T> {
        self.pending.iter().map(|(_, at)| *at).min()
    }

    /// Remove and return one entry due at `now`.
    pub fn pop_expired(&mut self, now: T) -> Option<TimerId> {
        let index = self.pending.iter().position(|(_, at)| *at <= now)?;
        Some(self.pending.swap_remove(index).0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T: Copy + Ord, const N: usize> Default for TimerTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(slot: u8, epoch: u32) -> TimerId {
        TimerId::ConnectTimeout {
            slot: SlotId(slot),
            epoch,
        }
    }

    fn discovery(slot: u8, epoch: u32) -> TimerId {
        TimerId::DiscoveryTimeout {
            slot: SlotId(slot),
            epoch,
        }
    }

    #[test]
    fn discovery_timeout_replaces_connect_timeout_of_same_slot() {
        let mut table: TimerTable<u64> = TimerTable::new();
        table.schedule(connect(0, 1), 5_000).unwrap();
        table.schedule(discovery(0, 1), 10_200).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.pop_expired(5_000), None);
        assert_eq!(table.pop_expired(10_200), Some(discovery(0, 1)));
    }

    #[test]
    fn new_epoch_replaces_old_timeout() {
        let mut table: TimerTable<u64> = TimerTable::new();
        table.schedule(connect(2, 1), 5_000).unwrap();
        table.schedule(connect(2, 2), 6_000).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_deadline(), Some(6_000));
    }

    #[test]
    fn other_slots_and_revert_are_kept() {
        let mut table: TimerTable<u64> = TimerTable::new();
        table.schedule(connect(0, 1), 5_000).unwrap();
        table.schedule(connect(1, 2), 5_100).unwrap();
        table.schedule(TimerId::Revert, 700).unwrap();
        table.schedule(TimerId::Revert, 900).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.next_deadline(), Some(900));
    }

    #[test]
    fn four_links_in_quick_succession_still_leave_room_for_revert() {
        let mut table: TimerTable<u64> = TimerTable::new();
        // Link n comes up at n seconds; its write is confirmed 200 ms later
        // and the previous revert fired before the next write.
        for n in 0..MAX_CONNECTIONS as u8 {
            let t = u64::from(n) * 1_000;
            table.schedule(connect(n, u32::from(n)), t + 5_000).unwrap();
            table.schedule(discovery(n, u32::from(n)), t + 10_000).unwrap();
            table.schedule(TimerId::Revert, t + 700).unwrap();
            assert_eq!(table.pop_expired(t + 700), Some(TimerId::Revert));
        }
        // Each slot also has a fresh attempt pending.
        for n in 0..MAX_CONNECTIONS as u8 {
            table.schedule(connect(n, 10 + u32::from(n)), 9_000).unwrap();
        }
        assert_eq!(table.len(), MAX_CONNECTIONS);
        assert_eq!(table.schedule(TimerId::Revert, 3_700), Ok(()));
    }

    #[test]
    fn full_table_hands_the_id_back() {
        let mut table: TimerTable<u64, 2> = TimerTable::new();
        table.schedule(connect(0, 1), 1).unwrap();
        table.schedule(connect(1, 1), 2).unwrap();
        assert_eq!(table.schedule(TimerId::Revert, 3), Err(TimerId::Revert));
        // Same-key replacement never needs a free entry.
        assert_eq!(table.schedule(discovery(1, 1), 4), Ok(()));
    }

    #[test]
    fn expired_entries_pop_one_at_a_time() {
        let mut table: TimerTable<u64> = TimerTable::new();
        table.schedule(connect(0, 1), 10).unwrap();
        table.schedule(connect(1, 1), 20).unwrap();
        table.schedule(TimerId::Revert, 30).unwrap();
        let mut fired = std::vec::Vec::new();
        while let Some(id) = table.pop_expired(25) {
            fired.push(id);
        }
        assert_eq!(fired.len(), 2);
        assert!(fired.contains(&connect(0, 1)) && fired.contains(&connect(1, 1)));
        assert_eq!(table.len(), 1);
    }
}
