//! Fixed-capacity connection slot pool.
//!
//! A slot becomes occupied when a connect attempt is issued, receives the
//! radio's connection handle at link-up, and is cleared exactly once when
//! that link goes down (or the attempt is abandoned).  Nothing outside this
//! module touches slot state.

use crate::ble::{Address, ConnId, SlotId};
use crate::config::MAX_CONNECTIONS;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionSlot {
    pub occupied: bool,
    /// `None` while the connect attempt is still pending.
    pub handle: Option<ConnId>,
    pub address: Option<Address>,
}

impl ConnectionSlot {
    pub const fn empty() -> Self {
        Self {
            occupied: false,
            handle: None,
            address: None,
        }
    }
}

pub struct ConnectionPool<const N: usize = MAX_CONNECTIONS> {
    slots: [ConnectionSlot; N],
}

impl<const N: usize> ConnectionPool<N> {
    pub const fn new() -> Self {
        Self {
            slots: [ConnectionSlot::empty(); N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Take the lowest-indexed free slot for a connect attempt to `address`.
    pub fn acquire(&mut self, address: Address) -> Result<SlotId, Error> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or(Error::SlotExhausted)?;
        self.slots[index] = ConnectionSlot {
            occupied: true,
            handle: None,
            address: Some(address),
        };
        Ok(SlotId(index as u8))
    }

    /// Record the handle the radio assigned to the link in `slot`.
    pub fn bind(&mut self, slot: SlotId, conn: ConnId) -> Result<(), Error> {
        if self.is_member(conn) {
            return Err(Error::DuplicateHandle);
        }
        match self.slots.get_mut(slot.index()) {
            Some(entry) if entry.occupied && entry.handle.is_none() => {
                entry.handle = Some(conn);
                Ok(())
            }
            _ => Err(Error::InvalidSlot),
        }
    }

    /// Clear the slot holding `conn`.
    pub fn release(&mut self, conn: ConnId) -> Result<SlotId, Error> {
        let slot = self.slot_of(conn).ok_or(Error::UnknownHandleRelease)?;
        self.slots[slot.index()] = ConnectionSlot::empty();
        Ok(slot)
    }

    /// Abandon a connect attempt that never produced a handle.
    pub fn release_slot(&mut self, slot: SlotId) -> Result<(), Error> {
        match self.slots.get_mut(slot.index()) {
            Some(entry) if entry.occupied && entry.handle.is_none() => {
                *entry = ConnectionSlot::empty();
                Ok(())
            }
            _ => Err(Error::InvalidSlot),
        }
    }

    pub fn is_member(&self, conn: ConnId) -> bool {
        self.slot_of(conn).is_some()
    }

    pub fn slot_of(&self, conn: ConnId) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.occupied && s.handle == Some(conn))
            .map(|index| SlotId(index as u8))
    }

    /// True if a pending or live link to `address` already holds a slot.
    pub fn is_held_address(&self, address: &Address) -> bool {
        self.slots
            .iter()
            .any(|s| s.occupied && s.address.as_ref() == Some(address))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.occupied() < N
    }

    pub fn get(&self, slot: SlotId) -> Option<&ConnectionSlot> {
        self.slots.get(slot.index())
    }
}

impl<const N: usize> Default for ConnectionPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::AddressKind;

    fn addr(n: u8) -> Address {
        Address::new(AddressKind::RandomStatic, [n, 0, 0, 0, 0, 0xC0])
    }

    #[test]
    fn acquires_in_ascending_order() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        assert_eq!(pool.acquire(addr(1)), Ok(SlotId(0)));
        assert_eq!(pool.acquire(addr(2)), Ok(SlotId(1)));
        assert_eq!(pool.occupied(), 2);
    }

    #[test]
    fn fifth_acquire_is_exhausted_until_a_release() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        for n in 0..4 {
            let slot = pool.acquire(addr(n)).unwrap();
            pool.bind(slot, ConnId(100 + n as u16)).unwrap();
        }
        assert_eq!(pool.acquire(addr(9)), Err(Error::SlotExhausted));
        assert_eq!(pool.occupied(), 4);

        assert_eq!(pool.release(ConnId(102)), Ok(SlotId(2)));
        assert_eq!(pool.acquire(addr(9)), Ok(SlotId(2)));
        assert_eq!(pool.occupied(), 4);
    }

    #[test]
    fn acquire_release_round_trip() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        pool.acquire(addr(1)).unwrap();
        let before = pool.occupied();

        let slot = pool.acquire(addr(2)).unwrap();
        pool.bind(slot, ConnId(7)).unwrap();
        assert!(pool.is_member(ConnId(7)));
        assert_eq!(pool.release(ConnId(7)), Ok(slot));

        assert_eq!(pool.occupied(), before);
        assert!(!pool.is_member(ConnId(7)));
        assert_eq!(pool.acquire(addr(3)), Ok(slot));
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let mut pool: ConnectionPool<2> = ConnectionPool::new();
        for n in 0..10 {
            let _ = pool.acquire(addr(n));
            assert!(pool.occupied() <= pool.capacity());
        }
    }

    #[test]
    fn release_of_unknown_handle_is_an_error() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        assert_eq!(pool.release(ConnId(1)), Err(Error::UnknownHandleRelease));
    }

    #[test]
    fn double_release_is_an_error() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        let slot = pool.acquire(addr(1)).unwrap();
        pool.bind(slot, ConnId(5)).unwrap();
        assert!(pool.release(ConnId(5)).is_ok());
        assert_eq!(pool.release(ConnId(5)), Err(Error::UnknownHandleRelease));
        assert_eq!(pool.occupied(), 0);
    }

    #[test]
    fn handles_are_unique_across_slots() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        let a = pool.acquire(addr(1)).unwrap();
        let b = pool.acquire(addr(2)).unwrap();
        pool.bind(a, ConnId(3)).unwrap();
        assert_eq!(pool.bind(b, ConnId(3)), Err(Error::DuplicateHandle));
    }

    #[test]
    fn bind_requires_a_pending_slot() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        assert_eq!(pool.bind(SlotId(0), ConnId(1)), Err(Error::InvalidSlot));
        assert_eq!(pool.bind(SlotId(9), ConnId(1)), Err(Error::InvalidSlot));

        let slot = pool.acquire(addr(1)).unwrap();
        pool.bind(slot, ConnId(1)).unwrap();
        assert_eq!(pool.bind(slot, ConnId(2)), Err(Error::InvalidSlot));
    }

    #[test]
    fn abandoned_attempt_frees_its_slot() {
        let mut pool: ConnectionPool<4> = ConnectionPool::new();
        let slot = pool.acquire(addr(1)).unwrap();
        assert!(pool.is_held_address(&addr(1)));
        assert_eq!(pool.release_slot(slot), Ok(()));
        assert!(!pool.is_held_address(&addr(1)));
        assert_eq!(pool.release_slot(slot), Err(Error::InvalidSlot));
    }
}
