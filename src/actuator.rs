//! Characteristic write and timed revert.
//!
//! At most one write may be in flight per link; a second trigger while one
//! is pending is rejected rather than queued.  A confirmed write arms a
//! single delayed action that drives the local actuator back to rest.
//! Arming again before it fires moves the deadline (last submit wins).

use heapless::Vec;

use crate::ble::{ConnId, Millis, SlotId};
use crate::config::{MAX_CONNECTIONS, MAX_WRITE_LEN};
use crate::error::Error;

/// Physical effect behind a write (status LED, relay, PWM output).
pub trait Actuator {
    /// The peripheral confirmed the write.
    fn engage(&mut self);
    /// Delayed action fired: return to the resting position.
    fn rest(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingWrite {
    pub conn: ConnId,
    pub handle: u16,
    pub payload: Vec<u8, MAX_WRITE_LEN>,
    pub in_flight: bool,
}

/// Single outstanding deferred action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DelayedAction {
    fire_at: Millis,
    armed: bool,
}

impl DelayedAction {
    pub const fn idle() -> Self {
        Self {
            fire_at: 0,
            armed: false,
        }
    }

    /// Arm (or re-arm) the action; returns the new deadline.
    pub fn arm(&mut self, now: Millis, delay_ms: u32) -> Millis {
        self.fire_at = now.saturating_add(Millis::from(delay_ms));
        self.armed = true;
        self.fire_at
    }

    /// Consume the action if it is armed and due.  Timer deliveries from a
    /// replaced submission arrive before the current deadline and are ignored.
    pub fn fire(&mut self, now: Millis) -> bool {
        if !self.armed || now < self.fire_at {
            return false;
        }
        self.armed = false;
        true
    }

    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    pub const fn fire_at(&self) -> Option<Millis> {
        if self.armed {
            Some(self.fire_at)
        } else {
            None
        }
    }
}

pub struct WriteActuator<const N: usize = MAX_CONNECTIONS> {
    pending: [Option<PendingWrite>; N],
    delayed: DelayedAction,
    revert_delay_ms: u32,
}

impl<const N: usize> WriteActuator<N> {
    pub fn new(revert_delay_ms: u32) -> Self {
        Self {
            pending: core::array::from_fn(|_| None),
            delayed: DelayedAction::idle(),
            revert_delay_ms,
        }
    }

    /// Record a write for the link in `slot` and hand it back for issuing.
    pub fn trigger(
        &mut self,
        slot: SlotId,
        conn: ConnId,
        handle: u16,
        payload: &[u8],
    ) -> Result<&PendingWrite, Error> {
        let entry = self.pending.get_mut(slot.index()).ok_or(Error::InvalidSlot)?;
        if entry.as_ref().is_some_and(|w| w.in_flight) {
            return Err(Error::WriteRejected);
        }
        let payload = Vec::from_slice(payload).map_err(|_| Error::WriteRejected)?;
        Ok(entry.insert(PendingWrite {
            conn,
            handle,
            payload,
            in_flight: true,
        }))
    }

    /// Completion for the write on `slot`.  Returns the revert deadline when
    /// the write succeeded and the delayed action was armed.
    pub fn complete(&mut self, slot: SlotId, conn: ConnId, ok: bool, now: Millis) -> Option<Millis> {
        let entry = self.pending.get_mut(slot.index())?;
        if entry.as_ref().map(|w| w.conn) != Some(conn) {
            return None;
        }
        *entry = None;
        ok.then(|| self.delayed.arm(now, self.revert_delay_ms))
    }

    /// Drop whatever was pending on a link that went away.
    pub fn discard(&mut self, slot: SlotId) -> Option<PendingWrite> {
        self.pending.get_mut(slot.index())?.take()
    }

    pub fn pending(&self, slot: SlotId) -> Option<&PendingWrite> {
        self.pending.get(slot.index())?.as_ref()
    }

    pub fn fire(&mut self, now: Millis) -> bool {
        self.delayed.fire(now)
    }

    pub fn delayed(&self) -> &DelayedAction {
        &self.delayed
    }

    pub const fn revert_delay_ms(&self) -> u32 {
        self.revert_delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOT: SlotId = SlotId(0);
    const CONN: ConnId = ConnId(9);

    #[test]
    fn trigger_creates_in_flight_write() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        let pending = w.trigger(SLOT, CONN, 0x15, &[0x01, 0x02]).unwrap();
        assert!(pending.in_flight);
        assert_eq!(pending.handle, 0x15);
        assert_eq!(pending.payload.as_slice(), &[0x01, 0x02]);
    }

    #[test]
    fn second_trigger_while_in_flight_is_rejected() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        w.trigger(SLOT, CONN, 0x15, &[0x01]).unwrap();
        assert_eq!(
            w.trigger(SLOT, CONN, 0x15, &[0x02]).map(|_| ()),
            Err(Error::WriteRejected)
        );
        // Other links are unaffected.
        assert!(w.trigger(SlotId(1), ConnId(10), 0x15, &[0x02]).is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        let big = [0u8; MAX_WRITE_LEN + 1];
        assert_eq!(
            w.trigger(SLOT, CONN, 0x15, &big).map(|_| ()),
            Err(Error::WriteRejected)
        );
        assert!(w.pending(SLOT).is_none());
    }

    #[test]
    fn successful_completion_arms_revert() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        w.trigger(SLOT, CONN, 0x15, &[0x01]).unwrap();
        assert_eq!(w.complete(SLOT, CONN, true, 1_000), Some(1_500));
        assert!(w.pending(SLOT).is_none());
        assert!(!w.fire(1_499));
        assert!(w.fire(1_500));
        assert!(!w.fire(2_000));
    }

    #[test]
    fn failed_completion_clears_without_arming() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        w.trigger(SLOT, CONN, 0x15, &[0x01]).unwrap();
        assert_eq!(w.complete(SLOT, CONN, false, 1_000), None);
        assert!(w.pending(SLOT).is_none());
        assert!(!w.delayed().is_armed());
        // The link may write again.
        assert!(w.trigger(SLOT, CONN, 0x15, &[0x01]).is_ok());
    }

    #[test]
    fn completion_for_another_connection_is_ignored() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        w.trigger(SLOT, CONN, 0x15, &[0x01]).unwrap();
        assert_eq!(w.complete(SLOT, ConnId(77), true, 1_000), None);
        assert!(w.pending(SLOT).is_some());
    }

    #[test]
    fn resubmitting_delayed_action_replaces_it() {
        let mut action = DelayedAction::idle();
        action.arm(0, 500);
        action.arm(200, 500);
        assert_eq!(action.fire_at(), Some(700));

        // The first submission's timer lands at 500 and is ignored.
        assert!(!action.fire(500));
        assert!(action.fire(700));
        assert!(!action.fire(700));
    }

    #[test]
    fn discard_drops_pending_write() {
        let mut w: WriteActuator<4> = WriteActuator::new(500);
        w.trigger(SLOT, CONN, 0x15, &[0x01]).unwrap();
        assert!(w.discard(SLOT).is_some());
        assert_eq!(w.complete(SLOT, CONN, true, 0), None);
        assert!(!w.delayed().is_armed());
    }
}
