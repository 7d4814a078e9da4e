//! Connection lifecycle controller.
//!
//! Scanning → Connecting → Connected → Scanning, one pool slot per link.
//! Every radio callback is fed through [`Controller::handle`]; the
//! controller reacts by issuing fire-and-forget requests on the [`Radio`].
//! Nothing here is fatal: failures are logged and the controller falls back
//! to scanning.

use crate::actuator::{Actuator, WriteActuator};
use crate::ble::adv_parser::extract_device_name;
use crate::ble::discovery::{DiscoverySession, DiscoveryStep, Phase};
use crate::ble::pool::ConnectionPool;
use crate::ble::scan_filter::{ScanDecision, ScanFilter};
use crate::ble::{
    Address, AdvertisementRecord, ConnId, Event, Millis, Radio, SlotId, TimerId,
};
use crate::config::{ControllerConfig, MAX_CONNECTIONS};
use crate::error::{BleError, Error};

/// Top-level scanning state.  Per-link progress is reported by [`LinkPhase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerState {
    /// Not scanning: not started yet, or the radio refused to scan.
    Idle,
    Scanning,
    /// A connect request is outstanding for this slot; scanning is stopped.
    Connecting(SlotId),
    /// Every slot is taken; scanning resumes when one is released.
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkPhase {
    Connecting,
    Discovering(Phase),
    /// Discovery finished; writes go to `value_handle`.
    Ready { value_handle: u16 },
    /// Discovery ended without a target; the link stays up until it drops.
    Unusable,
}

#[derive(Clone, Copy, Debug)]
enum Link {
    Vacant,
    Connecting {
        epoch: u32,
    },
    Connected {
        conn: ConnId,
        epoch: u32,
        session: DiscoverySession,
    },
}

pub struct Controller<const N: usize = MAX_CONNECTIONS> {
    config: ControllerConfig,
    filter: ScanFilter,
    pool: ConnectionPool<N>,
    links: [Link; N],
    writer: WriteActuator<N>,
    state: ControllerState,
    epoch: u32,
}

impl<const N: usize> Controller<N> {
    pub fn new(config: ControllerConfig) -> Self {
        let mut filter = ScanFilter::new(config.target);
        if let Some(dbm) = config.min_rssi {
            filter = filter.with_min_rssi(dbm);
        }
        Self {
            config,
            filter,
            pool: ConnectionPool::new(),
            links: [Link::Vacant; N],
            writer: WriteActuator::new(config.revert_delay_ms),
            state: ControllerState::Idle,
            epoch: 0,
        }
    }

    /// Begin scanning for the target.
    pub fn start<R: Radio>(&mut self, radio: &mut R) {
        info!("controller starting, target {:?}", self.filter.target());
        self.resume_scan(radio);
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn pool(&self) -> &ConnectionPool<N> {
        &self.pool
    }

    pub fn writer(&self) -> &WriteActuator<N> {
        &self.writer
    }

    pub fn link(&self, slot: SlotId) -> Option<LinkPhase> {
        match self.links.get(slot.index())? {
            Link::Vacant => None,
            Link::Connecting { .. } => Some(LinkPhase::Connecting),
            Link::Connected { session, .. } => Some(match session.phase() {
                Phase::Done => match session.value_handle() {
                    Some(value_handle) => LinkPhase::Ready { value_handle },
                    None => LinkPhase::Unusable,
                },
                Phase::Aborted => LinkPhase::Unusable,
                phase => LinkPhase::Discovering(phase),
            }),
        }
    }

    /// Single entry point for every radio callback.
    pub fn handle<R: Radio, A: Actuator>(
        &mut self,
        now: Millis,
        event: Event<'_>,
        radio: &mut R,
        actuator: &mut A,
    ) {
        match event {
            Event::Advertisement(adv) => self.on_advertisement(&adv, radio),
            Event::LinkUp {
                slot,
                conn,
                address,
            } => self.on_link_up(slot, conn, address, radio),
            Event::ConnectFailed { slot, reason } => self.on_connect_failed(slot, reason, radio),
            Event::LinkDown { conn, reason } => self.on_link_down(conn, reason, radio),
            Event::Attribute {
                conn,
                kind,
                handle,
                uuid,
            } => self.on_discovery(conn, now, radio, |s| s.on_attribute(kind, handle, uuid)),
            Event::DiscoveryDone { conn, kind } => {
                self.on_discovery(conn, now, radio, |s| s.on_done(kind))
            }
            Event::WriteDone { conn, result } => {
                self.on_write_done(conn, result, now, radio, actuator)
            }
            Event::Timer(timer) => self.on_timer(timer, now, radio, actuator),
            Event::Trigger => self.on_trigger(now, radio),
        }
    }

    fn on_advertisement<R: Radio>(&mut self, adv: &AdvertisementRecord<'_>, radio: &mut R) {
        if self.state != ControllerState::Scanning {
            return;
        }
        let ScanDecision::Match(address) = self.filter.evaluate(adv) else {
            return;
        };
        if self.pool.is_held_address(&address) {
            trace!("already holding {:?}", address);
            return;
        }

        info!(
            "target found: {} (RSSI {})",
            extract_device_name(adv.payload).as_str(),
            adv.rssi
        );
        radio.stop_scan();
        self.connect(address, radio);
    }

    fn connect<R: Radio>(&mut self, address: Address, radio: &mut R) {
        let slot = match self.pool.acquire(address) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("{:?}: pausing scan until a slot frees", e);
                self.state = ControllerState::Paused;
                return;
            }
        };

        if let Err(e) = radio.connect(slot, address) {
            warn!("slot {} connect request refused: {:?}", slot.0, e);
            let _ = self.pool.release_slot(slot);
            self.resume_scan(radio);
            return;
        }

        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        self.links[slot.index()] = Link::Connecting { epoch };
        self.state = ControllerState::Connecting(slot);
        info!("slot {} connecting to {:?}", slot.0, address);

        if let Some(ms) = self.config.connect_timeout_ms {
            radio.schedule_once(ms, TimerId::ConnectTimeout { slot, epoch });
        }
    }

    fn on_link_up<R: Radio>(&mut self, slot: SlotId, conn: ConnId, address: Address, radio: &mut R) {
        let Some(Link::Connecting { epoch }) = self.links.get(slot.index()).copied() else {
            // Attempt was already abandoned (timeout); drop the late link.
            warn!("link-up on slot {} without a pending connect", slot.0);
            radio.disconnect(conn);
            return;
        };

        // A link from an abandoned attempt on this slot; the pending one stays.
        if self.pool.get(slot).and_then(|s| s.address) != Some(address) {
            warn!("slot {} link-up from {:?} is not the pending peer", slot.0, address);
            radio.disconnect(conn);
            return;
        }

        if let Err(e) = self.pool.bind(slot, conn) {
            error!("slot {} cannot bind {:?}: {:?}", slot.0, conn, e);
            radio.disconnect(conn);
            self.abandon_attempt(slot, radio);
            return;
        }

        let mut session = DiscoverySession::new(conn, self.config.service, self.config.characteristic);
        info!("slot {} connected as {:?}, discovering", slot.0, conn);

        if let Err(e) = radio.discover(conn, session.first_request()) {
            warn!("{:?}: service search refused on {:?}", Error::from(e), conn);
            session.abort();
            radio.disconnect(conn);
        } else if let Some(ms) = self.config.discovery_timeout_ms {
            radio.schedule_once(ms, TimerId::DiscoveryTimeout { slot, epoch });
        }
        self.links[slot.index()] = Link::Connected {
            conn,
            epoch,
            session,
        };

        self.resume_scan(radio);
    }

    fn on_connect_failed<R: Radio>(&mut self, slot: SlotId, reason: BleError, radio: &mut R) {
        if !matches!(self.links.get(slot.index()), Some(Link::Connecting { .. })) {
            return;
        }
        warn!("{:?} on slot {}: {:?}", Error::ConnectFailed, slot.0, reason);
        self.abandon_attempt(slot, radio);
    }

    fn abandon_attempt<R: Radio>(&mut self, slot: SlotId, radio: &mut R) {
        if let Err(e) = self.pool.release_slot(slot) {
            error!("slot {} release failed: {:?}", slot.0, e);
        }
        self.links[slot.index()] = Link::Vacant;
        if self.state == ControllerState::Connecting(slot) {
            self.state = ControllerState::Idle;
        }
        self.resume_scan(radio);
    }

    fn on_link_down<R: Radio>(&mut self, conn: ConnId, reason: Option<u8>, radio: &mut R) {
        if !self.pool.is_member(conn) {
            debug!("ignoring link-down for unowned {:?}", conn);
            return;
        }
        let slot = match self.pool.release(conn) {
            Ok(slot) => slot,
            Err(e) => {
                error!("{:?} for {:?}", e, conn);
                return;
            }
        };

        if let Link::Connected { session, .. } = &mut self.links[slot.index()] {
            session.abort();
        }
        self.links[slot.index()] = Link::Vacant;
        if self.writer.discard(slot).is_some() {
            debug!("dropped in-flight write on {:?}", conn);
        }
        info!("slot {} disconnected ({:?}), reason {:?}", slot.0, conn, reason);

        // A connect in progress owns the scanner; its outcome resumes scanning.
        if !matches!(self.state, ControllerState::Connecting(_)) {
            self.restart_scan(radio);
        }
    }

    fn on_discovery<R, F>(&mut self, conn: ConnId, now: Millis, radio: &mut R, feed: F)
    where
        R: Radio,
        F: FnOnce(&mut DiscoverySession) -> DiscoveryStep,
    {
        let Some((slot, session)) = self.session_mut(conn) else {
            trace!("discovery callback for unknown {:?}", conn);
            return;
        };

        match feed(session) {
            DiscoveryStep::Ignored => {}
            DiscoveryStep::Next(request) => {
                debug!("{:?}: service found, searching characteristic", conn);
                if let Err(e) = radio.discover(conn, request) {
                    warn!("characteristic search refused on {:?}: {:?}", conn, e);
                    session.abort();
                    radio.disconnect(conn);
                }
            }
            DiscoveryStep::Resolved(handle) => {
                info!("{:?}: value handle {}", conn, handle);
                self.issue_write(slot, conn, handle, now, radio);
            }
            DiscoveryStep::Aborted => {
                // Free the slot for a peer that does offer the target.
                warn!("{:?} on {:?}, disconnecting", Error::DiscoveryMismatch, conn);
                radio.disconnect(conn);
            }
        }
    }

    fn session_mut(&mut self, conn: ConnId) -> Option<(SlotId, &mut DiscoverySession)> {
        let slot = self.pool.slot_of(conn)?;
        match &mut self.links[slot.index()] {
            Link::Connected {
                conn: c, session, ..
            } if *c == conn => Some((slot, session)),
            _ => None,
        }
    }

    fn issue_write<R: Radio>(
        &mut self,
        slot: SlotId,
        conn: ConnId,
        handle: u16,
        now: Millis,
        radio: &mut R,
    ) {
        let pending = match self.writer.trigger(slot, conn, handle, self.config.payload) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("{:?} on {:?}", e, conn);
                return;
            }
        };
        if let Err(e) = radio.write(conn, handle, &pending.payload) {
            warn!("write request refused on {:?}: {:?}", conn, e);
            self.writer.complete(slot, conn, false, now);
        }
    }

    fn on_write_done<R: Radio, A: Actuator>(
        &mut self,
        conn: ConnId,
        result: Result<(), BleError>,
        now: Millis,
        radio: &mut R,
        actuator: &mut A,
    ) {
        let Some(slot) = self.pool.slot_of(conn) else {
            trace!("write completion for unknown {:?}", conn);
            return;
        };
        if let Err(e) = result {
            warn!("{:?} by {:?}: {:?}", Error::WriteRejected, conn, e);
        }

        if let Some(fire_at) = self.writer.complete(slot, conn, result.is_ok(), now) {
            info!("write confirmed on {:?}, reverting at {}", conn, fire_at);
            actuator.engage();
            let delay = fire_at.saturating_sub(now);
            radio.schedule_once(u32::try_from(delay).unwrap_or(u32::MAX), TimerId::Revert);
        }
    }

    fn on_timer<R: Radio, A: Actuator>(
        &mut self,
        timer: TimerId,
        now: Millis,
        radio: &mut R,
        actuator: &mut A,
    ) {
        match timer {
            TimerId::Revert => {
                if self.writer.fire(now) {
                    debug!("revert fired");
                    actuator.rest();
                }
            }
            TimerId::ConnectTimeout { slot, epoch } => {
                let still_pending = matches!(
                    self.links.get(slot.index()),
                    Some(Link::Connecting { epoch: e }) if *e == epoch
                );
                if still_pending {
                    warn!("{:?}: connect on slot {}", Error::Timeout, slot.0);
                    radio.cancel_connect(slot);
                    self.abandon_attempt(slot, radio);
                }
            }
            TimerId::DiscoveryTimeout { slot, epoch } => {
                if let Some(Link::Connected {
                    conn,
                    epoch: e,
                    session,
                }) = self.links.get_mut(slot.index())
                {
                    if *e == epoch && session.abort() {
                        warn!("{:?}: discovery on {:?}", Error::Timeout, *conn);
                        radio.disconnect(*conn);
                    }
                }
            }
        }
    }

    fn on_trigger<R: Radio>(&mut self, now: Millis, radio: &mut R) {
        for index in 0..N {
            let slot = SlotId(index as u8);
            if let Some(LinkPhase::Ready { value_handle }) = self.link(slot) {
                if let Link::Connected { conn, .. } = self.links[index] {
                    self.issue_write(slot, conn, value_handle, now, radio);
                }
            }
        }
    }

    /// Start scanning if a slot is free and no connect is outstanding.
    fn resume_scan<R: Radio>(&mut self, radio: &mut R) {
        if matches!(self.state, ControllerState::Connecting(_)) && self.connect_outstanding() {
            return;
        }
        if !self.pool.has_free_slot() {
            if self.state == ControllerState::Scanning {
                radio.stop_scan();
            }
            self.state = ControllerState::Paused;
            return;
        }
        if self.state == ControllerState::Scanning {
            return;
        }
        self.scan(radio);
    }

    /// Scan again after a link loss, even if already scanning.
    fn restart_scan<R: Radio>(&mut self, radio: &mut R) {
        if self.pool.has_free_slot() {
            self.scan(radio);
        } else {
            self.state = ControllerState::Paused;
        }
    }

    fn scan<R: Radio>(&mut self, radio: &mut R) {
        match radio.start_scan(self.config.scan_mode) {
            Ok(()) => {
                debug!("scanning ({:?})", self.config.scan_mode);
                self.state = ControllerState::Scanning;
            }
            Err(e) => {
                error!("scan start failed: {:?}", e);
                self.state = ControllerState::Idle;
            }
        }
    }

    fn connect_outstanding(&self) -> bool {
        match self.state {
            ControllerState::Connecting(slot) => {
                matches!(self.links.get(slot.index()), Some(Link::Connecting { .. }))
            }
            _ => false,
        }
    }
}
