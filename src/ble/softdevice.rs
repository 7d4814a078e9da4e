//! [`Radio`] implementation on the Nordic SoftDevice S140.
//!
//! The controller never awaits.  Its requests are posted to the tasks below
//! (one scanner, one task per connection slot, one timer wheel) and their
//! outcomes come back as [`RadioEvent`]s on [`EVENTS`].
//!
//! GATT discovery runs as a single `gatt_client::discover` pass on the
//! service search; the characteristic search is answered from what that
//! pass collected, matched against the requested UUID.

use core::cell::Cell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, DiscoverError, HvxType};
use nrf_softdevice::ble::{central, AddressType, Connection, Uuid};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::controller::Controller;
use crate::ble::discovery::find_declaration;
use crate::ble::timers::{TimerTable, TIMER_TABLE_LEN};
use crate::ble::{
    Address, AddressKind, AdvertisementKind, AdvertisementRecord, ConnId, DiscoverKind,
    DiscoverRequest, Event, Radio, ScanMode, SlotId, TimerId, Uuid128,
};
use crate::config::{self, MAX_CONNECTIONS, MAX_WRITE_LEN, TARGET_SERVICE_UUID};
use crate::error::BleError;

/// Legacy advertising payload limit.
pub const ADV_PAYLOAD_LEN: usize = 31;

const EVENT_QUEUE_LEN: usize = 16;
const SLOT_QUEUE_LEN: usize = 4;
const TIMER_QUEUE_LEN: usize = TIMER_TABLE_LEN;
const COLLECTED_CHARACTERISTICS: usize = 8;

/// Owned copy of an [`Event`], so it can cross a channel.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    Advertisement {
        address: Address,
        rssi: i8,
        kind: AdvertisementKind,
        payload: Vec<u8, ADV_PAYLOAD_LEN>,
    },
    LinkUp {
        slot: SlotId,
        conn: ConnId,
        address: Address,
    },
    ConnectFailed { slot: SlotId, reason: BleError },
    LinkDown { conn: ConnId, reason: Option<u8> },
    Attribute {
        conn: ConnId,
        kind: DiscoverKind,
        handle: u16,
        uuid: Uuid128,
    },
    DiscoveryDone { conn: ConnId, kind: DiscoverKind },
    WriteDone {
        conn: ConnId,
        result: Result<(), BleError>,
    },
    Timer(TimerId),
    Trigger,
}

impl RadioEvent {
    pub fn as_event(&self) -> Event<'_> {
        match self {
            RadioEvent::Advertisement {
                address,
                rssi,
                kind,
                payload,
            } => Event::Advertisement(AdvertisementRecord {
                address: *address,
                rssi: *rssi,
                kind: *kind,
                payload,
            }),
            RadioEvent::LinkUp {
                slot,
                conn,
                address,
            } => Event::LinkUp {
                slot: *slot,
                conn: *conn,
                address: *address,
            },
            RadioEvent::ConnectFailed { slot, reason } => Event::ConnectFailed {
                slot: *slot,
                reason: *reason,
            },
            RadioEvent::LinkDown { conn, reason } => Event::LinkDown {
                conn: *conn,
                reason: *reason,
            },
            RadioEvent::Attribute {
                conn,
                kind,
                handle,
                uuid,
            } => Event::Attribute {
                conn: *conn,
                kind: *kind,
                handle: *handle,
                uuid: *uuid,
            },
            RadioEvent::DiscoveryDone { conn, kind } => Event::DiscoveryDone {
                conn: *conn,
                kind: *kind,
            },
            RadioEvent::WriteDone { conn, result } => Event::WriteDone {
                conn: *conn,
                result: *result,
            },
            RadioEvent::Timer(timer) => Event::Timer(*timer),
            RadioEvent::Trigger => Event::Trigger,
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ScanCommand {
    Start(ScanMode),
    Stop,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum SlotCommand {
    Connect(Address),
    Cancel,
    Discover(DiscoverRequest),
    Write {
        handle: u16,
        data: Vec<u8, MAX_WRITE_LEN>,
    },
    Disconnect,
}

/// Radio → controller.
pub static EVENTS: Channel<CriticalSectionRawMutex, RadioEvent, EVENT_QUEUE_LEN> = Channel::new();

static SCAN: Signal<CriticalSectionRawMutex, ScanCommand> = Signal::new();

static SLOT_COMMANDS: [Channel<CriticalSectionRawMutex, SlotCommand, SLOT_QUEUE_LEN>;
    MAX_CONNECTIONS] = [const { Channel::new() }; MAX_CONNECTIONS];

static TIMER_REQUESTS: Channel<CriticalSectionRawMutex, (TimerId, u32), TIMER_QUEUE_LEN> =
    Channel::new();

/// Live connection handle per slot, for routing requests by [`ConnId`].
static LINKS: Mutex<CriticalSectionRawMutex, Cell<[Option<ConnId>; MAX_CONNECTIONS]>> =
    Mutex::new(Cell::new([None; MAX_CONNECTIONS]));

fn set_link(slot: SlotId, conn: Option<ConnId>) {
    LINKS.lock(|links| {
        let mut table = links.get();
        if let Some(entry) = table.get_mut(slot.index()) {
            *entry = conn;
        }
        links.set(table);
    });
}

fn slot_for(conn: ConnId) -> Option<SlotId> {
    LINKS.lock(|links| {
        links
            .get()
            .iter()
            .position(|c| *c == Some(conn))
            .map(|index| SlotId(index as u8))
    })
}

/// Request side of the radio.  Every call only queues work.
pub struct SoftDeviceRadio;

impl SoftDeviceRadio {
    fn send_slot(slot: SlotId, cmd: SlotCommand) -> Result<(), BleError> {
        SLOT_COMMANDS
            .get(slot.index())
            .ok_or(BleError::NotConnected)?
            .try_send(cmd)
            .map_err(|_| BleError::QueueFull)
    }

    fn send_conn(conn: ConnId, cmd: SlotCommand) -> Result<(), BleError> {
        let slot = slot_for(conn).ok_or(BleError::NotConnected)?;
        Self::send_slot(slot, cmd)
    }
}

impl Radio for SoftDeviceRadio {
    fn start_scan(&mut self, mode: ScanMode) -> Result<(), BleError> {
        SCAN.signal(ScanCommand::Start(mode));
        Ok(())
    }

    fn stop_scan(&mut self) {
        SCAN.signal(ScanCommand::Stop);
    }

    fn connect(&mut self, slot: SlotId, address: Address) -> Result<(), BleError> {
        Self::send_slot(slot, SlotCommand::Connect(address))
    }

    fn cancel_connect(&mut self, slot: SlotId) {
        if Self::send_slot(slot, SlotCommand::Cancel).is_err() {
            warn!("slot {} cancel dropped", slot.0);
        }
    }

    fn disconnect(&mut self, conn: ConnId) {
        if let Err(e) = Self::send_conn(conn, SlotCommand::Disconnect) {
            debug!("disconnect {:?} dropped: {:?}", conn, e);
        }
    }

    fn discover(&mut self, conn: ConnId, request: DiscoverRequest) -> Result<(), BleError> {
        Self::send_conn(conn, SlotCommand::Discover(request))
    }

    fn write(&mut self, conn: ConnId, handle: u16, data: &[u8]) -> Result<(), BleError> {
        let data = Vec::from_slice(data).map_err(|_| BleError::WriteFailed)?;
        Self::send_conn(conn, SlotCommand::Write { handle, data })
    }

    fn schedule_once(&mut self, delay_ms: u32, timer: TimerId) {
        if TIMER_REQUESTS.try_send((timer, delay_ms)).is_err() {
            error!("timer queue full, {:?} lost", timer);
        }
    }
}

fn to_address(raw: &raw::ble_gap_addr_t) -> Address {
    let addr = nrf_softdevice::ble::Address::from_raw(*raw);
    let kind = match addr.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomStatic => AddressKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddressKind::RandomPrivateResolvable,
        AddressType::RandomPrivateNonResolvable => AddressKind::RandomPrivateNonResolvable,
        AddressType::Anonymous => AddressKind::Anonymous,
    };
    Address::new(kind, addr.bytes())
}

fn to_sd_address(address: &Address) -> nrf_softdevice::ble::Address {
    let kind = match address.kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
        AddressKind::Anonymous => AddressType::Anonymous,
    };
    nrf_softdevice::ble::Address::new(kind, address.bytes)
}

fn advertisement_kind(report: &raw::ble_gap_evt_adv_report_t) -> AdvertisementKind {
    let kind = report.type_;
    if kind.scan_response() != 0 || kind.connectable() == 0 {
        AdvertisementKind::Other
    } else if kind.directed() != 0 {
        AdvertisementKind::ConnectableDirected
    } else {
        AdvertisementKind::ConnectableUndirected
    }
}

/// Runs GAP scans on request and forwards every report to [`EVENTS`].
#[embassy_executor::task]
pub async fn scanner_task(sd: &'static Softdevice) -> ! {
    let mut mode: Option<ScanMode> = None;

    loop {
        let Some(current) = mode else {
            mode = match SCAN.wait().await {
                ScanCommand::Start(m) => Some(m),
                ScanCommand::Stop => None,
            };
            continue;
        };

        let config = central::ScanConfig {
            active: current == ScanMode::Active,
            ..Default::default()
        };

        let scan = central::scan(sd, &config, |params| {
            let data =
                unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
            let Ok(payload) = Vec::from_slice(data) else {
                return None;
            };
            let event = RadioEvent::Advertisement {
                address: to_address(&params.peer_addr),
                rssi: params.rssi,
                kind: advertisement_kind(params),
                payload,
            };
            // A full queue drops reports; the peripheral keeps advertising.
            let _ = EVENTS.try_send(event);
            None::<()>
        });

        match select(scan, SCAN.wait()).await {
            Either::First(Ok(())) => {}
            Either::First(Err(e)) => {
                warn!("BLE scan ended with error: {:?}", e);
                Timer::after(Duration::from_millis(config::LINK_POLL_MS)).await;
            }
            Either::Second(ScanCommand::Start(m)) => mode = Some(m),
            Either::Second(ScanCommand::Stop) => {
                debug!("scan stopped");
                mode = None;
            }
        }
    }
}

/// Service UUID the next `gatt_client::discover` pass searches for.
static SERVICE_SEARCH: Mutex<CriticalSectionRawMutex, Cell<Uuid128>> =
    Mutex::new(Cell::new(TARGET_SERVICE_UUID));

/// GATT client that records the characteristics of the searched service.
struct AttributeCollector {
    service: Uuid128,
    characteristics: Vec<(u16, Uuid), COLLECTED_CHARACTERISTICS>,
}

impl gatt_client::Client for AttributeCollector {
    type Event = ();

    fn on_hvx(&self, _conn: &Connection, _type_: HvxType, _handle: u16, _data: &[u8]) -> Option<()> {
        None
    }

    fn uuid() -> Uuid {
        Uuid::new_128(SERVICE_SEARCH.lock(Cell::get).as_le_bytes())
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            service: SERVICE_SEARCH.lock(Cell::get),
            characteristics: Vec::new(),
        }
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &gatt_client::Characteristic,
        _descriptors: &[gatt_client::Descriptor],
    ) {
        let Some(uuid) = characteristic.uuid else {
            return;
        };
        if self.characteristics.push((characteristic.handle_decl, uuid)).is_err() {
            warn!("characteristic at {} not recorded", characteristic.handle_decl);
        }
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

/// Owns one pool slot: connects on request, then serves the link.
#[embassy_executor::task(pool_size = MAX_CONNECTIONS)]
pub async fn slot_task(sd: &'static Softdevice, slot: SlotId) -> ! {
    let commands = &SLOT_COMMANDS[slot.index()];

    loop {
        let address = match commands.receive().await {
            SlotCommand::Connect(address) => address,
            other => {
                trace!("slot {} idle, dropping {:?}", slot.0, other);
                continue;
            }
        };

        let peer = to_sd_address(&address);
        let whitelist = [&peer];
        let conn_cfg = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
                max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
                slave_latency: config::BLE_SLAVE_LATENCY,
                conn_sup_timeout: config::BLE_SUP_TIMEOUT,
            },
            ..Default::default()
        };

        let cancelled = async {
            loop {
                if let SlotCommand::Cancel = commands.receive().await {
                    break;
                }
            }
        };

        let conn = match select(central::connect(sd, &conn_cfg), cancelled).await {
            Either::First(Ok(conn)) => conn,
            Either::First(Err(e)) => {
                warn!("slot {} connect failed: {:?}", slot.0, e);
                EVENTS
                    .send(RadioEvent::ConnectFailed {
                        slot,
                        reason: BleError::ConnectFailed,
                    })
                    .await;
                continue;
            }
            Either::Second(()) => {
                debug!("slot {} connect cancelled", slot.0);
                continue;
            }
        };

        let Some(handle) = conn.handle() else {
            EVENTS
                .send(RadioEvent::ConnectFailed {
                    slot,
                    reason: BleError::NotConnected,
                })
                .await;
            continue;
        };
        let id = ConnId(handle);

        set_link(slot, Some(id));
        EVENTS
            .send(RadioEvent::LinkUp {
                slot,
                conn: id,
                address,
            })
            .await;

        serve_link(&conn, slot, id, commands).await;

        set_link(slot, None);
        EVENTS
            .send(RadioEvent::LinkDown {
                conn: id,
                reason: None,
            })
            .await;
    }
}

async fn link_lost(conn: &Connection) {
    while conn.is_connected() {
        Timer::after(Duration::from_millis(config::LINK_POLL_MS)).await;
    }
}

async fn serve_link(
    conn: &Connection,
    slot: SlotId,
    id: ConnId,
    commands: &Channel<CriticalSectionRawMutex, SlotCommand, SLOT_QUEUE_LEN>,
) {
    let mut collected: Option<AttributeCollector> = None;

    loop {
        let cmd = match select(commands.receive(), link_lost(conn)).await {
            Either::First(cmd) => cmd,
            Either::Second(()) => return,
        };

        match cmd {
            SlotCommand::Discover(request) => {
                let event = discover(conn, id, request, &mut collected).await;
                EVENTS.send(event).await;
            }
            SlotCommand::Write { handle, data } => {
                let result = gatt_client::write(conn, handle, &data)
                    .await
                    .map_err(|_| BleError::WriteFailed);
                EVENTS.send(RadioEvent::WriteDone { conn: id, result }).await;
            }
            SlotCommand::Disconnect => {
                let _ = conn.disconnect();
                return;
            }
            // The controller gave up on this link's attempt and reused the
            // slot; fail the new attempt so it does not wait for its timeout.
            SlotCommand::Connect(address) => {
                warn!("slot {} busy with {:?}, connect to {:?} failed", slot.0, id, address);
                EVENTS
                    .send(RadioEvent::ConnectFailed {
                        slot,
                        reason: BleError::ConnectFailed,
                    })
                    .await;
            }
            SlotCommand::Cancel => {
                trace!("{:?} already connected, cancel dropped", id);
            }
        }
    }
}

async fn discover(
    conn: &Connection,
    id: ConnId,
    request: DiscoverRequest,
    collected: &mut Option<AttributeCollector>,
) -> RadioEvent {
    let done = RadioEvent::DiscoveryDone {
        conn: id,
        kind: request.kind,
    };

    match request.kind {
        DiscoverKind::PrimaryService => {
            SERVICE_SEARCH.lock(|search| search.set(request.uuid));
            match gatt_client::discover::<AttributeCollector>(conn).await {
                Ok(found) => {
                    // Report just below the first declaration, which keeps
                    // every characteristic inside the follow-up range.
                    let handle = found
                        .characteristics
                        .iter()
                        .map(|(decl, _)| *decl)
                        .min()
                        .map_or(request.start_handle, |decl| decl.saturating_sub(1))
                        .max(request.start_handle);
                    let uuid = found.service;
                    *collected = Some(found);
                    RadioEvent::Attribute {
                        conn: id,
                        kind: DiscoverKind::PrimaryService,
                        handle,
                        uuid,
                    }
                }
                Err(e) => {
                    info!("{:?}: service discovery failed: {:?}", id, e);
                    *collected = None;
                    done
                }
            }
        }
        DiscoverKind::Characteristic => {
            let wanted = Uuid::new_128(request.uuid.as_le_bytes());
            let hit = collected
                .as_ref()
                .and_then(|c| find_declaration(&c.characteristics, &request, &wanted));
            match hit {
                // Only a declaration whose UUID equals the request is a hit.
                Some(decl) => RadioEvent::Attribute {
                    conn: id,
                    kind: DiscoverKind::Characteristic,
                    handle: decl,
                    uuid: request.uuid,
                },
                None => done,
            }
        }
    }
}

/// One-shot timers.  Re-scheduling a pending key moves its deadline.
#[embassy_executor::task]
pub async fn timer_task() -> ! {
    let mut table: TimerTable<Instant> = TimerTable::new();

    loop {
        let next = table.next_deadline();
        let wake = async {
            match next {
                Some(at) => Timer::at(at).await,
                None => core::future::pending::<()>().await,
            }
        };

        match select(TIMER_REQUESTS.receive(), wake).await {
            Either::First((timer, delay_ms)) => {
                let at = Instant::now() + Duration::from_millis(u64::from(delay_ms));
                if let Err(lost) = table.schedule(timer, at) {
                    error!("timer table full, {:?} lost", lost);
                }
            }
            Either::Second(()) => {
                let now = Instant::now();
                while let Some(timer) = table.pop_expired(now) {
                    EVENTS.send(RadioEvent::Timer(timer)).await;
                }
            }
        }
    }
}

/// Drains [`EVENTS`] into the controller.
#[embassy_executor::task]
pub async fn controller_task(
    mut controller: Controller<MAX_CONNECTIONS>,
    mut actuator: crate::io::LedActuator,
) -> ! {
    let mut radio = SoftDeviceRadio;
    controller.start(&mut radio);

    loop {
        let event = EVENTS.receive().await;
        let now = Instant::now().as_millis();
        controller.handle(now, event.as_event(), &mut radio, &mut actuator);
    }
}

/// Feed an external trigger (button press) into the controller.
pub async fn trigger() {
    EVENTS.send(RadioEvent::Trigger).await;
}
