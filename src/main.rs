//! switchlink firmware - nRF52840 + SoftDevice S140, central role.
//!
//! Scans for the switch peripheral, keeps up to `MAX_CONNECTIONS` links,
//! writes the control payload once each link's characteristic is resolved
//! and lights the status LED until the delayed revert fires.  Button 1
//! repeats the write on every ready link.

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::Pin;
use embassy_nrf::interrupt::Priority;
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;

use switchlink::ble::softdevice::{controller_task, scanner_task, slot_task, timer_task};
use switchlink::ble::SlotId;
use switchlink::config::MAX_CONNECTIONS;
use switchlink::io::{button_task, LedActuator};
use switchlink::{Controller, ControllerConfig};

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("switchlink starting");

    // SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: MAX_CONNECTIONS as u8,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: MAX_CONNECTIONS as u8,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        // Vendor bases for the target service and characteristic.
        common_vs_uuid: Some(raw::ble_common_cfg_vs_uuid_t { vs_uuid_count: 4 }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);
    unwrap!(spawner.spawn(softdevice_task(sd)));

    // Button 1 triggers, LED 1 shows the actuator state.
    unwrap!(spawner.spawn(button_task(p.P0_11.degrade())));
    let led = LedActuator::new(p.P0_13.degrade());

    unwrap!(spawner.spawn(timer_task()));
    unwrap!(spawner.spawn(scanner_task(sd)));
    for slot in 0..MAX_CONNECTIONS {
        unwrap!(spawner.spawn(slot_task(sd, SlotId(slot as u8))));
    }

    let controller = Controller::new(ControllerConfig::default());
    unwrap!(spawner.spawn(controller_task(controller, led)));
}
