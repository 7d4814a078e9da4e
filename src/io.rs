//! Board I/O: the status LED standing in for the actuator, and the
//! trigger button.
//!
//! The LED (active-low) lights when a write is confirmed and goes dark
//! again when the delayed revert fires.

use crate::actuator::Actuator;
use crate::ble::softdevice;
use crate::config::BUTTON_DEBOUNCE_MS;
use embassy_nrf::gpio::{AnyPin, Input, Level, Output, OutputDrive, Pull};
use embassy_time::{Duration, Timer};

pub struct LedActuator {
    led: Output<'static>,
}

impl LedActuator {
    /// Starts at rest (LED off).
    pub fn new(pin: AnyPin) -> Self {
        Self {
            led: Output::new(pin, Level::High, OutputDrive::Standard),
        }
    }
}

impl Actuator for LedActuator {
    fn engage(&mut self) {
        self.led.set_low();
    }

    fn rest(&mut self) {
        self.led.set_high();
    }
}

/// Waits for a debounced press and asks the controller to write again on
/// every ready link.
#[embassy_executor::task]
pub async fn button_task(pin: AnyPin) -> ! {
    let mut btn = Input::new(pin, Pull::Up);

    loop {
        btn.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;

        if btn.is_low() {
            info!("trigger button pressed");
            softdevice::trigger().await;

            // Wait for release to avoid repeat triggers.
            btn.wait_for_rising_edge().await;
            Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        }
    }
}
