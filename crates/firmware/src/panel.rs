//! Front panel controls: the preset button and the status LED.

use embassy_stm32::gpio::{Input, Output};
use embassy_time::{Duration, Instant};
use synth_transformer_lib::io::{Indicator, InputEdge};

/// A level change is ignored unless the previous one is at least this old.
const DEBOUNCE: Duration = Duration::from_millis(20);

/// Active-high push button, sampled once per tick.
pub struct PresetButton {
    input: Input<'static>,
    pressed: bool,
    last_change: Instant,
}

impl PresetButton {
    pub fn new(input: Input<'static>) -> Self {
        Self {
            pressed: input.is_high(),
            input,
            last_change: Instant::MIN,
        }
    }
}

impl InputEdge for PresetButton {
    fn went_active(&mut self) -> bool {
        let pressed = self.input.is_high();
        if pressed == self.pressed || self.last_change.elapsed() < DEBOUNCE {
            return false;
        }

        self.pressed = pressed;
        self.last_change = Instant::now();
        pressed
    }
}

pub struct StatusLed(pub Output<'static>);

impl Indicator for StatusLed {
    fn set(&mut self, on: bool) {
        if on {
            self.0.set_high();
        } else {
            self.0.set_low();
        }
    }
}
