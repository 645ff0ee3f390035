//! [`DisplayPanel`] on an HD44780-compatible 16x2 character LCD wired in 4-bit mode with R/W tied low.
//!
//! The controller cannot be read back when R/W is grounded, so every command is followed by a fixed delay covering
//! its worst-case execution time rather than a busy-flag poll.

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, block_for};
use synth_transformer_lib::io::DisplayPanel;

pub const COLUMNS: usize = 16;

const CLEAR: u8 = 0x01;
const ENTRY_MODE_INCREMENT: u8 = 0x06;
const DISPLAY_ON: u8 = 0x0C;
const FUNCTION_SET_4_BIT_2_LINE: u8 = 0x28;
const SET_DDRAM_ADDRESS: u8 = 0x80;

/// DDRAM address of the first column of each line.
const LINE_ADDRESSES: [u8; 2] = [0x00, 0x40];

const COMMAND_DELAY: Duration = Duration::from_micros(50);
const CLEAR_DELAY: Duration = Duration::from_millis(2);

pub struct Lcd {
    rs: Output<'static>,
    enable: Output<'static>,
    data: [Output<'static>; 4],
}

impl Lcd {
    /// Runs the power-on initialization sequence from the HD44780 datasheet (figure 24) and leaves the display
    /// cleared.
    pub fn new(rs: Output<'static>, enable: Output<'static>, data: [Output<'static>; 4]) -> Self {
        let mut lcd = Self { rs, enable, data };

        block_for(Duration::from_millis(50));
        lcd.rs.set_low();
        // three 8-bit function sets bring the controller to a known state whatever mode it woke up in
        for delay in [Duration::from_millis(5), Duration::from_micros(150), COMMAND_DELAY] {
            lcd.write_nibble(0x3);
            block_for(delay);
        }
        lcd.write_nibble(0x2);
        block_for(COMMAND_DELAY);

        lcd.command(FUNCTION_SET_4_BIT_2_LINE);
        lcd.command(DISPLAY_ON);
        lcd.command(ENTRY_MODE_INCREMENT);
        lcd.clear();
        lcd
    }

    fn command(&mut self, byte: u8) {
        self.rs.set_low();
        self.write_byte(byte);
        block_for(COMMAND_DELAY);
    }

    fn character(&mut self, byte: u8) {
        self.rs.set_high();
        self.write_byte(byte);
        block_for(COMMAND_DELAY);
    }

    fn write_byte(&mut self, byte: u8) {
        self.write_nibble(byte >> 4);
        self.write_nibble(byte & 0x0F);
    }

    fn write_nibble(&mut self, nibble: u8) {
        for (bit, pin) in self.data.iter_mut().enumerate() {
            pin.set_level((nibble & (1 << bit) != 0).into());
        }
        self.enable.set_high();
        block_for(Duration::from_micros(1));
        self.enable.set_low();
    }

    fn render_line(&mut self, line: usize, text: &str) {
        self.command(SET_DDRAM_ADDRESS | LINE_ADDRESSES[line]);
        // the character ROM only matches ASCII in the printable range
        let glyphs = text
            .chars()
            .map(|c| if c == ' ' || c.is_ascii_graphic() { c as u8 } else { b'?' })
            .chain(core::iter::repeat(b' '))
            .take(COLUMNS);
        for glyph in glyphs {
            self.character(glyph);
        }
    }
}

impl DisplayPanel for Lcd {
    fn render_top_line(&mut self, text: &str) {
        self.render_line(0, text);
    }

    fn render_bottom_line(&mut self, text: &str) {
        self.render_line(1, text);
    }

    fn clear(&mut self) {
        self.command(CLEAR);
        block_for(CLEAR_DELAY);
    }
}
