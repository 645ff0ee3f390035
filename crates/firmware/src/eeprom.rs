//! [`Storage`] on a Microchip 24LC256, a 32 KiB I2C EEPROM.

use defmt::*;
use embassy_stm32::{
    i2c::{I2c, Master},
    mode::Blocking,
};
use embassy_time::{Duration, block_for};
use embedded_hal::i2c::I2c as _;
use synth_transformer_lib::storage::{Storage, StorageError};

/// Bus address with A0-A2 tied low.
pub const DEFAULT_ADDRESS: u8 = 0x50;

const CAPACITY: usize = 32 * 1024;

/// Writes never cross a page boundary; the chip would wrap around within the page.
const PAGE_SIZE: usize = 64;

/// Maximum self-timed write cycle per the datasheet. The chip ignores the bus until it is over.
const WRITE_CYCLE: Duration = Duration::from_millis(5);

pub struct Eeprom {
    i2c: I2c<'static, Blocking, Master>,
    address: u8,
}

impl Eeprom {
    pub fn new(i2c: I2c<'static, Blocking, Master>, address: u8) -> Self {
        Self { i2c, address }
    }

    fn write_page(&mut self, address: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let mut frame = [0u8; 2 + PAGE_SIZE];
        frame[..2].copy_from_slice(&(address as u16).to_be_bytes());
        frame[2..2 + bytes.len()].copy_from_slice(bytes);

        self.i2c
            .write(self.address, &frame[..2 + bytes.len()])
            .map_err(|e| {
                warn!("EEPROM write at {} failed: {}", address, e);
                StorageError::Device
            })?;
        block_for(WRITE_CYCLE);
        Ok(())
    }
}

impl Storage for Eeprom {
    fn read(&mut self, address: usize) -> Result<u8, StorageError> {
        if address >= CAPACITY {
            return Err(StorageError::OutOfRange(address));
        }

        let mut byte = [0u8; 1];
        self.i2c
            .write_read(self.address, &(address as u16).to_be_bytes(), &mut byte)
            .map_err(|e| {
                warn!("EEPROM read at {} failed: {}", address, e);
                StorageError::Device
            })?;
        Ok(byte[0])
    }

    fn write(&mut self, address: usize, byte: u8) -> Result<(), StorageError> {
        self.write_all(address, &[byte])
    }

    fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Writes up to a page per bus transaction instead of one byte at a time, which cuts a commit from seconds to a
    /// few tens of milliseconds.
    fn write_all(&mut self, address: usize, bytes: &[u8]) -> Result<(), StorageError> {
        if address + bytes.len() > CAPACITY {
            return Err(StorageError::OutOfRange(CAPACITY.max(address)));
        }

        let mut cursor = address;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let room = PAGE_SIZE - cursor % PAGE_SIZE;
            let (page, rest) = remaining.split_at(room.min(remaining.len()));
            self.write_page(cursor, page)?;
            cursor += page.len();
            remaining = rest;
        }
        Ok(())
    }
}
