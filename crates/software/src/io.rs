//! This module provides traits for the peripherals surrounding the core: storage, the editor transport, the display,
//! the preset button, MIDI in and out, and the status light.
//!
//! None of these carry logic of their own. Each board bundles its implementations through [`Board`], and the
//! [`Program`](crate::program::Program) borrows them one tick at a time via [`Io`].

#![allow(async_fn_in_trait)]

use crate::storage::Storage;
use alloc::vec::Vec;
use embassy_time::Duration;
use thiserror::Error;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7};

/// Failures reading from or writing to the editor transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// A message started but did not complete in time.
    #[error("timed out waiting for the rest of a message")]
    Timeout,
    /// A message grew past the size limit. Its remaining bytes are discarded.
    #[error("message exceeds {max_len} bytes")]
    Oversize {
        /// The limit that was exceeded.
        max_len: usize,
    },
    /// Nobody is listening on the other end.
    #[error("transport disconnected")]
    Disconnected,
}

/// Byte-stream link to the editor, carrying one JSON message per exchange.
pub trait Transport {
    /// Returns `true` if a message has started arriving. Bytes that cannot begin a message are discarded without
    /// waiting.
    fn available(&mut self) -> bool;

    /// Reads one complete message.
    ///
    /// Fails with [`TransportError::Timeout`] if the message is not complete within `timeout` of its start, and with
    /// [`TransportError::Oversize`] once it grows past `max_len` bytes.
    async fn read_message(&mut self, timeout: Duration, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Sends `bytes` in full.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Two-line character display.
pub trait DisplayPanel {
    /// Replaces the contents of the first line.
    fn render_top_line(&mut self, text: &str);

    /// Replaces the contents of the second line.
    fn render_bottom_line(&mut self, text: &str);

    /// Blanks both lines.
    fn clear(&mut self);
}

/// Debounced push button.
pub trait InputEdge {
    /// Returns `true` once per press.
    fn went_active(&mut self) -> bool;
}

/// Source of MIDI messages received from the controller.
pub trait MidiSource {
    /// Returns the next pending message without waiting.
    fn poll(&mut self) -> Option<MidiMessage<'static>>;
}

/// The MIDI output towards the synthesizer could not take a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("MIDI output unavailable")]
pub struct MidiOutError;

/// MIDI output towards the synthesizer. Values arrive already translated; encoding is up to the implementation.
pub trait MidiSink {
    /// Sends a Control Change.
    async fn send_control_change(
        &mut self,
        function: ControlFunction,
        value: U7,
        channel: Channel,
    ) -> Result<(), MidiOutError>;

    /// Sends a Note On.
    async fn send_note_on(&mut self, note: Note, velocity: U7, channel: Channel) -> Result<(), MidiOutError>;

    /// Sends a Note Off.
    async fn send_note_off(&mut self, note: Note, velocity: U7, channel: Channel) -> Result<(), MidiOutError>;
}

/// Single status light.
pub trait Indicator {
    /// Turns the light on or off.
    fn set(&mut self, on: bool);
}

/// The set of peripheral implementations for one board.
pub trait Board {
    /// See [`Storage`].
    type Storage: Storage;
    /// See [`Transport`].
    type Transport: Transport;
    /// See [`DisplayPanel`].
    type Display: DisplayPanel;
    /// See [`InputEdge`].
    type Button: InputEdge;
    /// See [`MidiSource`].
    type MidiIn: MidiSource;
    /// See [`MidiSink`].
    type MidiOut: MidiSink;
    /// See [`Indicator`].
    type Indicator: Indicator;
}

/// One instance of each of a [`Board`]'s peripherals.
pub struct Io<B: Board> {
    /// Where the settings record lives.
    pub storage: B::Storage,
    /// Link to the editor.
    pub transport: B::Transport,
    /// Status display.
    pub display: B::Display,
    /// Advances to the next preset.
    pub button: B::Button,
    /// Messages from the controller.
    pub midi_in: B::MidiIn,
    /// Messages to the synthesizer.
    pub midi_out: B::MidiOut,
    /// Activity and distress light.
    pub indicator: B::Indicator,
}

/// Clears the display and shows two lines.
pub fn show<D: DisplayPanel>(display: &mut D, top: &str, bottom: &str) {
    display.clear();
    display.render_top_line(top);
    display.render_bottom_line(bottom);
}
