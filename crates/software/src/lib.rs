//! This crate contains architecture-agnostic logic for the Synth Transformer, a box which sits between a MIDI
//! controller and a synthesizer and rewrites the controller's [CC](https://midi.org/midi-1-0) numbers into the ones
//! the synthesizer understands.
//!
//! Rewrites are grouped into presets. The full set of presets is persisted on byte-addressable non-volatile storage
//! and can be read, replaced and committed by an editor over a byte-stream transport. Everything here is driven by
//! [`program::Program`], a tick-based state machine that owns the device's configuration.

#![deny(missing_docs)]
#![no_std]

extern crate alloc;

#[macro_use]
mod fmt;

/// Records describing how incoming CCs are rewritten for one synthesizer.
pub mod preset;

/// The device's complete configuration.
pub mod settings;

/// Byte-addressable non-volatile storage.
pub mod storage;

/// Conversion of [`settings::Settings`] to and from the persisted record.
pub mod codec;

/// Messages exchanged with the editor.
pub mod protocol;

/// Splitting the transport's byte stream into messages.
pub mod framing;

/// Execution of decoded requests.
pub mod dispatcher;

/// Interfaces to the peripherals the core depends on.
pub mod io;

pub mod configuration;

/// The top-level state machine.
pub mod program;
