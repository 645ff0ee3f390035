//! MIDI from the controller arrives over USB; MIDI to the synthesizer leaves on a 5-pin DIN socket driven by a USART.

use crate::editor_link::UsbDriver;
use defmt::{panic, *};
use embassy_stm32::{mode::Async, usart::UartTx};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_usb::{class::midi::MidiClass, driver::EndpointError};
use synth_transformer_lib::io::{MidiOutError, MidiSink, MidiSource};
use wmidi::{Channel as MidiChannel, ControlFunction, MidiMessage, Note, U7};

/// Baud rate fixed by the MIDI 1.0 electrical specification.
pub const DIN_BAUD_RATE: u32 = 31_250;

pub const QUEUE_DEPTH: usize = 64;
pub type MidiQueue = Channel<CriticalSectionRawMutex, MidiMessage<'static>, QUEUE_DEPTH>;

/// Messages decoded by the USB reader task, waiting for the control task.
pub struct UsbMidiIn {
    queue: &'static MidiQueue,
}

impl UsbMidiIn {
    pub fn new(queue: &'static MidiQueue) -> Self {
        Self { queue }
    }
}

impl MidiSource for UsbMidiIn {
    fn poll(&mut self) -> Option<MidiMessage<'static>> {
        self.queue.try_receive().ok()
    }
}

pub struct DinMidiOut {
    tx: UartTx<'static, Async>,
}

impl DinMidiOut {
    pub fn new(tx: UartTx<'static, Async>) -> Self {
        Self { tx }
    }

    async fn send(&mut self, message: MidiMessage<'_>) -> Result<(), MidiOutError> {
        let mut bytes = [0u8; 3];
        let len = message.copy_to_slice(&mut bytes).map_err(|_| MidiOutError)?;
        self.tx.write(&bytes[..len]).await.map_err(|e| {
            warn!("DIN write failed: {}", e);
            MidiOutError
        })
    }
}

impl MidiSink for DinMidiOut {
    async fn send_control_change(
        &mut self,
        function: ControlFunction,
        value: U7,
        channel: MidiChannel,
    ) -> Result<(), MidiOutError> {
        self.send(MidiMessage::ControlChange(channel, function, value)).await
    }

    async fn send_note_on(&mut self, note: Note, velocity: U7, channel: MidiChannel) -> Result<(), MidiOutError> {
        self.send(MidiMessage::NoteOn(channel, note, velocity)).await
    }

    async fn send_note_off(&mut self, note: Note, velocity: U7, channel: MidiChannel) -> Result<(), MidiOutError> {
        self.send(MidiMessage::NoteOff(channel, note, velocity)).await
    }
}

#[doc(hidden)]
pub struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Decodes USB-MIDI event packets and queues the messages until the host goes away.
///
/// SysEx is dropped, as is anything that arrives while the queue is full; the control task drains it every tick.
pub async fn receive(class: &mut MidiClass<'static, UsbDriver>, queue: &'static MidiQueue) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = class.read_packet(&mut buf).await?;
        for packet in buf[..n].chunks(4) {
            if packet.len() != 4 {
                error!("USB-MIDI Event Packets must always be 32 bits long");
                continue;
            }
            // the packet header (cable number and code index) is not of interest
            let Some(message) = MidiMessage::from_bytes(&packet[1..])
                .ok()
                .and_then(MidiMessage::drop_unowned_sysex)
            else {
                continue;
            };
            if queue.try_send(message).is_err() {
                warn!("MIDI queue full; dropping message");
            }
        }
    }
}
