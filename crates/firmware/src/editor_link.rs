//! The editor's serial link: a USB CDC-ACM interface whose incoming bytes are buffered in a [`Pipe`] by the USB
//! reader task.

use alloc::vec::Vec;
use defmt::*;
use embassy_stm32::{peripherals, usb};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, pipe::Pipe};
use embassy_time::{Duration, with_timeout};
use embassy_usb::class::cdc_acm::{Receiver, Sender};
use synth_transformer_lib::{
    framing::{Frame, MessageFramer},
    io::{Transport, TransportError},
};

pub type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// Full-speed bulk endpoints move at most this many bytes per packet.
pub const MAX_PACKET_SIZE: u16 = 64;

pub const INBOX_SIZE: usize = 1024;
pub type Inbox = Pipe<CriticalSectionRawMutex, INBOX_SIZE>;

pub struct EditorLink {
    inbox: &'static Inbox,
    sender: Sender<'static, UsbDriver>,
    framer: MessageFramer,
}

impl EditorLink {
    pub fn new(inbox: &'static Inbox, sender: Sender<'static, UsbDriver>, max_message_len: usize) -> Self {
        Self {
            inbox,
            sender,
            framer: MessageFramer::new(max_message_len),
        }
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut byte = [0u8; 1];
        loop {
            self.inbox.read(&mut byte).await;
            match self.framer.push(byte[0]) {
                Frame::Incomplete => {}
                Frame::Message(message) => return Ok(message),
                Frame::Oversize => {
                    return Err(TransportError::Oversize {
                        max_len: self.framer.max_len(),
                    });
                }
            }
        }
    }
}

impl Transport for EditorLink {
    /// Drops whatever is waiting outside a message, so stray line endings never start a timed read.
    fn available(&mut self) -> bool {
        let inbox = self.inbox;
        self.framer.poll_start(|| {
            let mut byte = [0u8; 1];
            inbox.try_read(&mut byte).ok().map(|_| byte[0])
        })
    }

    async fn read_message(&mut self, timeout: Duration, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.framer.set_max_len(max_len);

        match with_timeout(timeout, self.next_frame()).await {
            Ok(framed) => framed,
            Err(_) => {
                warn!("Editor message incomplete after {} ms", timeout.as_millis());
                self.framer.reset();
                Err(TransportError::Timeout)
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.sender.dtr() {
            return Err(TransportError::Disconnected);
        }

        for packet in bytes.chunks(usize::from(MAX_PACKET_SIZE)) {
            self.sender
                .write_packet(packet)
                .await
                .map_err(|_| TransportError::Disconnected)?;
        }
        // a full final packet leaves the host waiting for more
        if bytes.len() % usize::from(MAX_PACKET_SIZE) == 0 {
            self.sender
                .write_packet(&[])
                .await
                .map_err(|_| TransportError::Disconnected)?;
        }
        Ok(())
    }
}

/// Moves bytes from the CDC-ACM OUT endpoint into the inbox until the host goes away.
pub async fn receive(receiver: &mut Receiver<'static, UsbDriver>, inbox: &'static Inbox) {
    let mut buf = [0u8; MAX_PACKET_SIZE as usize];
    loop {
        match receiver.read_packet(&mut buf).await {
            Ok(n) => inbox.write_all(&buf[..n]).await,
            Err(_) => return,
        }
    }
}
