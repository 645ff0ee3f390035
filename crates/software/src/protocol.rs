//! Provides the messages exchanged with the editor.
//!
//! Every message is a single JSON object whose `msg` key holds a [`MessageId`]. Requests carrying settings embed
//! them next to `msg` using the same keys as the persisted record (see [`crate::codec`]):
//!
//! ```json
//! {"msg":48,"ctrl":{"rows":2,"cols":4,"ccs":[1,2,3,4]},"outs":[]}
//! ```
//!
//! Raw ids are decoded once, here, into [`Request`]; everything past this point matches on the enum.

use crate::{
    codec::{self, CodecError},
    io::TransportError,
    settings::Settings,
};
use alloc::string::String;
use alloc::vec::Vec;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Key holding the message id.
pub const MESSAGE_KIND_KEY: &str = "msg";

/// Numeric message discriminators as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageId {
    /// Editor asks for the persisted settings.
    RequestLoadSettings = 0x20,
    /// Device returns the persisted settings.
    LoadSettings = 0x21,
    /// Editor sends settings to use in place of the current ones.
    SendSettings = 0x30,
    /// Device has replaced its settings.
    SendSettingsSuccessful = 0x31,
    /// Editor asks for the current settings to be persisted.
    CommitSettings = 0x40,
    /// Device has persisted its settings.
    CommitSettingsSuccessful = 0x41,
    /// Device could not fulfil a request.
    Error = 0x7F,
}

/// Numeric reasons carried by an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// The message was not a JSON object.
    Malformed = 1,
    /// The message lacked a usable `msg` key or named a message the device does not accept.
    UnknownMessage = 2,
    /// The settings in a request could not be used.
    InvalidSettings = 3,
    /// The message did not arrive in time.
    Timeout = 4,
    /// The message was too long.
    Oversize = 5,
    /// No settings have been persisted.
    NothingStored = 6,
    /// The persisted record could not be read.
    UnreadableRecord = 7,
    /// The settings could not be persisted.
    CommitFailed = 8,
}

/// Reasons an inbound message cannot be turned into a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Not JSON.
    #[error("malformed message near column {column}")]
    Malformed {
        /// Column reported by the JSON parser.
        column: usize,
    },
    /// No numeric `msg` key.
    #[error("message has no kind")]
    MissingKind,
    /// `msg` holds a value that is not a known id.
    #[error("unknown message kind {0}")]
    UnknownKind(u64),
    /// `msg` holds an id the device sends but never receives.
    #[error("unexpected message kind {0:?}")]
    UnexpectedKind(MessageId),
    /// The settings embedded in the message are unusable.
    #[error("invalid settings: {0}")]
    InvalidPayload(CodecError),
}

impl ProtocolError {
    /// Reason reported back to the editor.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } => ErrorCode::Malformed,
            Self::MissingKind | Self::UnknownKind(_) | Self::UnexpectedKind(_) => ErrorCode::UnknownMessage,
            Self::InvalidPayload(_) => ErrorCode::InvalidSettings,
        }
    }
}

impl TransportError {
    /// Reason reported back to the editor.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout | Self::Disconnected => ErrorCode::Timeout,
            Self::Oversize { .. } => ErrorCode::Oversize,
        }
    }
}

/// A decoded message from the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Return the persisted settings.
    Load,
    /// Use these settings from now on, without persisting them.
    Replace(Settings),
    /// Persist the settings currently in use.
    Commit,
}

impl Request {
    /// Decodes one complete message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let document: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed { column: e.column() })?;
        let raw = document
            .get(MESSAGE_KIND_KEY)
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingKind)?;
        let kind = u8::try_from(raw)
            .ok()
            .and_then(MessageId::from_u8)
            .ok_or(ProtocolError::UnknownKind(raw))?;

        match kind {
            MessageId::RequestLoadSettings => Ok(Self::Load),
            MessageId::SendSettings => codec::decode_value(&document)
                .map(Self::Replace)
                .map_err(ProtocolError::InvalidPayload),
            MessageId::CommitSettings => Ok(Self::Commit),
            MessageId::LoadSettings
            | MessageId::SendSettingsSuccessful
            | MessageId::CommitSettingsSuccessful
            | MessageId::Error => Err(ProtocolError::UnexpectedKind(kind)),
        }
    }

    /// Id this request was sent with.
    pub fn id(&self) -> MessageId {
        match self {
            Self::Load => MessageId::RequestLoadSettings,
            Self::Replace(_) => MessageId::SendSettings,
            Self::Commit => MessageId::CommitSettings,
        }
    }
}

/// A message to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The persisted settings document, exactly as stored.
    Load(Map<String, Value>),
    /// Settings were replaced.
    ReplaceAck,
    /// Settings were persisted.
    CommitAck,
    /// The request failed.
    Error(ErrorCode),
}

#[derive(Serialize)]
struct Ack {
    msg: u8,
}

#[derive(Serialize)]
struct ErrorReply {
    msg: u8,
    err: u8,
}

impl Response {
    /// Id this response is sent with.
    pub fn id(&self) -> MessageId {
        match self {
            Self::Load(_) => MessageId::LoadSettings,
            Self::ReplaceAck => MessageId::SendSettingsSuccessful,
            Self::CommitAck => MessageId::CommitSettingsSuccessful,
            Self::Error(_) => MessageId::Error,
        }
    }

    /// Serializes the response for the transport.
    pub fn encode(&self) -> Vec<u8> {
        let msg = self.id() as u8;
        let encoded = match self {
            Self::Load(document) => {
                let mut document = document.clone();
                document.insert(MESSAGE_KIND_KEY.into(), msg.into());
                serde_json::to_vec(&document)
            }
            Self::ReplaceAck | Self::CommitAck => serde_json::to_vec(&Ack { msg }),
            Self::Error(code) => serde_json::to_vec(&ErrorReply {
                msg,
                err: *code as u8,
            }),
        };
        // a map with string keys or a plain struct, written to a Vec
        encoded.expect("responses should always serialize")
    }
}
