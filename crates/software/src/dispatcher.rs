//! Executes decoded [`Request`]s against the device's settings and storage.
//!
//! Requests are handled one at a time and to completion. Nothing here touches the transport; the caller sends the
//! [`Response`] (or an error response built from [`DispatchError::code`]).

use crate::{
    codec::{self, CodecError, CommitError},
    protocol::{ErrorCode, Request, Response},
    settings::Settings,
    storage::Storage,
};
use alloc::string::String;
use serde_json::{Map, Value};
use thiserror::Error;

/// Reasons a well-formed request could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// A load was requested but storage is blank.
    #[error("nothing has been committed")]
    Blank,
    /// The persisted record could not be read.
    #[error("persisted record unreadable: {0}")]
    Codec(#[from] CodecError),
    /// The settings could not be persisted.
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
}

impl DispatchError {
    /// Reason reported back to the editor.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Blank => ErrorCode::NothingStored,
            Self::Codec(_) => ErrorCode::UnreadableRecord,
            Self::Commit(_) => ErrorCode::CommitFailed,
        }
    }
}

/// Carries out `request`.
///
/// - [`Request::Load`] answers with the record in storage, which may differ from `settings` if they were replaced
///   but never committed.
/// - [`Request::Replace`] swaps `settings` for the received ones in a single assignment. Storage is not touched.
/// - [`Request::Commit`] persists `settings`.
pub fn handle<S: Storage>(
    request: Request,
    settings: &mut Settings,
    storage: &mut S,
    max_record_len: usize,
) -> Result<Response, DispatchError> {
    match request {
        Request::Load => {
            if codec::is_blank(storage).map_err(CodecError::from)? {
                return Err(DispatchError::Blank);
            }
            let payload = codec::read_payload(storage, max_record_len)?;
            let document: Map<String, Value> = serde_json::from_slice(&payload)
                .map_err(|e| CodecError::Malformed { column: e.column() })?;
            Ok(Response::Load(document))
        }
        Request::Replace(replacement) => {
            info!(
                "Replacing settings: {} presets",
                replacement.preset_count()
            );
            *settings = replacement;
            Ok(Response::ReplaceAck)
        }
        Request::Commit => {
            codec::commit(settings, storage, max_record_len)?;
            Ok(Response::CommitAck)
        }
    }
}
