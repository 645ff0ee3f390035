//! Converts [`Settings`] to and from the record persisted on [`Storage`].
//!
//! Storage has no length field, so the record terminates itself:
//!
//! ```text
//! [FORMAT_VERSION][JSON payload][0x00 0x00 0x00 0x00]
//! ```
//!
//! The payload is JSON, which never contains a zero byte, so the first run of [`TERMINATOR`] ends the record. Keys are
//! kept short because the record has to fit in a few kilobytes of EEPROM:
//!
//! ```json
//! {"ctrl":{"rows":2,"cols":4,"ccs":[1,2,3,4]},
//!  "outs":[{"pid":1,"sid":7,"mfg":"Moog","syn":"Sub 37","chn":1,
//!           "ccs":[{"in":1,"num":10,"name":"cutoff"}]}],
//!  "act":0}
//! ```
//!
//! Every mapping carries its own input CC (`in`) rather than relying on its position matching `ctrl.ccs`.

use crate::{
    preset::Preset,
    settings::{ControllerLayout, Settings},
    storage::{ERASED, SliceStorage, Storage, StorageError},
};
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wmidi::{Channel, U7};

/// Version byte at the start of every record this firmware writes and the only one it reads.
pub const FORMAT_VERSION: u8 = 0x01;

/// End-of-record marker.
pub const TERMINATOR: [u8; 4] = [0x00; 4];

/// Number of leading bytes inspected by [`is_blank`].
pub const BLANK_PROBE_LEN: usize = 4;

/// A value in an otherwise well-formed payload that the model cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvalidValue {
    /// CC numbers are 7-bit.
    #[error("CC {0} is not a 7-bit value")]
    Cc(u8),
    /// Channels are numbered 1 to 16.
    #[error("channel {0} is outside 1-16")]
    Channel(u8),
}

/// Reasons a record cannot be turned back into [`Settings`].
///
/// Apart from [`VersionMismatch`](Self::VersionMismatch) and [`Storage`](Self::Storage), every variant means the
/// payload itself is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The record was written in a format this firmware does not understand.
    #[error("unsupported record version {found}")]
    VersionMismatch {
        /// Version byte found in storage.
        found: u8,
    },
    /// No terminator within the scan limit, typically corrupted or partially erased storage.
    #[error("no terminator within {scanned} bytes")]
    Unterminated {
        /// Bytes examined, including the version byte.
        scanned: usize,
    },
    /// The payload is not the expected JSON document.
    #[error("malformed payload near column {column}")]
    Malformed {
        /// Column reported by the JSON parser.
        column: usize,
    },
    /// The payload holds a value outside its allowed range.
    #[error("invalid value: {0}")]
    Invalid(#[from] InvalidValue),
    /// Storage could not be read.
    #[error("storage read failed: {0}")]
    Storage(#[from] StorageError),
}

/// Reasons [`commit`] did not leave a valid record in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitError {
    /// The record would not fit, or would be too long to load again.
    #[error("record of {len} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Length of the serialized record.
        len: usize,
        /// Largest record that can be written and read back.
        limit: usize,
    },
    /// Storage rejected a write or a read-back.
    #[error("storage write failed: {0}")]
    Storage(#[from] StorageError),
    /// A byte read back differs from the byte written.
    #[error("verification failed at address {address}")]
    Verify {
        /// First address whose content is wrong.
        address: usize,
    },
}

#[derive(Serialize, Deserialize)]
struct SettingsRecord {
    ctrl: ControllerRecord,
    #[serde(default)]
    outs: Vec<PresetRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    act: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct ControllerRecord {
    rows: u8,
    cols: u8,
    #[serde(default)]
    ccs: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PresetRecord {
    pid: u8,
    sid: u8,
    #[serde(default)]
    mfg: String,
    #[serde(default)]
    syn: String,
    chn: u8,
    #[serde(default)]
    ccs: Vec<MappingRecord>,
}

#[derive(Serialize, Deserialize)]
struct MappingRecord {
    #[serde(rename = "in")]
    input: u8,
    num: u8,
    #[serde(default)]
    name: String,
}

impl From<&Settings> for SettingsRecord {
    fn from(settings: &Settings) -> Self {
        Self {
            ctrl: ControllerRecord {
                rows: settings.controller().rows,
                cols: settings.controller().columns,
                ccs: settings.controller().input_ccs.iter().map(|&cc| cc.into()).collect(),
            },
            outs: settings
                .presets()
                .iter()
                .map(|preset| PresetRecord {
                    pid: preset.id,
                    sid: preset.synth_id,
                    mfg: preset.manufacturer.clone(),
                    syn: preset.synth_name.clone(),
                    chn: preset.channel().number(),
                    ccs: preset
                        .mappings()
                        .iter()
                        .map(|mapping| MappingRecord {
                            input: mapping.input.into(),
                            num: mapping.output.into(),
                            name: mapping.name.clone(),
                        })
                        .collect(),
                })
                .collect(),
            act: settings.active_index(),
        }
    }
}

fn cc(value: u8) -> Result<U7, InvalidValue> {
    U7::try_from(value).map_err(|_| InvalidValue::Cc(value))
}

fn channel(number: u8) -> Result<Channel, InvalidValue> {
    number
        .checked_sub(1)
        .and_then(|index| Channel::from_index(index).ok())
        .ok_or(InvalidValue::Channel(number))
}

impl TryFrom<SettingsRecord> for Settings {
    type Error = InvalidValue;

    fn try_from(record: SettingsRecord) -> Result<Self, Self::Error> {
        let controller = ControllerLayout {
            rows: record.ctrl.rows,
            columns: record.ctrl.cols,
            input_ccs: record
                .ctrl
                .ccs
                .into_iter()
                .map(cc)
                .collect::<Result<Vec<_>, InvalidValue>>()?,
        };

        let presets = record
            .outs
            .into_iter()
            .map(|out| -> Result<Preset, InvalidValue> {
                let mut preset = Preset::new(out.pid, out.sid, out.mfg, out.syn, channel(out.chn)?);
                for mapping in out.ccs {
                    preset.set_mapping(cc(mapping.input)?, cc(mapping.num)?, mapping.name);
                }
                Ok(preset)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let settings = Settings::new(controller, presets);
        Ok(match record.act {
            Some(index) => settings.with_active_preset(index),
            None => settings,
        })
    }
}

/// Serializes `settings` into a complete record: version byte, payload and terminator.
pub fn serialize(settings: &Settings) -> Vec<u8> {
    let payload = encode_payload(settings);
    let mut record = Vec::with_capacity(1 + payload.len() + TERMINATOR.len());
    record.push(FORMAT_VERSION);
    record.extend_from_slice(&payload);
    record.extend_from_slice(&TERMINATOR);
    record
}

/// Parses a complete record held in memory. At most `max_len` bytes are scanned for the terminator.
pub fn deserialize(bytes: &[u8], max_len: usize) -> Result<Settings, CodecError> {
    let payload = read_payload(&mut SliceStorage(bytes), max_len)?;
    decode_payload(&payload)
}

/// Returns `true` if the first [`BLANK_PROBE_LEN`] bytes are all [`ERASED`], i.e. nothing was ever committed.
pub fn is_blank<S: Storage>(storage: &mut S) -> Result<bool, StorageError> {
    for address in 0..BLANK_PROBE_LEN {
        if storage.read(address)? != ERASED {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Loads [`Settings`] from storage, or `None` if the storage is blank.
///
/// Blank storage is checked first, so erased memory is never reported as a version or parse error.
pub fn load<S: Storage>(storage: &mut S, max_len: usize) -> Result<Option<Settings>, CodecError> {
    if is_blank(storage)? {
        info!("Storage is blank");
        return Ok(None);
    }
    let payload = read_payload(storage, max_len)?;
    let settings = decode_payload(&payload)?;
    info!(
        "Loaded {} presets from a {} byte record",
        settings.preset_count(),
        payload.len() + 1 + TERMINATOR.len()
    );
    Ok(Some(settings))
}

/// Reads the payload of the persisted record without decoding it.
///
/// The version byte is checked before anything else is read. Scanning for the terminator stops after `max_len`
/// bytes or at the end of the medium, whichever comes first.
pub fn read_payload<S: Storage>(storage: &mut S, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let found = storage.read(0)?;
    if found != FORMAT_VERSION {
        warn!("Record version {} does not match {}", found, FORMAT_VERSION);
        return Err(CodecError::VersionMismatch { found });
    }

    let limit = max_len.min(storage.capacity());
    let mut payload = Vec::new();
    let mut zeros = 0;
    for address in 1..limit {
        let byte = storage.read(address)?;
        payload.push(byte);
        if byte == 0 {
            zeros += 1;
            if zeros == TERMINATOR.len() {
                payload.truncate(payload.len() - zeros);
                return Ok(payload);
            }
        } else {
            zeros = 0;
        }
    }

    warn!("No record terminator within {} bytes", limit);
    Err(CodecError::Unterminated { scanned: limit })
}

/// Serializes and writes `settings` starting at address 0, then reads the record back to confirm it landed.
///
/// Records longer than `max_len` are refused because [`load`] would not be able to find their terminator. A failure
/// part way through leaves a partial record behind; nothing is rolled back.
pub fn commit<S: Storage>(settings: &Settings, storage: &mut S, max_len: usize) -> Result<(), CommitError> {
    let record = serialize(settings);
    let limit = max_len.min(storage.capacity());
    if record.len() > limit {
        return Err(CommitError::TooLarge {
            len: record.len(),
            limit,
        });
    }

    storage.write_all(0, &record)?;
    for (address, &expected) in record.iter().enumerate() {
        if storage.read(address)? != expected {
            error!("Read back mismatch at address {}", address);
            return Err(CommitError::Verify { address });
        }
    }

    info!("Committed {} byte record", record.len());
    Ok(())
}

fn encode_payload(settings: &Settings) -> Vec<u8> {
    // records hold only strings, integers and sequences of them, and writing to a Vec cannot fail
    serde_json::to_vec(&SettingsRecord::from(settings)).expect("settings records should always serialize")
}

pub(crate) fn decode_payload(payload: &[u8]) -> Result<Settings, CodecError> {
    let record: SettingsRecord =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed { column: e.column() })?;
    Ok(Settings::try_from(record)?)
}

/// Decodes settings embedded in an already-parsed JSON document, ignoring unrelated keys such as `msg`.
pub(crate) fn decode_value(value: &serde_json::Value) -> Result<Settings, CodecError> {
    let record = SettingsRecord::deserialize(value).map_err(|e| CodecError::Malformed { column: e.column() })?;
    Ok(Settings::try_from(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use alloc::vec;

    const MAX_LEN: usize = 4096;

    fn cc(n: u8) -> U7 {
        U7::from_u8_lossy(n)
    }

    fn record(json: &str) -> Vec<u8> {
        [&[FORMAT_VERSION][..], json.as_bytes(), &TERMINATOR].concat()
    }

    fn settings() -> Settings {
        Settings::new(
            ControllerLayout {
                rows: 1,
                columns: 3,
                input_ccs: vec![cc(21), cc(22), cc(23)],
            },
            vec![
                Preset::new(1, 12, "Moog", "Sub 37", Channel::Ch1)
                    .with_mapping(cc(21), cc(19), "cutoff")
                    .with_mapping(cc(23), cc(0), "bank select"),
                Preset::new(1, 40, "Sequential", "Prophet \"Rev2\"", Channel::Ch16)
                    .with_mapping(cc(22), cc(127), "filter env"),
                Preset::new(3, 0, "", "", Channel::Ch9),
            ],
        )
        .with_active_preset(1)
    }

    /// Storage which remembers the highest address read.
    struct Probe {
        inner: MemoryStorage,
        highest_read: usize,
    }

    impl Storage for Probe {
        fn read(&mut self, address: usize) -> Result<u8, StorageError> {
            self.highest_read = self.highest_read.max(address);
            self.inner.read(address)
        }

        fn write(&mut self, address: usize, byte: u8) -> Result<(), StorageError> {
            self.inner.write(address, byte)
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }
    }

    /// Storage which silently drops writes to one address.
    struct StuckByte {
        inner: MemoryStorage,
        stuck: usize,
    }

    impl Storage for StuckByte {
        fn read(&mut self, address: usize) -> Result<u8, StorageError> {
            self.inner.read(address)
        }

        fn write(&mut self, address: usize, byte: u8) -> Result<(), StorageError> {
            if address == self.stuck {
                Ok(())
            } else {
                self.inner.write(address, byte)
            }
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }
    }

    #[test]
    fn round_trip() {
        let settings = settings();
        let actual = deserialize(&serialize(&settings), MAX_LEN);
        assert_eq!(Ok(settings), actual, "Expected left but got right");
    }

    #[test]
    fn round_trip_without_presets() {
        let settings = Settings::default();
        let actual = deserialize(&serialize(&settings), MAX_LEN);
        assert_eq!(Ok(settings), actual, "Expected left but got right");
    }

    #[test]
    fn record_layout() {
        let record = serialize(&settings());
        assert_eq!(FORMAT_VERSION, record[0], "Record should start with the version byte");
        assert!(record.ends_with(&TERMINATOR), "Record should end with the terminator");

        let payload = &record[1..record.len() - TERMINATOR.len()];
        assert!(!payload.contains(&0), "Payload must not contain a zero byte");
        let payload = core::str::from_utf8(payload).unwrap();
        assert!(payload.starts_with(r#"{"ctrl":{"rows":1,"cols":3,"ccs":[21,22,23]}"#), "{payload}");
        assert!(payload.contains(r#"{"in":23,"num":0,"name":"bank select"}"#), "{payload}");
        assert!(payload.ends_with(r#""act":1}"#), "{payload}");
    }

    #[test]
    fn mapping_inputs_are_not_positional() {
        let record = record(
            r#"{"ctrl":{"rows":1,"cols":2,"ccs":[1,2]},
                "outs":[{"pid":5,"sid":1,"mfg":"","syn":"X","chn":2,"ccs":[{"in":2,"num":20,"name":"a"}]}]}"#,
        );
        let settings = deserialize(&record, MAX_LEN).unwrap();
        assert_eq!(cc(20), settings.translate_cc(cc(2)), "Expected left but got right");
        assert_eq!(cc(1), settings.translate_cc(cc(1)), "Expected left but got right");
    }

    #[test]
    fn missing_active_index_selects_first_preset() {
        let record = record(r#"{"ctrl":{"rows":1,"cols":1,"ccs":[1]},"outs":[{"pid":5,"sid":1,"chn":2}]}"#);
        let settings = deserialize(&record, MAX_LEN).unwrap();
        assert_eq!(Some(0), settings.active_index(), "Expected left but got right");
        assert_eq!("", settings.current_synth_name(), "Expected left but got right");
    }

    #[test]
    fn version_mismatch_stops_reading() {
        let mut bytes = serialize(&settings());
        bytes[0] = FORMAT_VERSION + 1;
        let mut storage = Probe {
            inner: MemoryStorage::from_bytes(&bytes),
            highest_read: 0,
        };

        assert_eq!(
            Err(CodecError::VersionMismatch {
                found: FORMAT_VERSION + 1
            }),
            read_payload(&mut storage, MAX_LEN),
            "Expected left but got right"
        );
        assert_eq!(0, storage.highest_read, "Nothing past the version byte should be read");
    }

    #[test]
    fn erased_storage_is_blank() {
        let mut storage = MemoryStorage::new(64);
        assert_eq!(Ok(true), is_blank(&mut storage));
        assert_eq!(Ok(None), load(&mut storage, MAX_LEN), "Expected left but got right");
    }

    #[test]
    fn blank_probe_precedes_parsing() {
        // erased prefix followed by junk would be a version mismatch if it were parsed
        let mut storage = MemoryStorage::from_bytes(&[ERASED, ERASED, ERASED, ERASED, b'{', 0, 0, 0, 0]);
        assert_eq!(Ok(None), load(&mut storage, MAX_LEN), "Expected left but got right");
    }

    #[test]
    fn partially_erased_prefix_is_not_blank() {
        let mut storage = MemoryStorage::from_bytes(&[ERASED, ERASED, ERASED, 0x00]);
        assert_eq!(Ok(false), is_blank(&mut storage));
        assert_eq!(
            Err(CodecError::VersionMismatch { found: ERASED }),
            load(&mut storage, MAX_LEN),
            "Expected left but got right"
        );
    }

    #[test]
    fn scan_is_bounded() {
        let mut bytes = vec![ERASED; 256];
        bytes[0] = FORMAT_VERSION;
        bytes[1] = b'{';
        assert_eq!(
            Err(CodecError::Unterminated { scanned: 64 }),
            deserialize(&bytes, 64),
            "Expected left but got right"
        );
        assert_eq!(
            Err(CodecError::Unterminated { scanned: 256 }),
            deserialize(&bytes, MAX_LEN),
            "Scan should also stop at the end of storage; expected left but got right"
        );
    }

    #[test]
    fn short_zero_runs_do_not_terminate() {
        let bytes = [FORMAT_VERSION, b'{', 0, 0, 0, b'}', 0, 0, 0, 0];
        let mut storage = MemoryStorage::from_bytes(&bytes);
        assert_eq!(
            Ok(vec![b'{', 0, 0, 0, b'}']),
            read_payload(&mut storage, MAX_LEN),
            "Expected left but got right"
        );
        assert!(matches!(
            deserialize(&bytes, MAX_LEN),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn malformed_payload() {
        assert!(matches!(
            deserialize(&record("{\"ctrl\":"), MAX_LEN),
            Err(CodecError::Malformed { .. })
        ));
        // mappings without their own input CC are rejected
        assert!(matches!(
            deserialize(
                &record(r#"{"ctrl":{"rows":1,"cols":1,"ccs":[1]},"outs":[{"pid":1,"sid":1,"chn":1,"ccs":[{"num":3}]}]}"#),
                MAX_LEN
            ),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        assert_eq!(
            Err(CodecError::Invalid(InvalidValue::Cc(128))),
            deserialize(&record(r#"{"ctrl":{"rows":1,"cols":1,"ccs":[128]}}"#), MAX_LEN),
            "Expected left but got right"
        );
        assert_eq!(
            Err(CodecError::Invalid(InvalidValue::Channel(0))),
            deserialize(
                &record(r#"{"ctrl":{"rows":1,"cols":1,"ccs":[1]},"outs":[{"pid":1,"sid":1,"chn":0}]}"#),
                MAX_LEN
            ),
            "Expected left but got right"
        );
        assert_eq!(
            Err(CodecError::Invalid(InvalidValue::Channel(17))),
            deserialize(
                &record(r#"{"ctrl":{"rows":1,"cols":1,"ccs":[1]},"outs":[{"pid":1,"sid":1,"chn":17}]}"#),
                MAX_LEN
            ),
            "Expected left but got right"
        );
    }

    #[test]
    fn commit_then_reload() {
        let settings = Settings::new(
            ControllerLayout {
                rows: 2,
                columns: 4,
                input_ccs: vec![cc(1), cc(2), cc(3), cc(4)],
            },
            vec![Preset::new(1, 0, "", "X", Channel::Ch1).with_mapping(cc(1), cc(10), "cutoff")],
        );
        let mut storage = MemoryStorage::new(1024);
        commit(&settings, &mut storage, MAX_LEN).unwrap();

        let reloaded = load(&mut storage, MAX_LEN).unwrap().unwrap();
        assert_eq!(cc(10), reloaded.translate_cc(cc(1)), "Expected left but got right");
        assert_eq!(cc(2), reloaded.translate_cc(cc(2)), "Expected left but got right");
        assert_eq!(settings, reloaded, "Expected left but got right");
    }

    #[test]
    fn commit_refuses_oversized_records() {
        let mut storage = MemoryStorage::new(16);
        let len = serialize(&settings()).len();
        assert_eq!(
            Err(CommitError::TooLarge { len, limit: 16 }),
            commit(&settings(), &mut storage, MAX_LEN),
            "Expected left but got right"
        );
        assert!(
            storage.as_bytes().iter().all(|&b| b == ERASED),
            "Nothing should be written"
        );

        let mut storage = MemoryStorage::new(MAX_LEN);
        assert_eq!(
            Err(CommitError::TooLarge { len, limit: 32 }),
            commit(&settings(), &mut storage, 32),
            "Expected left but got right"
        );
    }

    #[test]
    fn commit_detects_failed_write_back() {
        let mut storage = StuckByte {
            inner: MemoryStorage::new(1024),
            stuck: 5,
        };
        assert_eq!(
            Err(CommitError::Verify { address: 5 }),
            commit(&settings(), &mut storage, MAX_LEN),
            "Expected left but got right"
        );
    }

    #[test]
    fn any_text_round_trips() {
        let settings = Settings::new(
            ControllerLayout::default(),
            vec![
                Preset::new(2, 2, "Société\\\"\u{0}", "\t\r\n\u{1F}\u{7F} 🎹", Channel::Ch2)
                    .with_mapping(cc(1), cc(2), "\u{FFFF}\"}{"),
            ],
        );
        let record = serialize(&settings);
        assert!(
            !record[1..record.len() - TERMINATOR.len()].contains(&0),
            "Control characters should be escaped"
        );
        assert_eq!(Ok(settings), deserialize(&record, MAX_LEN), "Expected left but got right");
    }
}
