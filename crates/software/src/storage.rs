//! Provides the [`Storage`] trait for byte-addressable non-volatile memory, plus [`MemoryStorage`], a RAM-backed
//! implementation.
//!
//! Storage has no notion of records or lengths; [`crate::codec`] lays a self-terminating record over it.

use alloc::vec;
use alloc::vec::Vec;
use thiserror::Error;

/// Value of every byte of freshly erased storage.
pub const ERASED: u8 = 0xFF;

/// Failure reported by a [`Storage`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The address lies beyond the end of the medium.
    #[error("address {0} is out of range")]
    OutOfRange(usize),
    /// The underlying device did not complete the operation.
    #[error("storage device fault")]
    Device,
}

/// Byte-addressable non-volatile memory with sequential access and no inherent record boundaries.
pub trait Storage {
    /// Reads the byte at `address`.
    fn read(&mut self, address: usize) -> Result<u8, StorageError>;

    /// Writes `byte` at `address`.
    fn write(&mut self, address: usize, byte: u8) -> Result<(), StorageError>;

    /// Size of the medium in bytes.
    fn capacity(&self) -> usize;

    /// Writes `bytes` sequentially starting at `address`.
    ///
    /// The provided implementation writes one byte at a time; devices with page writes should override it.
    fn write_all(&mut self, address: usize, bytes: &[u8]) -> Result<(), StorageError> {
        bytes
            .iter()
            .enumerate()
            .try_for_each(|(offset, &byte)| self.write(address + offset, byte))
    }
}

/// [`Storage`] backed by RAM. Starts out erased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    /// Constructs erased storage of the given size.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![ERASED; capacity],
        }
    }

    /// Constructs storage holding `bytes`, e.g. to replay the contents of a real device.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    /// Raw contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, address: usize) -> Result<u8, StorageError> {
        self.data
            .get(address)
            .copied()
            .ok_or(StorageError::OutOfRange(address))
    }

    fn write(&mut self, address: usize, byte: u8) -> Result<(), StorageError> {
        let slot = self
            .data
            .get_mut(address)
            .ok_or(StorageError::OutOfRange(address))?;
        *slot = byte;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// Read-only [`Storage`] over a borrowed slice, used to decode records that are already in memory.
pub(crate) struct SliceStorage<'a>(pub(crate) &'a [u8]);

impl Storage for SliceStorage<'_> {
    fn read(&mut self, address: usize) -> Result<u8, StorageError> {
        self.0
            .get(address)
            .copied()
            .ok_or(StorageError::OutOfRange(address))
    }

    fn write(&mut self, _address: usize, _byte: u8) -> Result<(), StorageError> {
        Err(StorageError::Device)
    }

    fn capacity(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_storage_is_erased() {
        let storage = MemoryStorage::new(16);
        assert!(storage.as_bytes().iter().all(|&b| b == ERASED));
        assert_eq!(16, storage.capacity(), "Expected left but got right");
    }

    #[test]
    fn write_all_is_sequential() {
        let mut storage = MemoryStorage::new(8);
        storage.write_all(2, &[1, 2, 3]).unwrap();
        assert_eq!(
            &[ERASED, ERASED, 1, 2, 3, ERASED, ERASED, ERASED],
            storage.as_bytes(),
            "Expected left but got right"
        );
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut storage = MemoryStorage::new(4);
        assert_eq!(Err(StorageError::OutOfRange(4)), storage.read(4));
        assert_eq!(Err(StorageError::OutOfRange(4)), storage.write_all(2, &[0; 6]));
        // bytes before the failing address were still written; there is no rollback
        assert_eq!(&[ERASED, ERASED, 0, 0], storage.as_bytes(), "Expected left but got right");
    }

    #[test]
    fn slice_storage_is_read_only() {
        let bytes = [1, 2];
        let mut storage = SliceStorage(&bytes);
        assert_eq!(Ok(2), storage.read(1));
        assert_eq!(Err(StorageError::Device), storage.write(0, 9));
    }
}
