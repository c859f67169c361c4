use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Trait for serializing and deserializing a fixed-size on-disk record
/// # Note
/// records use bincode's legacy configuration: little-endian,
/// fixed-width integers, arrays without a length prefix,
/// so the encoding is exactly [ON_DISK_SIZE](OnDiskRecord::ON_DISK_SIZE) bytes
pub trait OnDiskRecord: Serialize + DeserializeOwned {
    /// encoded size in bytes
    const ON_DISK_SIZE: usize;

    /// serialize into the head of `buf`
    /// # Returns
    /// The number of bytes written if successful
    fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let config = bincode::config::legacy();
        Ok(bincode::serde::encode_into_slice(
            self,
            &mut buf[..Self::ON_DISK_SIZE],
            config,
        )?)
    }

    /// deserialize from the head of `buf`
    fn decode_from(buf: &[u8]) -> Result<Self> {
        let config = bincode::config::legacy();
        let (object, _bytes_read): (Self, usize) =
            bincode::serde::decode_from_slice(&buf[..Self::ON_DISK_SIZE], config)?;
        Ok(object)
    }
}
