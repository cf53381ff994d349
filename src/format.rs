// SPDX-License-Identifier: MIT
//! Container trailer and low-level byte helpers
//!
//! ```text
//! Container layout
//! ================
//!
//! [data region]     compressed resource bytes, append order, no padding
//! [metadata frame]  one frame (see `frame`) holding the group index
//! [trailer]         40 bytes, little-endian:
//!   - Magic: "RESPACK\0" (8 bytes)
//!   - Version: 1 (4 bytes)
//!   - Flags: reserved, 0 (4 bytes)
//!   - Data base offset (8 bytes)
//!   - Metadata offset, relative to the data base (8 bytes)
//!   - Metadata length (8 bytes)
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{ContainerError, Result};

/// Trailer magic bytes
pub const TRAILER_MAGIC: &[u8; 8] = b"RESPACK\0";

/// Trailer format version
pub const TRAILER_VERSION: u32 = 1;

/// Trailer size in bytes
pub const TRAILER_SIZE: usize = 40;

/// Fixed-size trailer locating the data region and the metadata frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub magic: [u8; 8],
    pub version: u32,
    pub flags: u32,
    /// Absolute file offset where the data region starts
    pub data_base_offset: u64,
    /// Offset of the metadata frame, relative to the data base
    pub metadata_offset: u64,
    /// Length of the metadata frame in bytes
    pub metadata_length: u64,
}

impl Trailer {
    pub fn new(data_base_offset: u64, metadata_offset: u64, metadata_length: u64) -> Self {
        Self {
            magic: *TRAILER_MAGIC,
            version: TRAILER_VERSION,
            flags: 0,
            data_base_offset,
            metadata_offset,
            metadata_length,
        }
    }

    /// Parse a trailer from exactly [`TRAILER_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TRAILER_SIZE {
            return Err(ContainerError::format(format!(
                "Trailer must be {} bytes, got {}",
                TRAILER_SIZE,
                bytes.len()
            )));
        }

        let mut reader = ByteReader::new(bytes);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(reader.take(8)?);

        let trailer = Self {
            magic,
            version: reader.read_u32()?,
            flags: reader.read_u32()?,
            data_base_offset: reader.read_u64()?,
            metadata_offset: reader.read_u64()?,
            metadata_length: reader.read_u64()?,
        };
        trailer.validate()?;
        Ok(trailer)
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *TRAILER_MAGIC {
            return Err(ContainerError::format(format!(
                "Invalid trailer magic: expected {:?}, got {:?}",
                TRAILER_MAGIC, self.magic
            )));
        }

        if self.version != TRAILER_VERSION {
            return Err(ContainerError::format(format!(
                "Unsupported trailer version: expected {}, got {}",
                TRAILER_VERSION, self.version
            )));
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut bytes = [0u8; TRAILER_SIZE];

        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.data_base_offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.metadata_offset.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.metadata_length.to_le_bytes());

        bytes
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read the trailer from the last [`TRAILER_SIZE`] bytes of `storage`
    pub fn read_from_end<R: Read + Seek>(storage: &mut R) -> Result<Self> {
        let len = storage.seek(SeekFrom::End(0))?;
        if len < TRAILER_SIZE as u64 {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("container is {} bytes, smaller than its trailer", len),
            )));
        }

        storage.seek(SeekFrom::Start(len - TRAILER_SIZE as u64))?;
        let mut bytes = [0u8; TRAILER_SIZE];
        storage.read_exact(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

/// Bounds-checked little-endian cursor over a byte slice.
///
/// Running off the end is a format error, never a panic.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ContainerError::format(format!(
                "Truncated data: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a `u16`-length-prefixed UTF-8 string
    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| ContainerError::format(format!("Invalid UTF-8 string: {}", e)))
    }
}

/// Append a `u16`-length-prefixed UTF-8 string
pub(crate) fn write_str(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ContainerError::config(format!("Name too long ({} bytes): {}", value.len(), value))
    })?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}
