// SPDX-License-Identifier: MIT
//! Resource entries: placement and metadata of one packed file

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{ContainerError, Result};
use crate::fields::{decode_fields, encode_fields, OptionalFields};
use crate::format::{write_str, ByteReader};

/// Reserved timestamp value meaning "no time recorded"
pub const NO_TIME: i64 = i64::MIN;

/// Compression method applied to a resource's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Bytes stored as-is
    Store = 0,
    /// Raw deflate
    GeneralPurpose = 1,
    /// LZ4 block
    FastBlock = 2,
    /// Class-file aware transform followed by deflate
    StructuredTransform = 3,
}

impl CompressionMethod {
    pub fn all() -> &'static [CompressionMethod] {
        &[
            CompressionMethod::Store,
            CompressionMethod::GeneralPurpose,
            CompressionMethod::FastBlock,
            CompressionMethod::StructuredTransform,
        ]
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::Store => "store",
            CompressionMethod::GeneralPurpose => "deflate",
            CompressionMethod::FastBlock => "lz4",
            CompressionMethod::StructuredTransform => "classfile",
        }
    }
}

impl TryFrom<u8> for CompressionMethod {
    type Error = ContainerError;

    fn try_from(tag: u8) -> Result<Self> {
        CompressionMethod::all()
            .iter()
            .copied()
            .find(|m| m.tag() == tag)
            .ok_or_else(|| ContainerError::format(format!("Unknown compression method: {}", tag)))
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional creation / modification / access times in epoch milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    created: Option<i64>,
    modified: Option<i64>,
    accessed: Option<i64>,
}

impl FileTimes {
    /// Build from explicit values; [`NO_TIME`] is rejected.
    pub fn new(created: Option<i64>, modified: Option<i64>, accessed: Option<i64>) -> Result<Self> {
        for millis in [created, modified, accessed].into_iter().flatten() {
            check_time(millis)?;
        }
        Ok(Self::from_parts(created, modified, accessed))
    }

    pub(crate) fn from_parts(
        created: Option<i64>,
        modified: Option<i64>,
        accessed: Option<i64>,
    ) -> Self {
        Self {
            created,
            modified,
            accessed,
        }
    }

    /// Convert filesystem times, dropping any the platform did not report
    pub fn from_system_times(
        created: Option<SystemTime>,
        modified: Option<SystemTime>,
        accessed: Option<SystemTime>,
    ) -> Result<Self> {
        let to_millis = |t: SystemTime| DateTime::<Utc>::from(t).timestamp_millis();
        Self::new(
            created.map(to_millis),
            modified.map(to_millis),
            accessed.map(to_millis),
        )
    }

    pub fn with_created(mut self, millis: i64) -> Result<Self> {
        self.created = Some(check_time(millis)?);
        Ok(self)
    }

    pub fn with_modified(mut self, millis: i64) -> Result<Self> {
        self.modified = Some(check_time(millis)?);
        Ok(self)
    }

    pub fn with_accessed(mut self, millis: i64) -> Result<Self> {
        self.accessed = Some(check_time(millis)?);
        Ok(self)
    }

    pub fn created(&self) -> Option<i64> {
        self.created
    }

    pub fn modified(&self) -> Option<i64> {
        self.modified
    }

    pub fn accessed(&self) -> Option<i64> {
        self.accessed
    }
}

fn check_time(millis: i64) -> Result<i64> {
    if millis == NO_TIME {
        Err(ContainerError::InvalidTimestamp(millis))
    } else {
        Ok(millis)
    }
}

/// Placement and metadata of one packed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    name: String,
    data_offset: u64,
    uncompressed_size: u64,
    method: CompressionMethod,
    compressed_size: u64,
    fields: OptionalFields,
}

impl ResourceEntry {
    pub fn new(
        name: impl Into<String>,
        data_offset: u64,
        uncompressed_size: u64,
        method: CompressionMethod,
        compressed_size: u64,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ContainerError::config("Resource name cannot be empty"));
        }
        if name.contains('\\') {
            return Err(ContainerError::config(format!(
                "Resource name must use forward slashes: {}",
                name
            )));
        }
        if method == CompressionMethod::Store && compressed_size != uncompressed_size {
            return Err(ContainerError::format(format!(
                "Stored resource {} has compressed size {} != uncompressed size {}",
                name, compressed_size, uncompressed_size
            )));
        }

        Ok(Self {
            name,
            data_offset,
            uncompressed_size,
            method,
            compressed_size,
            fields: OptionalFields::default(),
        })
    }

    pub fn with_checksum(mut self, checksum: u64) -> Self {
        self.fields.checksum = Some(checksum);
        self
    }

    pub fn with_times(mut self, times: FileTimes) -> Self {
        self.fields.times = times;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.method
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn checksum(&self) -> Option<u64> {
        self.fields.checksum
    }

    pub fn times(&self) -> &FileTimes {
        &self.fields.times
    }

    /// Exclusive end of this entry's bytes in the data region
    pub fn data_end(&self) -> Option<u64> {
        self.data_offset.checked_add(self.compressed_size)
    }

    pub(crate) fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        write_str(buffer, &self.name)?;
        buffer.extend_from_slice(&self.data_offset.to_le_bytes());
        buffer.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buffer.push(self.method.tag());
        buffer.extend_from_slice(&self.compressed_size.to_le_bytes());
        encode_fields(buffer, &self.fields);
        Ok(())
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let name = reader.read_str()?;
        let data_offset = reader.read_u64()?;
        let uncompressed_size = reader.read_u64()?;
        let method = CompressionMethod::try_from(reader.read_u8()?)?;
        let compressed_size = reader.read_u64()?;
        let fields = decode_fields(reader)?;

        let mut entry = Self::new(
            name,
            data_offset,
            uncompressed_size,
            method,
            compressed_size,
        )
        .map_err(|e| match e {
            ContainerError::Config(msg) => ContainerError::Format(msg),
            other => other,
        })?;
        entry.fields = fields;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_rejected_at_write_time() {
        assert!(matches!(
            FileTimes::default().with_modified(NO_TIME),
            Err(ContainerError::InvalidTimestamp(_))
        ));
        assert!(FileTimes::new(Some(NO_TIME), None, None).is_err());
    }

    #[test]
    fn test_epoch_zero_is_a_real_time() {
        let times = FileTimes::new(None, Some(0), None).unwrap();
        assert_eq!(times.modified(), Some(0));
    }

    #[test]
    fn test_store_invariant() {
        assert!(ResourceEntry::new("a.txt", 0, 10, CompressionMethod::Store, 9).is_err());
        assert!(ResourceEntry::new("a.txt", 0, 10, CompressionMethod::Store, 10).is_ok());
        assert!(ResourceEntry::new("a.txt", 0, 10, CompressionMethod::GeneralPurpose, 4).is_ok());
    }

    #[test]
    fn test_name_validation() {
        assert!(ResourceEntry::new("", 0, 0, CompressionMethod::Store, 0).is_err());
        assert!(ResourceEntry::new("a\\b", 0, 0, CompressionMethod::Store, 0).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let entry = ResourceEntry::new("dir/file.bin", 42, 100, CompressionMethod::FastBlock, 60)
            .unwrap()
            .with_checksum(7)
            .with_times(FileTimes::new(Some(1), None, Some(3)).unwrap());

        let mut buffer = Vec::new();
        entry.encode(&mut buffer).unwrap();
        let decoded = ResourceEntry::decode(&mut ByteReader::new(&buffer)).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.times().modified(), None);
    }

    #[test]
    fn test_unknown_method_tag() {
        assert!(CompressionMethod::try_from(42).is_err());
        assert_eq!(
            CompressionMethod::try_from(2).unwrap(),
            CompressionMethod::FastBlock
        );
    }
}
