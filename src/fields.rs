// SPDX-License-Identifier: MIT
//! Tagged optional-field list attached to every entry
//!
//! After the fixed part of an entry comes a sequence of `(field id, payload)`
//! pairs terminated by [`ResourceField::End`]. Each field appears at most
//! once; absent fields are simply not written.

use crate::entry::{FileTimes, NO_TIME};
use crate::error::{ContainerError, Result};
use crate::format::ByteReader;

/// Field identifiers of the optional-field list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceField {
    End = 0,
    /// 64-bit content checksum (8 bytes)
    Checksum = 1,
    FileCreateTime = 2,
    FileLastModifiedTime = 3,
    FileLastAccessTime = 4,
}

impl ResourceField {
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ResourceField {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ResourceField::End),
            1 => Ok(ResourceField::Checksum),
            2 => Ok(ResourceField::FileCreateTime),
            3 => Ok(ResourceField::FileLastModifiedTime),
            4 => Ok(ResourceField::FileLastAccessTime),
            other => Err(ContainerError::format(format!(
                "Unknown resource field id: {}",
                other
            ))),
        }
    }
}

/// Decoded optional fields of one entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalFields {
    pub checksum: Option<u64>,
    pub times: FileTimes,
}

pub(crate) fn encode_fields(buffer: &mut Vec<u8>, fields: &OptionalFields) {
    if let Some(checksum) = fields.checksum {
        buffer.push(ResourceField::Checksum.id());
        buffer.extend_from_slice(&checksum.to_le_bytes());
    }

    let times = [
        (ResourceField::FileCreateTime, fields.times.created()),
        (ResourceField::FileLastModifiedTime, fields.times.modified()),
        (ResourceField::FileLastAccessTime, fields.times.accessed()),
    ];
    for (field, value) in times {
        if let Some(millis) = value {
            buffer.push(field.id());
            buffer.extend_from_slice(&millis.to_le_bytes());
        }
    }

    buffer.push(ResourceField::End.id());
}

pub(crate) fn decode_fields(reader: &mut ByteReader<'_>) -> Result<OptionalFields> {
    let mut checksum = None;
    let mut created = None;
    let mut modified = None;
    let mut accessed = None;

    loop {
        let field = ResourceField::try_from(reader.read_u8()?)?;
        let slot = match field {
            ResourceField::End => break,
            ResourceField::Checksum => {
                if checksum.is_some() {
                    return Err(duplicate(field));
                }
                checksum = Some(reader.read_u64()?);
                continue;
            }
            ResourceField::FileCreateTime => &mut created,
            ResourceField::FileLastModifiedTime => &mut modified,
            ResourceField::FileLastAccessTime => &mut accessed,
        };

        if slot.is_some() {
            return Err(duplicate(field));
        }
        let millis = reader.read_i64()?;
        if millis == NO_TIME {
            return Err(ContainerError::format(format!(
                "Field {:?} carries the reserved no-time value",
                field
            )));
        }
        *slot = Some(millis);
    }

    Ok(OptionalFields {
        checksum,
        times: FileTimes::from_parts(created, modified, accessed),
    })
}

fn duplicate(field: ResourceField) -> ContainerError {
    ContainerError::format(format!("Duplicate resource field {:?}", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<OptionalFields> {
        decode_fields(&mut ByteReader::new(bytes))
    }

    #[test]
    fn test_empty_list_is_just_end() {
        let mut buffer = Vec::new();
        encode_fields(&mut buffer, &OptionalFields::default());
        assert_eq!(buffer, vec![0]);
        assert_eq!(decode(&buffer).unwrap(), OptionalFields::default());
    }

    #[test]
    fn test_partial_times() {
        let fields = OptionalFields {
            checksum: Some(0xdead_beef),
            times: FileTimes::default().with_modified(0).unwrap(),
        };
        let mut buffer = Vec::new();
        encode_fields(&mut buffer, &fields);

        let decoded = decode(&buffer).unwrap();
        assert_eq!(decoded.checksum, Some(0xdead_beef));
        assert_eq!(decoded.times.modified(), Some(0));
        assert_eq!(decoded.times.created(), None);
        assert_eq!(decoded.times.accessed(), None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(decode(&[9, 0]), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_missing_end_rejected() {
        let mut buffer = vec![ResourceField::Checksum.id()];
        buffer.extend_from_slice(&7u64.to_le_bytes());
        assert!(matches!(decode(&buffer), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut buffer = Vec::new();
        for _ in 0..2 {
            buffer.push(ResourceField::FileLastAccessTime.id());
            buffer.extend_from_slice(&5i64.to_le_bytes());
        }
        buffer.push(0);
        assert!(matches!(decode(&buffer), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_sentinel_payload_rejected() {
        let mut buffer = vec![ResourceField::FileCreateTime.id()];
        buffer.extend_from_slice(&NO_TIME.to_le_bytes());
        buffer.push(0);
        assert!(matches!(decode(&buffer), Err(ContainerError::Format(_))));
    }
}
