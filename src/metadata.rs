// SPDX-License-Identifier: MIT
//! Serialized group index carried inside the metadata frame
//!
//! ```text
//! group_count u32
//! per group:
//!   flags u8            bit0: identity present, bit1: overlays present
//!   [identity]          u16 length + UTF-8
//!   entry_count u32, entries
//!   [overlay_count u32, per overlay: threshold u32, entry_count u32, entries]
//! ```

use crate::entry::ResourceEntry;
use crate::error::{ContainerError, Result};
use crate::format::{write_str, ByteReader};
use crate::group::ResourceGroup;

const FLAG_IDENTITY: u8 = 0x01;
const FLAG_OVERLAYS: u8 = 0x02;

/// One group as stored in a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedGroup {
    /// Derived package identity of a library input, if any
    pub identity: Option<String>,
    pub group: ResourceGroup,
}

/// All groups of a container, in index order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerIndex {
    pub groups: Vec<PackedGroup>,
}

impl ContainerIndex {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let count = u32::try_from(self.groups.len())
            .map_err(|_| ContainerError::config("Too many groups"))?;
        buffer.extend_from_slice(&count.to_le_bytes());

        for packed in &self.groups {
            let mut flags = 0u8;
            if packed.identity.is_some() {
                flags |= FLAG_IDENTITY;
            }
            if packed.group.has_overlays() {
                flags |= FLAG_OVERLAYS;
            }
            buffer.push(flags);

            if let Some(identity) = &packed.identity {
                write_str(&mut buffer, identity)?;
            }
            encode_entries(&mut buffer, &packed.group)?;

            if packed.group.has_overlays() {
                let overlays: Vec<_> = packed.group.overlays().collect();
                buffer.extend_from_slice(&(overlays.len() as u32).to_le_bytes());
                for (threshold, overlay) in overlays {
                    buffer.extend_from_slice(&threshold.to_le_bytes());
                    encode_entries(&mut buffer, overlay)?;
                }
            }
        }

        Ok(buffer)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let count = reader.read_u32()?;
        let mut groups = Vec::with_capacity((count as usize).min(reader.remaining()));

        for index in 0..count {
            let flags = reader.read_u8()?;
            if flags & !(FLAG_IDENTITY | FLAG_OVERLAYS) != 0 {
                return Err(ContainerError::format(format!(
                    "Group {} has unknown flags {:#04x}",
                    index, flags
                )));
            }

            let identity = if flags & FLAG_IDENTITY != 0 {
                Some(reader.read_str()?.to_string())
            } else {
                None
            };
            let mut group = decode_entries(&mut reader)?;

            if flags & FLAG_OVERLAYS != 0 {
                let overlay_count = reader.read_u32()?;
                let mut previous = None;
                for _ in 0..overlay_count {
                    let threshold = reader.read_u32()?;
                    if previous.is_some_and(|p| p >= threshold) {
                        return Err(ContainerError::format(format!(
                            "Group {} overlay thresholds are not ascending",
                            index
                        )));
                    }
                    previous = Some(threshold);
                    group.set_overlay(threshold, decode_entries(&mut reader)?);
                }
            }

            groups.push(PackedGroup { identity, group });
        }

        if !reader.is_empty() {
            return Err(ContainerError::format(format!(
                "{} trailing bytes after group index",
                reader.remaining()
            )));
        }

        Ok(Self { groups })
    }
}

fn encode_entries(buffer: &mut Vec<u8>, group: &ResourceGroup) -> Result<()> {
    let count =
        u32::try_from(group.len()).map_err(|_| ContainerError::config("Too many entries"))?;
    buffer.extend_from_slice(&count.to_le_bytes());
    for entry in group.iter() {
        entry.encode(buffer)?;
    }
    Ok(())
}

fn decode_entries(reader: &mut ByteReader<'_>) -> Result<ResourceGroup> {
    let count = reader.read_u32()?;
    let mut group = ResourceGroup::new();
    for _ in 0..count {
        let entry = ResourceEntry::decode(reader)?;
        if group.insert(entry).is_some() {
            return Err(ContainerError::format("Duplicate entry name within a group"));
        }
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CompressionMethod, FileTimes};

    fn entry(name: &str, offset: u64) -> ResourceEntry {
        ResourceEntry::new(name, offset, 20, CompressionMethod::GeneralPurpose, 10)
            .unwrap()
            .with_checksum(offset)
    }

    fn sample_index() -> ContainerIndex {
        let mut lib: ResourceGroup = [entry("a.txt", 0), entry("b.txt", 10)].into_iter().collect();
        lib.overlay_mut(11).insert(entry("a.txt", 20));
        lib.overlay_mut(17).insert(entry("c.txt", 30));

        let app: ResourceGroup = [entry("Main.class", 40)
            .with_times(FileTimes::new(None, Some(1_700_000_000_000), None).unwrap())]
        .into_iter()
        .collect();

        ContainerIndex {
            groups: vec![
                PackedGroup {
                    identity: Some("org.example.lib".into()),
                    group: lib,
                },
                PackedGroup {
                    identity: None,
                    group: app,
                },
                PackedGroup {
                    identity: None,
                    group: ResourceGroup::new(),
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let index = sample_index();
        let decoded = ContainerIndex::decode(&index.encode().unwrap()).unwrap();
        assert_eq!(decoded, index);
        assert_eq!(decoded.groups[0].group.lookup("a.txt", 11).unwrap().data_offset(), 20);
        assert_eq!(decoded.groups[1].group.get("Main.class").unwrap().times().accessed(), None);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_index().encode().unwrap();
        bytes.push(0);
        assert!(matches!(ContainerIndex::decode(&bytes), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample_index().encode().unwrap();
        assert!(ContainerIndex::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
