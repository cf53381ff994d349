// SPDX-License-Identifier: MIT
//! Class-file structure walking
//!
//! Used by the structured-transform codec, which separates constant-pool
//! UTF-8 payloads from the rest of the file so that deflate sees all the
//! strings together, and by the packer to read the module name out of a
//! `module-info.class` descriptor.

use crate::error::{ContainerError, Result};
use crate::format::ByteReader;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

const TAG_UTF8: u8 = 1;
const TAG_MODULE: u8 = 19;

/// Size of the payload following a constant-pool tag, `None` for UTF-8
fn constant_payload_size(tag: u8) -> Result<Option<usize>> {
    let size = match tag {
        TAG_UTF8 => return Ok(None),
        // Integer, Float
        3 | 4 => 4,
        // Long, Double
        5 | 6 => 8,
        // Class, String, MethodType, Module, Package
        7 | 8 | 16 | 19 | 20 => 2,
        // Fieldref, Methodref, InterfaceMethodref, NameAndType, Dynamic, InvokeDynamic
        9 | 10 | 11 | 12 | 17 | 18 => 4,
        // MethodHandle
        15 => 3,
        other => {
            return Err(ContainerError::format(format!(
                "Unknown constant pool tag {}",
                other
            )))
        }
    };
    Ok(Some(size))
}

/// Whether a constant occupies two pool slots
fn is_wide(tag: u8) -> bool {
    tag == 5 || tag == 6
}

#[derive(Debug, Clone, Copy)]
enum Constant<'a> {
    Unusable,
    Utf8(&'a [u8]),
    Module { name_index: u16 },
    Other,
}

struct ConstantPool<'a> {
    constants: Vec<Constant<'a>>,
}

impl<'a> ConstantPool<'a> {
    fn utf8(&self, index: u16) -> Result<&'a str> {
        match self.constants.get(index as usize) {
            Some(Constant::Utf8(bytes)) => std::str::from_utf8(bytes).map_err(|_| {
                ContainerError::format(format!("Constant {} is not valid UTF-8", index))
            }),
            _ => Err(ContainerError::format(format!(
                "Constant {} is not a UTF-8 constant",
                index
            ))),
        }
    }
}

fn read_header(reader: &mut ByteReader<'_>) -> Result<u16> {
    if reader.read_u32_be()? != CLASS_MAGIC {
        return Err(ContainerError::format("Not a class file"));
    }
    // minor, major
    reader.take(4)?;
    let count = reader.read_u16_be()?;
    if count == 0 {
        return Err(ContainerError::format("Constant pool count is zero"));
    }
    Ok(count)
}

fn parse_constant_pool<'a>(reader: &mut ByteReader<'a>, count: u16) -> Result<ConstantPool<'a>> {
    let mut constants = Vec::with_capacity(count as usize);
    constants.push(Constant::Unusable);

    while constants.len() < count as usize {
        let tag = reader.read_u8()?;
        let constant = match constant_payload_size(tag)? {
            None => {
                let len = reader.read_u16_be()? as usize;
                Constant::Utf8(reader.take(len)?)
            }
            Some(size) => {
                let payload = reader.take(size)?;
                if tag == TAG_MODULE {
                    Constant::Module {
                        name_index: u16::from_be_bytes([payload[0], payload[1]]),
                    }
                } else {
                    Constant::Other
                }
            }
        };
        constants.push(constant);
        if is_wide(tag) {
            constants.push(Constant::Unusable);
        }
    }

    if constants.len() != count as usize {
        return Err(ContainerError::format(
            "Wide constant overruns the constant pool",
        ));
    }

    Ok(ConstantPool { constants })
}

/// Skip `attributes_count` + attributes, returning (name_index, body) pairs
fn read_attributes<'a>(reader: &mut ByteReader<'a>) -> Result<Vec<(u16, &'a [u8])>> {
    let count = reader.read_u16_be()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u16_be()?;
        let len = reader.read_u32_be()? as usize;
        attributes.push((name_index, reader.take(len)?));
    }
    Ok(attributes)
}

fn skip_members(reader: &mut ByteReader<'_>) -> Result<()> {
    let count = reader.read_u16_be()?;
    for _ in 0..count {
        // access_flags, name_index, descriptor_index
        reader.take(6)?;
        read_attributes(reader)?;
    }
    Ok(())
}

/// Walk everything after the constant pool, returning the class attributes
fn read_class_body<'a>(reader: &mut ByteReader<'a>) -> Result<Vec<(u16, &'a [u8])>> {
    // access_flags, this_class, super_class
    reader.take(6)?;
    let interfaces = reader.read_u16_be()? as usize;
    reader.take(interfaces * 2)?;
    skip_members(reader)?;
    skip_members(reader)?;
    let attributes = read_attributes(reader)?;
    if !reader.is_empty() {
        return Err(ContainerError::format(format!(
            "{} trailing bytes after class file",
            reader.remaining()
        )));
    }
    Ok(attributes)
}

/// Split a class file into (structural, strings) streams.
///
/// The structural stream is the class file with every UTF-8 constant's
/// payload removed (its tag and length are kept).
pub fn split_class_file(data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut reader = ByteReader::new(data);
    let count = read_header(&mut reader)?;

    let mut structural = Vec::with_capacity(data.len() / 2);
    let mut strings = Vec::with_capacity(data.len() / 2);
    structural.extend_from_slice(&data[..reader.position()]);

    let mut slot = 1u32;
    while slot < count as u32 {
        let start = reader.position();
        let tag = reader.read_u8()?;
        match constant_payload_size(tag)? {
            None => {
                let len = reader.read_u16_be()? as usize;
                structural.extend_from_slice(&data[start..reader.position()]);
                strings.extend_from_slice(reader.take(len)?);
            }
            Some(size) => {
                reader.take(size)?;
                structural.extend_from_slice(&data[start..reader.position()]);
            }
        }
        slot += if is_wide(tag) { 2 } else { 1 };
    }
    if slot != count as u32 {
        return Err(ContainerError::format(
            "Wide constant overruns the constant pool",
        ));
    }

    let body_start = reader.position();
    read_class_body(&mut reader)?;
    structural.extend_from_slice(&data[body_start..]);

    Ok((structural, strings))
}

/// Inverse of [`split_class_file`]
pub fn join_class_file(structural: &[u8], strings: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(structural);
    let mut strings = ByteReader::new(strings);
    let count = read_header(&mut reader)?;

    let mut out = Vec::with_capacity(structural.len() + strings.remaining());
    out.extend_from_slice(&structural[..reader.position()]);

    let mut slot = 1u32;
    while slot < count as u32 {
        let start = reader.position();
        let tag = reader.read_u8()?;
        match constant_payload_size(tag)? {
            None => {
                let len = reader.read_u16_be()? as usize;
                out.extend_from_slice(&structural[start..reader.position()]);
                out.extend_from_slice(strings.take(len)?);
            }
            Some(size) => {
                reader.take(size)?;
                out.extend_from_slice(&structural[start..reader.position()]);
            }
        }
        slot += if is_wide(tag) { 2 } else { 1 };
    }

    if !strings.is_empty() {
        return Err(ContainerError::format(format!(
            "{} unused bytes in string stream",
            strings.remaining()
        )));
    }

    out.extend_from_slice(&structural[reader.position()..]);
    Ok(out)
}

/// Read the module name declared by a `module-info.class` descriptor
pub fn read_module_name(data: &[u8]) -> Result<String> {
    let mut reader = ByteReader::new(data);
    let count = read_header(&mut reader)?;
    let pool = parse_constant_pool(&mut reader, count)?;
    let attributes = read_class_body(&mut reader)?;

    for (name_index, body) in attributes {
        if pool.utf8(name_index)? != "Module" {
            continue;
        }
        let mut body = ByteReader::new(body);
        let module_index = body.read_u16_be()?;
        return match pool.constants.get(module_index as usize) {
            Some(Constant::Module { name_index }) => Ok(pool.utf8(*name_index)?.to_string()),
            _ => Err(ContainerError::format(format!(
                "Module attribute references non-module constant {}",
                module_index
            ))),
        };
    }

    Err(ContainerError::format("Descriptor has no Module attribute"))
}

/// Big-endian reads; class files are the one big-endian structure we touch.
impl ByteReader<'_> {
    fn read_u16_be(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_split_and_join() {
        let class = sample_class();
        let (structural, strings) = split_class_file(&class).unwrap();
        assert!(strings.starts_with(b"com/example/resources/SampleResourceHolder"));
        assert_eq!(structural.len() + strings.len(), class.len());
        assert_eq!(join_class_file(&structural, &strings).unwrap(), class);
    }

    #[test]
    fn test_not_a_class_file() {
        assert!(split_class_file(b"definitely not a class file").is_err());
    }

    #[test]
    fn test_truncated_class_file() {
        let class = sample_class();
        assert!(split_class_file(&class[..class.len() - 3]).is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut class = sample_class();
        class.push(0);
        assert!(split_class_file(&class).is_err());
    }

    #[test]
    fn test_join_rejects_leftover_strings() {
        let (structural, mut strings) = split_class_file(&sample_class()).unwrap();
        strings.push(b'x');
        assert!(join_class_file(&structural, &strings).is_err());
    }

    #[test]
    fn test_read_module_name() {
        let descriptor = module_info("org.example.app");
        assert_eq!(read_module_name(&descriptor).unwrap(), "org.example.app");
    }

    #[test]
    fn test_read_module_name_without_module_attribute() {
        assert!(read_module_name(&sample_class()).is_err());
    }
}
