// SPDX-License-Identifier: MIT
//! Container reader
//!
//! Opening parses the metadata frame once; afterwards the reader is
//! immutable, so one reader can serve concurrent reads from many threads.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info};

use crate::checksum::{checksum_hex, content_checksum};
use crate::compression_strategy::CompressionEngine;
use crate::config::ReaderConfig;
use crate::entry::{CompressionMethod, ResourceEntry};
use crate::error::{ContainerError, Result};
use crate::format::{Trailer, TRAILER_SIZE};
use crate::frame::decode_frame;
use crate::group::ResourceGroup;
use crate::index_list::GroupReference;
use crate::metadata::{ContainerIndex, PackedGroup};

/// The data region, either owned or mapped
enum DataRegion {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl DataRegion {
    fn as_slice(&self) -> &[u8] {
        match self {
            DataRegion::Owned(bytes) => bytes,
            DataRegion::Mapped(map) => map,
        }
    }

    fn is_mapped(&self) -> bool {
        matches!(self, DataRegion::Mapped(_))
    }
}

/// Result of resolving an index list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedGroup {
    /// Merge of packed groups; its name is unset
    Packed(ResourceGroup),
    /// Resources live on the host filesystem at this path
    External(PathBuf),
}

/// Reader for sealed containers
pub struct ContainerReader {
    data: DataRegion,
    groups: Vec<PackedGroup>,
    engine: CompressionEngine,
    config: ReaderConfig,
}

impl ContainerReader {
    /// Open a container whose placement is already known.
    ///
    /// `metadata_offset` is relative to `data_base_offset`, and is also the
    /// length of the data region.
    pub fn open(
        mut file: File,
        data_base_offset: u64,
        metadata_offset: u64,
        metadata_length: u64,
        config: ReaderConfig,
    ) -> Result<Self> {
        config.validate()?;

        let file_len = file.metadata()?.len();
        let metadata_start = data_base_offset
            .checked_add(metadata_offset)
            .ok_or_else(|| ContainerError::format("Metadata offset overflows"))?;
        let metadata_end = metadata_start
            .checked_add(metadata_length)
            .ok_or_else(|| ContainerError::format("Metadata length overflows"))?;
        if metadata_end > file_len {
            return Err(truncated(file_len, metadata_end));
        }

        let metadata_len = usize::try_from(metadata_length)
            .map_err(|_| ContainerError::format("Metadata section too large"))?;
        let mut frame = vec![0u8; metadata_len];
        file.seek(SeekFrom::Start(metadata_start))?;
        file.read_exact(&mut frame)?;
        let index = ContainerIndex::decode(&decode_frame(&frame)?)?;

        let data = if metadata_offset == 0 {
            DataRegion::Owned(Vec::new())
        } else if metadata_offset < config.eager_load_threshold {
            let mut bytes = vec![0u8; metadata_offset as usize];
            file.seek(SeekFrom::Start(data_base_offset))?;
            file.read_exact(&mut bytes)?;
            DataRegion::Owned(bytes)
        } else {
            let len = usize::try_from(metadata_offset)
                .map_err(|_| ContainerError::format("Data region too large to map"))?;
            // SAFETY: the container is write-once; callers must not modify the
            // file while a reader holds it open. Bounds were checked above.
            let map = unsafe {
                MmapOptions::new()
                    .offset(data_base_offset)
                    .len(len)
                    .map(&file)
            }?;
            DataRegion::Mapped(map)
        };

        info!(
            groups = index.groups.len(),
            data_bytes = metadata_offset,
            mapped = data.is_mapped(),
            "Opened container"
        );

        Ok(Self {
            data,
            groups: index.groups,
            engine: CompressionEngine::default(),
            config,
        })
    }

    /// Open a container file by locating its trailer
    pub fn open_path(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let trailer = Trailer::read_from_end(&mut file)?;

        let file_len = file.metadata()?.len();
        let end = trailer
            .data_base_offset
            .checked_add(trailer.metadata_offset)
            .and_then(|v| v.checked_add(trailer.metadata_length))
            .and_then(|v| v.checked_add(TRAILER_SIZE as u64))
            .ok_or_else(|| ContainerError::format("Trailer offsets overflow"))?;
        if end > file_len {
            return Err(ContainerError::format(format!(
                "{}: trailer points past the end of the file ({} > {})",
                path.display(),
                end,
                file_len
            )));
        }

        debug!(path = %path.display(), ?trailer, "Read trailer");
        Self::open(
            file,
            trailer.data_base_offset,
            trailer.metadata_offset,
            trailer.metadata_length,
            config,
        )
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, index: usize) -> Option<&ResourceGroup> {
        self.groups.get(index).map(|g| &g.group)
    }

    /// Package identity recorded for a library group
    pub fn group_identity(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.identity.as_deref()
    }

    /// Index of the group carrying `identity`
    pub fn find_group(&self, identity: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.identity.as_deref() == Some(identity))
    }

    /// Parse and resolve an index list such as `"3+a"` or `"E/opt/lib"`
    pub fn resolve_groups(&self, index_list: &str) -> Result<ResolvedGroup> {
        let reference = GroupReference::parse(index_list)?;
        self.resolve(&reference)
    }

    /// Resolve a parsed reference, folding packed groups left to right
    pub fn resolve(&self, reference: &GroupReference) -> Result<ResolvedGroup> {
        let indices = match reference {
            GroupReference::External(path) => return Ok(ResolvedGroup::External(path.clone())),
            GroupReference::Packed(indices) => indices,
        };

        let mut resolved = ResourceGroup::new();
        for &index in indices {
            let group = self.group(index).ok_or_else(|| {
                ContainerError::config(format!(
                    "Invalid index list {:?}: group {:x} does not exist ({} groups)",
                    reference.to_string(),
                    index,
                    self.groups.len()
                ))
            })?;
            resolved.merge(group);
        }
        Ok(ResolvedGroup::Packed(resolved))
    }

    /// Effective entry for `name` at the configured runtime version
    pub fn lookup<'g>(&self, group: &'g ResourceGroup, name: &str) -> Option<&'g ResourceEntry> {
        group.lookup(name, self.config.runtime_version)
    }

    /// Stored bytes of an entry, exactly as they appear in the data region
    pub fn read_raw(&self, entry: &ResourceEntry) -> Result<&[u8]> {
        let data = self.data.as_slice();
        let start = entry.data_offset();
        let end = entry.data_end().filter(|&end| end <= data.len() as u64).ok_or_else(|| {
            ContainerError::format(format!(
                "{}: bytes {}+{} lie outside the {}-byte data region",
                entry.name(),
                start,
                entry.compressed_size(),
                data.len()
            ))
        })?;
        Ok(&data[start as usize..end as usize])
    }

    /// Decompressed content of an entry
    pub fn read(&self, entry: &ResourceEntry) -> Result<Vec<u8>> {
        self.read_cow(entry).map(Cow::into_owned)
    }

    /// Content of an entry, borrowed from the data region when stored
    pub fn read_cow(&self, entry: &ResourceEntry) -> Result<Cow<'_, [u8]>> {
        let raw = self.read_raw(entry)?;

        let content = match entry.compression_method() {
            CompressionMethod::Store => Cow::Borrowed(raw),
            method => Cow::Owned(
                self.engine
                    .decompress(method, raw, entry.uncompressed_size())
                    .map_err(|e| with_name(entry, e))?,
            ),
        };

        if self.config.verify_checksums {
            if let Some(expected) = entry.checksum() {
                let actual = content_checksum(&content);
                if actual != expected {
                    return Err(ContainerError::format(format!(
                        "{}: checksum mismatch (expected {}, got {})",
                        entry.name(),
                        checksum_hex(expected),
                        checksum_hex(actual)
                    )));
                }
            }
        }

        Ok(content)
    }

    /// Look up `name` in `group` and read it
    pub fn read_named(&self, group: &ResourceGroup, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .lookup(group, name)
            .ok_or_else(|| ContainerError::ResourceNotFound(name.to_string()))?;
        self.read(entry)
    }

    /// Read `name` from an external reference: a directory or a zip archive
    pub fn read_external(&self, root: &Path, name: &str) -> Result<Vec<u8>> {
        let relative = Path::new(name);
        if name.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ContainerError::config(format!(
                "Invalid resource name {:?}",
                name
            )));
        }

        if root.is_dir() {
            return match std::fs::read(root.join(relative)) {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ContainerError::ResourceNotFound(name.to_string()))
                }
                Err(e) => Err(e.into()),
            };
        }

        let mut archive = zip::ZipArchive::new(File::open(root)?)?;
        let mut file = match archive.by_name(name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ContainerError::ResourceNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Read every entry of every group and overlay, returning the count
    pub fn verify(&self) -> Result<usize> {
        let mut count = 0;
        for (index, packed) in self.groups.iter().enumerate() {
            let overlays = packed.group.overlays().map(|(_, g)| g);
            for group in std::iter::once(&packed.group).chain(overlays) {
                for entry in group.iter() {
                    self.read_cow(entry).map_err(|e| match e {
                        ContainerError::Format(msg) => {
                            ContainerError::format(format!("group {:x}: {}", index, msg))
                        }
                        other => other,
                    })?;
                    count += 1;
                }
            }
        }
        info!(entries = count, "Verified container");
        Ok(count)
    }

    /// Container statistics
    pub fn stats(&self) -> ContainerStats {
        let mut stats = ContainerStats {
            group_count: self.groups.len(),
            data_size: self.data.as_slice().len() as u64,
            mapped: self.data.is_mapped(),
            ..ContainerStats::default()
        };
        for packed in &self.groups {
            let overlays = packed.group.overlays().map(|(_, g)| g);
            for group in std::iter::once(&packed.group).chain(overlays) {
                for entry in group.iter() {
                    stats.entry_count += 1;
                    stats.uncompressed_size += entry.uncompressed_size();
                    stats.compressed_size += entry.compressed_size();
                }
            }
        }
        stats
    }
}

/// Container statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub group_count: usize,
    pub entry_count: usize,
    pub data_size: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub mapped: bool,
}

impl ContainerStats {
    /// Stored bytes over original bytes
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.uncompressed_size as f64
    }
}

fn truncated(file_len: u64, needed: u64) -> ContainerError {
    ContainerError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!(
            "container is {} bytes, metadata ends at {}",
            file_len, needed
        ),
    ))
}

fn with_name(entry: &ResourceEntry, err: ContainerError) -> ContainerError {
    match err {
        ContainerError::Format(msg) => {
            ContainerError::format(format!("{}: {}", entry.name(), msg))
        }
        other => other,
    }
}
