// SPDX-License-Identifier: MIT
//! Container writer
//!
//! A writer is `Building` from construction until [`ContainerWriter::finish`]
//! or [`ContainerWriter::seal`] consumes it; afterwards nothing can be
//! appended. Resource bytes go straight to the output at the append cursor;
//! the group index is kept in memory and written as one frame at the end.
//!
//! A failed write leaves the output holding bytes the cursor never counted,
//! so the writer is poisoned and refuses every later append or finish.

use std::io::Write;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::checksum::content_checksum;
use crate::compression_strategy::{extension_of, Compressed, CompressionEngine};
use crate::config::PackerConfig;
use crate::entry::{CompressionMethod, FileTimes, ResourceEntry};
use crate::error::{ContainerError, Result};
use crate::format::Trailer;
use crate::frame::encode_frame;
use crate::group::ResourceGroup;
use crate::metadata::{ContainerIndex, PackedGroup};

/// A resource waiting to be compressed and appended
#[derive(Debug, Clone)]
pub struct PendingResource {
    pub name: String,
    pub data: Vec<u8>,
    pub times: FileTimes,
}

impl PendingResource {
    pub fn new(name: impl Into<String>, data: Vec<u8>, times: FileTimes) -> Self {
        Self {
            name: name.into(),
            data,
            times,
        }
    }
}

/// Where the metadata frame landed, relative to the data base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPlacement {
    pub offset: u64,
    pub length: u64,
}

/// A group registered with the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedGroup {
    pub index: usize,
    pub identity: Option<String>,
}

/// Builder for container files
pub struct ContainerWriter<W: Write> {
    output: W,
    data_base_offset: u64,
    cursor: u64,
    engine: CompressionEngine,
    config: PackerConfig,
    groups: Vec<PackedGroup>,
    poisoned: bool,
}

impl<W: Write> ContainerWriter<W> {
    /// Create a writer whose data region starts at the beginning of `output`
    pub fn new(output: W, config: PackerConfig) -> Result<Self> {
        Self::with_base_offset(output, 0, config)
    }

    /// Create a writer for a container embedded at `data_base_offset` of a
    /// larger file; `output` must already be positioned there.
    pub fn with_base_offset(output: W, data_base_offset: u64, config: PackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            output,
            data_base_offset,
            cursor: 0,
            engine: CompressionEngine::new(config.compression),
            config,
            groups: Vec::new(),
            poisoned: false,
        })
    }

    pub fn engine(&self) -> &CompressionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CompressionEngine {
        &mut self.engine
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    /// Current append cursor, relative to the data base
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Groups registered so far, in index order
    pub fn groups(&self) -> &[PackedGroup] {
        &self.groups
    }

    /// Compress and append one resource, returning its entry
    pub fn add_resource(
        &mut self,
        name: &str,
        data: &[u8],
        times: FileTimes,
    ) -> Result<ResourceEntry> {
        let compressed = self.engine.compress(data, extension_of(name));
        let checksum = self.config.checksums.then(|| content_checksum(data));
        self.append(name, data.len() as u64, compressed, checksum, times)
    }

    /// Append a resource with an explicitly chosen method
    pub fn add_resource_with(
        &mut self,
        name: &str,
        data: &[u8],
        method: CompressionMethod,
        times: FileTimes,
    ) -> Result<ResourceEntry> {
        let compressed = self.engine.compress_with(method, data);
        let checksum = self.config.checksums.then(|| content_checksum(data));
        self.append(name, data.len() as u64, compressed, checksum, times)
    }

    /// Compress a batch, in parallel when configured, and append the results
    /// in batch order so offsets do not depend on scheduling.
    pub fn add_resources(&mut self, batch: Vec<PendingResource>) -> Result<Vec<ResourceEntry>> {
        let engine = &self.engine;
        let checksums = self.config.checksums;
        let compress = |resource: &PendingResource| {
            (
                engine.compress(&resource.data, extension_of(&resource.name)),
                checksums.then(|| content_checksum(&resource.data)),
            )
        };

        let results: Vec<(Compressed, Option<u64>)> = if self.config.parallel {
            batch.par_iter().map(compress).collect()
        } else {
            batch.iter().map(compress).collect()
        };

        batch
            .iter()
            .zip(results)
            .map(|(resource, (compressed, checksum))| {
                self.append(
                    &resource.name,
                    resource.data.len() as u64,
                    compressed,
                    checksum,
                    resource.times,
                )
            })
            .collect()
    }

    fn append(
        &mut self,
        name: &str,
        uncompressed_size: u64,
        compressed: Compressed,
        checksum: Option<u64>,
        times: FileTimes,
    ) -> Result<ResourceEntry> {
        let mut entry = ResourceEntry::new(
            name,
            self.cursor,
            uncompressed_size,
            compressed.method,
            compressed.data.len() as u64,
        )?
        .with_times(times);
        if let Some(checksum) = checksum {
            entry = entry.with_checksum(checksum);
        }

        self.check_poisoned()?;
        if let Err(e) = self.output.write_all(&compressed.data) {
            self.poisoned = true;
            return Err(e.into());
        }
        self.cursor += compressed.data.len() as u64;

        debug!(
            name,
            offset = entry.data_offset(),
            size = uncompressed_size,
            stored = entry.compressed_size(),
            method = %entry.compression_method(),
            "Added resource"
        );
        Ok(entry)
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "container output is incomplete after an earlier write failure",
            )));
        }
        Ok(())
    }

    /// Register a group; its index is its position in registration order
    pub fn add_group(&mut self, identity: Option<String>, group: ResourceGroup) -> AddedGroup {
        let index = self.groups.len();
        debug!(
            index,
            identity = identity.as_deref().unwrap_or(""),
            entries = group.total_len(),
            "Added group"
        );
        self.groups.push(PackedGroup {
            identity: identity.clone(),
            group,
        });
        AddedGroup { index, identity }
    }

    /// Write the metadata frame after the data region.
    ///
    /// Returns the output and the frame's placement for the trailer.
    pub fn finish(mut self) -> Result<(W, MetadataPlacement)> {
        self.check_poisoned()?;
        let index = ContainerIndex {
            groups: std::mem::take(&mut self.groups),
        };
        let frame = encode_frame(&index.encode()?)?;
        self.output.write_all(&frame)?;
        self.output.flush()?;

        let placement = MetadataPlacement {
            offset: self.cursor,
            length: frame.len() as u64,
        };
        info!(
            groups = index.groups.len(),
            data_bytes = self.cursor,
            metadata_bytes = placement.length,
            "Container metadata written"
        );
        Ok((self.output, placement))
    }

    /// [`finish`](Self::finish), then write the trailer
    pub fn seal(self) -> Result<(W, Trailer)> {
        let data_base_offset = self.data_base_offset;
        let (mut output, placement) = self.finish()?;
        let trailer = Trailer::new(data_base_offset, placement.offset, placement.length);
        trailer.write_to(&mut output)?;
        output.flush()?;
        Ok((output, trailer))
    }
}
