// SPDX-License-Identifier: MIT
//! # respack
//!
//! An append-only resource container: many named files from directory trees
//! and zip archives packed into one file, then located and decompressed one
//! at a time by name without unpacking the rest.
//!
//! ## Format Overview
//!
//! ```text
//! [data region]     compressed resource bytes in append order
//! [metadata frame]  zstd-wrapped group index with its own checksum
//! [trailer]         40 bytes locating the two sections above
//! ```
//!
//! Resources are organised in numbered groups. A reader names groups with an
//! index list such as `"3+a"` (group 3 merged with group 10, later groups
//! winning) or points outside the container with `"E/some/path"`.
//!
//! Each resource is compressed on its own:
//!
//! - **store** for tiny or already-compressed inputs
//! - **deflate** by default
//! - **lz4** when configured for throughput
//! - **classfile** for `.class` files: constant-pool strings are split from
//!   the structural bytes before deflate
//!
//! ## Usage
//!
//! ```no_run
//! use respack::{ContainerReader, ContainerWriter, FileTimes, PackerConfig, ReaderConfig,
//!     ResolvedGroup, ResourceGroup};
//!
//! let file = std::fs::File::create("app.respack")?;
//! let mut writer = ContainerWriter::new(file, PackerConfig::default())?;
//! let mut group = ResourceGroup::new();
//! group.insert(writer.add_resource("config/app.toml", b"name = \"demo\"\n", FileTimes::default())?);
//! writer.add_group(None, group);
//! writer.seal()?;
//!
//! let reader = ContainerReader::open_path("app.respack", ReaderConfig::default())?;
//! if let ResolvedGroup::Packed(group) = reader.resolve_groups("0")? {
//!     let bytes = reader.read_named(&group, "config/app.toml")?;
//!     assert_eq!(bytes, b"name = \"demo\"\n");
//! }
//! # Ok::<(), respack::ContainerError>(())
//! ```

pub mod checksum;
pub mod classfile;
pub mod compression_strategy;
pub mod config;
pub mod entry;
pub mod error;
pub mod fields;
pub mod format;
pub mod frame;
pub mod group;
pub mod index_list;
pub mod metadata;
pub mod reader;
pub mod sources;
pub mod writer;

// Re-export main types
pub use checksum::content_checksum;
pub use compression_strategy::{
    Codec, CodecError, Compressed, CompressionConfig, CompressionEngine, DefaultMethod,
    FileTypeCategory,
};
pub use config::{Config, PackerConfig, ReaderConfig};
pub use entry::{CompressionMethod, FileTimes, ResourceEntry, NO_TIME};
pub use error::{ContainerError, ErrorCategory, Result};
pub use format::{Trailer, TRAILER_MAGIC, TRAILER_SIZE};
pub use frame::{decode_frame, encode_frame};
pub use group::ResourceGroup;
pub use index_list::GroupReference;
pub use metadata::{ContainerIndex, PackedGroup};
pub use reader::{ContainerReader, ContainerStats, ResolvedGroup};
pub use sources::{derive_module_name, InputSpec, ManifestAttributes};
pub use writer::{AddedGroup, ContainerWriter, MetadataPlacement, PendingResource};
