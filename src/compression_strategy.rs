// SPDX-License-Identifier: MIT
//! Per-resource compression strategy
//!
//! The engine picks a [`CompressionMethod`] for each resource from its size
//! and extension hint, runs the matching [`Codec`], and never stores a
//! result larger than the input:
//!
//! 1. Inputs of 16 bytes or less are stored.
//! 2. Extensions of already-compressed formats are stored.
//! 3. Class files get the structured transform, falling back to deflate
//!    when the file cannot be parsed.
//! 4. Everything else gets the configured default (deflate unless the
//!    caller asks for LZ4).
//! 5. If the output is not smaller than the input, the input is stored.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::classfile::{join_class_file, split_class_file};
use crate::entry::CompressionMethod;
use crate::error::{ContainerError, Result};

/// Inputs at or below this size are always stored
pub const STORE_THRESHOLD: usize = 16;

/// Extensions of formats that are already compressed
const ALREADY_COMPRESSED: &[&str] = &[
    // images
    "png", "apng", "jpg", "jpeg", "gif", "webp", "heic", "heif", "avif",
    // audio
    "aac", "flac", "mp3", "ogg", "opus",
    // video
    "mp4", "mkv", "webm", "mov",
    // archives
    "zip", "jar", "gz", "tgz", "xz", "br", "zst", "bz2", "tbz2", "7z", "lz4",
];

/// Extensions of compiled class files
const STRUCTURED: &[&str] = &["class"];

/// Failure inside a single codec
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("LZ4 error: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),

    #[error("No codec registered for {0}")]
    Unsupported(CompressionMethod),
}

impl From<ContainerError> for CodecError {
    fn from(err: ContainerError) -> Self {
        CodecError::Malformed(err.to_string())
    }
}

/// A compress/decompress pair for one [`CompressionMethod`]
pub trait Codec: Send + Sync + std::fmt::Debug {
    fn method(&self) -> CompressionMethod;

    fn compress(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError>;

    /// Decompress `data`; implementations must not produce more than
    /// `expected_len + 1` bytes so a corrupt entry cannot balloon.
    fn decompress(
        &self,
        data: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, CodecError>;
}

#[derive(Debug)]
pub struct StoreCodec;

impl Codec for StoreCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Store
    }

    fn compress(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(
        &self,
        data: &[u8],
        _expected_len: usize,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

#[derive(Debug)]
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

fn deflate(data: &[u8], level: u32) -> std::result::Result<Vec<u8>, CodecError> {
    let estimated_size = data.len().saturating_mul(6) / 10;
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(estimated_size.max(64)),
        Compression::new(level),
    );
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Upper bound on deflate expansion per input byte
const MAX_DEFLATE_RATIO: usize = 1032;

/// Upper bound on LZ4 block expansion per input byte
const MAX_LZ4_RATIO: usize = 255;

/// Inflate at most `limit + 1` bytes; the buffer never outgrows what `data`
/// can actually expand to, whatever `limit` claims.
fn inflate(data: &[u8], limit: usize) -> std::result::Result<Vec<u8>, CodecError> {
    let capacity = limit.min(data.len().saturating_mul(MAX_DEFLATE_RATIO));
    let mut out = Vec::with_capacity(capacity);
    DeflateDecoder::new(data)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)?;
    Ok(out)
}

impl Codec for DeflateCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::GeneralPurpose
    }

    fn compress(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        deflate(data, self.level)
    }

    fn decompress(
        &self,
        data: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        inflate(data, expected_len)
    }
}

#[derive(Debug)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::FastBlock
    }

    fn compress(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress(
        &self,
        data: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        if expected_len > data.len().saturating_mul(MAX_LZ4_RATIO) {
            return Err(CodecError::Malformed(format!(
                "{} compressed bytes cannot expand to {}",
                data.len(),
                expected_len
            )));
        }
        Ok(lz4_flex::block::decompress(data, expected_len)?)
    }
}

/// Structured transform for class files: constant-pool strings are pulled
/// into their own stream before deflate.
///
/// Payload: `deflate(u32 structural_len ‖ structural ‖ strings)`.
#[derive(Debug)]
pub struct ClassFileCodec {
    level: u32,
}

impl ClassFileCodec {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Codec for ClassFileCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::StructuredTransform
    }

    fn compress(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        let (structural, strings) = split_class_file(data)?;
        let structural_len = u32::try_from(structural.len())
            .map_err(|_| CodecError::Malformed("class file too large".into()))?;

        let mut joined = Vec::with_capacity(4 + data.len());
        joined.extend_from_slice(&structural_len.to_le_bytes());
        joined.extend_from_slice(&structural);
        joined.extend_from_slice(&strings);
        deflate(&joined, self.level)
    }

    fn decompress(
        &self,
        data: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        let joined = inflate(data, expected_len.saturating_add(4))?;
        if joined.len() < 4 {
            return Err(CodecError::Malformed("transform payload too short".into()));
        }
        let structural_len = u32::from_le_bytes([joined[0], joined[1], joined[2], joined[3]]) as usize;
        let body = &joined[4..];
        if structural_len > body.len() {
            return Err(CodecError::Malformed(format!(
                "structural stream length {} exceeds payload {}",
                structural_len,
                body.len()
            )));
        }
        let (structural, strings) = body.split_at(structural_len);
        Ok(join_class_file(structural, strings)?)
    }
}

/// File type categories for compression decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileTypeCategory {
    /// Already compressed formats (PNG, MP3, ZIP, etc.)
    AlreadyCompressed,
    /// Binary artifacts with a known internal layout
    Structured,
    /// Anything else
    Compressible,
}

/// Compression configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Sniff magic numbers when no extension hint is available
    pub smart_detection: bool,
    /// Method used for resources with no more specific rule
    pub default_method: DefaultMethod,
    /// Deflate level, 0-9
    pub deflate_level: u32,
}

/// Methods that may serve as the default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultMethod {
    Deflate,
    Lz4,
}

impl DefaultMethod {
    pub fn method(self) -> CompressionMethod {
        match self {
            DefaultMethod::Deflate => CompressionMethod::GeneralPurpose,
            DefaultMethod::Lz4 => CompressionMethod::FastBlock,
        }
    }
}

impl CompressionConfig {
    /// Deflate by default, with content sniffing (recommended)
    pub fn smart() -> Self {
        Self {
            smart_detection: true,
            default_method: DefaultMethod::Deflate,
            deflate_level: 6,
        }
    }

    /// LZ4 by default, for throughput-sensitive packing
    pub fn fast() -> Self {
        Self {
            default_method: DefaultMethod::Lz4,
            ..Self::smart()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.deflate_level > 9 {
            return Err(ContainerError::config(format!(
                "deflate level must be between 0 and 9, got {}",
                self.deflate_level
            )));
        }
        Ok(())
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::smart()
    }
}

/// Output of [`CompressionEngine::compress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub method: CompressionMethod,
    pub data: Vec<u8>,
}

impl Compressed {
    fn stored(data: &[u8]) -> Self {
        Self {
            method: CompressionMethod::Store,
            data: data.to_vec(),
        }
    }
}

/// Registry of codecs plus the extension classifier that picks between them
#[derive(Debug)]
pub struct CompressionEngine {
    config: CompressionConfig,
    codecs: HashMap<CompressionMethod, Arc<dyn Codec>>,
    extensions: HashMap<String, CompressionMethod>,
    fallbacks: AtomicU64,
}

impl CompressionEngine {
    /// Create a new compression engine with the given config
    pub fn new(config: CompressionConfig) -> Self {
        let mut engine = Self {
            config,
            codecs: HashMap::new(),
            extensions: HashMap::new(),
            fallbacks: AtomicU64::new(0),
        };

        engine.register_codec(Arc::new(StoreCodec));
        engine.register_codec(Arc::new(DeflateCodec::new(config.deflate_level)));
        engine.register_codec(Arc::new(Lz4Codec));
        engine.register_codec(Arc::new(ClassFileCodec::new(config.deflate_level)));

        for ext in ALREADY_COMPRESSED {
            engine.register_extension(ext, CompressionMethod::Store);
        }
        for ext in STRUCTURED {
            engine.register_extension(ext, CompressionMethod::StructuredTransform);
        }

        engine
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Register (or replace) the codec for its method
    pub fn register_codec(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.method(), codec);
    }

    /// Route an extension (case-insensitive, without the dot) to a method
    pub fn register_extension(&mut self, ext: &str, method: CompressionMethod) {
        self.extensions.insert(ext.to_ascii_lowercase(), method);
    }

    /// Number of structured-transform failures recovered by falling back
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Categorize a resource by its extension hint, or its content
    pub fn categorize(&self, data: &[u8], extension: Option<&str>) -> FileTypeCategory {
        if let Some(ext) = extension {
            match self.extensions.get(&ext.to_ascii_lowercase()) {
                Some(CompressionMethod::Store) => return FileTypeCategory::AlreadyCompressed,
                Some(CompressionMethod::StructuredTransform) => {
                    return FileTypeCategory::Structured
                }
                _ => {}
            }
        } else if self.config.smart_detection {
            if let Some(category) = self.detect_from_magic_numbers(data) {
                return category;
            }
        }
        FileTypeCategory::Compressible
    }

    /// Pick the method the rules select for this resource
    pub fn select_method(&self, data: &[u8], extension: Option<&str>) -> CompressionMethod {
        if data.len() <= STORE_THRESHOLD {
            return CompressionMethod::Store;
        }

        if let Some(ext) = extension {
            if let Some(&method) = self.extensions.get(&ext.to_ascii_lowercase()) {
                return method;
            }
        } else if self.categorize(data, None) == FileTypeCategory::AlreadyCompressed {
            return CompressionMethod::Store;
        }

        self.config.default_method.method()
    }

    /// Compress a resource, choosing the method from its size and extension
    pub fn compress(&self, data: &[u8], extension: Option<&str>) -> Compressed {
        let method = self.select_method(data, extension);
        self.compress_with(method, data)
    }

    /// Compress with an explicit method.
    ///
    /// Never fails: a structured-transform failure falls back to deflate,
    /// any other codec failure or a non-shrinking result falls back to store.
    pub fn compress_with(&self, method: CompressionMethod, data: &[u8]) -> Compressed {
        if method == CompressionMethod::Store || data.len() <= STORE_THRESHOLD {
            return Compressed::stored(data);
        }

        let result = match self.run_codec(method, data) {
            Ok(out) => Compressed { method, data: out },
            Err(e) if method == CompressionMethod::StructuredTransform => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Structured transform failed, falling back to deflate");
                match self.run_codec(CompressionMethod::GeneralPurpose, data) {
                    Ok(out) => Compressed {
                        method: CompressionMethod::GeneralPurpose,
                        data: out,
                    },
                    Err(e) => {
                        warn!(error = %e, "Deflate failed, storing uncompressed");
                        return Compressed::stored(data);
                    }
                }
            }
            Err(e) => {
                warn!(method = %method, error = %e, "Compression failed, storing uncompressed");
                return Compressed::stored(data);
            }
        };

        if result.data.len() >= data.len() {
            debug!(
                method = %result.method,
                original = data.len(),
                compressed = result.data.len(),
                "Compression did not shrink input, storing"
            );
            return Compressed::stored(data);
        }

        result
    }

    fn run_codec(
        &self,
        method: CompressionMethod,
        data: &[u8],
    ) -> std::result::Result<Vec<u8>, CodecError> {
        self.codecs
            .get(&method)
            .ok_or(CodecError::Unsupported(method))?
            .compress(data)
    }

    /// Decompress `data` and check it has exactly `expected_len` bytes
    pub fn decompress(
        &self,
        method: CompressionMethod,
        data: &[u8],
        expected_len: u64,
    ) -> Result<Vec<u8>> {
        let expected = usize::try_from(expected_len).map_err(|_| {
            ContainerError::format(format!("Resource too large: {} bytes", expected_len))
        })?;

        let codec = self
            .codecs
            .get(&method)
            .ok_or_else(|| ContainerError::format(format!("No codec for method {}", method)))?;

        let out = codec
            .decompress(data, expected)
            .map_err(|e| ContainerError::format(format!("{} decompression failed: {}", method, e)))?;

        if out.len() != expected {
            return Err(ContainerError::format(format!(
                "Decompressed length mismatch: expected {}, got {}",
                expected,
                out.len()
            )));
        }

        Ok(out)
    }

    /// Detect already-compressed content from magic numbers
    #[cfg(feature = "file-type-detection")]
    fn detect_from_magic_numbers(&self, data: &[u8]) -> Option<FileTypeCategory> {
        use infer::MatcherType;

        let kind = infer::get(data)?;
        match kind.matcher_type() {
            MatcherType::Archive | MatcherType::Image | MatcherType::Audio | MatcherType::Video => {
                Some(FileTypeCategory::AlreadyCompressed)
            }
            _ => None,
        }
    }

    #[cfg(not(feature = "file-type-detection"))]
    fn detect_from_magic_numbers(&self, _data: &[u8]) -> Option<FileTypeCategory> {
        None
    }
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

/// Extension of a resource name, without the dot
pub fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rfind('.') {
        Some(0) | None => None,
        Some(pos) => Some(&file[pos + 1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::test_support::sample_class;

    fn text(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .cycle()
            .take(len)
            .copied()
            .collect()
    }

    #[test]
    fn test_small_input_stored() {
        let engine = CompressionEngine::default();
        let result = engine.compress(&[0u8; 16], Some("txt"));
        assert_eq!(result.method, CompressionMethod::Store);
    }

    #[test]
    fn test_already_compressed_extension_stored() {
        let engine = CompressionEngine::default();
        let data = text(4096);
        assert_eq!(engine.compress(&data, Some("PNG")).method, CompressionMethod::Store);
        assert_eq!(engine.compress(&data, Some("zst")).method, CompressionMethod::Store);
    }

    #[test]
    fn test_default_is_deflate() {
        let engine = CompressionEngine::default();
        let data = text(4096);
        let result = engine.compress(&data, Some("txt"));
        assert_eq!(result.method, CompressionMethod::GeneralPurpose);
        assert!(result.data.len() < data.len());
        assert_eq!(
            engine.decompress(result.method, &result.data, data.len() as u64).unwrap(),
            data
        );
    }

    #[test]
    fn test_fast_config_uses_lz4() {
        let engine = CompressionEngine::new(CompressionConfig::fast());
        let data = text(4096);
        let result = engine.compress(&data, None);
        assert_eq!(result.method, CompressionMethod::FastBlock);
        assert_eq!(
            engine.decompress(result.method, &result.data, data.len() as u64).unwrap(),
            data
        );
    }

    #[test]
    fn test_class_file_uses_structured_transform() {
        let engine = CompressionEngine::default();
        let class = sample_class();
        let result = engine.compress(&class, Some("class"));
        assert_eq!(result.method, CompressionMethod::StructuredTransform);
        assert_eq!(
            engine.decompress(result.method, &result.data, class.len() as u64).unwrap(),
            class
        );
        assert_eq!(engine.fallback_count(), 0);
    }

    #[test]
    fn test_malformed_class_falls_back_to_deflate() {
        let engine = CompressionEngine::default();
        let data = text(4096);
        let result = engine.compress(&data, Some("class"));
        assert_eq!(result.method, CompressionMethod::GeneralPurpose);
        assert_eq!(engine.fallback_count(), 1);
    }

    #[test]
    fn test_incompressible_input_stored() {
        let engine = CompressionEngine::default();
        // xorshift noise does not deflate
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let noise: Vec<u8> = (0..2048)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let result = engine.compress(&noise, Some("bin"));
        assert_eq!(result.method, CompressionMethod::Store);
        assert_eq!(result.data, noise);
    }

    #[test]
    fn test_length_mismatch_is_format_error() {
        let engine = CompressionEngine::default();
        let data = text(1024);
        let result = engine.compress(&data, None);
        let err = engine
            .decompress(result.method, &result.data, data.len() as u64 - 1)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Format(_)));

        let err = engine
            .decompress(CompressionMethod::Store, &data, data.len() as u64 + 1)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Format(_)));
    }

    #[test]
    fn test_garbage_is_format_error() {
        let engine = CompressionEngine::default();
        let err = engine
            .decompress(CompressionMethod::FastBlock, &[0xff; 32], 100)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Format(_)));
    }

    #[test]
    fn test_oversized_length_is_format_error() {
        let engine = CompressionEngine::default();
        let data = text(4096);
        for method in [
            CompressionMethod::GeneralPurpose,
            CompressionMethod::FastBlock,
        ] {
            let compressed = engine.compress_with(method, &data);
            assert_eq!(compressed.method, method);
            for declared in [u64::MAX, u64::MAX / 2, data.len() as u64 * 1000] {
                let err = engine
                    .decompress(method, &compressed.data, declared)
                    .unwrap_err();
                assert!(matches!(err, ContainerError::Format(_)), "{} {}", method, declared);
            }
        }

        let class = sample_class();
        let compressed = engine.compress_with(CompressionMethod::StructuredTransform, &class);
        let err = engine
            .decompress(compressed.method, &compressed.data, u64::MAX)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Format(_)));
    }

    #[test]
    fn test_registered_extension() {
        let mut engine = CompressionEngine::default();
        engine.register_extension("dat", CompressionMethod::FastBlock);
        let result = engine.compress(&text(2048), Some("dat"));
        assert_eq!(result.method, CompressionMethod::FastBlock);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.txt"), Some("txt"));
        assert_eq!(extension_of("a.b/c"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("Foo.class"), Some("class"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = CompressionConfig::default();
        assert!(config.validate().is_ok());
        config.deflate_level = 12;
        assert!(config.validate().is_err());
    }
}
