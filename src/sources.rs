// SPDX-License-Identifier: MIT
//! Packer inputs: archives, directory trees and input specifications
//!
//! Every input becomes one group in the container. Archive entries under
//! `META-INF/versions/<N>/` of a multi-release archive go to overlay `N`
//! when `N > 9`; everything else goes to the base group.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::classfile::read_module_name;
use crate::entry::FileTimes;
use crate::error::{ContainerError, Result};
use crate::group::ResourceGroup;
use crate::writer::{AddedGroup, ContainerWriter, PendingResource};

const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
const MULTI_RELEASE_PREFIX: &str = "META-INF/versions/";
const DESCRIPTOR_NAME: &str = "module-info.class";
const ARCHIVE_EXTENSION: &str = "jar";

/// Versions at or below this stay in the base group
const MIN_OVERLAY_VERSION: u32 = 9;

/// Pending bytes that trigger a compression batch
const BATCH_BYTES: usize = 32 * 1024 * 1024;

static VERSION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-(\d+(\.|$))").expect("Invalid version suffix regex"));
static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("Invalid non-alphanumeric regex"));
static REPEATED_DOTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{2,}").expect("Invalid repeated dots regex"));

/// A parsed packer input: `PATH[;name=NAME]`, where `PATH/*` scans a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub scan: bool,
    pub name: Option<String>,
}

impl InputSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split(';');
        let raw_path = parts.next().unwrap_or_default();
        if raw_path.is_empty() {
            return Err(ContainerError::config(format!(
                "Input {:?} has no path",
                spec
            )));
        }

        let mut name = None;
        let mut unknown = Vec::new();
        for option in parts.filter(|o| !o.is_empty()) {
            match option.split_once('=') {
                Some(("name", value)) if !value.is_empty() => name = Some(value.to_string()),
                Some((key, _)) => unknown.push(key.to_string()),
                None => unknown.push(option.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(ContainerError::config(format!(
                "Input {:?} has unrecognized options: {}",
                spec,
                unknown.join(", ")
            )));
        }

        let (path, scan) = match raw_path
            .strip_suffix("/*")
            .or_else(|| raw_path.strip_suffix("\\*"))
        {
            Some(dir) => (dir, true),
            None => (raw_path, false),
        };

        if scan && name.is_some() {
            return Err(ContainerError::config(format!(
                "Input {:?}: name cannot be set for a multi-file scan",
                spec
            )));
        }

        Ok(Self {
            path: PathBuf::from(path),
            scan,
            name,
        })
    }
}

/// Derive a package identity from an archive file name.
///
/// `foo-bar-1.2.3.jar` becomes `foo.bar`.
pub fn derive_module_name(file_name: &str) -> Result<String> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION) => stem,
        _ => file_name,
    };

    let stem = match VERSION_SUFFIX.find(stem) {
        Some(m) => &stem[..m.start()],
        None => stem,
    };

    let dotted = NON_ALPHANUMERIC.replace_all(stem, ".");
    let collapsed = REPEATED_DOTS.replace_all(&dotted, ".");
    let name = collapsed.trim_matches('.');

    if name.is_empty() {
        return Err(ContainerError::config(format!(
            "Cannot derive a module name from {:?}",
            file_name
        )));
    }
    Ok(name.to_string())
}

/// Archive inputs are recognized by a `.jar` extension in any case
fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Main attributes of a manifest; keys are case-insensitive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestAttributes {
    attributes: HashMap<String, String>,
}

impl ManifestAttributes {
    pub fn parse(text: &str) -> Self {
        let mut attributes = HashMap::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            if let Some(continuation) = line.strip_prefix(' ') {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(continuation);
                }
                continue;
            }
            if let Some((key, value)) = current.take() {
                attributes.insert(key, value);
            }
            if let Some((key, value)) = line.split_once(':') {
                current = Some((
                    key.trim().to_ascii_lowercase(),
                    value.trim_start().to_string(),
                ));
            }
        }
        if let Some((key, value)) = current {
            attributes.insert(key, value);
        }

        Self { attributes }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(&key.to_ascii_lowercase())
            .map(|v| v.trim_end())
    }

    pub fn is_multi_release(&self) -> bool {
        self.get("Multi-Release")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn automatic_module_name(&self) -> Option<&str> {
        self.get("Automatic-Module-Name").filter(|v| !v.is_empty())
    }
}

/// Split `META-INF/versions/<N>/rest` into `(N, rest)` when `N > 9`
fn overlay_target(name: &str) -> Option<(u32, &str)> {
    let rest = name.strip_prefix(MULTI_RELEASE_PREFIX)?;
    let (version, path) = rest.split_once('/')?;
    if path.is_empty() {
        return None;
    }
    let version: u32 = version.parse().ok()?;
    (version > MIN_OVERLAY_VERSION).then_some((version, path))
}

/// `module-info.class` or `META-INF/versions/<N>/module-info.class`, `N >= 9`
fn is_descriptor(name: &str, multi_release: bool) -> bool {
    if name == DESCRIPTOR_NAME {
        return true;
    }
    if !multi_release {
        return false;
    }
    name.strip_prefix(MULTI_RELEASE_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(version, path)| {
            path == DESCRIPTOR_NAME
                && version.parse::<u32>().is_ok_and(|v| v >= MIN_OVERLAY_VERSION)
        })
}

fn zip_modified_millis(time: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(
            time.hour().into(),
            time.minute().into(),
            time.second().into(),
        )
        .map(|t| t.and_utc().timestamp_millis())
}

fn read_manifest<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &Path,
) -> ManifestAttributes {
    let mut file = match archive.by_name(MANIFEST_NAME) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return ManifestAttributes::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable manifest, ignoring");
            return ManifestAttributes::default();
        }
    };

    let mut text = String::new();
    match file.read_to_string(&mut text) {
        Ok(_) => ManifestAttributes::parse(&text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable manifest, ignoring");
            ManifestAttributes::default()
        }
    }
}

/// Resources staged for one group, compressed in batches
struct GroupBuilder {
    group: ResourceGroup,
    pending: Vec<(Option<u32>, PendingResource)>,
    pending_bytes: usize,
}

impl GroupBuilder {
    fn new() -> Self {
        Self {
            group: ResourceGroup::new(),
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    fn push<W: Write>(
        &mut self,
        writer: &mut ContainerWriter<W>,
        overlay: Option<u32>,
        resource: PendingResource,
    ) -> Result<()> {
        self.pending_bytes += resource.data.len();
        self.pending.push((overlay, resource));
        if self.pending_bytes >= BATCH_BYTES {
            self.flush(writer)?;
        }
        Ok(())
    }

    fn flush<W: Write>(&mut self, writer: &mut ContainerWriter<W>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let (targets, batch): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending).into_iter().unzip();
        self.pending_bytes = 0;

        for (target, entry) in targets.into_iter().zip(writer.add_resources(batch)?) {
            let group = match target {
                Some(version) => self.group.overlay_mut(version),
                None => &mut self.group,
            };
            if let Some(previous) = group.insert(entry) {
                warn!(name = previous.name(), "Duplicate resource name, keeping the later one");
            }
        }
        Ok(())
    }

    fn finish<W: Write>(mut self, writer: &mut ContainerWriter<W>) -> Result<ResourceGroup> {
        self.flush(writer)?;
        Ok(self.group)
    }
}

impl<W: Write> ContainerWriter<W> {
    /// Pack every file entry of a zip archive into a new group
    pub fn add_archive(&mut self, path: &Path, as_library: bool) -> Result<AddedGroup> {
        self.add_archive_named(path, as_library, None)
    }

    fn add_archive_named(
        &mut self,
        path: &Path,
        as_library: bool,
        explicit_name: Option<&str>,
    ) -> Result<AddedGroup> {
        let file = File::open(path).map_err(|e| ContainerError::io_at(path, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
            zip::result::ZipError::Io(io) => ContainerError::io_at(path, io),
            other => ContainerError::format(format!("{}: {}", path.display(), other)),
        })?;

        let manifest = read_manifest(&mut archive, path);
        let multi_release = manifest.is_multi_release();

        let mut descriptor_name = None;
        let mut builder = GroupBuilder::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let full_name = file.name().to_string();

            let mut data = Vec::with_capacity(file.size().min(BATCH_BYTES as u64) as usize);
            file.read_to_end(&mut data)?;

            if as_library && descriptor_name.is_none() && is_descriptor(&full_name, multi_release) {
                let name = read_module_name(&data).map_err(|e| {
                    ContainerError::format(format!("{}!{}: {}", path.display(), full_name, e))
                })?;
                descriptor_name = Some(name);
            }

            let (overlay, name) = match overlay_target(&full_name).filter(|_| multi_release) {
                Some((version, rest)) => (Some(version), rest.to_string()),
                None => (None, full_name),
            };

            let times = FileTimes::new(None, zip_modified_millis(file.last_modified()), None)?;
            builder.push(self, overlay, PendingResource::new(name, data, times))?;
        }

        let group = builder.finish(self)?;

        let identity = match explicit_name {
            Some(name) => Some(name.to_string()),
            None if as_library => Some(match descriptor_name {
                Some(name) => name,
                None => match manifest.automatic_module_name() {
                    Some(name) => name.to_string(),
                    None => derive_module_name(&file_name_of(path)?)?,
                },
            }),
            None => None,
        };

        info!(
            path = %path.display(),
            entries = group.len(),
            overlays = group.overlays().count(),
            multi_release,
            identity = identity.as_deref().unwrap_or(""),
            "Packed archive"
        );
        Ok(self.add_group(identity, group))
    }

    /// Pack a directory tree into a new group.
    ///
    /// A library directory without a `module-info.class` at its root is a
    /// collection of archives instead, and yields one group per archive.
    pub fn add_directory_tree(&mut self, path: &Path, as_library: bool) -> Result<Vec<AddedGroup>> {
        self.add_directory_tree_named(path, as_library, None)
    }

    fn add_directory_tree_named(
        &mut self,
        path: &Path,
        as_library: bool,
        explicit_name: Option<&str>,
    ) -> Result<Vec<AddedGroup>> {
        let descriptor = path.join(DESCRIPTOR_NAME);
        let identity = if as_library {
            if !descriptor.is_file() {
                if explicit_name.is_some() {
                    return Err(ContainerError::config(format!(
                        "{}: name cannot be set for a multi-file scan",
                        path.display()
                    )));
                }
                return self.add_archives_in(path, as_library);
            }
            match explicit_name {
                Some(name) => Some(name.to_string()),
                None => {
                    let bytes = std::fs::read(&descriptor)
                        .map_err(|e| ContainerError::io_at(&descriptor, e))?;
                    Some(read_module_name(&bytes).map_err(|e| {
                        ContainerError::format(format!("{}: {}", descriptor.display(), e))
                    })?)
                }
            }
        } else {
            explicit_name.map(str::to_string)
        };

        let mut builder = GroupBuilder::new();
        // Links are followed so a linked file is packed with its target's bytes
        for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                if !entry.file_type().is_dir() {
                    warn!(path = %entry.path().display(), "Skipping special file");
                }
                continue;
            }

            let name = relative_name(path, entry.path())?;
            let metadata = entry.metadata()?;
            let times = FileTimes::from_system_times(
                metadata.created().ok(),
                metadata.modified().ok(),
                metadata.accessed().ok(),
            )?;
            let data = std::fs::read(entry.path())
                .map_err(|e| ContainerError::io_at(entry.path(), e))?;
            debug!(name, size = data.len(), "Staged file");
            builder.push(self, None, PendingResource::new(name, data, times))?;
        }

        let group = builder.finish(self)?;
        info!(
            path = %path.display(),
            entries = group.len(),
            identity = identity.as_deref().unwrap_or(""),
            "Packed directory"
        );
        Ok(vec![self.add_group(identity, group)])
    }

    /// Pack each top-level archive of a directory, in file name order
    fn add_archives_in(&mut self, dir: &Path, as_library: bool) -> Result<Vec<AddedGroup>> {
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| ContainerError::io_at(dir, e))? {
            let entry = entry.map_err(|e| ContainerError::io_at(dir, e))?;
            let path = entry.path();
            if is_archive_path(&path) && path.is_file() {
                archives.push(path);
            }
        }
        archives.sort();

        debug!(dir = %dir.display(), count = archives.len(), "Scanning archives");
        archives
            .iter()
            .map(|archive| self.add_archive(archive, as_library))
            .collect()
    }

    /// Pack one input specification, returning the groups it produced
    pub fn add_input(&mut self, spec: &str, as_library: bool) -> Result<Vec<AddedGroup>> {
        let input = InputSpec::parse(spec)?;
        let metadata =
            std::fs::metadata(&input.path).map_err(|e| ContainerError::io_at(&input.path, e))?;

        if input.scan {
            if !metadata.is_dir() {
                return Err(ContainerError::config(format!(
                    "{} is not a directory",
                    input.path.display()
                )));
            }
            return self.add_archives_in(&input.path, as_library);
        }

        if metadata.is_dir() {
            return self.add_directory_tree_named(&input.path, as_library, input.name.as_deref());
        }

        if is_archive_path(&input.path) {
            return Ok(vec![self.add_archive_named(
                &input.path,
                as_library,
                input.name.as_deref(),
            )?]);
        }

        Err(ContainerError::config(format!(
            "Unsupported input: {}",
            input.path.display()
        )))
    }
}

fn relative_name(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| {
        ContainerError::config(format!("{} is outside {}", file.display(), root.display()))
    })?;

    relative
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| {
                ContainerError::config(format!("Non UTF-8 file name: {}", file.display()))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ContainerError::config(format!("Invalid file name: {}", path.display())))
}
