// SPDX-License-Identifier: MIT
//! `respack` command line tool: pack, inspect and verify containers

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use respack::{
    checksum::checksum_hex, Config, ContainerReader, ContainerWriter, DefaultMethod,
    ResolvedGroup, ResourceEntry, ResourceGroup,
};

#[derive(Parser)]
#[command(name = "respack", version, about = "Pack and read resource containers")]
struct Cli {
    /// TOML configuration file (defaults come from RESPACK_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack inputs into a new container
    Pack {
        #[arg(short, long)]
        output: PathBuf,

        /// Class path input, PATH[;name=NAME] or DIR/*
        #[arg(long = "classpath", value_name = "SPEC")]
        classpath: Vec<String>,

        /// Library input with a package identity, PATH[;name=NAME]
        #[arg(long = "module-path", value_name = "SPEC")]
        module_path: Vec<String>,

        /// Use LZ4 instead of deflate as the default method
        #[arg(long)]
        fast: bool,
    },

    /// List groups, or the entries of resolved groups
    List {
        file: PathBuf,

        #[arg(long)]
        groups: Option<String>,

        #[arg(long)]
        runtime_version: Option<u32>,
    },

    /// Write one resource to stdout
    Cat {
        file: PathBuf,

        #[arg(long)]
        groups: String,

        name: String,

        #[arg(long)]
        runtime_version: Option<u32>,
    },

    /// Extract the resources of resolved groups into a directory
    Extract {
        file: PathBuf,

        #[arg(long)]
        groups: String,

        #[arg(long)]
        dest: PathBuf,

        #[arg(long)]
        runtime_version: Option<u32>,
    },

    /// Decompress and check every entry
    Verify { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    config.validate()?;

    match cli.command {
        Command::Pack {
            output,
            classpath,
            module_path,
            fast,
        } => {
            if fast {
                config.packer.compression.default_method = DefaultMethod::Lz4;
            }
            pack(&config, &output, &classpath, &module_path)
        }
        Command::List {
            file,
            groups,
            runtime_version,
        } => {
            apply_runtime_version(&mut config, runtime_version);
            let reader = ContainerReader::open_path(&file, config.reader)?;
            match groups {
                Some(list) => list_entries(&reader, &list),
                None => list_groups(&reader),
            }
        }
        Command::Cat {
            file,
            groups,
            name,
            runtime_version,
        } => {
            apply_runtime_version(&mut config, runtime_version);
            let reader = ContainerReader::open_path(&file, config.reader)?;
            let bytes = match reader.resolve_groups(&groups)? {
                ResolvedGroup::Packed(group) => reader.read_named(&group, &name)?,
                ResolvedGroup::External(path) => reader.read_external(&path, &name)?,
            };
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
            Ok(())
        }
        Command::Extract {
            file,
            groups,
            dest,
            runtime_version,
        } => {
            apply_runtime_version(&mut config, runtime_version);
            let reader = ContainerReader::open_path(&file, config.reader)?;
            extract(&reader, &groups, &dest)
        }
        Command::Verify { file } => {
            let reader = ContainerReader::open_path(&file, config.reader)?;
            let count = reader.verify()?;
            let stats = reader.stats();
            println!(
                "OK: {} entries in {} groups, {} -> {} bytes ({:.1}%)",
                count,
                stats.group_count,
                stats.uncompressed_size,
                stats.compressed_size,
                stats.compression_ratio() * 100.0
            );
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn apply_runtime_version(config: &mut Config, runtime_version: Option<u32>) {
    if let Some(version) = runtime_version {
        config.reader.runtime_version = version;
    }
}

fn pack(
    config: &Config,
    output: &Path,
    classpath: &[String],
    module_path: &[String],
) -> anyhow::Result<()> {
    if classpath.is_empty() && module_path.is_empty() {
        bail!("nothing to pack: pass --classpath or --module-path");
    }

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = ContainerWriter::new(BufWriter::new(file), config.packer.clone())?;

    let inputs = classpath
        .iter()
        .map(|spec| (spec, false))
        .chain(module_path.iter().map(|spec| (spec, true)));
    for (spec, as_library) in inputs {
        let added = writer
            .add_input(spec, as_library)
            .with_context(|| format!("packing {}", spec))?;
        for group in added {
            println!(
                "{:x}\t{}\t{}",
                group.index,
                group.identity.as_deref().unwrap_or("-"),
                spec
            );
        }
    }

    let fallbacks = writer.engine().fallback_count();
    let (_, trailer) = writer.seal()?;
    info!(
        output = %output.display(),
        data_bytes = trailer.metadata_offset,
        metadata_bytes = trailer.metadata_length,
        class_fallbacks = fallbacks,
        "Container sealed"
    );
    Ok(())
}

fn list_groups(reader: &ContainerReader) -> anyhow::Result<()> {
    for index in 0..reader.group_count() {
        let Some(group) = reader.group(index) else {
            continue;
        };
        let overlays: Vec<String> = group.overlays().map(|(t, _)| t.to_string()).collect();
        println!(
            "{:x}\t{}\t{} entries\toverlays: [{}]",
            index,
            reader.group_identity(index).unwrap_or("-"),
            group.len(),
            overlays.join(", ")
        );
    }
    Ok(())
}

/// Names visible at `runtime_version`, base names first
fn effective_entries<'g>(
    reader: &ContainerReader,
    group: &'g ResourceGroup,
) -> Vec<&'g ResourceEntry> {
    let runtime_version = reader.config().runtime_version;
    let mut seen = HashSet::new();
    let overlay_names = group
        .overlays()
        .filter(|(threshold, _)| *threshold <= runtime_version)
        .flat_map(|(_, overlay)| overlay.names());

    group
        .names()
        .chain(overlay_names)
        .filter(|name| seen.insert(*name))
        .filter_map(|name| reader.lookup(group, name))
        .collect()
}

fn list_entries(reader: &ContainerReader, list: &str) -> anyhow::Result<()> {
    let group = match reader.resolve_groups(list)? {
        ResolvedGroup::Packed(group) => group,
        ResolvedGroup::External(path) => {
            println!("external: {}", path.display());
            return Ok(());
        }
    };

    for entry in effective_entries(reader, &group) {
        let modified = entry
            .times()
            .modified()
            .and_then(DateTime::from_timestamp_millis)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10} {:>10} {:<9} {} {} {}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            entry.compression_method().name(),
            entry.checksum().map(checksum_hex).unwrap_or_else(|| "-".repeat(16)),
            modified,
            entry.name()
        );
    }
    Ok(())
}

fn extract(reader: &ContainerReader, list: &str, dest: &Path) -> anyhow::Result<()> {
    let group = match reader.resolve_groups(list)? {
        ResolvedGroup::Packed(group) => group,
        ResolvedGroup::External(path) => {
            bail!("{} refers to {}, not to packed groups", list, path.display())
        }
    };

    let mut count = 0;
    for entry in effective_entries(reader, &group) {
        let relative = Path::new(entry.name());
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("refusing to extract {:?}", entry.name());
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, reader.read(entry)?)
            .with_context(|| format!("writing {}", target.display()))?;
        count += 1;
    }

    info!(entries = count, dest = %dest.display(), "Extracted");
    Ok(())
}
