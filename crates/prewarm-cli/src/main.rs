#![forbid(unsafe_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prewarm_compile_cache::{
    clean_stale_versions, list_cache_dir, CacheFileStatus, ENV_CACHE_DIR,
};
use prewarm_registry::VersionTag;
use prewarm_serdes::TaggedReader;
use prewarm_snapshot::{format_size, inspect_snapshot_against, BlobIdentity};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "prewarm",
    version,
    about = "Inspect startup snapshots, tagged streams and compile cache directories."
)]
struct Args {
    /// Log filter (tracing-subscriber EnvFilter syntax)
    #[arg(long, global = true, env = "PREWARM_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a tagged serializer stream in human-readable form
    Dump {
        /// File holding the raw stream
        file: PathBuf,
    },
    /// Summarize a snapshot blob without restoring it
    Inspect(InspectArgs),
    /// Compile cache maintenance
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// Snapshot blob path
    snapshot: PathBuf,

    /// Check compatibility against this host runtime version instead of this tool's build
    #[arg(long, value_name = "VERSION")]
    runtime_version: Option<String>,

    /// Engine cache tag of the host runtime (hex); used with --runtime-version
    #[arg(long, value_name = "HEX", default_value = "0", value_parser = parse_hex_u32)]
    engine_tag: u32,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// List cache files of the current version and check their headers
    Ls(CacheArgs),
    /// Remove cache directories left behind by other versions
    Clean(CacheArgs),
}

#[derive(clap::Args, Debug)]
struct CacheArgs {
    /// Compile cache base directory
    #[arg(long, value_name = "PATH", env = ENV_CACHE_DIR)]
    dir: PathBuf,

    /// Engine cache tag mixed into the version directory name (hex)
    #[arg(long, value_name = "HEX", default_value = "0", value_parser = parse_hex_u32)]
    engine_tag: u32,
}

fn parse_hex_u32(raw: &str) -> Result<u32, String> {
    let digits = raw.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value {raw:?}: {e}"))
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter {:?}", args.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut out = std::io::stdout().lock();
    let ok = match args.command {
        Command::Dump { file } => dump(&file, &mut out)?,
        Command::Inspect(inspect_args) => inspect(&inspect_args, &mut out)?,
        Command::Cache(CacheCommand::Ls(cache)) => cache_ls(&cache, &mut out)?,
        Command::Cache(CacheCommand::Clean(cache)) => cache_clean(&cache, &mut out)?,
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Returns `false` when the stream has structural errors.
fn dump(file: &Path, out: &mut dyn Write) -> anyhow::Result<bool> {
    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let report = TaggedReader::new(bytes).dump();
    write!(out, "{}", report.text)?;
    Ok(report.errors.is_empty())
}

fn inspect(args: &InspectArgs, out: &mut dyn Write) -> anyhow::Result<bool> {
    let path = &args.snapshot;
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let expected = match &args.runtime_version {
        Some(version) => BlobIdentity::for_runtime(version, args.engine_tag),
        None => BlobIdentity::current(),
    };
    let summary = inspect_snapshot_against(&bytes, &expected)
        .with_context(|| format!("inspect {}", path.display()))?;
    write!(out, "{summary}")?;
    Ok(true)
}

fn cache_ls(args: &CacheArgs, out: &mut dyn Write) -> anyhow::Result<bool> {
    let tag = VersionTag::current(args.engine_tag);
    let dir = args.dir.join(tag.dir_name());
    if !dir.is_dir() {
        bail!("no compile cache for {tag} at {}", dir.display());
    }
    let files = list_cache_dir(&dir).with_context(|| format!("list {}", dir.display()))?;

    writeln!(out, "{}", dir.display())?;
    let mut invalid = 0;
    for file in &files {
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let status = match &file.status {
            CacheFileStatus::Valid(header) => format!(
                "ok, source {}, cache {:08x}",
                format_size(header.code_size as usize),
                header.cache_hash
            ),
            CacheFileStatus::BadMagic(magic) => {
                invalid += 1;
                format!("bad magic {magic:08x}")
            }
            CacheFileStatus::Truncated => {
                invalid += 1;
                "truncated".to_string()
            }
            CacheFileStatus::Unreadable(kind) => {
                invalid += 1;
                format!("unreadable ({kind})")
            }
        };
        writeln!(out, "  {name}  {:>9}  {status}", format_size(file.size as usize))?;
    }
    writeln!(out, "{} files, {invalid} invalid", files.len())?;
    Ok(true)
}

fn cache_clean(args: &CacheArgs, out: &mut dyn Write) -> anyhow::Result<bool> {
    let tag = VersionTag::current(args.engine_tag);
    let removed = clean_stale_versions(&args.dir, &tag)
        .with_context(|| format!("clean {}", args.dir.display()))?;
    for path in &removed {
        writeln!(out, "removed {}", path.display())?;
    }
    writeln!(out, "kept {}", tag.dir_name())?;
    Ok(true)
}
