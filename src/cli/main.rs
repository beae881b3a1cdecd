use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

use xmp_gate::config::Config;
use xmp_gate::{EngineLifecycle, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "xmp-gate",
    version,
    about = "Read and write embedded XMP metadata packets in JPEG, PNG, MP4/QuickTime, WAV, AVI and WebP files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the XMP packet of each file
    Read {
        /// Media files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Store an XMP packet in each file
    Write {
        /// File holding the packet text, or `-` for stdin
        #[arg(long, value_name = "FILE")]
        packet: PathBuf,

        /// Preview changes without writing to files
        #[arg(long)]
        dry_run: bool,

        /// Do not create `.bak` copies before modifying files
        #[arg(long)]
        no_backup: bool,

        /// Media files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Write a default config.json and exit
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if let Command::Init = cli.command {
        let path = Config::default().save(cli.config.as_deref())?;
        println!("Default config written to {}", path.display());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;

    let engine = EngineLifecycle::with_options(config.files.clone());
    engine
        .try_initialize()
        .context("Failed to initialize the metadata engine")?;

    let outcome = match cli.command {
        Command::Read { paths } => run_read(&engine, &paths, cli.json),
        Command::Write {
            packet,
            dry_run,
            no_backup,
            paths,
        } => {
            if dry_run {
                config.output.dry_run = true;
            }
            if no_backup {
                config.output.backup_originals = false;
            }
            run_write(&engine, &config, &packet, &paths, cli.json)
        }
        Command::Init => Ok(()),
    };

    engine.terminate();
    outcome
}

fn run_read(engine: &EngineLifecycle, paths: &[PathBuf], json: bool) -> Result<()> {
    let files = pipeline::collect_media(paths);
    if files.is_empty() {
        anyhow::bail!("No supported media files found in the specified paths.");
    }

    let session = engine.session()?;
    let results = pipeline::read_all(&session.accessor(), &files);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        match (&result.metadata, &result.error) {
            (Some(xmp), _) => println!("── {} ──\n{xmp}\n", result.path.display()),
            (None, Some(err)) => log::error!("{}: {err}", result.path.display()),
            (None, None) => log::info!("{}: no metadata", result.path.display()),
        }
    }

    let found = results.iter().filter(|r| r.metadata.is_some()).count();
    log::info!("Done: metadata found in {found} of {} files", results.len());
    Ok(())
}

fn run_write(
    engine: &EngineLifecycle,
    config: &Config,
    packet: &Path,
    paths: &[PathBuf],
    json: bool,
) -> Result<()> {
    let text = read_packet_text(packet)?;

    let files = pipeline::collect_media(paths);
    if files.is_empty() {
        anyhow::bail!("No supported media files found in the specified paths.");
    }

    log::info!("Found {} file(s) to update", files.len());
    if config.output.dry_run {
        log::info!("DRY RUN — no files will be modified");
    }

    let session = engine.session()?;
    let results = pipeline::write_all(&session.accessor(), &text, &files, &config.output);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            match &result.error {
                Some(err) => log::error!("{}: {err}", result.path.display()),
                None if result.written => log::info!("Wrote: {}", result.path.display()),
                None => {}
            }
            if let Some(ref backup) = result.backup_path {
                log::debug!("  Backup: {}", backup.display());
            }
        }
    }

    let success = results.iter().filter(|r| r.written).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    log::info!("Done: {success} written, {failed} failed out of {} files", results.len());
    Ok(())
}

fn read_packet_text(packet: &Path) -> Result<String> {
    if packet == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read packet from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(packet)
            .with_context(|| format!("Failed to read packet file {}", packet.display()))
    }
}
