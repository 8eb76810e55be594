use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shotpack::package::find_package_metadata;
use shotpack::{
    LocalFileCopy, Overrides, PackageMode, PackageOrchestrator, PackageSettings, Stage,
};

#[derive(Parser)]
#[command(name = "shotpack")]
#[command(about = "Package a scene file and its dependencies into a relocatable directory", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a scene and its file dependencies
    Run {
        /// Scene file to package
        #[arg(short, long)]
        scene: PathBuf,

        /// Settings file (TOML). Defaults to ./shotpack.toml when present
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Target package root, overriding the settings file
        #[arg(short = 'r', long)]
        package_root: Option<String>,

        /// Overwrite an existing package at the target root
        #[arg(short, long)]
        overwrite: bool,

        /// Report manifests without touching the filesystem
        #[arg(long)]
        dryrun: bool,

        /// Write scene and manifests but skip the file copy
        #[arg(long)]
        nocopy: bool,

        /// Extra files to copy into the package alongside dependencies
        #[arg(long, num_args = 1..)]
        extra_files: Vec<String>,
    },
    /// List existing packages under a directory
    Inspect {
        /// Directory to search for package metadata
        #[arg(long)]
        dir: PathBuf,

        /// Metadata file name to look for
        #[arg(long, default_value = "package_metadata.json")]
        metadata_name: String,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shotpack={}", default)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            scene,
            settings,
            package_root,
            overwrite,
            dryrun,
            nocopy,
            extra_files,
        } => {
            let mode = if dryrun {
                PackageMode::DryRun
            } else if nocopy {
                PackageMode::NoCopy
            } else {
                PackageMode::Full
            };

            let settings = PackageSettings::load(
                &scene,
                settings.as_deref(),
                Overrides {
                    package_root,
                    overwrite,
                    mode,
                    extra_files,
                },
            )?;

            let orchestrator = PackageOrchestrator::new(settings, LocalFileCopy::new(overwrite));
            let report = orchestrator.run()?;

            if report.stage == Stage::WritingManifests {
                println!(
                    "Dry run: {} dependencies resolved for {}",
                    report.dependency_count, report.packaged_scene
                );
            } else {
                println!("Packaged scene: {}", report.packaged_scene);
                println!("Dependencies:   {}", report.dependency_count);
                if let Some(copy) = &report.copy_report {
                    println!(
                        "Copied files:   {} ({} skipped)",
                        copy.copied, copy.skipped
                    );
                }
            }
            Ok(())
        }
        Commands::Inspect { dir, metadata_name } => {
            let found = find_package_metadata(&dir, &metadata_name);
            println!("Found {} package(s) under {}", found.len(), dir.display());
            for path in found {
                let data: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                let root = data
                    .pointer("/package_settings/package_root")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<unknown>");
                let user = data.pointer("/user").and_then(|v| v.as_str()).unwrap_or("");
                let date = data.pointer("/date").and_then(|v| v.as_str()).unwrap_or("");
                println!("  {}  user={}  date={}", root, user, date);
            }
            Ok(())
        }
    }
}
