use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::copy::{CopyReport, FileCopy};
use crate::error::{Error, Result, StaleReason};
use crate::extract::{DependencyExtractor, SceneData};
use crate::manifest::{write_json, PackageManifest, PackageMetadata};
use crate::parser::parse_scene;
use crate::resolve::clean_path;
use crate::rewrite::{patch_root, rewrite_scene};
use crate::settings::{PackageMode, PackageSettings};

/// Pipeline stage, reported for logging and in the final run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Validating,
    Extracting,
    BackingUp,
    WritingManifests,
    RewritingScene,
    Copying,
    Done,
}

#[derive(Debug)]
pub struct RunReport {
    pub stage: Stage,
    pub dependency_count: usize,
    pub packaged_scene: String,
    pub manifest: PackageManifest,
    pub copy_report: Option<CopyReport>,
}

/// Drives one packaging run: validate, extract, back up, write
/// manifests, rewrite the scene, and hand the manifest to the copier.
///
/// The pipeline is synchronous; the only detached work is deletion of a
/// superseded package during overwrite, which the run does not wait on.
pub struct PackageOrchestrator<C: FileCopy> {
    settings: PackageSettings,
    copier: C,
}

impl<C: FileCopy> PackageOrchestrator<C> {
    pub fn new(settings: PackageSettings, copier: C) -> Self {
        Self { settings, copier }
    }

    pub fn settings(&self) -> &PackageSettings {
        &self.settings
    }

    pub fn run(&self) -> Result<RunReport> {
        let settings = &self.settings;
        let dry_run = settings.mode == PackageMode::DryRun;

        info!(stage = ?Stage::Validating, scene = %settings.source_scene, "packaging scene");
        self.validate()?;

        info!(stage = ?Stage::Extracting, "extracting dependencies");
        let scene_text = std::fs::read_to_string(&settings.source_scene)?;
        let nodes = parse_scene(&scene_text)?;
        let data = DependencyExtractor::new(settings)?.extract(&nodes)?;
        info!(dependencies = data.dependencies.len(), "extraction complete");

        let metadata = PackageMetadata::new(settings);
        let manifest = PackageManifest::build(&data, settings);

        if dry_run {
            info!(stage = ?Stage::WritingManifests, "dry run, reporting manifests only");
            info!(
                "package metadata:\n{}",
                serde_json::to_string_pretty(&metadata)?
            );
            info!(
                "copy manifest:\n{}",
                serde_json::to_string_pretty(&manifest)?
            );
            return Ok(RunReport {
                stage: Stage::WritingManifests,
                dependency_count: data.dependencies.len(),
                packaged_scene: settings.packaged_scene.clone(),
                manifest,
                copy_report: None,
            });
        }

        info!(stage = ?Stage::BackingUp, backup = %settings.scene_backup, "backing up source scene");
        copy_file(&settings.source_scene, &settings.scene_backup)?;

        info!(stage = ?Stage::WritingManifests, "writing package metadata and copy manifest");
        write_json(&settings.metadata_path, &metadata)?;
        write_json(&settings.manifest_path, &manifest)?;

        info!(stage = ?Stage::RewritingScene, scene = %settings.packaged_scene, "writing packaged scene");
        self.write_packaged_scene(&scene_text, &data)?;

        let copy_report = if settings.mode == PackageMode::Full {
            info!(stage = ?Stage::Copying, entries = manifest.len(), "copying dependencies");
            Some(self.copier.copy(&manifest)?)
        } else {
            info!("no-copy mode, skipping file copy");
            None
        };

        info!(stage = ?Stage::Done, "package complete");
        Ok(RunReport {
            stage: Stage::Done,
            dependency_count: data.dependencies.len(),
            packaged_scene: settings.packaged_scene.clone(),
            manifest,
            copy_report,
        })
    }

    fn validate(&self) -> Result<()> {
        let settings = &self.settings;

        if !Path::new(&settings.source_scene).is_file() {
            return Err(Error::SceneNotFound {
                path: PathBuf::from(&settings.source_scene),
            });
        }

        let root = Path::new(&settings.package_root);
        if !dir_is_occupied(root) {
            return Ok(());
        }
        if !settings.overwrite {
            return Err(Error::PackageExists {
                root: settings.package_root.clone(),
            });
        }
        if settings.mode == PackageMode::DryRun {
            debug!("dry run, leaving existing package in place");
            return Ok(());
        }

        self.verify_existing_package()?;
        self.remove_existing_package()
    }

    /// Confirm the occupied target directory is a prior package of the
    /// same root before anything is deleted: exactly one metadata file
    /// whose recorded root matches. Anything else is fatal and the
    /// directory is left untouched.
    fn verify_existing_package(&self) -> Result<()> {
        let settings = &self.settings;
        let found = find_package_metadata(
            Path::new(&settings.package_root),
            &settings.metadata_filename,
        );

        match found.len() {
            0 => Err(Error::StalePackageVerification {
                root: settings.package_root.clone(),
                reason: StaleReason::NoMetadata,
            }),
            1 => {
                let data: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&found[0])?)?;
                let recorded = data
                    .pointer("/package_settings/package_root")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if clean_path(&recorded) != settings.package_root {
                    return Err(Error::StalePackageVerification {
                        root: settings.package_root.clone(),
                        reason: StaleReason::RootMismatch { recorded },
                    });
                }
                Ok(())
            }
            _ => Err(Error::StalePackageVerification {
                root: settings.package_root.clone(),
                reason: StaleReason::MultipleMetadata(found),
            }),
        }
    }

    /// Rename the verified prior package to a timestamped location and
    /// delete it from there on a detached thread, so a slow recursive
    /// delete does not block the run.
    fn remove_existing_package(&self) -> Result<()> {
        let settings = &self.settings;
        let root = Path::new(&settings.package_root);

        let base = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S");
        let tmp_parent = settings
            .package_tmp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&tmp_parent)?;
        let tmp_root = tmp_parent.join(format!("{}_{}", base, stamp));
        if tmp_root.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("removal staging dir already exists: {}", tmp_root.display()),
            )));
        }

        info!(from = %settings.package_root, to = %tmp_root.display(), "staging prior package for removal");
        std::fs::rename(root, &tmp_root)?;

        std::thread::spawn(move || {
            if let Err(err) = std::fs::remove_dir_all(&tmp_root) {
                warn!(dir = %tmp_root.display(), %err, "detached package removal failed");
            }
        });
        Ok(())
    }

    fn write_packaged_scene(&self, scene_text: &str, data: &SceneData) -> Result<()> {
        let settings = &self.settings;
        let patched = patch_root(
            &data.root.raw_text,
            &settings.project_directory,
            data.start,
            data.end,
        );
        let out = rewrite_scene(
            scene_text,
            &data.root.raw_text,
            &patched,
            &data.dependencies,
            settings.relative_paths,
        )?;

        let path = Path::new(&settings.packaged_scene);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

fn dir_is_occupied(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

fn copy_file(src: &str, dst: &str) -> Result<()> {
    let dst = Path::new(dst);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

/// All package metadata files under a directory root.
pub fn find_package_metadata(root: &Path, metadata_filename: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == std::ffi::OsStr::new(metadata_filename))
        .map(|e| e.into_path())
        .collect()
}
