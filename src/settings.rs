use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::node::NodePolicy;
use crate::resolve::{clean_path, join_path, RenameRule};

/// How much of the pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageMode {
    /// Everything, including handing the manifest to the file copier.
    #[default]
    Full,
    /// Write scene, metadata, and manifest, but copy nothing.
    NoCopy,
    /// Read and report only; no filesystem mutation at all.
    DryRun,
}

fn default_scene_subdir() -> String {
    "nk".to_string()
}

fn default_info_subdir() -> String {
    "package_info".to_string()
}

fn default_project_directory() -> String {
    " project_directory \"[python nuke.script_directory()]\"\n".to_string()
}

fn default_metadata_filename() -> String {
    "package_metadata.json".to_string()
}

fn default_manifest_filename() -> String {
    "copy_files.json".to_string()
}

/// On-disk settings document (TOML), before run-specific resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub package_root: String,
    #[serde(default = "default_scene_subdir")]
    pub scene_subdir: String,
    #[serde(default = "default_info_subdir")]
    pub info_subdir: String,
    #[serde(default)]
    pub relative_paths: bool,
    #[serde(default)]
    pub frame_limit: bool,
    #[serde(default = "default_project_directory")]
    pub project_directory: String,
    #[serde(default = "default_metadata_filename")]
    pub metadata_filename: String,
    #[serde(default = "default_manifest_filename")]
    pub manifest_filename: String,
    #[serde(default)]
    pub package_tmp_dir: Option<String>,
    #[serde(default)]
    pub rename_rules: Vec<RenameRule>,
    #[serde(default)]
    pub extra_files: IndexMap<String, String>,
    #[serde(default)]
    pub node_policy: NodePolicy,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            package_root: String::new(),
            scene_subdir: default_scene_subdir(),
            info_subdir: default_info_subdir(),
            relative_paths: false,
            frame_limit: false,
            project_directory: default_project_directory(),
            metadata_filename: default_metadata_filename(),
            manifest_filename: default_manifest_filename(),
            package_tmp_dir: None,
            rename_rules: Vec::new(),
            extra_files: IndexMap::new(),
            node_policy: NodePolicy::default(),
        }
    }
}

/// Run-time overrides, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub package_root: Option<String>,
    pub overwrite: bool,
    pub mode: PackageMode,
    pub extra_files: Vec<String>,
}

/// Fully resolved, immutable settings for one packaging run.
///
/// Constructed once at the start of a run and shared read-only through
/// the pipeline; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct PackageSettings {
    pub package_root: String,
    pub source_scene: String,
    pub packaged_scene: String,
    pub scene_backup: String,
    pub metadata_path: String,
    pub metadata_filename: String,
    pub manifest_path: String,
    pub relative_paths: bool,
    pub frame_limit: bool,
    pub project_directory: String,
    pub package_tmp_dir: Option<String>,
    pub rename_rules: Vec<RenameRule>,
    pub extra_files: IndexMap<String, String>,
    pub node_policy: NodePolicy,
    pub mode: PackageMode,
    pub overwrite: bool,
    pub user: String,
}

impl PackageSettings {
    /// Load settings for a scene: optional TOML file plus `SHOTPACK_*`
    /// environment overrides, then run-specific overrides on top.
    pub fn load(scene: &Path, settings_file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("package_root", "")?
            .set_default("relative_paths", false)?
            .set_default("frame_limit", false)?;

        if let Some(path) = settings_file {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::with_name("shotpack").required(false));
        }
        // Env var overrides (e.g. SHOTPACK_PACKAGE_ROOT=/tmp/pkg)
        builder = builder.add_source(config::Environment::with_prefix("SHOTPACK").separator("__"));

        let file: SettingsFile = builder.build()?.try_deserialize()?;
        Self::resolve(scene, file, overrides)
    }

    /// Resolve a raw settings document against a scene and overrides.
    pub fn resolve(scene: &Path, file: SettingsFile, overrides: Overrides) -> Result<Self> {
        let source_scene = clean_path(&scene.to_string_lossy());
        let scene_name = scene
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Settings(format!("scene has no file name: {}", source_scene)))?;

        let package_root = overrides
            .package_root
            .map(|r| clean_path(&r))
            .unwrap_or_else(|| clean_path(&file.package_root));
        if package_root.is_empty() {
            return Err(Error::Settings(
                "no package root configured (set package_root in the settings file or pass \
                 --package-root)"
                    .to_string(),
            ));
        }

        let mut extra_files = file.extra_files;
        for src in overrides.extra_files {
            let src = clean_path(&src);
            let name = src.rsplit('/').next().unwrap_or(&src).to_string();
            let dst = join_path(&[&package_root, "extra_files", &name]);
            extra_files.insert(src, dst);
        }

        let scene_dir = join_path(&[&package_root, &file.scene_subdir]);
        let info_dir = join_path(&[&scene_dir, &file.info_subdir]);

        Ok(Self {
            packaged_scene: join_path(&[&scene_dir, &scene_name]),
            scene_backup: join_path(&[&info_dir, &scene_name]),
            metadata_path: join_path(&[&info_dir, &file.metadata_filename]),
            metadata_filename: file.metadata_filename,
            manifest_path: join_path(&[&info_dir, &file.manifest_filename]),
            package_root,
            source_scene,
            relative_paths: file.relative_paths,
            frame_limit: file.frame_limit,
            project_directory: file.project_directory,
            package_tmp_dir: file.package_tmp_dir.map(|p| clean_path(&p)),
            rename_rules: file.rename_rules,
            extra_files,
            node_policy: file.node_policy,
            mode: overrides.mode,
            overwrite: overrides.overwrite,
            user: whoami(),
        })
    }

    /// Minimal settings for unit tests: everything under one root.
    #[doc(hidden)]
    pub fn for_tests(package_root: &str) -> Self {
        let file = SettingsFile {
            package_root: package_root.to_string(),
            ..SettingsFile::default()
        };
        Self::resolve(Path::new("/src/scene.nk"), file, Overrides::default())
            .expect("test settings")
    }
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
