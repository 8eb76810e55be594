use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::extract::SceneData;
use crate::resolve::frame_glob_path;
use crate::settings::PackageSettings;

/// One copy instruction: destination glob plus an explicit frame list
/// when the run limits copying to frames the scene actually uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyEntry {
    pub dst: String,
    #[serde(default)]
    pub frames: Vec<i64>,
}

/// Source glob -> copy instruction, handed to the file-copy executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageManifest {
    pub entries: IndexMap<String, CopyEntry>,
}

impl PackageManifest {
    /// Build the manifest from extracted scene data plus any configured
    /// extra files not tied to a node.
    pub fn build(data: &SceneData, settings: &PackageSettings) -> Self {
        let mut entries = IndexMap::new();

        for (src, dep) in &data.dependencies {
            let src_glob = frame_glob_path(src);
            let dst_glob = frame_glob_path(&dep.destination);

            let frames = if settings.frame_limit {
                match (dep.start, dep.end) {
                    (Some(start), Some(end)) if start <= end => (start..=end).collect(),
                    _ => Vec::new(),
                }
            } else {
                Vec::new()
            };

            entries.insert(src_glob, CopyEntry { dst: dst_glob, frames });
        }

        for (src, dst) in &settings.extra_files {
            let src_glob = frame_glob_path(src);
            if entries.contains_key(&src_glob) {
                info!(src = %src_glob, "extra file already claimed by a dependency, skipping");
                continue;
            }
            entries.insert(
                src_glob,
                CopyEntry {
                    dst: frame_glob_path(dst),
                    frames: Vec::new(),
                },
            );
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Package metadata document written alongside the manifest, used later
/// to recognize the directory as a package during overwrite checks.
#[derive(Debug, Clone, Serialize)]
pub struct PackageMetadata<'a> {
    pub date: String,
    pub package_settings: &'a PackageSettings,
    pub source_scene: &'a str,
    pub user: &'a str,
}

impl<'a> PackageMetadata<'a> {
    pub fn new(settings: &'a PackageSettings) -> Self {
        Self {
            date: chrono::Local::now().format("%Y-%m-%d_%H%M%S").to_string(),
            package_settings: settings,
            source_scene: &settings.source_scene,
            user: &settings.user,
        }
    }
}

/// Pretty-printed JSON written with parent directories created.
pub fn write_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
