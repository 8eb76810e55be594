use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::resolve::{clean_path, join_path, relative_path, PathResolver};
use crate::settings::PackageSettings;

/// A unique source file referenced by one or more nodes, with its
/// computed destination inside the package.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub destination: String,
    pub relative: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    /// Names of the nodes contributing this reference.
    pub nodes: Vec<String>,
}

impl Dependency {
    fn merge_range(&mut self, start: Option<i64>, end: Option<i64>) {
        if let Some(start) = start {
            self.start = Some(self.start.map_or(start, |s| s.min(start)));
        }
        if let Some(end) = end {
            self.end = Some(self.end.map_or(end, |e| e.max(end)));
        }
    }
}

/// Everything the rewrite and manifest stages need from one scene.
#[derive(Debug, Clone)]
pub struct SceneData {
    /// Source path -> dependency, in first-encounter order.
    pub dependencies: IndexMap<String, Dependency>,
    pub root: Node,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Walks parsed nodes and builds the deduplicated dependency map plus
/// the scene frame range.
pub struct DependencyExtractor<'a> {
    settings: &'a PackageSettings,
    resolver: PathResolver,
}

impl<'a> DependencyExtractor<'a> {
    pub fn new(settings: &'a PackageSettings) -> Result<Self> {
        Ok(Self {
            resolver: PathResolver::new(&settings.rename_rules)?,
            settings,
        })
    }

    pub fn extract(&self, nodes: &[Node]) -> Result<SceneData> {
        let settings = self.settings;
        let policy = &settings.node_policy;

        let mut dependencies: IndexMap<String, Dependency> = IndexMap::new();
        let mut scene_start: Option<i64> = None;
        let mut scene_end: Option<i64> = None;
        let mut root: Option<Node> = None;

        for node in nodes {
            if node.is_root() && root.is_none() {
                root = Some(node.clone());
            }
            if node.is_excluded(policy) {
                debug!(class = %node.class_name, name = %node.name(), "skipping excluded node");
                continue;
            }

            let files = node.files(policy);
            if files.is_empty() {
                continue;
            }

            // Scene-level range tracks contributing nodes only
            let (start, end) = node.frame_range();
            if let Some(start) = start {
                scene_start = Some(scene_start.map_or(start, |s| s.min(start)));
            }
            if let Some(end) = end {
                scene_end = Some(scene_end.map_or(end, |e| e.max(end)));
            }

            for file in files {
                let file = clean_path(&file);

                if let Some(dep) = dependencies.get_mut(&file) {
                    // Destination is write-once per source path; only
                    // the frame range and contributors grow
                    dep.merge_range(start, end);
                    dep.nodes.push(node.name().to_string());
                    continue;
                }

                let parent = join_path(&[
                    &settings.package_root,
                    policy.node_subdir(&node.class_name),
                ]);
                let destination = self.resolver.resolve(&file, &parent)?;

                let relative = if settings.relative_paths {
                    Some(relative_path(
                        &settings.packaged_scene,
                        &destination,
                        &settings.package_root,
                    )?)
                } else {
                    None
                };

                debug!(src = %file, dst = %destination, "resolved dependency");
                dependencies.insert(
                    file,
                    Dependency {
                        destination,
                        relative,
                        start,
                        end,
                        nodes: vec![node.name().to_string()],
                    },
                );
            }
        }

        let root = root.ok_or(Error::MissingRoot)?;

        // Root first_frame/last_frame win over the node-derived range
        let root_start = root.knob("first_frame").and_then(|v| v.parse::<i64>().ok());
        let root_end = root.knob("last_frame").and_then(|v| v.parse::<i64>().ok());
        let start = root_start.or(scene_start);
        let end = root_end.or(scene_end);
        if start.is_none() || end.is_none() {
            warn!("scene frame range could not be determined from Root or node knobs");
        }

        Ok(SceneData {
            dependencies,
            root,
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_scene;
    use crate::settings::PackageSettings;

    fn settings() -> PackageSettings {
        PackageSettings::for_tests("/pkg")
    }

    fn extract(scene: &str, settings: &PackageSettings) -> Result<SceneData> {
        let nodes = parse_scene(scene).unwrap();
        DependencyExtractor::new(settings).unwrap().extract(&nodes)
    }

    #[test]
    fn test_missing_root_is_error() {
        let scene = "Read {\n file \"/shots/v001/a.exr\"\n}\n";
        let result = extract(scene, &settings());
        assert!(matches!(result, Err(Error::MissingRoot)));
    }

    #[test]
    fn test_frame_range_merging_across_nodes() {
        let scene = concat!(
            "Read {\n name Read1\n file \"/shots/v001/p.%04d.exr\"\n first 1001\n last 1003\n}\n",
            "Read {\n name Read2\n file \"/shots/v001/p.%04d.exr\"\n first 1002\n last 1010\n}\n",
            "Root {\n}\n",
        );
        let data = extract(scene, &settings()).unwrap();
        assert_eq!(data.dependencies.len(), 1);
        let dep = &data.dependencies["/shots/v001/p.%04d.exr"];
        assert_eq!(dep.start, Some(1001));
        assert_eq!(dep.end, Some(1010));
        assert_eq!(dep.nodes, vec!["Read1", "Read2"]);
        // Scene range falls back to node-derived min/max
        assert_eq!(data.start, Some(1001));
        assert_eq!(data.end, Some(1010));
    }

    #[test]
    fn test_destination_resolved_once_per_source() {
        let scene = concat!(
            "Read {\n name Read1\n file \"/shots/v001/p.%04d.exr\"\n}\n",
            "Read {\n name Read2\n file \"/shots/v001/p.%04d.exr\"\n}\n",
            "Root {\n first_frame 1\n last_frame 10\n}\n",
        );
        let data = extract(scene, &settings()).unwrap();
        let dep = &data.dependencies["/shots/v001/p.%04d.exr"];
        assert_eq!(dep.destination, "/pkg/images/inputs/v001/p.%04d.exr");
        assert_eq!(dep.nodes.len(), 2);
    }

    #[test]
    fn test_root_frame_range_takes_precedence() {
        let scene = concat!(
            "Read {\n name Read1\n file \"/shots/v001/p.%04d.exr\"\n first 1001\n last 1100\n}\n",
            "Root {\n first_frame 1005\n last_frame 1050\n}\n",
        );
        let data = extract(scene, &settings()).unwrap();
        assert_eq!(data.start, Some(1005));
        assert_eq!(data.end, Some(1050));
        // The per-dependency range still reflects the node knobs
        let dep = &data.dependencies["/shots/v001/p.%04d.exr"];
        assert_eq!(dep.start, Some(1001));
        assert_eq!(dep.end, Some(1100));
    }

    #[test]
    fn test_excluded_nodes_contribute_nothing() {
        let scene = concat!(
            "Write {\n name Write1\n file \"/renders/v002/out.%04d.exr\"\n}\n",
            "Read {\n name Read1\n file \"/shots/v001/p.%04d.exr\"\n}\n",
            "Root {\n first_frame 1\n last_frame 10\n}\n",
        );
        let data = extract(scene, &settings()).unwrap();
        assert_eq!(data.dependencies.len(), 1);
        assert!(data.dependencies.contains_key("/shots/v001/p.%04d.exr"));
    }

    #[test]
    fn test_relative_paths_populated_when_enabled() {
        let mut s = settings();
        s.relative_paths = true;
        let scene = concat!(
            "Read {\n name Read1\n file \"/shots/v001/p.%04d.exr\"\n}\n",
            "Root {\n first_frame 1\n last_frame 10\n}\n",
        );
        let data = extract(scene, &s).unwrap();
        let dep = &data.dependencies["/shots/v001/p.%04d.exr"];
        assert_eq!(
            dep.relative.as_deref(),
            Some("../images/inputs/v001/p.%04d.exr")
        );
    }
}
