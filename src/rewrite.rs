use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::extract::Dependency;

/// Patch a Root block so the packaged scene carries the project
/// directory and frame range.
///
/// An empty `project_directory` line is dropped so the configured value
/// can be injected fresh. Missing fields are inserted immediately after
/// the opening `Root {` line. No other knob is touched.
pub fn patch_root(
    root_text: &str,
    project_directory: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> String {
    let mut text = drop_empty_project_directory(root_text);

    if !text.contains("project_directory") {
        text = insert_after_open(&text, project_directory);
    }
    if let Some(start) = start {
        if !text.contains("first_frame") {
            text = insert_after_open(&text, &format!(" first_frame {}\n", start));
        }
    }
    if let Some(end) = end {
        if !text.contains("last_frame") {
            text = insert_after_open(&text, &format!(" last_frame {}\n", end));
        }
    }

    text
}

fn drop_empty_project_directory(root_text: &str) -> String {
    let mut out = String::with_capacity(root_text.len());
    for line in root_text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("project_directory") {
            let value = value.trim();
            if value.is_empty() || value == "\"\"" || value == "''" {
                continue;
            }
        }
        out.push_str(line);
    }
    out
}

fn insert_after_open(root_text: &str, insert: &str) -> String {
    match root_text.find("Root {\n") {
        Some(idx) => {
            let split = idx + "Root {\n".len();
            format!("{}{}{}", &root_text[..split], insert, &root_text[split..])
        }
        None => root_text.to_string(),
    }
}

/// Produce the final scene text: the patched Root block plus every
/// dependency reference substituted with its destination.
///
/// Substitutions are literal (no pattern semantics) and applied longest
/// source path first, so a path that is a prefix of another cannot
/// corrupt the longer occurrence.
pub fn rewrite_scene(
    scene_text: &str,
    original_root: &str,
    patched_root: &str,
    dependencies: &IndexMap<String, Dependency>,
    relative_paths: bool,
) -> Result<String> {
    let mut text = if scene_text.contains(original_root) {
        scene_text.replacen(original_root, patched_root, 1)
    } else {
        // The root block was edited out from under us; append the
        // patched block rather than losing the frame range
        warn!("original Root block not found verbatim, appending patched Root");
        let mut text = scene_text.to_string();
        text.push_str(patched_root);
        text
    };

    let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(dependencies.len());
    for (src, dep) in dependencies {
        let dst = if relative_paths {
            dep.relative
                .as_deref()
                .ok_or_else(|| Error::MissingRelativePath { path: src.clone() })?
        } else {
            dep.destination.as_str()
        };
        pairs.push((src.as_str(), dst));
    }
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    for (src, dst) in pairs {
        debug!(%src, %dst, "substituting dependency path");
        text = text.replace(src, dst);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(destination: &str, relative: Option<&str>) -> Dependency {
        Dependency {
            destination: destination.to_string(),
            relative: relative.map(String::from),
            start: None,
            end: None,
            nodes: vec![],
        }
    }

    const PDIR: &str = " project_directory \"[python nuke.script_directory()]\"\n";

    #[test]
    fn test_patch_root_inserts_missing_fields() {
        let root = "Root {\n name scene.nk\n}\n";
        let patched = patch_root(root, PDIR, Some(1001), Some(1100));
        assert!(patched.contains("project_directory"));
        assert!(patched.contains(" first_frame 1001\n"));
        assert!(patched.contains(" last_frame 1100\n"));
        assert!(patched.contains(" name scene.nk\n"));
        // Inserted lines sit directly under the opening line
        assert!(patched.starts_with("Root {\n"));
    }

    #[test]
    fn test_patch_root_keeps_existing_fields() {
        let root = "Root {\n first_frame 5\n last_frame 9\n project_directory \"/x\"\n}\n";
        let patched = patch_root(root, PDIR, Some(1001), Some(1100));
        assert_eq!(patched, root);
    }

    #[test]
    fn test_patch_root_drops_empty_project_directory() {
        let root = "Root {\n project_directory \"\"\n first_frame 1\n last_frame 2\n}\n";
        let patched = patch_root(root, PDIR, Some(1), Some(2));
        assert!(!patched.contains("project_directory \"\""));
        assert!(patched.contains("[python nuke.script_directory()]"));
    }

    #[test]
    fn test_patch_root_unknown_range_inserts_nothing() {
        let root = "Root {\n name scene.nk\n}\n";
        let patched = patch_root(root, PDIR, None, None);
        assert!(!patched.contains("first_frame"));
        assert!(!patched.contains("last_frame"));
    }

    #[test]
    fn test_rewrite_substitutes_root_and_paths() {
        let root = "Root {\n name scene.nk\n}\n";
        let scene = format!("Read {{\n file /shots/v001/p.exr\n}}\n{}", root);
        let mut deps = IndexMap::new();
        deps.insert(
            "/shots/v001/p.exr".to_string(),
            dep("/pkg/images/inputs/v001/p.exr", None),
        );

        let patched = patch_root(root, PDIR, Some(1), Some(2));
        let out = rewrite_scene(&scene, root, &patched, &deps, false).unwrap();
        assert!(out.contains("file /pkg/images/inputs/v001/p.exr"));
        assert!(out.contains(" first_frame 1\n"));
        assert!(!out.contains("/shots/v001/p.exr"));
    }

    #[test]
    fn test_rewrite_appends_root_when_not_found_verbatim() {
        let scene = "Read {\n file /shots/p.exr\n}\n";
        let patched = "Root {\n first_frame 1\n}\n";
        let out = rewrite_scene(scene, "Root {\n}\n", patched, &IndexMap::new(), false).unwrap();
        assert!(out.ends_with(patched));
    }

    #[test]
    fn test_substitution_longest_source_first() {
        let scene = "Read {\n file /a/b.exr\n}\nRead {\n file /a/b.exr.bak\n}\nRoot {\n}\n";
        let mut deps = IndexMap::new();
        // Insertion order deliberately puts the shorter path first
        deps.insert("/a/b.exr".to_string(), dep("/pkg/images/b/b.exr", None));
        deps.insert(
            "/a/b.exr.bak".to_string(),
            dep("/pkg/images/b.exr/b.exr.bak", None),
        );

        let root = "Root {\n}\n";
        let patched = patch_root(root, PDIR, Some(1), Some(1));
        let out = rewrite_scene(scene, root, &patched, &deps, false).unwrap();
        assert!(out.contains("file /pkg/images/b/b.exr\n"));
        assert!(out.contains("file /pkg/images/b.exr/b.exr.bak\n"));
        // Neither corrupted hybrid survives
        assert!(!out.contains("/pkg/images/b/b.exr.bak"));
        assert!(!out.contains("/a/b.exr"));
    }

    #[test]
    fn test_rewrite_relative_mode_requires_relative_paths() {
        let scene = "Read {\n file /a/b.exr\n}\nRoot {\n}\n";
        let mut deps = IndexMap::new();
        deps.insert("/a/b.exr".to_string(), dep("/pkg/images/b/b.exr", None));

        let result = rewrite_scene(scene, "Root {\n}\n", "Root {\n}\n", &deps, true);
        assert!(matches!(result, Err(Error::MissingRelativePath { .. })));
    }

    #[test]
    fn test_rewrite_relative_mode_uses_relative_path() {
        let scene = "Read {\n file /a/b.exr\n}\nRoot {\n}\n";
        let mut deps = IndexMap::new();
        deps.insert(
            "/a/b.exr".to_string(),
            dep("/pkg/images/b/b.exr", Some("../images/b/b.exr")),
        );

        let out = rewrite_scene(scene, "Root {\n}\n", "Root {\n}\n", &deps, true).unwrap();
        assert!(out.contains("file ../images/b/b.exr\n"));
    }
}
