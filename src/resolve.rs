use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{Error, Result, RuleMatchInfo};

/// Normalize separators so path strings compare and substitute cleanly.
pub fn clean_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Join path segments with forward slashes, skipping empty segments.
pub fn join_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.trim_end_matches('/');
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Stem before the final extension, Python `splitext` style:
/// `plate.%04d.exr` -> `plate.%04d`.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        // A leading dot is a hidden file, not an extension
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

// Trailing frame token preceded by `_` or `.`: `####`, `1001`, `%04d`
fn frame_pad_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_.](?P<frame>#+|[0-9]+|%[0-9]*d)$").expect("frame pad regex"))
}

// Same, but format tokens only (no literal frame numbers)
fn frame_pad_fmt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_.](?P<frame>#+|%[0-9]*d)$").expect("frame fmt regex"))
}

fn version_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/v[0-9]+/").expect("version dir regex"))
}

/// Glob form of a frame sequence path: the frame token of the stem is
/// replaced with `*`. Non-sequence paths come back unchanged.
pub fn frame_glob_path(path: &str) -> String {
    let path = clean_path(path);
    let (dir, name) = match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path.as_str()),
    };
    let (stem, ext) = split_ext(name);
    match frame_pad_regex().captures(stem) {
        Some(caps) => {
            let frame = caps.name("frame").expect("frame group");
            let mut glob_stem = String::with_capacity(stem.len());
            glob_stem.push_str(&stem[..frame.start()]);
            glob_stem.push('*');
            glob_stem.push_str(&stem[frame.end()..]);
            format!("{}{}{}", dir, glob_stem, ext)
        }
        None => path,
    }
}

/// Strip a frame-pad format token (`.####`, `_%04d`) off a stem,
/// keeping literal frame numbers intact.
fn strip_frame_fmt(stem: &str) -> String {
    match frame_pad_fmt_regex().captures(stem) {
        Some(caps) => {
            let frame = caps.name("frame").expect("frame group");
            format!("{}{}", &stem[..frame.start()], &stem[frame.end()..])
        }
        None => stem.to_string(),
    }
}

/// Fallback destination when no rename rule matches: keep the
/// `/v<digits>/` segment and everything below it, otherwise bucket the
/// file under a subdir named after its stem.
pub fn basic_dst_path(src_path: &str, dst_dir: &str) -> String {
    let src_path = clean_path(src_path);
    let dst_dir = clean_path(dst_dir);

    if let Some(m) = version_dir_regex().find(&src_path) {
        return join_path(&[&dst_dir, &src_path[m.start() + 1..]]);
    }

    let name = file_name(&src_path);
    let (stem, _) = split_ext(name);
    let subdir = if stem == "*" {
        String::new()
    } else {
        strip_frame_fmt(stem)
    };

    join_path(&[&dst_dir, &subdir, name])
}

/// One configured rename rule: a pattern with named capture groups,
/// optional per-group character substitutions (regex -> replacement),
/// and a destination template over the captured values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRule {
    #[serde(default)]
    pub description: String,
    pub pattern: String,
    #[serde(default)]
    pub substitutions: IndexMap<String, IndexMap<String, String>>,
    pub template: String,
}

struct CompiledRule {
    rule: RenameRule,
    regex: Regex,
}

/// Maps a source path to its packaged destination via the ordered rule
/// table, with [`basic_dst_path`] as the fallback.
pub struct PathResolver {
    rules: Vec<CompiledRule>,
}

impl PathResolver {
    pub fn new(rules: &[RenameRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern).map_err(|source| Error::InvalidRulePattern {
                description: rule.description.clone(),
                source,
            })?;
            compiled.push(CompiledRule {
                rule: rule.clone(),
                regex,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// Apply the rename rules to a source path.
    ///
    /// Every rule is evaluated; a single distinct candidate wins, more
    /// than one distinct candidate is an ambiguity error that names all
    /// matching rules, and no match returns `None`.
    pub fn rename(&self, src_path: &str) -> Result<Option<String>> {
        let mut matched: Vec<(RuleMatchInfo, String)> = Vec::new();

        for compiled in &self.rules {
            let Some(caps) = compiled.regex.captures(src_path) else {
                continue;
            };

            let mut values: IndexMap<String, String> = IndexMap::new();
            for name in compiled.regex.capture_names().flatten() {
                let Some(m) = caps.name(name) else { continue };
                let mut value = m.as_str().to_string();
                if let Some(subs) = compiled.rule.substitutions.get(name) {
                    for (from, to) in subs {
                        let re =
                            Regex::new(from).map_err(|source| Error::InvalidRulePattern {
                                description: compiled.rule.description.clone(),
                                source,
                            })?;
                        value = re.replace_all(&value, to.as_str()).into_owned();
                    }
                }
                values.insert(name.to_string(), value);
            }

            let candidate = expand_template(
                &compiled.rule.template,
                &values,
                &compiled.rule.description,
            )?;

            matched.push((
                RuleMatchInfo {
                    description: compiled.rule.description.clone(),
                    pattern: compiled.rule.pattern.clone(),
                    captures: values.into_iter().collect(),
                },
                candidate,
            ));
        }

        let Some((_, first)) = matched.first() else {
            return Ok(None);
        };

        if matched.iter().any(|(_, c)| c != first) {
            return Err(Error::AmbiguousRename {
                path: src_path.to_string(),
                matches: matched.into_iter().map(|(info, _)| info).collect(),
            });
        }

        Ok(Some(first.clone()))
    }

    /// Compute the destination path for a dependency under the given
    /// parent directory.
    pub fn resolve(&self, src_path: &str, dst_parent: &str) -> Result<String> {
        let src_path = clean_path(src_path);
        let dst_parent = clean_path(dst_parent);

        if let Some(renamed) = self.rename(&src_path)? {
            // A renamed bare filename gets its own stem-named subdir so
            // each dependency family lives in one folder
            if renamed.contains('/') {
                return Ok(join_path(&[&dst_parent, &renamed]));
            }
            let (stem, _) = split_ext(file_name(&renamed));
            return Ok(join_path(&[&dst_parent, stem, &renamed]));
        }

        Ok(basic_dst_path(&src_path, &dst_parent))
    }
}

/// Expand `{group}` tokens with captured values. A `{group:0N}` or
/// Python style `{group:0>Nd}` spec zero-pads integer values to width N.
fn expand_template(
    template: &str,
    values: &IndexMap<String, String>,
    rule_description: &str,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != '{' {
            out.push(ch);
            continue;
        }
        // Literal `{{`
        if let Some((_, '{')) = chars.peek() {
            chars.next();
            out.push('{');
            continue;
        }
        let close = template[idx..].find('}').map(|i| idx + i).ok_or_else(|| {
            Error::RuleTemplate {
                description: rule_description.to_string(),
                group: template[idx..].to_string(),
            }
        })?;
        let token = &template[idx + 1..close];
        // Advance past the token body and closing brace
        while let Some((i, _)) = chars.peek() {
            if *i > close {
                break;
            }
            chars.next();
        }

        let (name, spec) = match token.split_once(':') {
            Some((n, s)) => (n, Some(s)),
            None => (token, None),
        };

        let value = values.get(name).ok_or_else(|| Error::RuleTemplate {
            description: rule_description.to_string(),
            group: name.to_string(),
        })?;

        match (spec, value.parse::<i64>()) {
            (Some(spec), Ok(int)) => {
                let width: usize = spec
                    .trim_start_matches(['0', '>', '<', '^'])
                    .trim_end_matches('d')
                    .parse()
                    .unwrap_or(0);
                out.push_str(&format!("{:0width$}", int, width = width));
            }
            _ => out.push_str(value),
        }
    }

    Ok(out)
}

/// Package-relative path from the packaged scene to a dependency, both
/// rooted under the package root.
pub fn relative_path(scene_path: &str, dependency_path: &str, package_root: &str) -> Result<String> {
    let scene_path = clean_path(scene_path);
    let dependency_path = clean_path(dependency_path);
    let package_root = clean_path(package_root);

    let dep_stub = dependency_path
        .strip_prefix(&package_root)
        .ok_or_else(|| Error::NotUnderRoot {
            path: dependency_path.clone(),
            root: package_root.clone(),
        })?
        .trim_matches('/');
    let scene_stub = scene_path
        .strip_prefix(&package_root)
        .ok_or_else(|| Error::NotUnderRoot {
            path: scene_path.clone(),
            root: package_root.clone(),
        })?;

    // A dependency sitting directly at the package root has no
    // family subdirectory to point into
    if dep_stub.is_empty() || !dep_stub.contains('/') {
        return Err(Error::InvalidDependencyLocation {
            path: dependency_path.clone(),
        });
    }

    let scene_depth = scene_stub.split('/').filter(|s| !s.is_empty()).count();
    if scene_depth <= 1 {
        Ok(format!("./{}", dep_stub))
    } else {
        let ups = vec![".."; scene_depth - 1].join("/");
        Ok(format!("{}/{}", ups, dep_stub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(description: &str, pattern: &str, template: &str) -> RenameRule {
        RenameRule {
            description: description.to_string(),
            pattern: pattern.to_string(),
            substitutions: IndexMap::new(),
            template: template.to_string(),
        }
    }

    #[test]
    fn test_frame_glob_path() {
        assert_eq!(
            frame_glob_path("/shots/plate.%04d.exr"),
            "/shots/plate.*.exr"
        );
        assert_eq!(frame_glob_path("/shots/plate.1001.exr"), "/shots/plate.*.exr");
        assert_eq!(frame_glob_path("/shots/plate_####.exr"), "/shots/plate_*.exr");
        assert_eq!(frame_glob_path("/luts/show.cube"), "/luts/show.cube");
    }

    #[test]
    fn test_basic_dst_path_version_dir() {
        assert_eq!(
            basic_dst_path("/proj/shots/comp/v003/plate.%04d.exr", "/pkg/images/inputs"),
            "/pkg/images/inputs/v003/plate.%04d.exr"
        );
    }

    #[test]
    fn test_basic_dst_path_no_version_dir() {
        assert_eq!(
            basic_dst_path("/proj/shots/comp/plate.%04d.exr", "/pkg/images/inputs"),
            "/pkg/images/inputs/plate./plate.%04d.exr"
        );
        assert_eq!(
            basic_dst_path("/luts/show.cube", "/pkg/luts"),
            "/pkg/luts/show/show.cube"
        );
    }

    #[test]
    fn test_rename_single_match() {
        let resolver = PathResolver::new(&[rule(
            "publish",
            r"/publish/(?P<shot>[a-zA-Z0-9]+)/v(?P<version>[0-9]+)/(?P<stem>[a-zA-Z0-9_]+)\.(?P<frame>%[0-9]*d)(?P<ext>\.[a-z]+)$",
            "{shot}.{stem}.v{version:03}.{frame}{ext}",
        )])
        .unwrap();

        let dst = resolver
            .resolve("/publish/LUA001/v3/bg_main.%04d.exr", "/pkg/images/inputs")
            .unwrap();
        assert_eq!(
            dst,
            "/pkg/images/inputs/LUA001.bg_main.v003.%04d/LUA001.bg_main.v003.%04d.exr"
        );
    }

    #[test]
    fn test_rename_with_subdir_in_template() {
        let resolver = PathResolver::new(&[rule(
            "bucketed",
            r"/publish/(?P<shot>[a-zA-Z0-9]+)/(?P<name>[a-z_.%0-9]+)$",
            "{shot}/{name}",
        )])
        .unwrap();

        let dst = resolver
            .resolve("/publish/LUA001/bg.%04d.exr", "/pkg/images/inputs")
            .unwrap();
        assert_eq!(dst, "/pkg/images/inputs/LUA001/bg.%04d.exr");
    }

    #[test]
    fn test_rename_group_substitutions() {
        let mut r = rule(
            "subbed",
            r"/(?P<layer>[a-zA-Z0-9_]+)/(?P<name>[a-z.%0-9]+)$",
            "{layer}_{name}",
        );
        let mut subs = IndexMap::new();
        subs.insert("_".to_string(), String::new());
        r.substitutions.insert("layer".to_string(), subs);

        let resolver = PathResolver::new(&[r]).unwrap();
        let renamed = resolver.rename("/bg_crypto/plate.%04d.exr").unwrap();
        assert_eq!(renamed, Some("bgcrypto_plate.%04d.exr".to_string()));
    }

    #[test]
    fn test_ambiguous_rename_is_error() {
        let resolver = PathResolver::new(&[
            rule("rule a", r"/proj/v(?P<version>[0-9]+)/", "a_{version}"),
            rule("rule b", r"/proj/.*\.exr$", "b_fixed"),
        ])
        .unwrap();

        let err = resolver.rename("/proj/v003/bg.1001.exr").unwrap_err();
        match err {
            Error::AmbiguousRename { path, matches } => {
                assert_eq!(path, "/proj/v003/bg.1001.exr");
                assert_eq!(matches.len(), 2);
                assert_eq!(matches[0].description, "rule a");
                assert_eq!(matches[1].description, "rule b");
            }
            other => panic!("expected AmbiguousRename, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_candidates_are_not_ambiguous() {
        let resolver = PathResolver::new(&[
            rule("rule a", r"(?P<name>bg\.1001\.exr)$", "{name}"),
            rule("rule b", r"/proj/.*/(?P<name>[a-z0-9.]+)$", "{name}"),
        ])
        .unwrap();

        let renamed = resolver.rename("/proj/v003/bg.1001.exr").unwrap();
        assert_eq!(renamed, Some("bg.1001.exr".to_string()));
    }

    #[test]
    fn test_no_match_falls_back() {
        let resolver = PathResolver::new(&[]).unwrap();
        let dst = resolver
            .resolve("/elsewhere/v012/bg.%04d.exr", "/pkg/images/inputs")
            .unwrap();
        assert_eq!(dst, "/pkg/images/inputs/v012/bg.%04d.exr");
    }

    #[test]
    fn test_invalid_rule_pattern() {
        let result = PathResolver::new(&[rule("broken", r"(?P<oops", "{oops}")]);
        assert!(matches!(result, Err(Error::InvalidRulePattern { .. })));
    }

    #[test]
    fn test_template_unknown_group() {
        let resolver =
            PathResolver::new(&[rule("bad", r"(?P<a>x)", "{missing}")]).unwrap();
        let result = resolver.rename("x");
        assert!(matches!(result, Err(Error::RuleTemplate { .. })));
    }

    #[test]
    fn test_relative_path_scene_in_subdir() {
        let rel = relative_path(
            "/pkg/nk/scene.nk",
            "/pkg/images/inputs/v003/plate.%04d.exr",
            "/pkg",
        )
        .unwrap();
        assert_eq!(rel, "../images/inputs/v003/plate.%04d.exr");
    }

    #[test]
    fn test_relative_path_scene_at_root() {
        let rel = relative_path(
            "/pkg/scene.nk",
            "/pkg/images/inputs/v003/plate.%04d.exr",
            "/pkg",
        )
        .unwrap();
        assert_eq!(rel, "./images/inputs/v003/plate.%04d.exr");
    }

    #[test]
    fn test_relative_path_deeper_scene() {
        let rel = relative_path("/pkg/nk/sub/scene.nk", "/pkg/images/plate.exr", "/pkg").unwrap();
        assert_eq!(rel, "../../images/plate.exr");
    }

    #[test]
    fn test_relative_path_not_under_root() {
        let result = relative_path("/pkg/nk/scene.nk", "/other/images/plate.exr", "/pkg");
        assert!(matches!(result, Err(Error::NotUnderRoot { .. })));
    }

    #[test]
    fn test_relative_path_dependency_at_root() {
        let result = relative_path("/pkg/nk/scene.nk", "/pkg/plate.exr", "/pkg");
        assert!(matches!(
            result,
            Err(Error::InvalidDependencyLocation { .. })
        ));
    }
}
