use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<class>[^\n]*) \{").expect("class regex"))
}

fn knob_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<name>[a-zA-Z0-9_.]+) (?P<value>.+)$").expect("knob regex"))
}

/// One bracket-delimited record of the scene text.
///
/// Knobs keep their textual order; a knob name repeated within one block
/// overwrites the earlier value (later lines carry animated or overridden
/// values in the authored format).
#[derive(Debug, Clone)]
pub struct Node {
    pub class_name: String,
    pub knobs: IndexMap<String, String>,
    pub raw_text: String,
}

impl Node {
    /// Build a node from one raw block emitted by the tokenizer.
    pub fn from_block(block: String) -> Result<Self> {
        let class_name = match class_regex().captures(&block) {
            Some(caps) => caps["class"].to_string(),
            None if block.starts_with("Root") => "Root".to_string(),
            None => {
                return Err(Error::Parse(format!(
                    "could not determine node class: {}",
                    block.lines().next().unwrap_or("")
                )))
            }
        };

        let mut knobs = IndexMap::new();
        // The opening `<class> {` line is not knob data
        for line in block.lines().skip(1) {
            let line = line.trim_matches(' ');
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = knob_regex().captures(line) {
                let value = &caps["value"];
                let value = if value == "\"\"" || value == "''" {
                    ""
                } else {
                    value
                };
                knobs.insert(caps["name"].to_string(), value.to_string());
            }
        }

        Ok(Self {
            class_name,
            knobs,
            raw_text: block,
        })
    }

    pub fn is_root(&self) -> bool {
        self.class_name == "Root"
    }

    pub fn knob(&self, name: &str) -> Option<&str> {
        self.knobs.get(name).map(String::as_str)
    }

    /// Node name knob, for logging and dependency bookkeeping.
    pub fn name(&self) -> &str {
        self.knob("name").unwrap_or("<unnamed>")
    }

    /// File reference values exposed by this node, per the class policy.
    /// Empty knob values are not file references.
    pub fn files(&self, policy: &NodePolicy) -> Vec<String> {
        policy
            .file_knobs(&self.class_name)
            .iter()
            .filter_map(|knob| self.knob(knob))
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_matches('"').to_string())
            .collect()
    }

    /// Whether this node's file references are ignored entirely.
    pub fn is_excluded(&self, policy: &NodePolicy) -> bool {
        policy.exclude_classes.iter().any(|c| c == &self.class_name)
    }

    /// Integer `first`/`last` knob values, when present and parsable.
    pub fn frame_range(&self) -> (Option<i64>, Option<i64>) {
        let parse = |name: &str| self.knob(name).and_then(|v| v.parse::<i64>().ok());
        (parse("first"), parse("last"))
    }
}

fn default_file_knobs() -> Vec<String> {
    vec!["file".to_string()]
}

fn default_exclude_classes() -> Vec<String> {
    vec!["Write".to_string(), "DeepWrite".to_string()]
}

fn default_subdir() -> String {
    "images/inputs".to_string()
}

/// Per-class policy for file knobs, exclusion, and destination subdirs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePolicy {
    /// Knob names holding file references when the class has no override.
    #[serde(default = "default_file_knobs")]
    pub default_file_knobs: Vec<String>,
    /// Class-specific file knob overrides (e.g. Vectorfield uses
    /// `vfield_file`).
    #[serde(default)]
    pub file_knobs: IndexMap<String, Vec<String>>,
    /// Classes whose file references are never collected or rewritten.
    /// Render-output nodes keep pointing at their original location.
    #[serde(default = "default_exclude_classes")]
    pub exclude_classes: Vec<String>,
    /// Package subdir each class's dependencies are copied under,
    /// keyed subdir -> classes.
    #[serde(default)]
    pub subdirs: IndexMap<String, Vec<String>>,
    #[serde(default = "default_subdir")]
    pub default_subdir: String,
}

impl Default for NodePolicy {
    fn default() -> Self {
        let mut file_knobs = IndexMap::new();
        file_knobs.insert(
            "Vectorfield".to_string(),
            vec!["vfield_file".to_string()],
        );
        Self {
            default_file_knobs: default_file_knobs(),
            file_knobs,
            exclude_classes: default_exclude_classes(),
            subdirs: IndexMap::new(),
            default_subdir: default_subdir(),
        }
    }
}

impl NodePolicy {
    pub fn file_knobs(&self, class_name: &str) -> &[String] {
        self.file_knobs
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_file_knobs)
    }

    pub fn node_subdir(&self, class_name: &str) -> &str {
        for (subdir, classes) in &self.subdirs {
            if classes.iter().any(|c| c == class_name) {
                return subdir;
            }
        }
        &self.default_subdir
    }
}
