use std::path::PathBuf;

use thiserror::Error;

/// One rename rule that matched a source path, kept for ambiguity reports.
#[derive(Debug, Clone)]
pub struct RuleMatchInfo {
    pub description: String,
    pub pattern: String,
    pub captures: Vec<(String, String)>,
}

impl std::fmt::Display for RuleMatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.description, self.pattern)?;
        for (name, value) in &self.captures {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

/// Why an existing directory could not be verified as a prior package.
#[derive(Debug, Clone)]
pub enum StaleReason {
    /// Directory is non-empty but holds no package metadata file.
    NoMetadata,
    /// More than one package metadata file was found.
    MultipleMetadata(Vec<PathBuf>),
    /// Metadata was found but records a different package root.
    RootMismatch { recorded: String },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::NoMetadata => write!(f, "no package metadata found"),
            StaleReason::MultipleMetadata(paths) => {
                write!(f, "multiple package metadata files found ({})", paths.len())
            }
            StaleReason::RootMismatch { recorded } => {
                write!(f, "metadata records a different root: {}", recorded)
            }
        }
    }
}

/// A single failed item from the file-copy stage.
#[derive(Debug, Clone)]
pub struct CopyFailure {
    pub source: String,
    pub dest: String,
    pub message: String,
}

/// Errors raised by the packaging pipeline.
///
/// Callers match on the variant, never on rendered message text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("scene parse error: {0}")]
    Parse(String),

    #[error("no Root node found in scene")]
    MissingRoot,

    #[error("source path matches multiple rename rules: {path}")]
    AmbiguousRename {
        path: String,
        matches: Vec<RuleMatchInfo>,
    },

    #[error("invalid rename rule pattern '{description}': {source}")]
    InvalidRulePattern {
        description: String,
        #[source]
        source: regex::Error,
    },

    #[error("rename rule '{description}' template references unmatched group '{group}'")]
    RuleTemplate { description: String, group: String },

    #[error("path is not under package root {root}: {path}")]
    NotUnderRoot { path: String, root: String },

    #[error("dependency must live in a package subdirectory, not directly at the root: {path}")]
    InvalidDependencyLocation { path: String },

    #[error("no relative path recorded for dependency: {path}")]
    MissingRelativePath { path: String },

    #[error("package already exists at: {root}")]
    PackageExists { root: String },

    #[error("cannot verify existing directory as a prior package ({reason}): {root}")]
    StalePackageVerification { root: String, reason: StaleReason },

    #[error("scene does not exist: {path}")]
    SceneNotFound { path: PathBuf },

    #[error("file copy failed for {} item(s)", failures.len())]
    CopyFailed { failures: Vec<CopyFailure> },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
