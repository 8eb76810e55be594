pub mod copy;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod node;
pub mod package;
pub mod parser;
pub mod resolve;
pub mod rewrite;
pub mod settings;

pub use copy::{CopyReport, FileCopy, LocalFileCopy};
pub use error::{Error, Result};
pub use extract::{Dependency, DependencyExtractor, SceneData};
pub use manifest::{PackageManifest, PackageMetadata};
pub use node::{Node, NodePolicy};
pub use package::{PackageOrchestrator, RunReport, Stage};
pub use parser::{parse_scene, Blocks};
pub use resolve::PathResolver;
pub use settings::{Overrides, PackageMode, PackageSettings};
