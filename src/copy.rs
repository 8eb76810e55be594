use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{CopyFailure, Error, Result};
use crate::manifest::PackageManifest;

/// External collaborator that materializes a copy manifest. The core's
/// contract toward it is only the manifest's shape.
pub trait FileCopy {
    fn copy(&self, manifest: &PackageManifest) -> Result<CopyReport>;
}

#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: usize,
}

/// Local single-machine executor: expands each source glob against its
/// parent directory, honors explicit frame lists, and copies files with
/// parent directories created. Failures are aggregated so one bad item
/// does not hide the rest.
#[derive(Debug, Clone, Default)]
pub struct LocalFileCopy {
    /// Overwrite files already present at the destination.
    pub force: bool,
}

impl FileCopy for LocalFileCopy {
    fn copy(&self, manifest: &PackageManifest) -> Result<CopyReport> {
        let mut report = CopyReport::default();
        let mut failures = Vec::new();

        for (src_glob, entry) in &manifest.entries {
            match self.copy_entry(src_glob, &entry.dst, &entry.frames, &mut report) {
                Ok(()) => {}
                Err(err) => failures.push(CopyFailure {
                    source: src_glob.clone(),
                    dest: entry.dst.clone(),
                    message: err.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            info!(copied = report.copied, skipped = report.skipped, "file copy complete");
            Ok(report)
        } else {
            Err(Error::CopyFailed { failures })
        }
    }
}

impl LocalFileCopy {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    fn copy_entry(
        &self,
        src_glob: &str,
        dst_glob: &str,
        frames: &[i64],
        report: &mut CopyReport,
    ) -> Result<()> {
        if !src_glob.contains('*') {
            return self.copy_one(src_glob, dst_glob, report);
        }

        let (dir, pattern) = split_glob(src_glob)?;
        let frame_set: HashSet<i64> = frames.iter().copied().collect();

        let mut found = false;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(star) = pattern.captures(&name) else {
                continue;
            };
            let token = &star[1];

            // Frame-limited copy: skip frames outside the scene's range
            if !frame_set.is_empty() {
                match token.parse::<i64>() {
                    Ok(frame) if frame_set.contains(&frame) => {}
                    Ok(_) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(_) => {}
                }
            }

            found = true;
            let dst = dst_glob.replacen('*', token, 1);
            let src = format!("{}/{}", dir, name);
            self.copy_one(&src, &dst, report)?;
        }

        if !found {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no files matched: {}", src_glob),
            )));
        }
        Ok(())
    }

    fn copy_one(&self, src: &str, dst: &str, report: &mut CopyReport) -> Result<()> {
        let dst_path = Path::new(dst);
        if dst_path.is_file() && !self.force {
            debug!(%dst, "destination exists, skipping");
            report.skipped += 1;
            return Ok(());
        }
        if let Some(parent) = dst_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst_path)?;
        report.copied += 1;
        Ok(())
    }
}

/// Split a one-star glob into its parent directory and a filename
/// regex capturing the starred span.
fn split_glob(src_glob: &str) -> Result<(&str, Regex)> {
    let (dir, name) = match src_glob.rfind('/') {
        Some(idx) => (&src_glob[..idx], &src_glob[idx + 1..]),
        None => (".", src_glob),
    };
    let mut pattern = String::with_capacity(name.len() + 8);
    pattern.push('^');
    for (i, part) in name.split('*').enumerate() {
        if i > 0 {
            pattern.push_str("(.+)");
        }
        pattern.push_str(&regex::escape(part));
    }
    pattern.push('$');
    let regex = Regex::new(&pattern)
        .map_err(|e| Error::Settings(format!("bad copy glob '{}': {}", src_glob, e)))?;
    Ok((dir, regex))
}
