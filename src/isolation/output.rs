//! Locating and reading isolation result files

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::ecosystem::Ecosystem;

/// `<base>_<ecosystem>_analysis.json`, where `<base>` is the override name
/// or the manifest file name without its final extension.
pub fn output_file_name(
    base_override: Option<&str>,
    manifest_path: &Path,
    ecosystem: Ecosystem,
) -> String {
    let base = base_override
        .map(str::to_string)
        .or_else(|| {
            manifest_path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "manifest".to_string());
    format!("{}_{}_analysis.json", base, ecosystem.as_str())
}

/// `<work_dir>/<ecosystem>/<file_name>`
pub fn output_file_path(work_dir: &Path, ecosystem: Ecosystem, file_name: &str) -> PathBuf {
    work_dir.join(ecosystem.as_str()).join(file_name)
}

/// Reads a result file; missing or blank files yield `None`.
pub fn read_result_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .inspect_err(|e| debug!("No result file at {:?}: {}", path, e))
        .ok()
        .filter(|content| !content.trim().is_empty())
}

/// Any `*_<ecosystem>_analysis.json` in the ecosystem's output directory
pub fn find_result_file(work_dir: &Path, ecosystem: Ecosystem) -> Option<PathBuf> {
    let suffix = format!("_{}_analysis.json", ecosystem.as_str());
    let entries = std::fs::read_dir(work_dir.join(ecosystem.as_str())).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Result file content, falling back to the captured stdout
pub fn resolve_output(result_file: Option<String>, stdout: &str) -> String {
    result_file.unwrap_or_else(|| stdout.to_string())
}

/// Copies a result file into the permanent output directory
pub fn persist_result_file(path: &Path, output_dir: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?;
    let destination = output_dir.join(file_name);
    std::fs::create_dir_all(output_dir)
        .and_then(|_| std::fs::copy(path, &destination))
        .inspect_err(|e| {
            warn!(
                "Failed to copy {:?} to {:?}: {}",
                path, output_dir, e
            )
        })
        .ok()?;
    Some(destination)
}
