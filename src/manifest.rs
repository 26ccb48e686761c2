// Manifest generation for a local data folder.
use crate::config::MANIFEST_FILE;
use crate::error::LoadError;
use log::info;
use std::path::Path;
use walkdir::WalkDir;

/// Every `*.parquet` file under `dir`, as a sorted list of `/`-separated
/// paths relative to `dir`.
pub fn collect_data_files(dir: &Path) -> Result<Vec<String>, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::DirectoryNotFound(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| LoadError::ManifestWrite {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(parts.join("/"));
    }
    files.sort();
    Ok(files)
}

/// Write `data-manifest.json` into `dir` and return the listed files.
pub fn write_manifest(dir: &Path) -> Result<Vec<String>, LoadError> {
    let files = collect_data_files(dir)?;
    let path = dir.join(MANIFEST_FILE);
    let write_err = |reason: String| LoadError::ManifestWrite {
        path: path.clone(),
        reason,
    };
    let json = serde_json::to_string_pretty(&files).map_err(|e| write_err(e.to_string()))?;
    std::fs::write(&path, json).map_err(|e| write_err(e.to_string()))?;
    info!("wrote {} with {} files", path.display(), files.len());
    Ok(files)
}
