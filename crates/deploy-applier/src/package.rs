//! Working directory packaging
//!
//! A local working directory is shipped to the control plane as a zip
//! package named after a content hash, so re-running a deployment with an
//! unchanged directory never uploads it twice.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use common::error::{Error, Result};

use crate::client::ControlPlane;
use crate::schema::{RuntimeEnv, WORKING_DIR};

/// Largest package the control plane accepts
pub const MAX_PACKAGE_BYTES: usize = 500 * 1024 * 1024;

/// Returns true if `value` already names a remote location
pub fn is_remote_uri(value: &str) -> bool {
    value.contains("://")
}

/// Package URI for a content hash
pub fn package_uri(hash: &str) -> String {
    format!("gcs://_ray_pkg_{}.zip", hash)
}

/// Splits `gcs://_ray_pkg_x.zip` into `("gcs", "_ray_pkg_x.zip")`
pub fn parse_package_uri(uri: &str) -> Result<(&str, &str)> {
    match uri.split_once("://") {
        Some((protocol, name)) if !protocol.is_empty() && !name.is_empty() => Ok((protocol, name)),
        _ => Err(Error::ConfigValidation(format!("invalid package URI '{}'", uri))),
    }
}

const EXCLUDE_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled `excludes` entries of a runtime env
///
/// A pattern without `/` matches a file or directory name anywhere in the
/// tree (`__pycache__`, `*.pyc`). A pattern with `/` is matched from the
/// root of the working directory (`/conf`, `data/*.bin`). Excluding a
/// directory excludes everything below it.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    rules: Vec<(Pattern, bool)>,
}

impl ExcludeSet {
    /// Compiles `excludes`; an invalid glob is a config error
    pub fn new(excludes: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(excludes.len());

        for raw in excludes {
            let trimmed = raw.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }

            let anchored = trimmed.contains('/');
            let pattern = Pattern::new(trimmed.trim_start_matches('/')).map_err(|e| {
                Error::ConfigValidation(format!("invalid excludes pattern '{}': {}", raw, e))
            })?;
            rules.push((pattern, anchored));
        }

        Ok(Self { rules })
    }

    /// Returns true if the `/`-separated relative path is left out of the package
    pub fn is_excluded(&self, relative: &str) -> bool {
        let components: Vec<&str> = relative.split('/').collect();

        self.rules.iter().any(|(pattern, anchored)| {
            if *anchored {
                (1..=components.len())
                    .any(|n| pattern.matches_with(&components[..n].join("/"), EXCLUDE_MATCH))
            } else {
                components
                    .iter()
                    .any(|component| pattern.matches_with(component, EXCLUDE_MATCH))
            }
        })
    }
}

/// Files under `dir` that belong in the package, sorted by relative path
fn package_files(dir: &Path, excludes: &[String]) -> Result<Vec<(String, PathBuf)>> {
    let excludes = ExcludeSet::new(excludes)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Internal(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if excludes.is_excluded(&relative) {
            debug!("Excluding {} from package", relative);
            continue;
        }

        files.push((relative, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Content hash over relative paths and file bytes
pub fn hash_directory(dir: &Path, excludes: &[String]) -> Result<String> {
    let mut hasher = Sha256::new();

    for (relative, path) in package_files(dir, excludes)? {
        let contents = std::fs::read(&path)?;
        hasher.update((relative.len() as u64).to_le_bytes());
        hasher.update(relative.as_bytes());
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }

    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..16]))
}

/// Zips the package files of `dir` in memory
pub fn zip_directory(dir: &Path, excludes: &[String]) -> Result<Vec<u8>> {
    zip_directory_within(dir, excludes, MAX_PACKAGE_BYTES)
}

fn package_too_large(dir: &Path, size: u64, limit: usize) -> Error {
    Error::ConfigValidation(format!(
        "package for {} is {} bytes, above the {} byte limit; use `excludes` to leave out large files",
        dir.display(),
        size,
        limit
    ))
}

fn zip_directory_within(dir: &Path, excludes: &[String], limit: usize) -> Result<Vec<u8>> {
    let files = package_files(dir, excludes)?;

    let mut total: u64 = 0;
    for (_, path) in &files {
        total += std::fs::metadata(path)?.len();
    }
    if total > limit as u64 {
        return Err(package_too_large(dir, total, limit));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let zip_error = |e: zip::result::ZipError| Error::Internal(format!("failed to build package: {}", e));

    for (relative, path) in files {
        let mut contents = Vec::new();
        std::fs::File::open(&path)?.read_to_end(&mut contents)?;

        writer.start_file(relative, options).map_err(zip_error)?;
        writer.write_all(&contents)?;
    }

    let bytes = writer.finish().map_err(zip_error)?.into_inner();

    if bytes.len() > limit {
        return Err(package_too_large(dir, bytes.len() as u64, limit));
    }

    Ok(bytes)
}

fn excludes(runtime_env: &RuntimeEnv) -> Result<Vec<String>> {
    match runtime_env.get("excludes") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::ConfigValidation(format!("excludes entries must be strings, got {}", item))
                })
            })
            .collect(),
        Some(other) => Err(Error::ConfigValidation(format!(
            "excludes must be a list of strings, got {}",
            other
        ))),
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Internal(format!("packaging task failed: {}", e)))?
}

/// Replaces a local `working_dir` with the URI of its uploaded package
///
/// Remote URIs are left alone. The package is only uploaded when the
/// control plane does not already hold one with the same content hash.
pub async fn upload_working_dir_if_needed<P>(plane: &P, runtime_env: &mut RuntimeEnv) -> Result<()>
where
    P: ControlPlane + ?Sized,
{
    let working_dir = match runtime_env.get(WORKING_DIR) {
        None => return Ok(()),
        Some(Value::String(dir)) => dir.clone(),
        Some(other) => {
            return Err(Error::ConfigValidation(format!(
                "{} must be a string, got {}",
                WORKING_DIR, other
            )))
        }
    };

    if is_remote_uri(&working_dir) {
        debug!("{} is already remote, skipping upload", working_dir);
        return Ok(());
    }

    let dir = PathBuf::from(&working_dir);
    if !dir.is_dir() {
        return Err(Error::ConfigValidation(format!(
            "working directory '{}' does not exist or is not a directory",
            working_dir
        )));
    }

    let excludes = excludes(runtime_env)?;

    let hash = {
        let (dir, excludes) = (dir.clone(), excludes.clone());
        blocking(move || hash_directory(&dir, &excludes)).await?
    };
    let uri = package_uri(&hash);

    if plane.package_exists(&uri).await? {
        info!("Package {} for {} already exists, skipping upload", uri, working_dir);
    } else {
        let bytes = blocking(move || zip_directory(&dir, &excludes)).await?;
        info!("Uploading {} ({} bytes) as {}", working_dir, bytes.len(), uri);
        plane.upload_package(&uri, bytes).await?;
    }

    runtime_env.insert(WORKING_DIR.to_string(), Value::String(uri));
    Ok(())
}
