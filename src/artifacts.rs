//! Artifact collection and lookup.
//!
//! After a child exits, its output directory is scanned for images and each
//! one is mapped to `<namespace>/<execution_id>/<file>`. The reverse mapping
//! is used by whatever serves those paths.

use crate::errors::Result;
use crate::wrapper::IMAGE_EXTENSION;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Enumerate images in an execution's output directory, in file-name order.
///
/// A directory left with no entries at all is removed. A missing directory
/// yields no artifacts.
pub fn collect(output_dir: &Path, execution_id: &str, namespace: &str) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    let mut any_entry = false;
    for entry in entries {
        let entry = entry?;
        any_entry = true;
        let Ok(ft) = entry.file_type() else { continue };
        if !ft.is_file() || ft.is_symlink() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if has_image_extension(&name) {
            names.push(name);
        }
    }

    if !any_entry {
        match std::fs::remove_dir(output_dir) {
            Ok(()) => debug!("[ARTIFACTS] Removed empty output dir {:?}", output_dir),
            Err(e) => warn!("[ARTIFACTS] Failed to remove empty output dir {:?}: {}", output_dir, e),
        }
        return Ok(Vec::new());
    }

    names.sort();
    let namespace = namespace.trim_end_matches('/');
    Ok(names
        .into_iter()
        .map(|name| format!("{}/{}/{}", namespace, execution_id, name))
        .collect())
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == IMAGE_EXTENSION)
}

/// Map a resource path back onto the output tree.
///
/// Only `<namespace>/<uuid>/<file>` with a plain image file name that exists
/// on disk resolves; anything else, including traversal attempts, is `None`.
pub fn resolve(output_root: &Path, namespace: &str, resource: &str) -> Option<PathBuf> {
    let namespace = namespace.trim_end_matches('/');
    let rest = resource.strip_prefix(namespace)?.strip_prefix('/')?;
    let (execution_id, file_name) = rest.split_once('/')?;

    uuid::Uuid::parse_str(execution_id).ok()?;
    if file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains(['/', '\\'])
        || !has_image_extension(file_name)
    {
        return None;
    }

    let path = output_root.join(execution_id).join(file_name);
    path.is_file().then_some(path)
}

/// Content type for a served artifact, from its extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
