//! Output naming and clip directory maintenance.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// Longest title fragment kept in a clip file name.
const MAX_TITLE_CHARS: usize = 50;

/// Make `name` safe for use as a file name component.
///
/// Keeps alphanumerics, `-` and `_`; whitespace runs become one `_`;
/// everything else is dropped.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else if c.is_whitespace() {
            pending_sep = true;
        }
    }
    let out: String = out.chars().take(MAX_TITLE_CHARS).collect();
    if out.is_empty() {
        "clip".to_string()
    } else {
        out
    }
}

/// File name for a cut clip: `clip_{NNN}_{title}.mp4`.
pub fn clip_file_name(segment_id: u32, title: &str) -> String {
    format!("clip_{:03}_{}.mp4", segment_id, sanitize_filename(title))
}

/// A generated clip file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

fn is_clip_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with("clip_") && name.ends_with(".mp4")
}

/// Generated clip files under `dir`, sorted by name.
pub async fn list_clip_files(dir: impl AsRef<Path>) -> MediaResult<Vec<ClipFile>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_clip_file(&path) {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() {
            files.push(ClipFile {
                path,
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Delete generated clip files under `dir`. Returns how many were removed.
pub async fn cleanup_clip_files(dir: impl AsRef<Path>) -> MediaResult<usize> {
    let mut removed = 0;
    for file in list_clip_files(dir.as_ref()).await? {
        match fs::remove_file(&file.path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to remove clip file"),
        }
    }
    debug!(dir = %dir.as_ref().display(), removed, "Cleaned clip directory");
    Ok(removed)
}
