//! Attachment lookup under the uploads root

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::models::Attachment;

/// Files to attach, relative to the uploads root (plus an optional sub-directory)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    pub files: Vec<String>,
    pub base_dir: Option<String>,
}

impl AttachmentRequest {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            base_dir: None,
        }
    }

    pub fn in_dir(mut self, base_dir: impl Into<String>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }
}

/// Resolve requested files to readable attachments
///
/// Paths that would leave `uploads_root` and files that do not exist are
/// skipped with a warning.
pub fn resolve_attachments(uploads_root: &Path, request: &AttachmentRequest) -> Vec<Attachment> {
    let root = match uploads_root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            warn!("Uploads root {} is not accessible: {}", uploads_root.display(), e);
            return Vec::new();
        }
    };

    let base = match request.base_dir.as_deref().map(confine) {
        Some(Some(base)) => base,
        Some(None) => {
            warn!("Attachment directory escapes the uploads root, skipping attachments");
            return Vec::new();
        }
        None => PathBuf::new(),
    };

    let mut attachments = Vec::new();

    for file in &request.files {
        let Some(relative) = confine(file).map(|name| base.join(name)) else {
            warn!("Attachment path escapes the uploads root: {}", file);
            continue;
        };

        let candidate = root.join(&relative);
        let resolved = match candidate.canonicalize() {
            Ok(resolved) if resolved.is_file() => resolved,
            _ => {
                warn!("Attachment not found on disk: {}", relative.display());
                continue;
            }
        };

        // A symlink inside the root may still point outside it
        if !resolved.starts_with(&root) {
            warn!("Attachment path escapes the uploads root: {}", file);
            continue;
        }

        let Some(filename) = resolved.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };

        attachments.push(Attachment {
            filename,
            path: resolved,
        });
    }

    attachments
}

/// Lexically normalize a relative path, refusing any that climbs above its start
///
/// Root and drive prefixes are dropped, so absolute input is treated as
/// relative. Returns `None` for paths like `../x` or `a/../../x`, and for
/// paths that normalize to nothing.
fn confine(path: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        return None;
    }

    Some(parts.iter().collect())
}
