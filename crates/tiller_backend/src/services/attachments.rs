use anyhow::{Context as _, anyhow};
use std::path::{Path, PathBuf};
use tiller_domain::{AttachmentKind, AttachmentRef};

fn kind_for_extension(extension: &str) -> AttachmentKind {
    match extension.to_ascii_lowercase().as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" => AttachmentKind::Image,
        "txt" | "md" | "log" | "diff" | "patch" => AttachmentKind::Text,
        _ => AttachmentKind::File,
    }
}

fn mime_for_extension(extension: &str) -> Option<String> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        _ => return None,
    };
    Some(mime.to_owned())
}

/// Store bytes as a content-addressed blob named by their blake3 hash.
/// Re-storing identical content is a no-op that returns the same ref.
pub(super) fn store_blob(
    blobs_root: &Path,
    bytes: Vec<u8>,
    name: String,
    extension: String,
) -> anyhow::Result<AttachmentRef> {
    std::fs::create_dir_all(blobs_root)
        .with_context(|| format!("failed to create {}", blobs_root.display()))?;
    let id = blake3::hash(&bytes).to_hex().to_string();
    let file_name = if extension.is_empty() {
        id.clone()
    } else {
        format!("{id}.{extension}")
    };
    let path = blobs_root.join(&file_name);
    let byte_len = bytes.len() as u64;
    if !path.exists() {
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(AttachmentRef {
        id,
        kind: kind_for_extension(&extension),
        name,
        extension: extension.clone(),
        mime: mime_for_extension(&extension),
        byte_len,
    })
}

pub(super) fn blob_path(blobs_root: &Path, attachment_id: &str) -> anyhow::Result<PathBuf> {
    let entries = std::fs::read_dir(blobs_root)
        .with_context(|| format!("failed to read {}", blobs_root.display()))?;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let stem = file_name.split('.').next().unwrap_or(&file_name);
        if stem == attachment_id {
            return Ok(entry.path());
        }
    }
    Err(anyhow!("attachment {attachment_id} not found"))
}
