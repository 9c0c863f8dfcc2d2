use crate::types::{Result, SubproxyError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Sidecar holding the fingerprint of the document at `path`.
pub fn hash_path(path: &Path) -> PathBuf {
    let mut sidecar = OsString::from(path.as_os_str());
    sidecar.push(".sha256");
    PathBuf::from(sidecar)
}

pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| persistence(path, source))
}

/// Write `doc` as pretty JSON unless its fingerprint matches the sidecar.
///
/// Returns whether anything was written. Content goes to disk before the
/// sidecar, so an interrupted write never leaves a fingerprint for content
/// that is not there.
pub async fn write_json_if_changed<T: Serialize + ?Sized>(path: &Path, doc: &T) -> Result<bool> {
    let content = serde_json::to_string_pretty(doc)?;
    let next_hash = sha256_hex(content.as_bytes());
    let sidecar = hash_path(path);

    if read_hash(&sidecar).await.as_deref() == Some(next_hash.as_str()) {
        debug!("{} unchanged ({})", path.display(), &next_hash[..12]);
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }
    tokio::fs::write(path, &content)
        .await
        .map_err(|source| persistence(path, source))?;
    tokio::fs::write(&sidecar, &next_hash)
        .await
        .map_err(|source| persistence(&sidecar, source))?;

    info!("Wrote {} ({})", path.display(), &next_hash[..12]);
    Ok(true)
}

// Missing or unreadable sidecar means "no previous fingerprint".
async fn read_hash(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|content| content.trim().to_string())
}

fn persistence(path: &Path, source: std::io::Error) -> SubproxyError {
    SubproxyError::Persistence {
        path: path.to_path_buf(),
        source,
    }
}
