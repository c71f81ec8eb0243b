//! Streaming image writes: `.part` temp file, SHA-256 on the fly, rename
//! into place once the body is complete.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::StoreError;
use crate::api::ImageStream;

/// Result of a completed image write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WrittenImage {
    pub size_bytes: u64,
    pub sha256: String,
}

/// File stem for a user's cached image: hex SHA-256 of the id, so distinct
/// ids never share a file and no id can escape `image_dir`.
fn file_stem(user_id: &str) -> String {
    hex_digest(Sha256::digest(user_id.as_bytes()).as_slice())
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Location of a user's cached image inside `image_dir`.
pub(crate) fn image_path(image_dir: &Path, user_id: &str) -> PathBuf {
    image_dir.join(format!("{}.img", file_stem(user_id)))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Write `stream` to `path`.
///
/// The stream is consumed here whatever happens. A body shorter or longer
/// than the advertised `Content-Length` is rejected. On failure the `.part`
/// file is removed and `path` is left untouched.
pub(crate) async fn write_image_stream(
    stream: ImageStream,
    path: &Path,
    user_id: &str,
) -> Result<WrittenImage, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let part = part_path(path);
    let expected = stream.content_length();
    let written = match stream_to_file(stream, &part).await {
        Ok(w) if w.size_bytes == 0 => Err(StoreError::EmptyImage {
            user_id: user_id.to_string(),
        }),
        Ok(w) => match expected {
            Some(expected) if expected != w.size_bytes => Err(StoreError::SizeMismatch {
                user_id: user_id.to_string(),
                expected,
                actual: w.size_bytes,
            }),
            _ => Ok(w),
        },
        Err(e) => Err(e),
    };

    let written = match written {
        Ok(w) => w,
        Err(e) => {
            if let Err(rm) = fs::remove_file(&part).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %part.display(), error = %rm, "Failed to remove partial image");
                }
            }
            return Err(e);
        }
    };

    fs::rename(&part, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(written)
}

async fn stream_to_file(mut stream: ImageStream, part: &Path) -> Result<WrittenImage, StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .await
        .map_err(|e| StoreError::io(part, e))?;

    let mut hasher = Sha256::new();
    let mut size_bytes: u64 = 0;
    while let Some(chunk) = stream.next_chunk().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| StoreError::io(part, e))?;
        size_bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| StoreError::io(part, e))?;

    let sha256 = hex_digest(hasher.finalize().as_slice());
    Ok(WrittenImage { size_bytes, sha256 })
}
