pub mod file_manager;

pub use file_manager::{FileManager, FileReader, FileWriter, StoredFile};

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Result, TransferError};

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Flat root directory for stored files
    pub root_dir: PathBuf,

    /// Chunk size for streaming (default: 1MB)
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./server_data"),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&crate::config::StorageConfig> for StorageConfig {
    fn from(config: &crate::config::StorageConfig) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            chunk_size: config.chunk_size,
        }
    }
}

impl StorageConfig {
    /// Path of a stored file; `name` must already be sanitized.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root_dir.join(name)
    }
}

/// Reduce a client-supplied filename to its last path component.
///
/// Directory parts are dropped so the result always lands directly inside the
/// data root. The component itself is kept byte for byte, surrounding
/// whitespace included. Names without a usable component (`""`, `".."`, `"/"`)
/// are rejected.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(TransferError::invalid_argument("filename is required"));
    }

    match Path::new(raw).file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name.to_string()),
        _ => Err(TransferError::invalid_argument(format!(
            "invalid filename: {:?}",
            raw
        ))),
    }
}

/// Read up to `chunk_size` bytes, retrying short reads until the chunk is
/// full or the reader hits EOF. Returns `None` at EOF.
pub async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut filled = 0;

    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled == 0 {
        return Ok(None);
    }

    buffer.truncate(filled);
    Ok(Some(buffer))
}
