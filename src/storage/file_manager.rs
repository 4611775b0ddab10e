use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{read_chunk, sanitize_filename, StorageConfig};
use crate::error::{Result, TransferError};

/// Timestamp layout used in listings
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stored file information
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl StoredFile {
    /// Modification time in local time, `YYYY-MM-DD HH:MM:SS`.
    pub fn modified_display(&self) -> String {
        DateTime::<Local>::from(self.modified)
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }
}

/// File manager for the flat server data root
pub struct FileManager {
    config: StorageConfig,
    // Held only while creating an output file.
    create_lock: Mutex<()>,
}

impl FileManager {
    /// Create a new file manager. The data root is created on first upload.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            create_lock: Mutex::new(()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Start writing a file (returns a FileWriter).
    ///
    /// An existing file with the same name is truncated.
    pub async fn start_write(&self, filename: &str) -> Result<FileWriter> {
        let name = sanitize_filename(filename)?;
        let storage_path = self.config.file_path(&name);

        let _guard = self.create_lock.lock().await;

        fs::create_dir_all(&self.config.root_dir).await.map_err(|e| {
            TransferError::internal(format!(
                "failed to create data directory {}: {}",
                self.config.root_dir.display(),
                e
            ))
        })?;

        let file = File::create(&storage_path).await.map_err(|e| {
            TransferError::internal(format!("failed to create file {}: {}", name, e))
        })?;

        info!("Started writing file: {}", name);

        Ok(FileWriter {
            name,
            storage_path,
            file,
            bytes_written: 0,
        })
    }

    /// Start reading a file (returns a FileReader)
    pub async fn start_read(&self, filename: &str) -> Result<FileReader> {
        let name = sanitize_filename(filename)?;

        match fs::metadata(&self.config.root_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(TransferError::not_found("file not found")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Data directory {} does not exist", self.config.root_dir.display());
                return Err(TransferError::not_found("file not found"));
            }
            Err(e) => {
                return Err(TransferError::internal(format!(
                    "failed to stat directory: {}",
                    e
                )))
            }
        }

        let storage_path = self.config.file_path(&name);
        let size = match fs::metadata(&storage_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(TransferError::not_found("file not found")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::not_found("file not found"))
            }
            Err(e) => {
                return Err(TransferError::internal(format!("failed to stat file: {}", e)))
            }
        };

        let file = File::open(&storage_path)
            .await
            .map_err(|e| TransferError::internal(format!("failed to open file: {}", e)))?;

        info!("Started reading file: {} ({} bytes)", name, size);

        Ok(FileReader {
            name,
            size,
            file,
            bytes_read: 0,
            chunk_size: self.config.chunk_size,
        })
    }

    /// List regular files in the data root, sorted by name.
    ///
    /// Entries that cannot be stat'ed are skipped.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>> {
        let mut entries = match fs::read_dir(&self.config.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::not_found("file not found"))
            }
            Err(e) => {
                return Err(TransferError::internal(format!(
                    "failed to read directory: {}",
                    e
                )))
            }
        };

        let mut files = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(TransferError::internal(format!(
                        "failed to read directory: {}",
                        e
                    )))
                }
            };

            let path = entry.path();
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: failed to get file info: {}", path.display(), e);
                    continue;
                }
            };

            if metadata.is_dir() {
                continue;
            }

            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Skipping {}: no modification time: {}", path.display(), e);
                    continue;
                }
            };

            files.push(StoredFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

/// File writer for streaming writes
pub struct FileWriter {
    name: String,
    storage_path: PathBuf,
    file: File,
    bytes_written: u64,
}

impl FileWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a chunk of data
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<usize> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| TransferError::internal(format!("failed to write data: {}", e)))?;
        self.bytes_written += data.len() as u64;

        debug!("Wrote {} bytes to {} (total: {})", data.len(), self.name, self.bytes_written);

        Ok(data.len())
    }

    /// Flush and sync the file; returns the number of bytes written.
    pub async fn finalize(mut self) -> Result<u64> {
        self.file
            .flush()
            .await
            .map_err(|e| TransferError::internal(format!("failed to flush file: {}", e)))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| TransferError::internal(format!("failed to sync file: {}", e)))?;

        info!(
            "Finalized file: {} ({} bytes) at {}",
            self.name,
            self.bytes_written,
            self.storage_path.display()
        );

        Ok(self.bytes_written)
    }
}

/// File reader for streaming reads
pub struct FileReader {
    name: String,
    size: u64,
    file: File,
    bytes_read: u64,
    chunk_size: usize,
}

impl FileReader {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the file when it was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk; every chunk but the last is exactly `chunk_size` long.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk = read_chunk(&mut self.file, self.chunk_size)
            .await
            .map_err(|e| TransferError::internal(format!("failed to read file: {}", e)))?;

        if let Some(data) = &chunk {
            self.bytes_read += data.len() as u64;
            debug!("Read {} bytes from {} (total: {})", data.len(), self.name, self.bytes_read);
        }

        Ok(chunk)
    }
}
