use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, TransferError};
use crate::grpc::file_transfer::{
    file_transfer_client::FileTransferClient as GrpcFileTransferClient, upload_file_request::Data,
    Empty, FileInfo, GetFileRequest, GetFileResponse, UploadFileRequest,
};
use crate::storage::{read_chunk, sanitize_filename};

/// Prefix of every downloaded artifact in the client data directory
pub const DOWNLOAD_PREFIX: &str = "downloaded_";

/// Suffix of the in-flight download artifact
pub const TEMP_SUFFIX: &str = ".tmp";

/// Final local path for a downloaded file
pub fn download_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{}{}", DOWNLOAD_PREFIX, name))
}

/// Temporary local path for a download in progress
pub fn temp_download_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{}{}{}", DOWNLOAD_PREFIX, name, TEMP_SUFFIX))
}

/// File transfer client for a remote store
#[derive(Clone)]
pub struct FileTransferClient {
    client: GrpcFileTransferClient<Channel>,
    data_dir: PathBuf,
    chunk_size: usize,
    timeout: Duration,
}

impl FileTransferClient {
    /// Connect to the server named in `config`
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let address = &config.server_address;
        info!("Connecting to {}", address);

        let uri = if address.starts_with("http://") || address.starts_with("https://") {
            address.clone()
        } else {
            format!("http://{}", address)
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| {
                TransferError::invalid_argument(format!("invalid server address {}: {}", address, e))
            })?
            .connect_timeout(config.request_timeout())
            .connect()
            .await?;

        Ok(Self::new(channel, config))
    }

    /// Wrap an established channel
    pub fn new(channel: Channel, config: &ClientConfig) -> Self {
        Self {
            client: GrpcFileTransferClient::new(channel),
            data_dir: config.data_dir.clone(),
            chunk_size: config.chunk_size,
            timeout: config.request_timeout(),
        }
    }

    /// Upload a local file; returns the server's acknowledgement.
    pub async fn upload_file<P: AsRef<Path>>(&self, file_path: P) -> Result<String> {
        let file_path = file_path.as_ref();
        let filename = file_path
            .file_name()
            .ok_or_else(|| {
                TransferError::invalid_argument(format!("invalid file path: {}", file_path.display()))
            })?
            .to_string_lossy()
            .into_owned();

        let file = File::open(file_path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TransferError::not_found(format!("file not found: {}", file_path.display()))
            } else {
                TransferError::internal(format!("failed to open file: {}", e))
            }
        })?;

        info!("Uploading {} as {}", file_path.display(), filename);

        let message = self
            .with_deadline("UploadFile", self.send_upload(filename, file))
            .await?;

        info!("Server response: {}", message);
        Ok(message)
    }

    async fn send_upload(&self, filename: String, mut file: File) -> Result<String> {
        let chunk_size = self.chunk_size;
        let (failed_tx, failed_rx) = oneshot::channel::<TransferError>();

        let outbound = async_stream::stream! {
            let mut failed_tx = Some(failed_tx);
            let mut sent = 0u64;

            debug!("Sending filename: {}", filename);
            yield UploadFileRequest { data: Some(Data::Filename(filename)) };

            loop {
                match read_chunk(&mut file, chunk_size).await {
                    Ok(Some(content)) => {
                        sent += content.len() as u64;
                        debug!("Sending {} bytes (total: {})", content.len(), sent);
                        yield UploadFileRequest { data: Some(Data::Content(content)) };
                    }
                    Ok(None) => break,
                    Err(e) => {
                        if let Some(tx) = failed_tx.take() {
                            let _ = tx.send(TransferError::internal(format!(
                                "failed to read file: {}",
                                e
                            )));
                        }
                        // Never end the stream cleanly: a clean end would commit a
                        // truncated file on the server. The caller drops the call.
                        std::future::pending::<()>().await;
                    }
                }
            }
        };

        let mut request = Request::new(outbound);
        request.set_timeout(self.timeout);

        let mut client = self.client.clone();
        let call = client.upload_file(request);

        tokio::select! {
            response = call => Ok(response?.into_inner().message),
            Ok(err) = failed_rx => Err(err),
        }
    }

    /// List files held by the server
    pub async fn list_files(&self) -> Result<Vec<FileInfo>> {
        let mut request = Request::new(Empty {});
        request.set_timeout(self.timeout);

        let mut client = self.client.clone();
        let files = self
            .with_deadline("ListFiles", async move {
                Ok::<_, TransferError>(client.list_files(request).await?.into_inner().files)
            })
            .await?;

        info!("Found {} files", files.len());
        Ok(files)
    }

    /// Download `filename` into the data directory.
    ///
    /// Content goes to `downloaded_<name>.tmp` first and is renamed to
    /// `downloaded_<name>` only after the stream finished cleanly.
    ///
    /// Two downloads of the same name into the same directory share the
    /// temporary path and are not isolated from each other: the later one
    /// truncates the earlier one's artifact. Run them one at a time.
    pub async fn download_file(&self, filename: &str) -> Result<PathBuf> {
        let name = sanitize_filename(filename)?;
        info!("Downloading file: {}", name);

        let mut request = Request::new(GetFileRequest {
            filename: name.clone(),
        });
        request.set_timeout(self.timeout);

        let mut client = self.client.clone();
        let path = self
            .with_deadline("GetFile", async {
                let stream = client.get_file(request).await?.into_inner();
                self.write_download(&name, stream).await
            })
            .await?;

        info!("File {} downloaded to {}", name, path.display());
        Ok(path)
    }

    /// Materialize a download stream under the data directory.
    pub async fn write_download<S>(&self, name: &str, mut stream: S) -> Result<PathBuf>
    where
        S: Stream<Item = std::result::Result<GetFileResponse, Status>> + Unpin,
    {
        fs::create_dir_all(&self.data_dir).await.map_err(|e| {
            TransferError::internal(format!("failed to create directory: {}", e))
        })?;

        let tmp_path = temp_download_path(&self.data_dir, name);
        let final_path = download_path(&self.data_dir, name);

        let mut artifact = TempArtifact::new(tmp_path.clone());
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "Overwriting existing temporary file {} (interrupted or concurrent download)",
                    tmp_path.display()
                );
                File::create(&tmp_path).await.map_err(|e| {
                    TransferError::internal(format!("failed to create temporary file: {}", e))
                })?
            }
            Err(e) => {
                return Err(TransferError::internal(format!(
                    "failed to create temporary file: {}",
                    e
                )))
            }
        };

        let mut received = 0u64;
        while let Some(frame) = stream.next().await {
            let frame = frame?;
            file.write_all(&frame.content)
                .await
                .map_err(|e| TransferError::internal(format!("failed to write to file: {}", e)))?;
            received += frame.content.len() as u64;
            debug!("Received {} bytes (total: {})", frame.content.len(), received);
        }

        file.flush()
            .await
            .map_err(|e| TransferError::internal(format!("failed to flush file: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::internal(format!("failed to sync file: {}", e)))?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            TransferError::internal(format!("failed to rename temporary file: {}", e))
        })?;
        artifact.commit();

        debug!("Download complete: {} bytes", received);
        Ok(final_path)
    }

    async fn with_deadline<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::DeadlineExceeded(format!(
                "{} did not finish within {:?}",
                op, self.timeout
            ))),
        };

        if let Err(e) = &result {
            error!("{}: {}", op, e);
        }
        result
    }
}

/// Removes the temporary download file unless it was committed.
///
/// Runs on every exit path, including cancellation of the download future.
struct TempArtifact {
    path: PathBuf,
    committed: bool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary file {}: {}", self.path.display(), e),
        }
    }
}
