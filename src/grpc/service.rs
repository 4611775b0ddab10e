use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info};

use super::file_transfer::{
    file_transfer_server::FileTransfer, upload_file_request::Data, Empty, FileInfo,
    GetFileRequest, GetFileResponse, ListFilesResponse, UploadFileRequest, UploadFileResponse,
};
use crate::admission::{AdmissionController, AdmissionPermit, OperationKind};
use crate::error::TransferError;
use crate::storage::{FileManager, FileWriter};

/// Acknowledgement sent once an upload stream has been fully written
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully!";

type ResponseStream = Pin<Box<dyn Stream<Item = Result<GetFileResponse, Status>> + Send>>;

/// gRPC service implementation for file transfer
pub struct FileTransferServiceImpl {
    file_manager: Arc<FileManager>,
    admission: Arc<AdmissionController>,
}

impl FileTransferServiceImpl {
    /// Create new service
    pub fn new(file_manager: FileManager, admission: Arc<AdmissionController>) -> Self {
        Self {
            file_manager: Arc::new(file_manager),
            admission,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Consume an upload stream: one filename frame, then content frames until
    /// the client closes its side.
    pub async fn receive_upload<S>(&self, mut stream: S) -> Result<UploadFileResponse, TransferError>
    where
        S: Stream<Item = Result<UploadFileRequest, Status>> + Unpin,
    {
        let chunk_size = self.file_manager.chunk_size();
        let mut writer: Option<FileWriter> = None;

        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|status| {
                TransferError::internal(format!("failed to receive data: {}", status.message()))
            })?;

            match writer {
                None => writer = Some(self.open_upload(frame.data).await?),
                Some(ref mut w) => Self::write_frame(w, frame.data, chunk_size).await?,
            }
        }

        let writer = writer.ok_or_else(|| {
            TransferError::invalid_argument("empty upload: stream closed before a filename was sent")
        })?;

        let name = writer.name().to_string();
        let bytes = writer.finalize().await?;
        info!("File upload completed: {} ({} bytes)", name, bytes);

        Ok(UploadFileResponse {
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
        })
    }

    /// Handle the first frame of an upload: it must name the file.
    async fn open_upload(&self, data: Option<Data>) -> Result<FileWriter, TransferError> {
        match data {
            Some(Data::Filename(filename)) if !filename.is_empty() => {
                self.file_manager.start_write(&filename).await
            }
            Some(Data::Filename(_)) => Err(TransferError::invalid_argument(
                "first message must carry a non-empty filename",
            )),
            _ => Err(TransferError::invalid_argument(
                "first message must carry the filename",
            )),
        }
    }

    /// Handle a frame after the filename has been established.
    async fn write_frame(
        writer: &mut FileWriter,
        data: Option<Data>,
        chunk_size: usize,
    ) -> Result<(), TransferError> {
        match data {
            Some(Data::Filename(filename)) => Err(TransferError::invalid_argument(format!(
                "filename already set to {}, got {}",
                writer.name(),
                filename
            ))),
            Some(Data::Content(content)) if !content.is_empty() => {
                if content.len() > chunk_size {
                    return Err(TransferError::invalid_argument(format!(
                        "chunk of {} bytes exceeds limit of {} bytes",
                        content.len(),
                        chunk_size
                    )));
                }
                writer.write_chunk(&content).await?;
                Ok(())
            }
            _ => {
                debug!("Received empty content for file: {}", writer.name());
                Ok(())
            }
        }
    }

    /// Open a stored file and build the chunk stream for it.
    ///
    /// The stream owns `permit`, so the download slot is held until the last
    /// chunk is sent or the client goes away.
    pub async fn open_download(
        &self,
        filename: &str,
        permit: AdmissionPermit,
    ) -> Result<ResponseStream, TransferError> {
        let mut reader = self.file_manager.start_read(filename).await?;

        let stream = async_stream::stream! {
            let _permit = permit;
            let mut sent = 0u64;

            loop {
                match reader.read_chunk().await {
                    Ok(Some(content)) => {
                        sent += content.len() as u64;
                        yield Ok(GetFileResponse { content });
                    }
                    Ok(None) => {
                        info!("File download completed: {} ({} bytes)", reader.name(), sent);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read {}: {}", reader.name(), e);
                        yield Err(Status::from(e));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream) as ResponseStream)
    }

    /// Build the listing of the data root.
    pub async fn list_stored_files(&self) -> Result<ListFilesResponse, TransferError> {
        let files = self
            .file_manager
            .list_files()
            .await?
            .into_iter()
            .map(|f| {
                // Modification time stands in for creation time.
                let stamp = f.modified_display();
                FileInfo {
                    name: f.name,
                    creation_time: stamp.clone(),
                    modification_time: stamp,
                }
            })
            .collect();

        Ok(ListFilesResponse { files })
    }
}

fn log_failure(op: &str, err: TransferError) -> Status {
    error!("{} failed: {}", op, err);
    Status::from(err)
}

#[tonic::async_trait]
impl FileTransfer for FileTransferServiceImpl {
    async fn upload_file(
        &self,
        request: Request<Streaming<UploadFileRequest>>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        let _permit = self.admission.acquire(OperationKind::Upload)?;

        match request.remote_addr() {
            Some(addr) => info!("Receiving file upload from {}", addr),
            None => info!("Receiving file upload"),
        }

        let response = self
            .receive_upload(request.into_inner())
            .await
            .map_err(|e| log_failure("UploadFile", e))?;

        Ok(Response::new(response))
    }

    async fn list_files(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ListFilesResponse>, Status> {
        let _permit = self.admission.acquire(OperationKind::List)?;

        let response = self
            .list_stored_files()
            .await
            .map_err(|e| log_failure("ListFiles", e))?;

        info!("Listed {} files", response.files.len());

        Ok(Response::new(response))
    }

    type GetFileStream = ResponseStream;

    async fn get_file(
        &self,
        request: Request<GetFileRequest>,
    ) -> Result<Response<Self::GetFileStream>, Status> {
        let permit = self.admission.acquire(OperationKind::Download)?;
        let req = request.into_inner();

        info!("Serving file download: {}", req.filename);

        let stream = self
            .open_download(&req.filename, permit)
            .await
            .map_err(|e| log_failure("GetFile", e))?;

        Ok(Response::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use crate::storage::StorageConfig;
    use tonic::Code;

    fn service(root: std::path::PathBuf, chunk_size: usize, limits: LimitsConfig) -> FileTransferServiceImpl {
        let manager = FileManager::new(StorageConfig { root_dir: root, chunk_size });
        FileTransferServiceImpl::new(manager, Arc::new(AdmissionController::new(limits)))
    }

    fn filename(name: &str) -> Result<UploadFileRequest, Status> {
        Ok(UploadFileRequest {
            data: Some(Data::Filename(name.to_string())),
        })
    }

    fn content(bytes: &[u8]) -> Result<UploadFileRequest, Status> {
        Ok(UploadFileRequest {
            data: Some(Data::Content(bytes.to_vec())),
        })
    }

    async fn collect(mut stream: ResponseStream) -> Result<Vec<Vec<u8>>, Status> {
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item?.content);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_upload_writes_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().to_path_buf(), 16, LimitsConfig::default());

        let frames = vec![filename("notes.txt"), content(b"one "), content(b""), content(b"two")];
        let response = svc.receive_upload(tokio_stream::iter(frames)).await.unwrap();

        assert_eq!(response.message, UPLOAD_SUCCESS_MESSAGE);
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"one two");
    }

    #[tokio::test]
    async fn test_upload_filename_only_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().to_path_buf(), 16, LimitsConfig::default());

        svc.receive_upload(tokio_stream::iter(vec![filename("empty.bin")]))
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(dir.path().join("empty.bin")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_upload_protocol_violations() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().to_path_buf(), 4, LimitsConfig::default());

        let cases: Vec<Vec<Result<UploadFileRequest, Status>>> = vec![
            vec![],
            vec![content(b"data first")],
            vec![filename("")],
            vec![filename("..")],
            vec![filename("a.txt"), filename("b.txt")],
            vec![filename("big.txt"), content(b"12345")],
        ];

        for frames in cases {
            let err = svc.receive_upload(tokio_stream::iter(frames)).await.unwrap_err();
            assert_eq!(Status::from(err).code(), Code::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn test_upload_receive_error_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().to_path_buf(), 16, LimitsConfig::default());

        let frames = vec![filename("cut.txt"), content(b"abc"), Err(Status::cancelled("gone"))];
        let err = svc.receive_upload(tokio_stream::iter(frames)).await.unwrap_err();

        assert_eq!(Status::from(err).code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_upload_traversal_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let svc = service(root.clone(), 16, LimitsConfig::default());

        let frames = vec![filename("../secret"), content(b"s")];
        svc.receive_upload(tokio_stream::iter(frames)).await.unwrap();

        assert!(root.join("secret").exists());
        assert!(!dir.path().join("secret").exists());
    }

    #[tokio::test]
    async fn test_download_streams_chunks_and_holds_permit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"abcdefghij").unwrap();
        let svc = service(dir.path().to_path_buf(), 4, LimitsConfig::default());

        let response = svc
            .get_file(Request::new(GetFileRequest { filename: "data.bin".into() }))
            .await
            .unwrap();
        assert_eq!(svc.admission().in_flight(OperationKind::Download), 1);

        let chunks = collect(response.into_inner()).await.unwrap();
        assert_eq!(chunks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
        assert_eq!(svc.admission().in_flight(OperationKind::Download), 0);
    }

    #[tokio::test]
    async fn test_download_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret"), b"top").unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();
        let svc = service(store, 4, LimitsConfig::default());

        let err = svc
            .get_file(Request::new(GetFileRequest { filename: "missing".into() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::NotFound);

        // `../secret` resolves to `store/secret`, which does not exist.
        let err = svc
            .get_file(Request::new(GetFileRequest { filename: "../secret".into() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::NotFound);

        let err = svc
            .get_file(Request::new(GetFileRequest { filename: String::new() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::InvalidArgument);

        assert_eq!(svc.admission().in_flight(OperationKind::Download), 0);
    }

    #[tokio::test]
    async fn test_list_files_response() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b"), b"2").unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();
        let svc = service(dir.path().to_path_buf(), 4, LimitsConfig::default());

        let files = svc
            .list_files(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner()
            .files;

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(files[0].creation_time, files[0].modification_time);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().join("absent"), 4, LimitsConfig::default());

        let err = svc.list_files(Request::new(Empty {})).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_saturated_permits_are_resource_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let limits = LimitsConfig {
            upload_requests: 1,
            download_requests: 1,
            list_requests: 1,
        };
        let svc = service(dir.path().to_path_buf(), 4, limits);

        let held_list = svc.admission().acquire(OperationKind::List).unwrap();
        let err = svc.list_files(Request::new(Empty {})).await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(err.message(), crate::error::TOO_MANY_REQUESTS);

        let _held_download = svc.admission().acquire(OperationKind::Download).unwrap();
        let err = svc
            .get_file(Request::new(GetFileRequest { filename: "x".into() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::ResourceExhausted);

        drop(held_list);
        assert!(svc.list_files(Request::new(Empty {})).await.is_ok());
    }
}
