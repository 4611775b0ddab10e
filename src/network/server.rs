use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::admission::{AdmissionController, OperationKind};
use crate::config::Config;
use crate::grpc::file_transfer::file_transfer_server::FileTransferServer as GrpcFileTransferService;
use crate::grpc::FileTransferServiceImpl;
use crate::storage::{FileManager, StorageConfig};

/// File transfer server
pub struct FileTransferServer {
    listen_address: SocketAddr,
    service: FileTransferServiceImpl,
}

impl FileTransferServer {
    /// Create a new file transfer server
    pub fn new(
        listen_address: SocketAddr,
        file_manager: FileManager,
        admission: Arc<AdmissionController>,
    ) -> Self {
        let service = FileTransferServiceImpl::new(file_manager, admission);

        Self {
            listen_address,
            service,
        }
    }

    /// Build the server from application configuration
    pub fn from_config(config: &Config) -> Self {
        let file_manager = FileManager::new(StorageConfig::from(&config.storage));
        let admission = Arc::new(AdmissionController::new(config.server.limits));

        Self::new(config.server.listen_address, file_manager, admission)
    }

    fn log_limits(&self) {
        let admission = self.service.admission();
        info!(
            "Request limits: upload={}, download={}, list={}",
            admission.capacity(OperationKind::Upload),
            admission.capacity(OperationKind::Download),
            admission.capacity(OperationKind::List)
        );
    }

    /// Start the server on the configured address; stops on Ctrl-C.
    pub async fn start(self) -> Result<()> {
        info!("Starting gRPC server on {}", self.listen_address);
        self.log_limits();

        Server::builder()
            .add_service(GrpcFileTransferService::new(self.service))
            .serve_with_shutdown(self.listen_address, async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                }
            })
            .await
            .context("Server error")?;

        info!("Server stopped");
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr().context("Listener has no local address")?;
        info!("Starting gRPC server on {}", local_addr);
        self.log_limits();

        Server::builder()
            .add_service(GrpcFileTransferService::new(self.service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await
            .context("Server error")?;

        Ok(())
    }
}
