pub mod service;

pub use service::FileTransferServiceImpl;

/// Generated protobuf messages and tonic stubs for `proto/file_transfer.proto`.
pub mod file_transfer {
    tonic::include_proto!("file_transfer");
}
