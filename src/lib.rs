//! Chunked file store over gRPC.
//!
//! The server keeps uploaded files flat under one data root and gates each
//! operation kind with its own admission limit. The client streams files up,
//! lists them, and downloads them through a temporary file that is renamed
//! into place only after the transfer completed.

pub mod admission;
pub mod config;
pub mod error;
pub mod grpc;
pub mod network;
pub mod storage;

pub use error::{ErrorKind, Result, TransferError};
