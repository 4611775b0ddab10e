pub mod client;
pub mod server;

pub use client::FileTransferClient;
pub use server::FileTransferServer;
