//! Per-operation admission control.
//!
//! Each operation kind has its own counting semaphore sized from
//! [`LimitsConfig`]. Acquisition never queues: when no permit is free the
//! caller gets [`TransferError::ResourceExhausted`] straight away.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::error::{Result, TransferError};

/// Operation kinds gated by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Upload,
    Download,
    List,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::List => "list",
        };
        f.write_str(name)
    }
}

struct Gate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Gate {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

/// Three independent permit pools: upload, download and list.
pub struct AdmissionController {
    upload: Gate,
    download: Gate,
    list: Gate,
}

impl AdmissionController {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            upload: Gate::new(limits.upload_requests),
            download: Gate::new(limits.download_requests),
            list: Gate::new(limits.list_requests),
        }
    }

    fn gate(&self, kind: OperationKind) -> &Gate {
        match kind {
            OperationKind::Upload => &self.upload,
            OperationKind::Download => &self.download,
            OperationKind::List => &self.list,
        }
    }

    /// Take a permit for `kind` or fail with `ResourceExhausted`.
    pub fn acquire(&self, kind: OperationKind) -> Result<AdmissionPermit> {
        let gate = self.gate(kind);

        match Arc::clone(&gate.semaphore).try_acquire_owned() {
            Ok(permit) => {
                debug!(
                    "Admitted {} request ({} of {} slots free)",
                    kind,
                    gate.semaphore.available_permits(),
                    gate.capacity
                );
                Ok(AdmissionPermit {
                    kind,
                    _permit: permit,
                })
            }
            Err(_) => {
                warn!("Rejected {} request: all {} slots in use", kind, gate.capacity);
                Err(TransferError::ResourceExhausted)
            }
        }
    }

    /// Configured capacity for `kind`.
    pub fn capacity(&self, kind: OperationKind) -> usize {
        self.gate(kind).capacity
    }

    /// Permits currently free for `kind`.
    pub fn available(&self, kind: OperationKind) -> usize {
        self.gate(kind).semaphore.available_permits()
    }

    /// Operations of `kind` currently in flight.
    pub fn in_flight(&self, kind: OperationKind) -> usize {
        self.capacity(kind) - self.available(kind)
    }
}

/// A held admission slot.
///
/// The slot returns to its pool when the permit is dropped, so it is released
/// exactly once on every exit path of the holder.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    kind: OperationKind,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit").field("kind", &self.kind).finish()
    }
}
