//! Host runtime around the backup core: the periodic worker, the
//! exclusivity lock shared by backup and restore, and signal handling.

pub mod lock;
pub mod shutdown;
pub mod status;
pub mod worker;

pub use lock::{OperationGuard, OperationLock};
pub use shutdown::ShutdownCoordinator;
pub use status::{BackupStatus, StatusSnapshot};
pub use worker::{BackupKind, BackupWorker, WorkerSettings, WORKER_LOG_FILE};
