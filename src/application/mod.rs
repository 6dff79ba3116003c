pub mod download_queue;
pub mod reconciler;
pub mod registry;
pub mod transfer;

pub use download_queue::{DownloadEvent, DownloadQueue, Listener};
pub use reconciler::{resolve_key_state, resolve_state};
pub use registry::DownloadRegistry;
pub use transfer::{HttpTransfer, Transfer, TransferError};
