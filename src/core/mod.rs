pub mod engine;
pub mod hash;
pub mod ledger;
pub mod request;
pub mod run_status;
pub mod scanner;

pub use engine::{CancelHandle, RestoreSummary, RunProgress, RunReport, SyncConfig, SyncEngine};
pub use hash::{hash_file, hash_file_async, hash_reader, HashAlgorithm};
pub use ledger::Ledger;
pub use request::TransferRequest;
pub use run_status::RunStatusStore;
pub use scanner::{FileScanner, ScanConfig};
