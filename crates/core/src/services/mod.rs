//! Domain services driving the ingestion pipeline.

pub mod decoder;
pub mod indexer;
pub mod ledger;
pub mod replay;
pub mod retry;

pub use decoder::{PaymentRecorded, decode_payment, payment_topic};
pub use indexer::{CycleOutcome, CycleReport, IndexerConfig, IndexerService, RetryPassReport};
pub use ledger::LedgerWriter;
pub use replay::{ReplayFailure, ReplayReport, ReplayService};
pub use retry::{RetryDecision, RetryPipeline};
