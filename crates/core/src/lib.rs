pub mod config;
pub mod events;
pub mod export;
pub mod invoices;
pub mod limiter;
pub mod metrics;
pub mod reimbursement;
pub mod repository;
pub mod sink;
pub mod testing;
pub mod transfer;
pub mod upload;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{DomainEvent, EventBus, EventEnvelope, EventHandler, EventKind, Subscription};
pub use export::{DownloadPackager, ExportConfig, ExportError, ExportProgress, PackageResult};
pub use invoices::{DeleteOutcome, InvoiceService};
pub use limiter::{ConcurrencyLimiter, LimiterError, LimiterOutcome};
pub use reimbursement::{ReimbursementSetAggregate, ReimbursementSetService, SetView};
pub use repository::{
    Invoice, InvoiceId, InvoiceRepository, InvoiceStatus, LocalRepository, ReimbursementSet,
    ReimbursementSetRepository, RepositoryError, SetId, SetStatus, SetStatusChange,
};
pub use sink::{select_sink, PlatformSink, SinkCapabilities, SinkConfig, SinkMode, SinkResult};
pub use transfer::{
    BatchSummary, Phase, ProgressSnapshot, TaskStatus, TransferBatch, TransferError,
    TransferState, TransferStateMachine, TransferTask,
};
pub use upload::{BatchHandle, SubmitWarning, UploadConfig, UploadError, UploadOrchestrator};
