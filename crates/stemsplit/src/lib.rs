pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod normalize;
pub mod reaper;
pub mod registry;
pub mod sanitize;
pub mod separation;
pub mod service;
pub mod storage;

pub use config::{load_config, load_config_from_str, Config};
pub use error::{
    ConfigError, ErrorKind, NormalizeError, RegistryError, Result, SeparationError,
    StemsplitError, StorageError, UploadError,
};
pub use job::{
    Job, JobStatus, SeparationModel, SeparationRequest, StatusReport, Stem, StemMode,
    UploadReceipt,
};
pub use logging::{init_logging, LoggingError};
pub use normalize::{AudioFormat, AudioNormalizer, FormatNormalizer};
pub use reaper::{ReapReport, RetentionReaper};
pub use registry::{JobCounts, JobEvent, JobEventBroadcaster, JobEventKind, JobRegistry};
pub use separation::{PhaseEstimator, ProgressEstimator, SeparationExecutor};
pub use service::{JobService, SeparateParams};
pub use storage::JobStorage;
