pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{
    default_jobs_directory, Config, LogFormat, LoggingConfig, NormalizerConfig, RetentionConfig,
    SeparationConfig, DEFAULT_MAX_UPLOAD_BYTES,
};
