use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error category, recorded on failed jobs and used by the
/// HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    MissingDependency,
    FileTooLarge,
    NotFound,
    DuplicateId,
    AlreadyRunning,
    AlreadyFinished,
    NotRunning,
    Timeout,
    ExternalProcess,
    Cancelled,
    InvalidArgument,
    Storage,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::MissingDependency => "missing_dependency",
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DuplicateId => "duplicate_id",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::AlreadyFinished => "already_finished",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExternalProcess => "external_process",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StemsplitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Upload rejected: {0}")]
    Upload(#[from] UploadError),

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Separation error: {0}")]
    Separation(#[from] SeparationError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Stem '{stem}' not found for job {job_id}")]
    StemNotFound { job_id: String, stem: String },

    #[error("Background task failed: {0}")]
    Internal(String),
}

impl StemsplitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StemsplitError::Config(_) => ErrorKind::Config,
            StemsplitError::Storage(e) => e.kind(),
            StemsplitError::Registry(e) => e.kind(),
            StemsplitError::Upload(e) => e.kind(),
            StemsplitError::Normalize(e) => e.kind(),
            StemsplitError::Separation(e) => e.kind(),
            StemsplitError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StemsplitError::StemNotFound { .. } => ErrorKind::NotFound,
            StemsplitError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job id already registered: {0}")]
    DuplicateId(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::DuplicateId(_) => ErrorKind::DuplicateId,
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Empty filename")]
    EmptyFilename,

    #[error("Unsupported file type '{extension}'. Allowed: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },

    #[error("File too large: {size} bytes (max {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::EmptyFilename => ErrorKind::InvalidArgument,
            UploadError::UnsupportedExtension { .. } => ErrorKind::UnsupportedFormat,
            UploadError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
        }
    }
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Required decoder '{tool}' is not installed")]
    MissingDependency { tool: String },

    #[error("Failed to read audio file '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Failed to write canonical WAV '{path}': {message}")]
    Encode { path: PathBuf, message: String },

    #[error("External decoder failed: {0}")]
    ExternalDecoder(String),
}

impl NormalizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NormalizeError::UnsupportedFormat(_) | NormalizeError::Decode(_) => {
                ErrorKind::UnsupportedFormat
            }
            NormalizeError::MissingDependency { .. } => ErrorKind::MissingDependency,
            NormalizeError::ReadInput { .. } | NormalizeError::Encode { .. } => {
                ErrorKind::Storage
            }
            NormalizeError::ExternalDecoder(_) => ErrorKind::UnsupportedFormat,
        }
    }
}

#[derive(Error, Debug)]
pub enum SeparationError {
    #[error("Separation already queued or running for job {0}")]
    AlreadyRunning(String),

    #[error("Job {0} already finished; submit a new upload to separate again")]
    AlreadyFinished(String),

    #[error("No separation is running for job {0}")]
    NotRunning(String),

    #[error("Separation program '{program}' not found")]
    MissingDependency { program: String },

    #[error("Failed to launch separation process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Separation timed out after {0}s")]
    Timeout(u64),

    #[error("Separation cancelled")]
    Cancelled,

    #[error("{0}")]
    ExternalProcess(String),

    #[error(
        "Separation finished but expected stems are missing: {missing}{}",
        diagnostics_suffix(.diagnostics)
    )]
    MissingOutputs {
        missing: String,
        /// Tail of the tool's stderr, empty when it wrote nothing useful.
        diagnostics: String,
    },

    #[error("Separation supervisor failed: {0}")]
    Supervisor(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SeparationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SeparationError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            SeparationError::AlreadyFinished(_) => ErrorKind::AlreadyFinished,
            SeparationError::NotRunning(_) => ErrorKind::NotRunning,
            SeparationError::MissingDependency { .. } => ErrorKind::MissingDependency,
            SeparationError::Timeout(_) => ErrorKind::Timeout,
            SeparationError::Cancelled => ErrorKind::Cancelled,
            SeparationError::Launch(_)
            | SeparationError::ExternalProcess(_)
            | SeparationError::MissingOutputs { .. } => ErrorKind::ExternalProcess,
            SeparationError::Supervisor(_) => ErrorKind::Internal,
            SeparationError::Registry(e) => e.kind(),
            SeparationError::Storage(e) => e.kind(),
        }
    }
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!("\n{}", diagnostics)
    }
}

pub type Result<T> = std::result::Result<T, StemsplitError>;
