//! Job data model: lifecycle status, model and stem selections, status reports.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// `done` and `error` are final; only the reaper touches such jobs again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// A separation has been claimed and not yet finished.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pretrained separation model passed to the external tool by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SeparationModel {
    #[default]
    #[serde(rename = "htdemucs")]
    Htdemucs,
    #[serde(rename = "htdemucs_ft")]
    HtdemucsFt,
    #[serde(rename = "htdemucs_6s")]
    Htdemucs6s,
    #[serde(rename = "mdx_q")]
    MdxQ,
}

impl SeparationModel {
    pub const ALL: [SeparationModel; 4] = [
        SeparationModel::Htdemucs,
        SeparationModel::HtdemucsFt,
        SeparationModel::Htdemucs6s,
        SeparationModel::MdxQ,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeparationModel::Htdemucs => "htdemucs",
            SeparationModel::HtdemucsFt => "htdemucs_ft",
            SeparationModel::Htdemucs6s => "htdemucs_6s",
            SeparationModel::MdxQ => "mdx_q",
        }
    }
}

impl fmt::Display for SeparationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeparationModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                format!("Unknown model '{}'. Allowed: {}", s, allowed.join(", "))
            })
    }
}

/// One separated audio component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stem {
    Vocals,
    NoVocals,
    Drums,
    Bass,
    Other,
}

impl Stem {
    pub const ALL: [Stem; 5] = [
        Stem::Vocals,
        Stem::NoVocals,
        Stem::Drums,
        Stem::Bass,
        Stem::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stem::Vocals => "vocals",
            Stem::NoVocals => "no_vocals",
            Stem::Drums => "drums",
            Stem::Bass => "bass",
            Stem::Other => "other",
        }
    }

    /// Name of the file the separation tool writes for this stem.
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.as_str())
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stem| stem.as_str() == s)
            .ok_or_else(|| format!("Unknown stem '{}'", s))
    }
}

/// Which stem set a separation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StemMode {
    #[default]
    Vocals,
    All,
}

impl StemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StemMode::Vocals => "vocals",
            StemMode::All => "all",
        }
    }

    /// Stems a successful run must produce, in reporting order.
    pub fn expected_stems(&self) -> &'static [Stem] {
        match self {
            StemMode::Vocals => &[Stem::Vocals, Stem::NoVocals],
            StemMode::All => &[Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other],
        }
    }

    /// Stem passed to the tool's two-stem switch, if any.
    pub fn two_stems(&self) -> Option<Stem> {
        match self {
            StemMode::Vocals => Some(Stem::Vocals),
            StemMode::All => None,
        }
    }
}

impl fmt::Display for StemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StemMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vocals" => Ok(StemMode::Vocals),
            "all" => Ok(StemMode::All),
            other => Err(format!(
                "Unknown stem mode '{}'. Allowed: vocals, all",
                other
            )),
        }
    }
}

/// A single separation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub model: Option<SeparationModel>,
    pub stem_mode: Option<StemMode>,
    pub stems: Vec<Stem>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub original_filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source_path: PathBuf,
    pub canonical_path: Option<PathBuf>,
    pub work_dir: PathBuf,
}

impl Job {
    /// Creates a freshly uploaded job.
    pub fn new(
        id: &str,
        original_filename: &str,
        size_bytes: u64,
        source_path: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Uploaded,
            progress: 0,
            model: None,
            stem_mode: None,
            stems: Vec::new(),
            error: None,
            error_kind: None,
            original_filename: original_filename.to_string(),
            size_bytes,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            source_path,
            canonical_path: None,
            work_dir,
        }
    }

    /// Moves the job to `error`. Progress is left where it was.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(message.into());
        self.error_kind = Some(kind);
        self.stems.clear();
        self.finished_at = Some(Utc::now());
    }

    /// Moves the job to `done` with its published stems.
    pub fn complete(&mut self, stems: Vec<Stem>) {
        self.status = JobStatus::Done;
        self.progress = 100;
        self.stems = stems;
        self.error = None;
        self.error_kind = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn has_stem(&self, stem: Stem) -> bool {
        self.status == JobStatus::Done && self.stems.contains(&stem)
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            progress: self.progress,
            stems: self.stems.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind,
        }
    }
}

/// What polling clients see for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatus,
    pub progress: u8,
    pub stems: Vec<Stem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Result of an accepted upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
}

/// Parameters of a separation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparationRequest {
    pub model: SeparationModel,
    pub stem_mode: StemMode,
}
