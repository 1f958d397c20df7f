//! Boundary layer: the operations clients invoke on jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::config::{Config, RetentionConfig};
use crate::error::{RegistryError, Result, StemsplitError, StorageError, UploadError};
use crate::job::{
    Job, SeparationModel, SeparationRequest, StatusReport, Stem, StemMode, UploadReceipt,
};
use crate::normalize::{AudioFormat, AudioNormalizer, FormatNormalizer};
use crate::reaper::RetentionReaper;
use crate::registry::{JobCounts, JobEventBroadcaster, JobRegistry};
use crate::separation::SeparationExecutor;
use crate::storage::JobStorage;

/// Parameters of a separation request as clients send them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeparateParams {
    pub file_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stem_mode: Option<String>,
}

/// Owns the registry, storage, normalizer and executor.
#[derive(Clone)]
pub struct JobService {
    registry: Arc<JobRegistry>,
    storage: JobStorage,
    normalizer: Arc<dyn FormatNormalizer>,
    executor: SeparationExecutor,
    max_upload_bytes: u64,
    retention: RetentionConfig,
}

impl JobService {
    /// Builds the service from configuration, creating the jobs directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.jobs_directory).map_err(|e| {
            StorageError::CreateDirectory {
                path: config.jobs_directory.clone(),
                source: e,
            }
        })?;

        let registry = Arc::new(JobRegistry::new());
        let storage = JobStorage::new(&config.jobs_directory);
        let executor = SeparationExecutor::new(
            Arc::clone(&registry),
            storage.clone(),
            config.separation.clone(),
        );

        Ok(Self::with_components(
            registry,
            storage,
            Arc::new(AudioNormalizer::from_config(&config.normalizer)),
            executor,
            config.max_upload_bytes,
            config.retention.clone(),
        ))
    }

    pub fn with_components(
        registry: Arc<JobRegistry>,
        storage: JobStorage,
        normalizer: Arc<dyn FormatNormalizer>,
        executor: SeparationExecutor,
        max_upload_bytes: u64,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            normalizer,
            executor,
            max_upload_bytes,
            retention,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &JobStorage {
        &self.storage
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        self.registry.events()
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn counts(&self) -> JobCounts {
        self.registry.counts()
    }

    /// Validates and stores an upload, registers the job and converts it to
    /// the canonical container.
    ///
    /// A conversion failure leaves the job in `error` and is returned here;
    /// the record is reclaimed by the retention sweep.
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadReceipt> {
        let filename = sanitize_filename(filename).ok_or(UploadError::EmptyFilename)?;

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let format =
            AudioFormat::from_extension(&extension).ok_or_else(|| {
                UploadError::UnsupportedExtension {
                    extension: extension.clone(),
                    allowed: AudioFormat::allowed_list(),
                }
            })?;

        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(UploadError::FileTooLarge {
                size,
                limit: self.max_upload_bytes,
            }
            .into());
        }

        let job_id = Uuid::new_v4().to_string();

        let storage = self.storage.clone();
        let id = job_id.clone();
        let source_path = tokio::task::spawn_blocking(move || {
            storage.store_upload(&id, format.extension(), &bytes)
        })
        .await
        .map_err(|e| StemsplitError::Internal(e.to_string()))??;

        let job = Job::new(
            &job_id,
            &filename,
            size,
            source_path.clone(),
            self.storage.job_dir(&job_id),
        );
        if let Err(e) = self.registry.create(job) {
            log::error!("Job id collision for {}: {}", job_id, e);
            return Err(e.into());
        }
        log::info!("Stored upload {} as job {} ({} bytes)", filename, job_id, size);

        let normalizer = Arc::clone(&self.normalizer);
        let dest = self.storage.canonical_path(&job_id);
        let normalized =
            tokio::task::spawn_blocking(move || normalizer.normalize(&source_path, &dest))
                .await
                .map_err(|e| StemsplitError::Internal(e.to_string()));

        match normalized {
            Ok(Ok(canonical)) => {
                self.registry.update::<_, RegistryError, _>(&job_id, |job| {
                    job.canonical_path = Some(canonical);
                    Ok(())
                })?;
            }
            Ok(Err(e)) => {
                let err = StemsplitError::from(e);
                self.record_failure(&job_id, &err);
                return Err(err);
            }
            Err(err) => {
                self.record_failure(&job_id, &err);
                return Err(err);
            }
        }

        Ok(UploadReceipt {
            file_id: job_id,
            filename,
            size,
        })
    }

    fn record_failure(&self, job_id: &str, err: &StemsplitError) {
        log::warn!("Upload {} could not be normalized: {}", job_id, err);
        let result = self.registry.update::<_, RegistryError, _>(job_id, |job| {
            job.fail(err.kind(), err.to_string());
            Ok(())
        });
        if let Err(e) = result {
            log::error!("Failed to record upload failure for {}: {}", job_id, e);
        }
    }

    /// Starts separation of an uploaded job. Returns once the job is queued.
    pub fn start_separation(&self, params: &SeparateParams) -> Result<()> {
        let model = match params.model.as_deref() {
            Some(model) => model
                .parse::<SeparationModel>()
                .map_err(StemsplitError::InvalidArgument)?,
            None => SeparationModel::default(),
        };
        let stem_mode = match params.stem_mode.as_deref() {
            Some(mode) => mode
                .parse::<StemMode>()
                .map_err(StemsplitError::InvalidArgument)?,
            None => StemMode::default(),
        };

        let job = self.registry.get(&params.file_id)?;
        let canonical = job
            .canonical_path
            .clone()
            .unwrap_or_else(|| self.storage.canonical_path(&job.id));

        self.executor
            .start(&job.id, &canonical, SeparationRequest { model, stem_mode })?;
        Ok(())
    }

    pub fn status(&self, file_id: &str) -> Result<StatusReport> {
        Ok(self.registry.get(file_id)?.status_report())
    }

    /// Path of a published stem. Unknown stems and stems the job does not
    /// have are `NotFound` whatever the job's status.
    pub fn stem_file(&self, file_id: &str, stem: &str) -> Result<PathBuf> {
        let job = self.registry.get(file_id)?;
        let not_found = || StemsplitError::StemNotFound {
            job_id: file_id.to_string(),
            stem: stem.to_string(),
        };

        let stem: Stem = stem.parse().map_err(|_| not_found())?;
        if !job.has_stem(stem) {
            return Err(not_found());
        }

        let path = self.storage.stem_path(file_id, stem);
        if !path.is_file() {
            log::error!("Stem {} of job {} is missing on disk", stem, file_id);
            return Err(not_found());
        }
        Ok(path)
    }

    pub async fn read_stem(&self, file_id: &str, stem: &str) -> Result<Vec<u8>> {
        let path = self.stem_file(file_id, stem)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::ReadFile { path, source: e })?;
        Ok(bytes)
    }

    pub fn cancel(&self, file_id: &str) -> Result<()> {
        self.executor.cancel(file_id)?;
        Ok(())
    }

    /// Cancels all running separations.
    pub fn shutdown(&self) {
        self.executor.cancel_all();
    }

    /// Retention reaper sharing this service's registry and storage.
    pub fn reaper(&self) -> RetentionReaper {
        RetentionReaper::new(
            Arc::clone(&self.registry),
            self.storage.clone(),
            self.retention.ttl(),
            self.retention.sweep_interval(),
        )
    }
}

/// Keeps only the final path component of a client-supplied name.
fn sanitize_filename(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::JobStatus;
    use tempfile::TempDir;

    fn service(max_upload_bytes: u64) -> (TempDir, JobService) {
        service_with_decoder(max_upload_bytes, None)
    }

    fn service_with_decoder(
        max_upload_bytes: u64,
        external_decoder: Option<&str>,
    ) -> (TempDir, JobService) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            jobs_directory: temp_dir.path().join("jobs"),
            max_upload_bytes,
            normalizer: crate::config::NormalizerConfig {
                external_decoder: external_decoder.map(str::to_string),
            },
            ..Default::default()
        };
        let service = JobService::from_config(&config).unwrap();
        (temp_dir, service)
    }

    fn wav_bytes() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..800 {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("song.mp3").as_deref(), Some("song.mp3"));
        assert_eq!(
            sanitize_filename("../../etc/track.wav").as_deref(),
            Some("track.wav")
        );
        assert_eq!(sanitize_filename("C:\\music\\a.flac").as_deref(), Some("a.flac"));
        assert_eq!(sanitize_filename("  "), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[tokio::test]
    async fn test_upload_wav_creates_uploaded_job() {
        let (_temp_dir, service) = service(1024 * 1024);
        let bytes = wav_bytes();
        let size = bytes.len() as u64;

        let receipt = service.upload("My Song.WAV", bytes).await.unwrap();

        assert_eq!(receipt.filename, "My Song.WAV");
        assert_eq!(receipt.size, size);
        let status = service.status(&receipt.file_id).unwrap();
        assert_eq!(status.status, JobStatus::Uploaded);
        assert_eq!(status.progress, 0);
        assert!(status.stems.is_empty());

        let job = service.registry().get(&receipt.file_id).unwrap();
        assert_eq!(job.canonical_path, Some(job.source_path.clone()));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_filename() {
        let (_temp_dir, service) = service(1024);
        let err = service.upload("", vec![1, 2, 3]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_extension() {
        let (_temp_dir, service) = service(1024);
        let err = service.upload("notes.txt", vec![1, 2, 3]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(err.to_string().contains("wav, flac, mp3, ogg, m4a, aac"));
    }

    #[tokio::test]
    async fn test_upload_rejects_too_large() {
        let (_temp_dir, service) = service(8);
        let err = service.upload("a.wav", vec![0; 9]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_upload_marks_job_error() {
        let (_temp_dir, service) = service(1024);
        let err = service
            .upload("broken.mp3", b"not audio at all".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let jobs = service.counts();
        assert_eq!(jobs.error, 1);
        assert_eq!(jobs.total(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_corrupt_upload_with_failing_decoder_is_unsupported_format() {
        let (_temp_dir, service) = service_with_decoder(1024, Some("false"));
        let err = service
            .upload("corrupt.mp3", b"not audio at all".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let counts = service.counts();
        assert_eq!(counts.error, 1);
    }

    #[tokio::test]
    async fn test_start_separation_validates_enums_first() {
        let (_temp_dir, service) = service(1024);
        let params = SeparateParams {
            file_id: "unknown".to_string(),
            model: Some("bogus".to_string()),
            stem_mode: None,
        };
        let err = service.start_separation(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let params = SeparateParams {
            file_id: "unknown".to_string(),
            ..Default::default()
        };
        let err = service.start_separation(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stem_file_not_found_cases() {
        let (_temp_dir, service) = service(1024 * 1024);
        let receipt = service.upload("a.wav", wav_bytes()).await.unwrap();

        let err = service.stem_file(&receipt.file_id, "guitar").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = service.stem_file(&receipt.file_id, "vocals").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = service.stem_file("missing", "vocals").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
