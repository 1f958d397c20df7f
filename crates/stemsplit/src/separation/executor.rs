//! Supervised runs of the external separation tool.

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::SeparationConfig;
use crate::error::{RegistryError, SeparationError, StorageError};
use crate::job::{JobStatus, SeparationRequest, Stem};
use crate::registry::JobRegistry;
use crate::sanitize::redact_path;
use crate::separation::command::SeparationCommand;
use crate::separation::diagnostics::DiagnosticTail;
use crate::separation::outputs::collect_expected;
use crate::separation::progress::{PhaseEstimator, ProgressEstimator, MAX_ESTIMATE};
use crate::storage::JobStorage;

const DIAGNOSTIC_LINES: usize = 20;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(10);

/// Builds a fresh estimator for each run.
pub type EstimatorFactory = Arc<dyn Fn(Instant) -> Box<dyn ProgressEstimator> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: OutputStream,
    text: String,
}

enum Supervision {
    Line(OutputLine),
    OutputClosed,
    Exited(std::io::Result<ExitStatus>),
    Grace,
    Tick,
    TimedOut,
    Cancelled,
}

/// Launches and supervises one separation task per job.
///
/// `start` only claims the job and spawns; everything else happens on the
/// supervising task, which is the sole writer of the job's terminal state.
#[derive(Clone)]
pub struct SeparationExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    registry: Arc<JobRegistry>,
    storage: JobStorage,
    settings: SeparationConfig,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<String, CancellationToken>>,
    estimator: EstimatorFactory,
}

impl SeparationExecutor {
    pub fn new(registry: Arc<JobRegistry>, storage: JobStorage, settings: SeparationConfig) -> Self {
        let estimator: EstimatorFactory =
            Arc::new(|now| Box::new(PhaseEstimator::new(now)) as Box<dyn ProgressEstimator>);
        Self::with_estimator(registry, storage, settings, estimator)
    }

    pub fn with_estimator(
        registry: Arc<JobRegistry>,
        storage: JobStorage,
        settings: SeparationConfig,
        estimator: EstimatorFactory,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                storage,
                settings,
                permits,
                active: Mutex::new(HashMap::new()),
                estimator,
            }),
        }
    }

    /// Claims the job (`uploaded -> queued`) and spawns its supervising task.
    ///
    /// Must be called from within a Tokio runtime. Returns without waiting for
    /// the run; a job that is already queued or running is left untouched.
    pub fn start(
        &self,
        job_id: &str,
        canonical: &Path,
        request: SeparationRequest,
    ) -> Result<(), SeparationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SeparationError::Supervisor(e.to_string()))?;

        let token = CancellationToken::new();
        {
            let mut active = self.inner.active();
            if active.contains_key(job_id) {
                return Err(SeparationError::AlreadyRunning(job_id.to_string()));
            }
            active.insert(job_id.to_string(), token.clone());
        }

        let claim = self.inner.registry.update(job_id, |job| match job.status {
            JobStatus::Uploaded => {
                job.status = JobStatus::Queued;
                job.progress = 0;
                job.model = Some(request.model);
                job.stem_mode = Some(request.stem_mode);
                Ok(())
            }
            JobStatus::Queued | JobStatus::Running => {
                Err(SeparationError::AlreadyRunning(job.id.clone()))
            }
            JobStatus::Done | JobStatus::Error => {
                Err(SeparationError::AlreadyFinished(job.id.clone()))
            }
        });
        if let Err(e) = claim {
            self.inner.active().remove(job_id);
            return Err(e);
        }

        log::info!(
            "Queued separation for job {} (model={}, stems={})",
            job_id,
            request.model,
            request.stem_mode
        );

        let span = tracing::info_span!(
            "separation",
            job_id = %job_id,
            model = %request.model,
            stem_mode = %request.stem_mode
        );
        let inner = Arc::clone(&self.inner);
        let job_id = job_id.to_string();
        let canonical = canonical.to_path_buf();

        runtime.spawn(async move {
            let run = {
                let inner = Arc::clone(&inner);
                let job_id = job_id.clone();
                tokio::spawn(
                    async move { inner.run(&job_id, &canonical, request, token).await }
                        .instrument(span),
                )
            };

            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(SeparationError::Supervisor(
                    "supervising task panicked".to_string(),
                )),
                Err(_) => Err(SeparationError::Supervisor(
                    "supervising task was aborted".to_string(),
                )),
            };
            inner.finish(&job_id, outcome);
        });

        Ok(())
    }

    /// Requests cancellation of a queued or running job.
    pub fn cancel(&self, job_id: &str) -> Result<(), SeparationError> {
        let job = self.inner.registry.get(job_id)?;
        if !job.status.is_active() {
            return Err(SeparationError::NotRunning(job_id.to_string()));
        }

        match self.inner.active().get(job_id) {
            Some(token) => {
                log::info!("Cancelling separation for job {}", job_id);
                token.cancel();
                Ok(())
            }
            None => Err(SeparationError::NotRunning(job_id.to_string())),
        }
    }

    /// Cancels every queued or running job.
    pub fn cancel_all(&self) {
        let active = self.inner.active();
        for (job_id, token) in active.iter() {
            log::info!("Cancelling separation for job {} (shutdown)", job_id);
            token.cancel();
        }
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.inner.active().contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }
}

impl ExecutorInner {
    fn active(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Executor active-job lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn run(
        &self,
        job_id: &str,
        canonical: &Path,
        request: SeparationRequest,
        token: CancellationToken,
    ) -> Result<Vec<Stem>, SeparationError> {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit.map_err(|_| {
                SeparationError::Supervisor("concurrency limiter closed".to_string())
            })?,
            _ = token.cancelled() => return Err(SeparationError::Cancelled),
        };

        let out_dir = self.storage.separation_dir(job_id);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: out_dir.clone(),
                source: e,
            })?;

        let command = SeparationCommand::build(
            &self.settings,
            request.model,
            request.stem_mode,
            canonical,
            &out_dir,
        );
        log::info!(
            "Launching {} on {}",
            command.program,
            redact_path(canonical)
        );

        let mut child = command.to_tokio().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SeparationError::MissingDependency {
                    program: command.program.clone(),
                }
            } else {
                SeparationError::Launch(e)
            }
        })?;

        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                OutputStream::Stdout,
                tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                OutputStream::Stderr,
                tx.clone(),
            )));
        }
        drop(tx);

        let mut estimator = (self.estimator)(Instant::now());
        let mut diagnostics = DiagnosticTail::new(DIAGNOSTIC_LINES);
        let mut running = false;
        let mut output_open = true;

        let timeout = self.settings.timeout();
        let deadline = tokio::time::sleep(timeout.unwrap_or(Duration::ZERO));
        tokio::pin!(deadline);
        let grace = tokio::time::sleep(self.settings.grace_period());
        tokio::pin!(grace);
        let mut ticker =
            tokio::time::interval(self.settings.progress_interval().max(MIN_PROGRESS_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            let event = tokio::select! {
                status = child.wait() => Supervision::Exited(status),
                line = rx.recv(), if output_open => match line {
                    Some(line) => Supervision::Line(line),
                    None => Supervision::OutputClosed,
                },
                _ = &mut grace, if !running => Supervision::Grace,
                _ = ticker.tick() => Supervision::Tick,
                _ = &mut deadline, if timeout.is_some() => Supervision::TimedOut,
                _ = token.cancelled() => Supervision::Cancelled,
            };

            match event {
                Supervision::Line(line) => {
                    if !running {
                        self.mark_running(job_id)?;
                        running = true;
                    }
                    self.observe(&line, estimator.as_mut(), &mut diagnostics);
                }
                Supervision::OutputClosed => output_open = false,
                Supervision::Grace => {
                    self.mark_running(job_id)?;
                    running = true;
                }
                Supervision::Tick => {
                    if running {
                        self.report_progress(job_id, estimator.estimate(Instant::now()));
                    }
                }
                Supervision::Exited(status) => break status,
                Supervision::TimedOut => {
                    let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                    log::warn!("Separation for job {} timed out after {}s", job_id, secs);
                    terminate(&mut child, &readers).await;
                    return Err(SeparationError::Timeout(secs));
                }
                Supervision::Cancelled => {
                    terminate(&mut child, &readers).await;
                    return Err(SeparationError::Cancelled);
                }
            }
        };

        let status = exit.map_err(|e| {
            SeparationError::Supervisor(format!("failed to wait for separation process: {}", e))
        })?;

        if output_open {
            let drain = async {
                while let Some(line) = rx.recv().await {
                    self.observe(&line, estimator.as_mut(), &mut diagnostics);
                }
            };
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
                log::warn!(
                    "Output of separation for job {} still open after exit, ignoring the rest",
                    job_id
                );
            }
        }
        for reader in &readers {
            reader.abort();
        }

        if !running {
            self.mark_running(job_id)?;
        }

        if !status.success() {
            let message = if diagnostics.is_empty() {
                match status.code() {
                    Some(code) => format!("Separation process exited with code {}", code),
                    None => "Separation process was terminated by a signal".to_string(),
                }
            } else {
                diagnostics.render()
            };
            return Err(SeparationError::ExternalProcess(message));
        }

        self.report_progress(job_id, estimator.estimate(Instant::now()));

        let produced = collect_expected(
            &out_dir.join(request.model.as_str()),
            request.stem_mode.expected_stems(),
        )
        .map_err(|e| match e {
            SeparationError::MissingOutputs { missing, .. } => SeparationError::MissingOutputs {
                missing,
                diagnostics: diagnostics.render(),
            },
            other => other,
        })?;

        let mut stems = Vec::with_capacity(produced.len());
        for (stem, path) in produced {
            self.storage.publish_stem(job_id, stem, &path)?;
            stems.push(stem);
        }
        Ok(stems)
    }

    fn observe(
        &self,
        line: &OutputLine,
        estimator: &mut dyn ProgressEstimator,
        diagnostics: &mut DiagnosticTail,
    ) {
        log::debug!("[{:?}] {}", line.stream, line.text);
        estimator.observe_line(&line.text, Instant::now());
        if line.stream == OutputStream::Stderr {
            diagnostics.push(&line.text);
        }
    }

    fn mark_running(&self, job_id: &str) -> Result<(), SeparationError> {
        self.registry.update(job_id, |job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    fn report_progress(&self, job_id: &str, estimate: u8) {
        let result = self
            .registry
            .update::<_, RegistryError, _>(job_id, |job| {
                if job.status == JobStatus::Running {
                    job.progress = estimate.min(MAX_ESTIMATE);
                }
                Ok(())
            });
        if let Err(e) = result {
            log::warn!("Failed to record progress for job {}: {}", job_id, e);
        }
    }

    /// Records the outcome. Intermediates are released first so a client
    /// that sees a terminal status never races the cleanup.
    fn finish(&self, job_id: &str, outcome: Result<Vec<Stem>, SeparationError>) {
        if !self.settings.keep_intermediates {
            if let Err(e) = self.storage.remove_intermediates(job_id) {
                log::warn!("Failed to remove intermediates of job {}: {}", job_id, e);
            }
        }
        self.active().remove(job_id);

        let commit = self
            .registry
            .update::<_, RegistryError, _>(job_id, |job| {
                match &outcome {
                    Ok(stems) => job.complete(stems.clone()),
                    Err(e) => job.fail(e.kind(), e.to_string()),
                }
                Ok(())
            });

        match (&outcome, commit) {
            (_, Err(e)) => log::error!("Failed to record outcome of job {}: {}", job_id, e),
            (Ok(stems), Ok(())) => log::info!(
                "Separation for job {} finished with {} stems",
                job_id,
                stems.len()
            ),
            (Err(e), Ok(())) => log::warn!("Separation for job {} failed: {}", job_id, e),
        }
    }
}

async fn terminate(child: &mut Child, readers: &[JoinHandle<()>]) {
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill separation process: {}", e);
    }
    for reader in readers {
        reader.abort();
    }
}

/// Forwards output lines, splitting on `\n` and on the `\r` that progress
/// bars use to redraw themselves.
async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let mut lines = Vec::new();
        let consumed = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => {
                for &byte in chunk {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            lines.push(String::from_utf8_lossy(&pending).into_owned());
                            pending.clear();
                        }
                    } else {
                        pending.push(byte);
                    }
                }
                chunk.len()
            }
            Err(e) => {
                log::debug!("Stopped reading separation output: {}", e);
                break;
            }
        };
        reader.consume(consumed);

        for text in lines {
            if tx.send(OutputLine { stream, text }).await.is_err() {
                return;
            }
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(OutputLine { stream, text }).await;
    }
}
