#![cfg(unix)]

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use stemsplit::{ErrorKind, JobStatus, SeparateParams, Stem};

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

fn params(file_id: &str, model: Option<&str>, stem_mode: Option<&str>) -> SeparateParams {
    SeparateParams {
        file_id: file_id.to_string(),
        model: model.map(str::to_string),
        stem_mode: stem_mode.map(str::to_string),
    }
}

#[tokio::test]
async fn test_upload_starts_uploaded_with_zero_progress() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    let status = ctx.service.status(&receipt.file_id).unwrap();
    assert_eq!(status.status, JobStatus::Uploaded);
    assert_eq!(status.progress, 0);
    assert!(status.stems.is_empty());
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_end_to_end_vocals_mode() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, Some("htdemucs"), Some("vocals")))
        .unwrap();
    let (status, seen) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Done, "error: {:?}", status.error);
    assert_eq!(status.progress, 100);
    assert_eq!(status.stems, vec![Stem::Vocals, Stem::NoVocals]);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {:?}", seen);

    let bytes = ctx.service.read_stem(&receipt.file_id, "vocals").await.unwrap();
    assert_eq!(&bytes[..4], b"RIFF");

    let job_dir = ctx.service.storage().job_dir(&receipt.file_id);
    assert!(job_dir.join("stems/no_vocals.wav").is_file());
    assert!(!job_dir.join("separated").exists());
    assert!(!job_dir.join("source.wav").exists());
}

#[tokio::test]
async fn test_all_mode_publishes_four_stems() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, Some("htdemucs_6s"), Some("all")))
        .unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Done, "error: {:?}", status.error);
    assert_eq!(
        status.stems,
        vec![Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other]
    );
    assert!(ctx.service.stem_file(&receipt.file_id, "drums").is_ok());

    let err = ctx.service.stem_file(&receipt.file_id, "guitar").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = ctx.service.stem_file(&receipt.file_id, "no_vocals").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_second_start_is_rejected_without_disturbing_first() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();
    let request = params(&receipt.file_id, None, None);

    ctx.service.start_separation(&request).unwrap();
    let err = ctx.service.start_separation(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);

    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;
    assert_eq!(status.status, JobStatus::Done);

    let err = ctx.service.start_separation(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyFinished);
}

#[tokio::test]
async fn test_non_zero_exit_records_filtered_error() {
    let ctx = service_with_script(FAILING_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Error);
    assert!(status.stems.is_empty());
    assert_eq!(status.error_kind, Some(ErrorKind::ExternalProcess));
    let message = status.error.unwrap();
    assert!(message.contains("RuntimeError: audio stream is corrupt"));
    assert!(!message.contains("torchcodec"));
}

#[tokio::test]
async fn test_missing_outputs_fail_the_job() {
    let ctx = service_with_script(SILENT_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Error);
    assert!(status.error.unwrap().contains("vocals, no_vocals"));
}

#[tokio::test]
async fn test_missing_outputs_keep_tool_diagnostics() {
    let ctx = service_with_script(NO_STEMS_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Error);
    assert_eq!(status.error_kind, Some(ErrorKind::ExternalProcess));
    let message = status.error.unwrap();
    assert!(message.contains("vocals, no_vocals"));
    assert!(message.contains("No space left on device"), "{}", message);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let ctx = service_with_script(SLOW_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    wait_for_status(&ctx.service, &receipt.file_id, JobStatus::Running, RUN_TIMEOUT).await;

    ctx.service.cancel(&receipt.file_id).unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;
    assert_eq!(status.status, JobStatus::Error);
    assert_eq!(status.error_kind, Some(ErrorKind::Cancelled));

    let err = ctx.service.cancel(&receipt.file_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotRunning);
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let ctx = service_with_script(SLOW_SEPARATOR, |s| s.timeout_secs = 1);
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    let (status, _) = wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    assert_eq!(status.status, JobStatus::Error);
    assert_eq!(status.error_kind, Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_reaped_job_is_gone() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();
    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    let reaper = ctx.service.reaper();
    let later = Utc::now() + chrono::Duration::hours(2);
    let first = reaper.sweep_at(later);
    let second = reaper.sweep_at(later);

    assert_eq!(first.removed, vec![receipt.file_id.clone()]);
    assert!(second.is_empty());
    assert!(!ctx.service.storage().job_dir(&receipt.file_id).exists());

    let err = ctx.service.status(&receipt.file_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = ctx.service.stem_file(&receipt.file_id, "vocals").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_never_started_upload_expires() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    let report = ctx
        .service
        .reaper()
        .sweep_at(Utc::now() + chrono::Duration::hours(2));

    assert_eq!(report.removed, vec![receipt.file_id.clone()]);
    assert!(!ctx.service.storage().job_dir(&receipt.file_id).exists());
    let err = ctx
        .service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_events_follow_the_lifecycle() {
    let ctx = service_with_script(FAKE_SEPARATOR, |_| {});
    let mut events = ctx.service.events().subscribe();
    let receipt = ctx.service.upload("song.wav", sine_wav(8000)).await.unwrap();

    ctx.service
        .start_separation(&params(&receipt.file_id, None, None))
        .unwrap();
    wait_for_terminal(&ctx.service, &receipt.file_id, RUN_TIMEOUT).await;

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, receipt.file_id);
        if statuses.last() != Some(&event.status) {
            statuses.push(event.status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            JobStatus::Uploaded,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done
        ]
    );
}
