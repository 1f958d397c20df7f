#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stemsplit::config::{Config, NormalizerConfig, SeparationConfig};
use stemsplit::{JobService, JobStatus, StatusReport};
use tempfile::TempDir;

/// Writes the fake separator to the given directory.
///
/// It accepts the real tool's arguments, prints tqdm-style progress to stderr
/// and copies its input to `<out>/<name>/<track>/<stem>.wav` for every stem.
pub const FAKE_SEPARATOR: &str = r#"#!/bin/sh
out=""
name=""
two=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift 2 ;;
    --name) name="$2"; shift 2 ;;
    --two-stems) two="$2"; shift 2 ;;
    *) input="$1"; shift ;;
  esac
done
track=$(basename "$input")
track="${track%.*}"
dir="$out/$name/$track"
mkdir -p "$dir"
echo "Selected model is a bag of 1 models. You will see that many progress bars per track."
echo "Separating track $input"
for p in 10 35 60 85 100; do
  printf '%s%%|#####     | 5.0/10.0 [00:01<00:01]\n' "$p" >&2
  sleep 0.05
done
if [ -n "$two" ]; then
  stems="vocals no_vocals"
else
  stems="vocals drums bass other"
fi
for s in $stems; do
  cp "$input" "$dir/$s.wav"
done
if [ "$name" = "htdemucs_6s" ]; then
  cp "$input" "$dir/guitar.wav"
  cp "$input" "$dir/piano.wav"
fi
"#;

pub const FAILING_SEPARATOR: &str = r#"#!/bin/sh
echo "Separating track $@"
echo "torchcodec is not installed, falling back" >&2
echo "RuntimeError: audio stream is corrupt" >&2
exit 3
"#;

pub const SILENT_SEPARATOR: &str = r#"#!/bin/sh
echo "Separating track"
exit 0
"#;

pub const NO_STEMS_SEPARATOR: &str = r#"#!/bin/sh
echo "Separating track"
echo "OSError: [Errno 28] No space left on device" >&2
exit 0
"#;

pub const SLOW_SEPARATOR: &str = r#"#!/bin/sh
echo "Selected model is a bag of 1 models."
exec sleep 30
"#;

pub struct TestService {
    pub temp_dir: TempDir,
    pub service: JobService,
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Service whose separator is `sh <script>`.
pub fn service_with_script(body: &str, tweak: impl FnOnce(&mut SeparationConfig)) -> TestService {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "separator.sh", body);

    let mut separation = SeparationConfig {
        program: "sh".to_string(),
        program_args: vec![script.to_string_lossy().into_owned()],
        max_concurrent: 2,
        grace_period_ms: 200,
        progress_interval_ms: 20,
        ..Default::default()
    };
    tweak(&mut separation);

    let config = Config {
        jobs_directory: temp_dir.path().join("jobs"),
        normalizer: NormalizerConfig {
            external_decoder: None,
        },
        separation,
        ..Default::default()
    };
    let service = JobService::from_config(&config).unwrap();
    TestService { temp_dir, service }
}

/// One second of a 440 Hz tone as 16-bit mono WAV bytes.
pub fn sine_wav(sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for i in 0..sample_rate {
        let t = i as f32 / sample_rate as f32;
        let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
        writer.write_sample((sample * i16::MAX as f32 * 0.5) as i16).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

/// Polls until the job is `done` or `error`, recording every progress value seen.
pub async fn wait_for_terminal(
    service: &JobService,
    file_id: &str,
    timeout: Duration,
) -> (StatusReport, Vec<u8>) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let status = service.status(file_id).unwrap();
        seen.push(status.progress);
        if matches!(status.status, JobStatus::Done | JobStatus::Error) {
            return (status, seen);
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {} still {:?} after {:?}", file_id, status.status, timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(
    service: &JobService,
    file_id: &str,
    wanted: JobStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    while service.status(file_id).unwrap().status != wanted {
        if tokio::time::Instant::now() > deadline {
            panic!("job {} never reached {:?}", file_id, wanted);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
