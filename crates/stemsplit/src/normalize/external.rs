//! Fallback decoding through an external tool (ffmpeg-compatible CLI).

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::NormalizeError;

const STDERR_TAIL_LINES: usize = 5;

/// Runs `<tool> -i <input> ... <output>` and checks that it wrote `output`.
pub fn decode_with_tool(tool: &str, input: &Path, output: &Path) -> Result<(), NormalizeError> {
    let result = Command::new(tool)
        .args(["-nostdin", "-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le"])
        .arg(output)
        .stdin(Stdio::null())
        .output();

    let out = match result {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(NormalizeError::MissingDependency {
                tool: tool.to_string(),
            });
        }
        Err(e) => {
            return Err(NormalizeError::ExternalDecoder(format!(
                "failed to launch {}: {}",
                tool, e
            )));
        }
    };

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let tail = tail_lines(&stderr, STDERR_TAIL_LINES);
        return Err(NormalizeError::ExternalDecoder(if tail.is_empty() {
            format!("{} exited with {}", tool, out.status)
        } else {
            tail
        }));
    }

    if !output.exists() {
        return Err(NormalizeError::ExternalDecoder(format!(
            "{} produced no output",
            tool
        )));
    }

    Ok(())
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}
