//! Conversion of uploaded audio into the canonical container (16-bit PCM WAV).

pub mod decoder;
pub mod external;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::NormalizerConfig;
use crate::error::NormalizeError;
use crate::sanitize::redact_path;

/// Accepted upload containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    M4a,
    Aac,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Wav,
        AudioFormat::Flac,
        AudioFormat::Mp3,
        AudioFormat::Ogg,
        AudioFormat::M4a,
        AudioFormat::Aac,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "mp3" => Some(AudioFormat::Mp3),
            "ogg" => Some(AudioFormat::Ogg),
            "m4a" => Some(AudioFormat::M4a),
            "aac" => Some(AudioFormat::Aac),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
        }
    }

    /// Comma separated list for error messages.
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.extension())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Produces the canonical file for an uploaded input.
///
/// Implementations are blocking and write at most one file, `dest`.
pub trait FormatNormalizer: Send + Sync {
    /// Returns the path of the canonical file, which is `input` itself when
    /// no conversion was needed.
    fn normalize(&self, input: &Path, dest: &Path) -> Result<PathBuf, NormalizeError>;
}

/// Built-in decoders first, then an optional external decoder tool.
pub struct AudioNormalizer {
    external_decoder: Option<String>,
}

impl AudioNormalizer {
    pub fn new(external_decoder: Option<String>) -> Self {
        Self { external_decoder }
    }

    pub fn from_config(config: &NormalizerConfig) -> Self {
        Self::new(config.external_decoder.clone())
    }

    fn fallback(&self, input: &Path, dest: &Path, reason: &str) -> Result<PathBuf, NormalizeError> {
        let _ = std::fs::remove_file(dest);

        let tool = match &self.external_decoder {
            Some(tool) => tool,
            None => {
                return Err(NormalizeError::UnsupportedFormat(format!(
                    "{} ({})",
                    redact_path(input),
                    reason
                )))
            }
        };

        log::info!(
            "Built-in decoders could not read {} ({}), falling back to {}",
            redact_path(input),
            reason,
            tool
        );
        external::decode_with_tool(tool, input, dest)?;
        Ok(dest.to_path_buf())
    }
}

impl Default for AudioNormalizer {
    fn default() -> Self {
        Self::from_config(&NormalizerConfig::default())
    }
}

impl FormatNormalizer for AudioNormalizer {
    fn normalize(&self, input: &Path, dest: &Path) -> Result<PathBuf, NormalizeError> {
        let _span = tracing::info_span!("normalize", file = %redact_path(input)).entered();

        let extension = input.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = AudioFormat::from_extension(extension)
            .ok_or_else(|| NormalizeError::UnsupportedFormat(extension.to_string()))?;

        if !input.exists() {
            return Err(NormalizeError::ReadInput {
                path: input.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "input file missing"),
            });
        }

        if format == AudioFormat::Wav {
            match decoder::inspect_wav(input) {
                Ok(info) => {
                    log::debug!(
                        "{} is already WAV ({} Hz, {} channels), using as is",
                        redact_path(input),
                        info.sample_rate,
                        info.channels
                    );
                    return Ok(input.to_path_buf());
                }
                Err(e) => {
                    log::debug!("WAV header check failed for {}: {}", redact_path(input), e);
                }
            }
        }

        match decoder::decode_to_wav(input, dest) {
            Ok(info) => {
                log::info!(
                    "Normalized {} to {} Hz / {} channels ({} frames)",
                    redact_path(input),
                    info.sample_rate,
                    info.channels,
                    info.frames
                );
                Ok(dest.to_path_buf())
            }
            Err(NormalizeError::Decode(reason)) => self.fallback(input, dest, &reason),
            Err(e) => Err(e),
        }
    }
}
