//! Built-in decoding with symphonia, encoding with hound.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::NormalizeError;

/// Shape of a decoded or inspected stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
}

/// Reads a WAV header without decoding the payload.
pub fn inspect_wav(path: &Path) -> Result<AudioInfo, NormalizeError> {
    let reader =
        hound::WavReader::open(path).map_err(|e| NormalizeError::Decode(e.to_string()))?;
    let spec = reader.spec();
    Ok(AudioInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        frames: u64::from(reader.duration()),
    })
}

/// Decodes `input` and writes it to `output` as 16-bit PCM WAV, keeping the
/// source sample rate and channel count.
///
/// Any failure of the built-in decoders is reported as `NormalizeError::Decode`.
pub fn decode_to_wav(input: &Path, output: &Path) -> Result<AudioInfo, NormalizeError> {
    let file = File::open(input).map_err(|e| NormalizeError::ReadInput {
        path: input.to_path_buf(),
        source: e,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = input.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| NormalizeError::Decode(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| NormalizeError::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| NormalizeError::Decode(format!("no decoder: {}", e)))?;

    let encode_err = |e: hound::Error| NormalizeError::Encode {
        path: output.to_path_buf(),
        message: e.to_string(),
    };

    let mut writer: Option<hound::WavWriter<std::io::BufWriter<File>>> = None;
    let mut info = AudioInfo {
        sample_rate: 0,
        channels: 0,
        frames: 0,
    };

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(NormalizeError::Decode(format!("read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // Corrupt frames are skipped
                log::debug!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(NormalizeError::Decode(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        if writer.is_none() {
            info.sample_rate = spec.rate;
            info.channels = spec.channels.count() as u16;
            let wav_spec = hound::WavSpec {
                channels: info.channels,
                sample_rate: info.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            writer = Some(hound::WavWriter::create(output, wav_spec).map_err(encode_err)?);
        }

        let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        if let Some(writer) = writer.as_mut() {
            for &sample in samples.samples() {
                writer.write_sample(sample).map_err(encode_err)?;
            }
        }
        info.frames += (samples.samples().len() / usize::from(info.channels.max(1))) as u64;
    }

    match writer {
        Some(writer) => {
            writer.finalize().map_err(encode_err)?;
            Ok(info)
        }
        None => Err(NormalizeError::Decode("no audio frames decoded".to_string())),
    }
}
