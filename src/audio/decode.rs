use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::DecodeConfig;
use crate::error::AnalysisError;

/// Mono PCM samples at a fixed rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn peak_amplitude(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }
}

/// Which rung of the decoder ladder produced a buffer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeOrigin {
    FullDecoder,
    PcmWav,
    /// Placeholder tone; `failures` holds one message per real decoder that gave up.
    Synthetic { failures: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct DecodedAudio {
    pub buffer: AudioBuffer,
    pub origin: DecodeOrigin,
}

impl DecodedAudio {
    pub fn is_synthetic(&self) -> bool {
        matches!(self.origin, DecodeOrigin::Synthetic { .. })
    }
}

/// One rung of the decoder ladder.
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn origin(&self) -> DecodeOrigin;
    fn try_load(&self, path: &Path) -> Result<AudioBuffer>;
}

/// Compressed and variable-rate formats via symphonia.
pub struct FullDecoder;

/// Uncompressed PCM WAV only, via hound.
pub struct PcmWavDecoder;

impl DecodeStrategy for FullDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn origin(&self) -> DecodeOrigin {
        DecodeOrigin::FullDecoder
    }

    fn try_load(&self, path: &Path) -> Result<AudioBuffer> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Failed to probe audio format")?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .context("No audio tracks found")?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count()).max(1);
        let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        let mut all_samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            downmix_into(&mut all_samples, sample_buf.samples(), channels);
        }

        if all_samples.is_empty() {
            anyhow::bail!("Decoder produced no samples");
        }

        Ok(AudioBuffer::new(all_samples, sample_rate))
    }
}

impl DecodeStrategy for PcmWavDecoder {
    fn name(&self) -> &'static str {
        "pcm-wav"
    }

    fn origin(&self) -> DecodeOrigin {
        DecodeOrigin::PcmWav
    }

    fn try_load(&self, path: &Path) -> Result<AudioBuffer> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Not a readable PCM WAV: {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .context("Failed to read float samples")?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .context("Failed to read integer samples")?
            }
        };

        let mut samples = Vec::with_capacity(interleaved.len() / channels);
        downmix_into(&mut samples, &interleaved, channels);

        if samples.is_empty() {
            anyhow::bail!("WAV file contains no samples");
        }

        Ok(AudioBuffer::new(samples, spec.sample_rate))
    }
}

fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
    } else {
        for frame in interleaved.chunks(channels) {
            out.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }
}

/// Fixed-frequency tone used when every real decoder has failed.
pub fn placeholder_tone(config: &DecodeConfig) -> AudioBuffer {
    let sr = config.placeholder_sample_rate.max(1);
    let len = (config.placeholder_duration_s.max(0.0) * sr as f32) as usize;
    let step = 2.0 * std::f32::consts::PI * config.placeholder_tone_hz / sr as f32;
    let samples = (0..len).map(|i| 0.5 * (step * i as f32).sin()).collect();
    AudioBuffer::new(samples, sr)
}

/// Audio ingestion with a richest-first decoder ladder.
///
/// `load` only fails for files that are missing, empty or unreadable; every
/// other failure falls through to the next rung and, finally, to a tagged
/// synthetic placeholder.
pub struct AudioSource {
    strategies: Vec<Box<dyn DecodeStrategy>>,
    config: DecodeConfig,
}

impl AudioSource {
    pub fn new(config: &DecodeConfig) -> Self {
        Self::with_strategies(vec![Box::new(FullDecoder), Box::new(PcmWavDecoder)], config)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DecodeStrategy>>, config: &DecodeConfig) -> Self {
        Self {
            strategies,
            config: config.clone(),
        }
    }

    pub fn load(&self, path: &Path) -> Result<DecodedAudio, AnalysisError> {
        check_readable(path)?;

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.try_load(path) {
                Ok(buffer) => {
                    log::info!(
                        "Decoded {} with {}: {} samples, {}Hz, {:.1}s",
                        path.display(),
                        strategy.name(),
                        buffer.samples.len(),
                        buffer.sample_rate,
                        buffer.duration()
                    );
                    return Ok(DecodedAudio {
                        buffer,
                        origin: strategy.origin(),
                    });
                }
                Err(err) => {
                    log::warn!("{} failed on {}: {:#}", strategy.name(), path.display(), err);
                    failures.push(format!("{}: {:#}", strategy.name(), err));
                }
            }
        }

        log::warn!(
            "All decoders failed for {}; substituting a synthetic placeholder tone",
            path.display()
        );
        Ok(DecodedAudio {
            buffer: placeholder_tone(&self.config),
            origin: DecodeOrigin::Synthetic { failures },
        })
    }
}

fn check_readable(path: &Path) -> Result<(), AnalysisError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AnalysisError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(AnalysisError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if !meta.is_file() {
        return Err(AnalysisError::FileNotFound(path.to_path_buf()));
    }
    if meta.len() == 0 {
        return Err(AnalysisError::EmptyFile(path.to_path_buf()));
    }
    std::fs::File::open(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Load through the default ladder, abandoning the decode after the
/// configured timeout. The abandoned worker thread is left to finish on its own.
pub fn load_with_timeout(path: &Path, config: &DecodeConfig) -> Result<DecodedAudio, AnalysisError> {
    let Some(seconds) = config.timeout_s else {
        return AudioSource::new(config).load(path);
    };
    let timeout = Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| AnalysisError::Config(format!("invalid decode timeout: {}s", seconds)))?;

    let (tx, rx) = crossbeam_channel::bounded(1);
    let owned: PathBuf = path.to_path_buf();
    let worker_config = config.clone();
    std::thread::spawn(move || {
        let result = AudioSource::new(&worker_config).load(&owned);
        // Receiver may already have given up
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
            log::warn!("Decoding {} timed out after {:.1}s", path.display(), seconds);
            Err(AnalysisError::DecodeTimeout {
                path: path.to_path_buf(),
                seconds,
            })
        }
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(AnalysisError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other("decoder worker terminated"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    struct Failing;

    impl DecodeStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn origin(&self) -> DecodeOrigin {
            DecodeOrigin::FullDecoder
        }
        fn try_load(&self, _path: &Path) -> Result<AudioBuffer> {
            anyhow::bail!("unsupported")
        }
    }

    #[test]
    fn missing_file_is_hard_error() {
        let source = AudioSource::new(&DecodeConfig::default());
        let err = source.load(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound(_)));
    }

    #[test]
    fn empty_file_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();
        let err = AudioSource::new(&DecodeConfig::default()).load(&path).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyFile(_)));
    }

    #[test]
    fn garbage_degrades_to_tagged_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let config = DecodeConfig::default();
        let decoded = AudioSource::new(&config).load(&path).unwrap();
        assert!(decoded.is_synthetic());
        match &decoded.origin {
            DecodeOrigin::Synthetic { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected origin {:?}", other),
        }
        assert_eq!(decoded.buffer.sample_rate, config.placeholder_sample_rate);
        assert_eq!(decoded.buffer.samples.len(), 22050);
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<i16>> = (0..800).map(|_| vec![16384, 0]).collect();
        write_wav(&path, 2, &frames);

        let decoded = AudioSource::new(&DecodeConfig::default()).load(&path).unwrap();
        assert_eq!(decoded.origin, DecodeOrigin::FullDecoder);
        assert_eq!(decoded.buffer.sample_rate, 8000);
        assert_eq!(decoded.buffer.samples.len(), 800);
        assert!((decoded.buffer.samples[10] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn falls_through_to_pcm_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let frames: Vec<Vec<i16>> = (0..400).map(|i| vec![(i * 10) as i16]).collect();
        write_wav(&path, 1, &frames);

        let source = AudioSource::with_strategies(
            vec![Box::new(Failing), Box::new(PcmWavDecoder)],
            &DecodeConfig::default(),
        );
        let decoded = source.load(&path).unwrap();
        assert_eq!(decoded.origin, DecodeOrigin::PcmWav);
        assert_eq!(decoded.buffer.samples.len(), 400);
        assert!(!decoded.is_synthetic());
    }

    #[test]
    fn timeout_wrapper_passes_results_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, &vec![vec![1000i16]; 256]);
        let config = DecodeConfig {
            timeout_s: Some(30.0),
            ..DecodeConfig::default()
        };
        let decoded = load_with_timeout(&path, &config).unwrap();
        assert_eq!(decoded.buffer.samples.len(), 256);

        let err = load_with_timeout(Path::new("/nope.wav"), &config).unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound(_)));
    }

    #[test]
    fn unusable_timeout_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, &vec![vec![1000i16]; 256]);
        for seconds in [f64::NAN, f64::INFINITY, -2.0, 0.0] {
            let config = DecodeConfig {
                timeout_s: Some(seconds),
                ..DecodeConfig::default()
            };
            let err = load_with_timeout(&path, &config).unwrap_err();
            assert!(matches!(err, AnalysisError::Config(_)), "{} gave {:?}", seconds, err);
        }
    }
}
