use std::fs::File;
use std::path::{Path, PathBuf};

use looper_transport::{AudioArc, MAX_IO_CHANS, MAX_WAVE_PATH, Wave};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Debug, thiserror::Error)]
pub enum WaveError {
    #[error("wave not found: {0}")]
    NotFound(PathBuf),

    #[error("wave path too long ({len} bytes): {path}")]
    PathTooLong { path: PathBuf, len: usize },

    #[error("unsupported channel count {channels} in {path} (max {MAX_IO_CHANS})")]
    UnsupportedChannels { path: PathBuf, channels: usize },

    #[error("wave has no audio track: {0}")]
    NoTrack(PathBuf),

    #[error("failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        source: SymphoniaError,
    },

    #[error("failed to resample '{path}': {source}")]
    Resample {
        path: PathBuf,
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve a wave path stored relative to `root` (a patch directory).
/// Absolute paths and paths that already exist are returned as-is.
pub fn resolve_wave_path(path: &Path, root: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let with_root = root.join(path);
    if with_root.exists() {
        return Some(with_root);
    }

    None
}

/// Decode a file into interleaved `f32` samples at its native rate.
pub fn decode_file(path: &Path) -> Result<AudioArc, WaveError> {
    let decode_err = |source| WaveError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| WaveError::NoTrack(path.to_path_buf()))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let track_id = track.id;

    if channels == 0 || channels > MAX_IO_CHANS {
        return Err(WaveError::UnsupportedChannels {
            path: path.to_path_buf(),
            channels,
        });
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(decode_err(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(decode_err)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(AudioArc::new(samples, sample_rate, channels as u16))
}

/// Load a wave for a sample channel, resampled to the engine rate.
pub fn load_wave(path: &Path, sample_rate: u32) -> Result<Wave, WaveError> {
    let len = path.as_os_str().len();
    if len > MAX_WAVE_PATH {
        return Err(WaveError::PathTooLong {
            path: path.to_path_buf(),
            len,
        });
    }
    if !path.exists() {
        return Err(WaveError::NotFound(path.to_path_buf()));
    }

    let audio = decode_file(path)?;
    let audio = if audio.sample_rate() != sample_rate {
        log::info!(
            "resampling {} from {} to {} Hz",
            path.display(),
            audio.sample_rate(),
            sample_rate
        );
        audio
            .resample(sample_rate)
            .map_err(|source| WaveError::Resample {
                path: path.to_path_buf(),
                source,
            })?
    } else {
        audio
    };

    Ok(Wave::new(audio, path))
}
