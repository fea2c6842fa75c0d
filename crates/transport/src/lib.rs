mod buffer;
mod midi;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

pub use buffer::AudioBuffer;
pub use midi::MidiEvent;

/// Audio I/O is stereo at most.
pub const MAX_IO_CHANS: usize = 2;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const MIN_BUFFER_SIZE: usize = 8;
pub const MAX_BUFFER_SIZE: usize = 4096;

pub const DEFAULT_VOL: f32 = 1.0;
pub const DEFAULT_PAN: f32 = 0.5;
pub const DEFAULT_PITCH: f32 = 1.0;
pub const MIN_PITCH: f32 = 0.1;
pub const MAX_PITCH: f32 = 4.0;
pub const MAX_BOOST_DB: f32 = 20.0;

pub const DEFAULT_BPM: f32 = 120.0;
pub const MIN_BPM: f32 = 20.0;
pub const MAX_BPM: f32 = 999.0;
pub const DEFAULT_BEATS: u32 = 4;
pub const DEFAULT_BARS: u32 = 1;
pub const MAX_BEATS: u32 = 32;
pub const MAX_BARS: u32 = 32;
pub const MAX_QUANTIZE: u32 = 8;

/// Longest wave path accepted by the loader.
pub const MAX_WAVE_PATH: usize = 4096;

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn linear_to_db(gain: f32) -> f32 {
    20.0 * gain.log10()
}

/// Upper bound of a channel's boost gain.
pub fn max_boost() -> f32 {
    db_to_linear(MAX_BOOST_DB)
}

/// Shared, immutable audio sample data.
///
/// `AudioArc` stores interleaved samples in an `Arc<[f32]>`, so cloning a
/// wave into a new session snapshot only bumps a reference count. The
/// sample data itself is never mutated once created.
///
/// # Examples
///
/// ```
/// use looper_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let audio2 = audio.clone();
/// assert_eq!(audio.frames(), 2);
/// assert_eq!(audio2.sample(1, 0), 1.0);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Create a new `AudioArc` from owned interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    /// Silent audio of `frames` frames.
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// Take the contents of a frame buffer, e.g. a finished input take.
    pub fn from_audio_buffer(buffer: AudioBuffer, sample_rate: u32) -> Self {
        let channels = buffer.channels() as u16;
        Self::new(buffer.into_interleaved(), sample_rate, channels)
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// One sample; a mono wave answers the same value for every channel.
    /// Out-of-range frames read as silence.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        self.samples
            .get(frame * channels + channel % channels)
            .copied()
            .unwrap_or(0.0)
    }

    /// Resample to a target rate. Same rate is a cheap clone.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }
        resample_audio_arc(self, target_sample_rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Decoded audio loaded into a sample channel.
///
/// A *logical* wave exists only in memory (an input take that has not been
/// saved yet); `edited` marks waves changed since they were read from disk.
#[derive(Debug, Clone)]
pub struct Wave {
    audio: AudioArc,
    path: PathBuf,
    logical: bool,
    edited: bool,
}

impl Wave {
    pub fn new(audio: AudioArc, path: impl Into<PathBuf>) -> Self {
        Self {
            audio,
            path: path.into(),
            logical: false,
            edited: false,
        }
    }

    /// An in-memory wave with no backing file yet.
    pub fn logical(audio: AudioArc, name: &str) -> Self {
        Self {
            audio,
            path: PathBuf::from(format!("{name}.wav")),
            logical: true,
            edited: false,
        }
    }

    #[inline]
    pub fn audio(&self) -> &AudioArc {
        &self.audio
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension.
    pub fn basename(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_logical(&self) -> bool {
        self.logical
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn set_edited(&mut self, edited: bool) {
        self.edited = edited;
    }

    /// Point the wave at the file it was just written to.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.logical = false;
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.audio.frames()
    }
}

/// Resample with rubato's sinc interpolator.
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }
    if audio.is_empty() {
        return Ok(AudioArc::new(Vec::new(), target_sample_rate, audio.channels));
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    let resample_ratio = target_sample_rate as f64 / audio.sample_rate as f64;

    let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
    for frame_idx in 0..input_frames {
        for (ch, input) in input_channels.iter_mut().enumerate() {
            input.push(audio.samples()[frame_idx * channels + ch]);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;
    let output_channels = resampler.process(&input_channels, None)?;

    let output_frames = output_channels[0].len();
    let mut output_samples = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for output in &output_channels {
            output_samples.push(output[frame_idx]);
        }
    }

    Ok(AudioArc::new(
        output_samples,
        target_sample_rate,
        audio.channels,
    ))
}
