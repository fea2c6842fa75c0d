use std::ops::{Index, IndexMut};

use crate::MAX_IO_CHANS;

/// Fixed-capacity, frame-indexed sample buffer.
///
/// Samples are stored interleaved in a single arena of `frames × channels`,
/// so `buffer[frame][channel]` addresses one sample. The arena is allocated
/// once by [`AudioBuffer::new`] and never grows afterwards: every other
/// method works in place, which makes the type usable from the audio thread.
///
/// ```
/// use looper_transport::AudioBuffer;
///
/// let mut buffer = AudioBuffer::new(4, 2);
/// buffer[3][1] = 0.5;
/// assert_eq!(buffer[3], [0.0, 0.5]);
/// assert_eq!(buffer.frames(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
}

impl AudioBuffer {
    /// # Panics
    ///
    /// Panics if `channels` is 0 or above [`MAX_IO_CHANS`].
    pub fn new(frames: usize, channels: usize) -> Self {
        assert!(
            channels > 0 && channels <= MAX_IO_CHANS,
            "channels must be in 1..={MAX_IO_CHANS}"
        );
        Self {
            data: vec![0.0; frames * channels],
            frames,
            channels,
        }
    }

    /// Wrap already interleaved samples.
    pub fn from_interleaved(data: Vec<f32>, channels: usize) -> Self {
        assert!(
            channels > 0 && channels <= MAX_IO_CHANS,
            "channels must be in 1..={MAX_IO_CHANS}"
        );
        assert_eq!(
            data.len() % channels,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            frames: data.len() / channels,
            data,
            channels,
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True once the arena has been allocated with a non-zero size.
    #[inline]
    pub fn is_allocd(&self) -> bool {
        !self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_interleaved(self) -> Vec<f32> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Silence every frame from `frame` to the end.
    pub fn clear_from(&mut self, frame: usize) {
        let start = (frame * self.channels).min(self.data.len());
        self.data[start..].fill(0.0);
    }

    pub fn set_all(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for sample in &mut self.data {
            *sample *= gain;
        }
    }

    /// Copy as many frames as both buffers hold. A mono source is spread
    /// over every destination channel.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let frames = self.frames.min(other.frames);
        for f in 0..frames {
            for c in 0..self.channels {
                self[f][c] = other[f][c % other.channels];
            }
        }
    }

    /// Sum `other × gain` into this buffer, frame by frame.
    pub fn add_from(&mut self, other: &AudioBuffer, gain: f32) {
        let frames = self.frames.min(other.frames);
        for f in 0..frames {
            for c in 0..self.channels {
                self[f][c] += other[f][c % other.channels] * gain;
            }
        }
    }

    /// Largest absolute sample value, used by tests and level meters.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

impl Index<usize> for AudioBuffer {
    type Output = [f32];

    #[inline]
    fn index(&self, frame: usize) -> &[f32] {
        let start = frame * self.channels;
        &self.data[start..start + self.channels]
    }
}

impl IndexMut<usize> for AudioBuffer {
    #[inline]
    fn index_mut(&mut self, frame: usize) -> &mut [f32] {
        let start = frame * self.channels;
        &mut self.data[start..start + self.channels]
    }
}
