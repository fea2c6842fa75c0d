use looper_engine::{Clock, Sequencer};
use looper_transport::{DEFAULT_BARS, DEFAULT_BEATS, DEFAULT_BPM, DEFAULT_SAMPLE_RATE};

/// Display resolution of a beat.
pub const TICKS_PER_BEAT: u64 = 960;

/// Tempo and meter of the loop, for converting sequencer frames into
/// musical positions.
#[derive(Debug, Clone, Copy)]
pub struct TimeContext {
    pub bpm: f32,
    pub beats: u32,
    pub bars: u32,
    pub sample_rate: u32,
}

impl TimeContext {
    pub fn new(bpm: f32, beats: u32, bars: u32, sample_rate: u32) -> Self {
        Self {
            bpm,
            beats: beats.max(1),
            bars: bars.clamp(1, beats.max(1)),
            sample_rate,
        }
    }

    pub fn from_sequencer(sequencer: &Sequencer) -> Self {
        Self::new(
            sequencer.bpm(),
            sequencer.beats(),
            sequencer.bars(),
            sequencer.sample_rate(),
        )
    }

    pub fn beats_per_bar(&self) -> u32 {
        (self.beats / self.bars).max(1)
    }

    /// Same rounding as the sequencer: the loop length is truncated first,
    /// beats and bars divide it.
    pub fn frames_in_loop(&self) -> usize {
        let seconds = (60.0 / self.bpm as f64) * self.beats as f64;
        (self.sample_rate as f64 * seconds) as usize
    }

    pub fn frames_in_bar(&self) -> usize {
        self.frames_in_loop() / self.bars as usize
    }

    pub fn frames_in_beat(&self) -> usize {
        self.frames_in_loop() / self.beats as usize
    }

    pub fn frames_to_beats(&self, frames: usize) -> f64 {
        let beat = self.frames_in_beat();
        if beat == 0 {
            0.0
        } else {
            frames as f64 / beat as f64
        }
    }

    pub fn beats_to_frames(&self, beats: f64) -> usize {
        (beats * self.frames_in_beat() as f64) as usize
    }

    pub fn frames_to_seconds(&self, frames: usize) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64) as usize
    }

    pub fn format_position(&self, frame: usize) -> MusicalPosition {
        let total_beats = self.frames_to_beats(frame);
        let beats_per_bar = self.beats_per_bar() as f64;

        let bar = (total_beats / beats_per_bar).floor() as u32 + 1;
        let beat = (total_beats % beats_per_bar).floor() as u32 + 1;
        let tick = (total_beats.fract() * TICKS_PER_BEAT as f64) as u32;

        MusicalPosition { bar, beat, tick }
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_BEATS, DEFAULT_BARS, DEFAULT_SAMPLE_RATE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
}

impl std::fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{:03}", self.bar, self.beat, self.tick)
    }
}
