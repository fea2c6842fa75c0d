use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use looper_transport::{
    DEFAULT_BARS, DEFAULT_BEATS, DEFAULT_BPM, MAX_BARS, MAX_BEATS, MAX_BPM, MAX_QUANTIZE, MIN_BPM,
};

use crate::atomic::AtomicF32;

/// Transport position as seen by the render pipeline.
///
/// Every method must be lock-free: the renderer queries the clock once per
/// block and several times per frame.
pub trait Clock: Send + Sync {
    fn is_running(&self) -> bool;
    fn current_frame(&self) -> usize;
    fn sample_rate(&self) -> u32;
    fn frames_in_loop(&self) -> usize;
    fn frames_in_bar(&self) -> usize;
    fn frames_in_beat(&self) -> usize;
    fn quantize(&self) -> u32;

    fn is_on_bar(&self) -> bool {
        let bar = self.frames_in_bar();
        bar > 0 && self.current_frame() % bar == 0
    }

    fn is_on_beat(&self) -> bool {
        let beat = self.frames_in_beat();
        beat > 0 && self.current_frame() % beat == 0
    }

    fn is_on_first_beat(&self) -> bool {
        self.current_frame() == 0
    }

    /// True on every `frames_in_beat / quantize` boundary. Always false with
    /// quantization off.
    fn quanto_has_passed(&self) -> bool;

    /// Move one frame forward, wrapping at the end of the loop.
    fn advance(&self);

    fn rewind(&self);

    /// A quantized rewind is waiting for the next quanto.
    fn is_rewind_pending(&self) -> bool;
}

/// Lock-free sequencer shared by the control and audio threads.
///
/// Tempo and meter are written by the control thread, which recomputes the
/// derived frame counts; the audio thread only advances `current_frame`.
#[derive(Debug)]
pub struct Sequencer {
    running: AtomicBool,
    current_frame: AtomicUsize,
    sample_rate: AtomicU32,
    bpm: AtomicF32,
    beats: AtomicU32,
    bars: AtomicU32,
    quantize: AtomicU32,
    frames_in_loop: AtomicUsize,
    frames_in_bar: AtomicUsize,
    frames_in_beat: AtomicUsize,
    quanto: AtomicUsize,
    rewind_wait: AtomicBool,
}

impl Sequencer {
    pub fn new(sample_rate: u32) -> Self {
        let sequencer = Self {
            running: AtomicBool::new(false),
            current_frame: AtomicUsize::new(0),
            sample_rate: AtomicU32::new(sample_rate),
            bpm: AtomicF32::new(DEFAULT_BPM),
            beats: AtomicU32::new(DEFAULT_BEATS),
            bars: AtomicU32::new(DEFAULT_BARS),
            quantize: AtomicU32::new(0),
            frames_in_loop: AtomicUsize::new(0),
            frames_in_bar: AtomicUsize::new(0),
            frames_in_beat: AtomicUsize::new(0),
            quanto: AtomicUsize::new(1),
            rewind_wait: AtomicBool::new(false),
        };
        sequencer.update_frames();
        sequencer
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.rewind_wait.store(false, Ordering::Release);
    }

    /// Rewind now, or arm a quantized rewind when quantization is on and
    /// the transport runs. Returns true if the position moved immediately.
    pub fn request_rewind(&self) -> bool {
        if self.quantize() > 0 && self.is_running() {
            self.rewind_wait.store(true, Ordering::Release);
            false
        } else {
            self.rewind();
            true
        }
    }

    /// Jump to an absolute frame, wrapped into the loop.
    pub fn seek(&self, frame: usize) {
        let frames_in_loop = self.frames_in_loop().max(1);
        self.current_frame
            .store(frame % frames_in_loop, Ordering::Release);
    }

    pub fn bpm(&self) -> f32 {
        self.bpm.load()
    }

    pub fn beats(&self) -> u32 {
        self.beats.load(Ordering::Acquire)
    }

    pub fn bars(&self) -> u32 {
        self.bars.load(Ordering::Acquire)
    }

    pub fn current_beat(&self) -> usize {
        let beat = self.frames_in_beat();
        if beat == 0 {
            0
        } else {
            self.current_frame() / beat
        }
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.bpm.store(bpm.clamp(MIN_BPM, MAX_BPM));
        self.update_frames();
    }

    /// Bars never exceed beats.
    pub fn set_beats(&self, beats: u32, bars: u32) {
        let beats = beats.clamp(1, MAX_BEATS);
        let bars = bars.clamp(1, MAX_BARS).min(beats);
        self.beats.store(beats, Ordering::Release);
        self.bars.store(bars, Ordering::Release);
        self.update_frames();
    }

    pub fn set_quantize(&self, quantize: u32) {
        self.quantize
            .store(quantize.min(MAX_QUANTIZE), Ordering::Release);
        self.update_frames();
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.update_frames();
    }

    pub fn beat_double(&self) {
        self.set_bpm(self.bpm() * 2.0);
    }

    pub fn beat_half(&self) {
        self.set_bpm(self.bpm() / 2.0);
    }

    fn update_frames(&self) {
        let seconds = (60.0 / self.bpm.load() as f64) * self.beats() as f64;
        let frames_in_loop = (self.sample_rate() as f64 * seconds) as usize;
        let frames_in_bar = frames_in_loop / self.bars().max(1) as usize;
        let frames_in_beat = frames_in_loop / self.beats().max(1) as usize;

        self.frames_in_loop.store(frames_in_loop, Ordering::Release);
        self.frames_in_bar.store(frames_in_bar, Ordering::Release);
        self.frames_in_beat.store(frames_in_beat, Ordering::Release);

        let quantize = self.quantize();
        if quantize != 0 {
            self.quanto
                .store((frames_in_beat / quantize as usize).max(1), Ordering::Release);
        }

        if self.current_frame() >= frames_in_loop {
            self.current_frame.store(0, Ordering::Release);
        }
    }
}

impl Clock for Sequencer {
    #[inline]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Acquire)
    }

    #[inline]
    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    #[inline]
    fn frames_in_loop(&self) -> usize {
        self.frames_in_loop.load(Ordering::Acquire)
    }

    #[inline]
    fn frames_in_bar(&self) -> usize {
        self.frames_in_bar.load(Ordering::Acquire)
    }

    #[inline]
    fn frames_in_beat(&self) -> usize {
        self.frames_in_beat.load(Ordering::Acquire)
    }

    #[inline]
    fn quantize(&self) -> u32 {
        self.quantize.load(Ordering::Acquire)
    }

    fn quanto_has_passed(&self) -> bool {
        self.quantize() != 0 && self.current_frame() % self.quanto.load(Ordering::Acquire) == 0
    }

    fn advance(&self) {
        let next = self.current_frame() + 1;
        let next = if next >= self.frames_in_loop() { 0 } else { next };
        self.current_frame.store(next, Ordering::Release);
    }

    fn rewind(&self) {
        self.rewind_wait.store(false, Ordering::Release);
        self.current_frame.store(0, Ordering::Release);
    }

    fn is_rewind_pending(&self) -> bool {
        self.rewind_wait.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_math_at_default_tempo() {
        let seq = Sequencer::new(44100);
        assert_eq!(seq.frames_in_loop(), 88200);
        assert_eq!(seq.frames_in_bar(), 88200);
        assert_eq!(seq.frames_in_beat(), 22050);
    }

    #[test]
    fn test_bars_split_the_loop() {
        let seq = Sequencer::new(44100);
        seq.set_beats(8, 2);
        assert_eq!(seq.frames_in_loop(), 176400);
        assert_eq!(seq.frames_in_bar(), 88200);
        seq.set_beats(2, 4);
        assert_eq!(seq.bars(), 2);
    }

    #[test]
    fn test_advance_wraps_at_loop_end() {
        let seq = Sequencer::new(44100);
        seq.seek(88199);
        seq.advance();
        assert_eq!(seq.current_frame(), 0);
        assert!(seq.is_on_first_beat());
        assert!(seq.is_on_bar());
    }

    #[test]
    fn test_quanto_boundaries() {
        let seq = Sequencer::new(44100);
        assert!(!seq.quanto_has_passed());
        seq.set_quantize(4);
        seq.seek(22050 / 4);
        assert!(seq.quanto_has_passed());
        seq.advance();
        assert!(!seq.quanto_has_passed());
    }

    #[test]
    fn test_rewind_request_waits_when_quantized() {
        let seq = Sequencer::new(44100);
        seq.set_quantize(4);
        seq.start();
        seq.seek(1000);
        assert!(!seq.request_rewind());
        assert!(seq.is_rewind_pending());
        assert_eq!(seq.current_frame(), 1000);

        seq.set_quantize(0);
        assert!(seq.request_rewind());
        assert_eq!(seq.current_frame(), 0);
        assert!(!seq.is_rewind_pending());
    }

    #[test]
    fn test_bpm_is_clamped() {
        let seq = Sequencer::new(44100);
        seq.set_bpm(5000.0);
        assert_eq!(seq.bpm(), MAX_BPM);
        seq.beat_half();
        assert_eq!(seq.bpm(), MAX_BPM / 2.0);
    }
}
