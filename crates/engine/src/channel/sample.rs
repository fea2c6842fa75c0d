use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use looper_transport::{AudioArc, AudioBuffer, DEFAULT_PITCH, MAX_PITCH, MIN_PITCH, Wave, max_boost};

use super::{Channel, ChannelStatus, Fill};
use crate::atomic::{AtomicF32, AtomicF64};
use crate::clock::Clock;
use crate::data::FrameEvents;
use crate::midi::Feedback;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleMode {
    #[default]
    SingleBasic,
    SinglePress,
    SingleRetrig,
    SingleEndless,
    LoopBasic,
    LoopOnce,
    LoopRepeat,
    LoopOnceBar,
}

impl SampleMode {
    pub const ALL: [SampleMode; 8] = [
        SampleMode::SingleBasic,
        SampleMode::SinglePress,
        SampleMode::SingleRetrig,
        SampleMode::SingleEndless,
        SampleMode::LoopBasic,
        SampleMode::LoopOnce,
        SampleMode::LoopRepeat,
        SampleMode::LoopOnceBar,
    ];

    pub fn is_loop(self) -> bool {
        matches!(
            self,
            SampleMode::LoopBasic
                | SampleMode::LoopOnce
                | SampleMode::LoopRepeat
                | SampleMode::LoopOnceBar
        )
    }

    pub fn is_single(self) -> bool {
        !self.is_loop()
    }
}

/// Auditioning a wave outside the main mix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PreviewMode {
    #[default]
    None,
    Normal,
    Loop,
}

impl PreviewMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Normal,
            2 => Self::Loop,
            _ => Self::None,
        }
    }
}

/// Sample-channel payload: the wave and its playback cursors.
#[derive(Debug)]
pub struct SampleChannel {
    wave: Option<Wave>,
    mode: SampleMode,
    begin: usize,
    end: usize,
    velo_as_vol: bool,
    pitch: AtomicF32,
    boost: AtomicF32,
    tracker: AtomicF64,
    tracker_preview: AtomicF64,
    preview_mode: AtomicU8,
    input_monitor: AtomicBool,
    /// Velocity-as-volume gain of the last start.
    volume_i: AtomicF32,
    /// A retrigger is waiting for the next quanto.
    quantizing: AtomicBool,
    /// Set by a rewind, consumed by the next render. A render already in
    /// flight stores its own position at the end of the block.
    rewind_pending: AtomicBool,
    rewind_preview_pending: AtomicBool,
}

/// Audio-thread values of a sample channel, compared and merged when a
/// draft is published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SampleRuntime {
    pitch: f32,
    boost: f32,
    tracker: f64,
    tracker_preview: f64,
    preview_mode: u8,
    input_monitor: bool,
    volume_i: f32,
    quantizing: bool,
    rewind_pending: bool,
    rewind_preview_pending: bool,
}

impl Default for SampleChannel {
    fn default() -> Self {
        Self {
            wave: None,
            mode: SampleMode::default(),
            begin: 0,
            end: 0,
            velo_as_vol: false,
            pitch: AtomicF32::new(DEFAULT_PITCH),
            boost: AtomicF32::new(1.0),
            tracker: AtomicF64::new(0.0),
            tracker_preview: AtomicF64::new(0.0),
            preview_mode: AtomicU8::new(PreviewMode::None as u8),
            input_monitor: AtomicBool::new(false),
            volume_i: AtomicF32::new(1.0),
            quantizing: AtomicBool::new(false),
            rewind_pending: AtomicBool::new(false),
            rewind_preview_pending: AtomicBool::new(false),
        }
    }
}

impl Clone for SampleChannel {
    fn clone(&self) -> Self {
        Self {
            wave: self.wave.clone(),
            mode: self.mode,
            begin: self.begin,
            end: self.end,
            velo_as_vol: self.velo_as_vol,
            pitch: AtomicF32::new(self.pitch()),
            boost: AtomicF32::new(self.boost()),
            tracker: AtomicF64::new(self.tracker.load()),
            tracker_preview: AtomicF64::new(self.tracker_preview.load()),
            preview_mode: AtomicU8::new(self.preview_mode() as u8),
            input_monitor: AtomicBool::new(self.input_monitor()),
            volume_i: AtomicF32::new(self.volume_i()),
            quantizing: AtomicBool::new(self.quantizing.load(Ordering::Relaxed)),
            rewind_pending: AtomicBool::new(self.rewind_pending.load(Ordering::Acquire)),
            rewind_preview_pending: AtomicBool::new(
                self.rewind_preview_pending.load(Ordering::Acquire),
            ),
        }
    }
}

impl SampleChannel {
    pub fn wave(&self) -> Option<&Wave> {
        self.wave.as_ref()
    }

    pub fn has_wave(&self) -> bool {
        self.wave.is_some()
    }

    /// Install (or remove) the wave. Trim points cover the whole wave and
    /// the cursors go back to the start.
    pub fn set_wave(&mut self, wave: Option<Wave>) {
        self.end = wave.as_ref().map(Wave::frames).unwrap_or(0);
        self.begin = 0;
        self.wave = wave;
        self.tracker.store(0.0);
        self.tracker_preview.store(0.0);
        self.rewind_pending.store(false, Ordering::Release);
        self.rewind_preview_pending.store(false, Ordering::Release);
    }

    pub fn wave_mut(&mut self) -> Option<&mut Wave> {
        self.wave.as_mut()
    }

    pub fn mode(&self) -> SampleMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SampleMode) {
        self.mode = mode;
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Trim the wave. `end` is exclusive and clamped to the wave length;
    /// `begin` stays before `end`.
    pub fn set_begin_end(&mut self, begin: usize, end: usize) {
        let frames = self.wave.as_ref().map(Wave::frames).unwrap_or(0);
        self.end = end.min(frames);
        self.begin = begin.min(self.end.saturating_sub(1));
        let tracker = self.tracker.load();
        if tracker < self.begin as f64 || tracker >= self.end as f64 {
            self.tracker.store(self.begin as f64);
        }
    }

    pub fn pitch(&self) -> f32 {
        self.pitch.load()
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.pitch.store(pitch.clamp(MIN_PITCH, MAX_PITCH));
    }

    pub fn boost(&self) -> f32 {
        self.boost.load()
    }

    pub fn set_boost(&self, boost: f32) {
        self.boost.store(boost.clamp(0.0, max_boost()));
    }

    /// Playback position in wave frames.
    pub fn tracker(&self) -> usize {
        self.tracker.load() as usize
    }

    pub fn tracker_preview(&self) -> usize {
        self.tracker_preview.load() as usize
    }

    pub fn preview_mode(&self) -> PreviewMode {
        PreviewMode::from_u8(self.preview_mode.load(Ordering::Acquire))
    }

    /// Start or stop auditioning from `begin`.
    pub fn set_preview_mode(&self, mode: PreviewMode) {
        self.tracker_preview.store(self.begin as f64);
        self.rewind_preview_pending.store(true, Ordering::Release);
        self.preview_mode.store(mode as u8, Ordering::Release);
    }

    pub fn input_monitor(&self) -> bool {
        self.input_monitor.load(Ordering::Relaxed)
    }

    pub fn set_input_monitor(&self, monitor: bool) {
        self.input_monitor.store(monitor, Ordering::Relaxed);
    }

    pub fn velo_as_vol(&self) -> bool {
        self.velo_as_vol
    }

    pub fn set_velo_as_vol(&mut self, enabled: bool) {
        self.velo_as_vol = enabled;
    }

    pub fn volume_i(&self) -> f32 {
        self.volume_i.load()
    }

    fn rewind(&self) {
        self.tracker.store(self.begin as f64);
        self.rewind_pending.store(true, Ordering::Release);
    }

    pub(crate) fn runtime(&self) -> SampleRuntime {
        SampleRuntime {
            pitch: self.pitch(),
            boost: self.boost(),
            tracker: self.tracker.load(),
            tracker_preview: self.tracker_preview.load(),
            preview_mode: self.preview_mode.load(Ordering::Acquire),
            input_monitor: self.input_monitor(),
            volume_i: self.volume_i(),
            quantizing: self.quantizing.load(Ordering::Relaxed),
            rewind_pending: self.rewind_pending.load(Ordering::Acquire),
            rewind_preview_pending: self.rewind_preview_pending.load(Ordering::Acquire),
        }
    }

    /// Take every value from `live` that this copy still holds as it was
    /// in `origin`. Values changed on this copy win.
    pub(crate) fn merge_runtime(&self, origin: &SampleRuntime, live: &SampleRuntime) {
        let mine = self.runtime();
        self.pitch.store(pick(mine.pitch, origin.pitch, live.pitch));
        self.boost.store(pick(mine.boost, origin.boost, live.boost));
        self.tracker.store(pick(mine.tracker, origin.tracker, live.tracker));
        self.tracker_preview.store(pick(
            mine.tracker_preview,
            origin.tracker_preview,
            live.tracker_preview,
        ));
        self.preview_mode.store(
            pick(mine.preview_mode, origin.preview_mode, live.preview_mode),
            Ordering::Release,
        );
        self.input_monitor.store(
            pick(mine.input_monitor, origin.input_monitor, live.input_monitor),
            Ordering::Relaxed,
        );
        self.volume_i.store(pick(mine.volume_i, origin.volume_i, live.volume_i));
        self.quantizing.store(
            pick(mine.quantizing, origin.quantizing, live.quantizing),
            Ordering::Relaxed,
        );
        self.rewind_pending.store(
            pick(mine.rewind_pending, origin.rewind_pending, live.rewind_pending),
            Ordering::Release,
        );
        self.rewind_preview_pending.store(
            pick(
                mine.rewind_preview_pending,
                origin.rewind_preview_pending,
                live.rewind_preview_pending,
            ),
            Ordering::Release,
        );
    }
}

/// Three-way pick: `live` unless the draft changed the value itself.
#[inline]
pub(crate) fn pick<T: PartialEq + Copy>(mine: T, origin: T, live: T) -> T {
    if mine == origin { live } else { mine }
}

fn notify(ch: &Channel, status: ChannelStatus, fb: &mut Feedback) {
    ch.notify_status(status, fb);
}

pub(super) fn start(
    ch: &Channel,
    s: &SampleChannel,
    do_quantize: bool,
    velocity: u8,
    clock: &dyn Clock,
    fb: &mut Feedback,
) -> Option<Fill> {
    let quantized = clock.quantize() > 0 && clock.is_running() && do_quantize;
    match ch.status() {
        ChannelStatus::Empty | ChannelStatus::Missing => None,
        ChannelStatus::Off => {
            if s.mode.is_loop() || quantized {
                notify(ch, ChannelStatus::Wait, fb);
                None
            } else {
                let gain = if s.velo_as_vol {
                    velocity as f32 / 127.0
                } else {
                    1.0
                };
                s.volume_i.store(gain);
                s.rewind();
                notify(ch, ChannelStatus::Play, fb);
                Some(Fill::Render)
            }
        }
        ChannelStatus::Play => match s.mode {
            SampleMode::SingleRetrig if quantized => {
                s.quantizing.store(true, Ordering::Relaxed);
                None
            }
            SampleMode::SingleRetrig => {
                s.rewind();
                Some(Fill::Render)
            }
            SampleMode::SingleBasic => {
                s.rewind();
                notify(ch, ChannelStatus::Off, fb);
                Some(Fill::Silence)
            }
            SampleMode::SinglePress => None,
            _ => {
                notify(ch, ChannelStatus::Ending, fb);
                None
            }
        },
        ChannelStatus::Wait => {
            notify(ch, ChannelStatus::Off, fb);
            None
        }
        ChannelStatus::Ending => {
            notify(ch, ChannelStatus::Play, fb);
            None
        }
    }
}

/// Key release: single-press channels stop.
pub(super) fn stop(ch: &Channel, s: &SampleChannel, fb: &mut Feedback) -> Option<Fill> {
    if s.mode != SampleMode::SinglePress {
        return None;
    }
    match ch.status() {
        ChannelStatus::Play => {
            s.rewind();
            notify(ch, ChannelStatus::Off, fb);
            Some(Fill::Silence)
        }
        ChannelStatus::Wait => {
            notify(ch, ChannelStatus::Off, fb);
            None
        }
        _ => None,
    }
}

pub(super) fn kill(ch: &Channel, s: &SampleChannel, fb: &mut Feedback) -> Option<Fill> {
    match ch.status() {
        ChannelStatus::Play | ChannelStatus::Ending | ChannelStatus::Wait => {
            s.rewind();
            s.quantizing.store(false, Ordering::Relaxed);
            notify(ch, ChannelStatus::Off, fb);
            Some(Fill::Silence)
        }
        _ => None,
    }
}

pub(super) fn stop_by_seq(
    ch: &Channel,
    s: &SampleChannel,
    chans_stop_on_seq_halt: bool,
    fb: &mut Feedback,
) -> Option<Fill> {
    match ch.rec_status() {
        ChannelStatus::Wait => ch.set_rec_status(ChannelStatus::Off),
        ChannelStatus::Ending => {
            ch.set_rec_status(ChannelStatus::Off);
            ch.set_reading_actions(false);
        }
        _ => {}
    }

    let follows_seq = s.mode.is_loop() || ch.is_reading_actions();
    match ch.status() {
        ChannelStatus::Wait if s.mode.is_loop() => {
            notify(ch, ChannelStatus::Off, fb);
            None
        }
        ChannelStatus::Play | ChannelStatus::Ending if chans_stop_on_seq_halt && follows_seq => {
            kill(ch, s, fb)
        }
        _ => None,
    }
}

pub(super) fn rewind_by_seq(ch: &Channel, s: &SampleChannel) -> Option<Fill> {
    if (s.mode.is_loop() || ch.is_reading_actions()) && ch.is_playing() {
        s.rewind();
        s.quantizing.store(false, Ordering::Relaxed);
        Some(Fill::Render)
    } else {
        None
    }
}

pub(super) fn parse_events(
    ch: &Channel,
    s: &SampleChannel,
    fe: &FrameEvents,
    frames: usize,
    clock: &dyn Clock,
    fb: &mut Feedback,
) {
    let offset = fe.frame_local;
    let restart = |ch: &Channel, fb: &mut Feedback| {
        s.rewind();
        ch.apply_fill(Fill::Render, offset, frames, fb);
    };

    if fe.quanto_passed {
        if ch.status() == ChannelStatus::Wait && s.mode.is_single() {
            notify(ch, ChannelStatus::Play, fb);
            restart(ch, fb);
        }
        if s.quantizing.swap(false, Ordering::Relaxed) {
            restart(ch, fb);
        }
    }

    if fe.on_bar {
        match (ch.status(), s.mode) {
            (ChannelStatus::Play, SampleMode::LoopRepeat) => restart(ch, fb),
            (ChannelStatus::Wait, SampleMode::LoopOnceBar) => {
                notify(ch, ChannelStatus::Play, fb);
                restart(ch, fb);
            }
            _ => {}
        }
    }

    if fe.on_first_beat {
        if s.mode.is_loop() {
            match ch.status() {
                ChannelStatus::Wait => {
                    notify(ch, ChannelStatus::Play, fb);
                    restart(ch, fb);
                }
                ChannelStatus::Ending => {
                    s.rewind();
                    notify(ch, ChannelStatus::Off, fb);
                    ch.apply_fill(Fill::Silence, offset, frames, fb);
                }
                ChannelStatus::Play if s.mode != SampleMode::LoopRepeat => restart(ch, fb),
                _ => {}
            }
        }
        match ch.rec_status() {
            ChannelStatus::Wait => {
                ch.set_rec_status(ChannelStatus::Play);
                ch.set_reading_actions(true);
            }
            ChannelStatus::Ending => {
                ch.set_rec_status(ChannelStatus::Off);
                ch.set_reading_actions(false);
            }
            _ => {}
        }
    }

    if !ch.is_reading_actions() {
        return;
    }
    for action in fe.actions.iter().filter(|a| a.channel == ch.index()) {
        let event = action.event;
        let fill = if event.is_note_on() {
            start(ch, s, fe.do_quantize, event.velocity(), clock, fb)
        } else if event.is_note_off() {
            stop(ch, s, fb)
        } else if event.is_kill() {
            kill(ch, s, fb)
        } else {
            None
        };
        if let Some(fill) = fill {
            ch.apply_fill(fill, offset, frames, fb);
        }
    }
}

/// End of the wave reached while playing. Returns true if playback wraps
/// around to `begin`.
fn on_last_frame(ch: &Channel, s: &SampleChannel, fb: &mut Feedback) -> bool {
    if s.mode.is_single() {
        notify(ch, ChannelStatus::Off, fb);
        return false;
    }
    match (ch.status(), s.mode) {
        (ChannelStatus::Ending, _) => {
            notify(ch, ChannelStatus::Off, fb);
            false
        }
        (_, SampleMode::LoopOnce | SampleMode::LoopOnceBar) => {
            notify(ch, ChannelStatus::Wait, fb);
            false
        }
        _ => true,
    }
}

#[inline]
fn read_frame(audio: &AudioArc, pos: f64, end: f64, buffer: &mut AudioBuffer, frame: usize) {
    let i = pos as usize;
    let frac = (pos - i as f64) as f32;
    for c in 0..buffer.channels() {
        let a = audio.sample(i, c);
        buffer[frame][c] = if frac == 0.0 || (i + 1) as f64 >= end {
            a
        } else {
            a + (audio.sample(i + 1, c) - a) * frac
        };
    }
}

/// Render the wave from the tracker into `buffer[offset..frames]`,
/// applying the mode's end-of-wave rule.
pub(super) fn render(
    ch: &Channel,
    s: &SampleChannel,
    buffer: &mut AudioBuffer,
    offset: usize,
    frames: usize,
    fb: &mut Feedback,
) {
    let frames = frames.min(buffer.frames());
    let (begin, end) = (s.begin as f64, s.end as f64);
    let Some(wave) = &s.wave else {
        buffer.clear_from(offset);
        return;
    };
    if end <= begin {
        buffer.clear_from(offset);
        return;
    }

    let pitch = s.pitch() as f64;
    let mut pos = if s.rewind_pending.swap(false, Ordering::AcqRel) {
        begin
    } else {
        s.tracker.load()
    };
    for f in offset..frames {
        if pos >= end {
            pos = begin;
            if !on_last_frame(ch, s, fb) {
                buffer.clear_from(f);
                break;
            }
        }
        read_frame(wave.audio(), pos, end, buffer, f);
        pos += pitch;
    }
    s.tracker.store(pos);
}

/// Fill the preview buffer from the preview cursor. `Normal` previews stop
/// at the end of the wave, `Loop` previews wrap.
pub(super) fn render_preview(s: &SampleChannel, buffer: &mut AudioBuffer, frames: usize) {
    buffer.clear();
    let frames = frames.min(buffer.frames());
    let (begin, end) = (s.begin as f64, s.end as f64);
    let Some(wave) = &s.wave else {
        return;
    };
    if end <= begin {
        return;
    }

    let pitch = s.pitch() as f64;
    let mut pos = if s.rewind_preview_pending.swap(false, Ordering::AcqRel) {
        begin
    } else {
        s.tracker_preview.load()
    };
    for f in 0..frames {
        if pos >= end {
            pos = begin;
            if s.preview_mode() != PreviewMode::Loop {
                s.preview_mode
                    .store(PreviewMode::None as u8, Ordering::Release);
                break;
            }
        }
        read_frame(wave.audio(), pos, end, buffer, f);
        pos += pitch;
    }
    s.tracker_preview.store(pos);
}

#[cfg(test)]
mod tests {
    use looper_transport::AudioArc;

    use super::*;
    use crate::channel::ChannelType;
    use crate::clock::Sequencer;
    use crate::midi::{MidiMap, NullSink};

    const BLOCK: usize = 64;

    fn channel(mode: SampleMode, frames: usize) -> Channel {
        let samples: Vec<f32> = (0..frames).map(|i| (i + 1) as f32).collect();
        let mut ch = Channel::new(ChannelType::Sample, 0, 0, BLOCK);
        let sample = ch.as_sample_mut().unwrap();
        sample.set_wave(Some(Wave::new(AudioArc::new(samples, 44100, 1), "ramp.wav")));
        sample.set_mode(mode);
        ch.set_status(ChannelStatus::Off);
        ch
    }

    fn with_feedback<R>(f: impl FnOnce(&mut Feedback) -> R) -> R {
        let map = MidiMap::default();
        let mut sink = NullSink;
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        f(&mut fb)
    }

    fn render_block(ch: &Channel) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(BLOCK, 2);
        let s = ch.as_sample().unwrap();
        with_feedback(|fb| render(ch, s, &mut buffer, 0, BLOCK, fb));
        buffer
    }

    #[test]
    fn test_retrigger_restarts_from_begin() {
        let ch = channel(SampleMode::SingleRetrig, 1000);
        let clock = Sequencer::new(44100);
        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        assert_eq!(ch.status(), ChannelStatus::Play);
        render_block(&ch);
        assert_eq!(ch.as_sample().unwrap().tracker(), BLOCK);

        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        assert_eq!(ch.status(), ChannelStatus::Play);
        let buffer = render_block(&ch);
        assert_eq!(buffer[0][0], 1.0);
    }

    #[test]
    fn test_retrigger_survives_block_in_flight() {
        let ch = channel(SampleMode::SingleRetrig, 1000);
        let clock = Sequencer::new(44100);
        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        render_block(&ch);

        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        // The audio thread finishes the block it was rendering and stores
        // its own cursor after the retrigger.
        ch.as_sample().unwrap().tracker.store(500.0);

        let buffer = render_block(&ch);
        assert_eq!(buffer[0][0], 1.0);
        assert_eq!(ch.as_sample().unwrap().tracker(), BLOCK);
    }

    #[test]
    fn test_quantized_retrigger_waits() {
        let ch = channel(SampleMode::SingleRetrig, 1000);
        let clock = Sequencer::new(44100);
        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        render_block(&ch);

        clock.set_quantize(4);
        clock.start();
        with_feedback(|fb| ch.start(true, 127, &clock, fb));
        let s = ch.as_sample().unwrap();
        assert!(s.quantizing.load(Ordering::Relaxed));
        assert_eq!(s.tracker(), BLOCK);
    }

    #[test]
    fn test_preview_normal_stops_at_end() {
        let ch = channel(SampleMode::SingleBasic, 10);
        let s = ch.as_sample().unwrap();
        s.set_preview_mode(PreviewMode::Normal);

        let mut buffer = AudioBuffer::new(BLOCK, 2);
        render_preview(s, &mut buffer, BLOCK);
        assert_eq!(buffer[0][0], 1.0);
        assert_eq!(buffer[9][1], 10.0);
        assert_eq!(buffer[10][0], 0.0);
        assert_eq!(s.preview_mode(), PreviewMode::None);
        // The main cursor and status are untouched.
        assert_eq!(s.tracker(), 0);
        assert_eq!(ch.status(), ChannelStatus::Off);
    }

    #[test]
    fn test_preview_loop_wraps() {
        let ch = channel(SampleMode::SingleBasic, 10);
        let s = ch.as_sample().unwrap();
        s.set_preview_mode(PreviewMode::Loop);

        let mut buffer = AudioBuffer::new(BLOCK, 2);
        render_preview(s, &mut buffer, BLOCK);
        assert_eq!(buffer[9][0], 10.0);
        assert_eq!(buffer[10][0], 1.0);
        assert_eq!(s.preview_mode(), PreviewMode::Loop);
        assert_eq!(s.tracker_preview(), BLOCK % 10);
    }

    #[test]
    fn test_preview_restart_survives_block_in_flight() {
        let ch = channel(SampleMode::SingleBasic, 100);
        let s = ch.as_sample().unwrap();
        s.set_preview_mode(PreviewMode::Loop);
        s.tracker_preview.store(42.0);

        let mut buffer = AudioBuffer::new(BLOCK, 2);
        render_preview(s, &mut buffer, BLOCK);
        assert_eq!(buffer[0][0], 1.0);
    }

    #[test]
    fn test_merge_keeps_draft_edits() {
        let live = channel(SampleMode::LoopBasic, 100);
        let draft = live.clone();
        let origin = draft.runtime();

        draft.as_sample().unwrap().set_pitch(1.5);
        live.as_sample().unwrap().set_pitch(0.5);
        live.as_sample().unwrap().set_boost(2.0);
        live.set_status(ChannelStatus::Play);

        draft.merge_runtime(&origin, &live.runtime());
        let s = draft.as_sample().unwrap();
        assert_eq!(s.pitch(), 1.5);
        assert_eq!(s.boost(), 2.0);
        assert_eq!(draft.status(), ChannelStatus::Play);
    }
}
