mod midi;
mod sample;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use looper_transport::{AudioBuffer, DEFAULT_PAN, DEFAULT_VOL, MAX_IO_CHANS, MidiEvent, max_boost};

use crate::atomic::AtomicF32;
use crate::clock::Clock;
use crate::data::{FrameEvents, RenderScratch};
use crate::midi::{Feedback, MidiLearn, MidiLightning};
use crate::plugin::PluginStack;

pub use midi::MidiChannel;
pub use sample::{PreviewMode, SampleChannel, SampleMode};

use sample::{SampleRuntime, pick};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

fn next_channel_id() -> u64 {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelStatus {
    Off,
    Wait,
    Play,
    Ending,
    Empty,
    Missing,
}

impl ChannelStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::Wait,
            2 => Self::Play,
            3 => Self::Ending,
            4 => Self::Empty,
            _ => Self::Missing,
        }
    }
}

#[derive(Debug)]
struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(status: ChannelStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    #[inline]
    fn load(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn store(&self, status: ChannelStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Sample,
    Midi,
}

#[derive(Debug, Clone)]
pub enum ChannelKind {
    Sample(SampleChannel),
    Midi(MidiChannel),
}

/// Gain for output channel `channel` at pan position `pan` (0 left, 1 right).
///
/// Center is unity on both sides; anywhere else the law is a linear
/// cross-fade.
pub fn calc_panning(pan: f32, channel: usize) -> f32 {
    if pan == 0.5 {
        return 1.0;
    }
    if channel == 0 { 1.0 - pan } else { pan }
}

/// Working buffers touched only by the audio thread.
#[derive(Debug)]
pub(crate) struct ChannelScratch {
    pub(crate) buffer: AudioBuffer,
    pub(crate) preview: AudioBuffer,
}

impl ChannelScratch {
    fn new(block_size: usize) -> Self {
        Self {
            buffer: AudioBuffer::new(block_size, MAX_IO_CHANS),
            preview: AudioBuffer::new(block_size, MAX_IO_CHANS),
        }
    }
}

/// How a transition taken inside a block changes the working buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// Render the wave from the tracker starting at the event's frame.
    Render,
    /// Silence from the event's frame on.
    Silence,
}

/// Values the control and audio threads change on a published snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChannelRuntime {
    status: ChannelStatus,
    rec_status: ChannelStatus,
    volume: f32,
    pan: f32,
    mute: bool,
    solo: bool,
    armed: bool,
    read_actions: bool,
    sample: Option<SampleRuntime>,
}

/// One track of the loop machine.
///
/// Scalar mixing parameters and transport state are atomics, so the GUI
/// and MIDI threads can change them on a published snapshot. Everything
/// else is changed on drafts only.
#[derive(Debug)]
pub struct Channel {
    /// Survives drafts and reindexing; a cloned channel gets a new one.
    id: u64,
    index: usize,
    column: usize,
    name: String,
    block_size: usize,
    status: AtomicStatus,
    rec_status: AtomicStatus,
    volume: AtomicF32,
    pan: AtomicF32,
    mute: AtomicBool,
    solo: AtomicBool,
    armed: AtomicBool,
    read_actions: AtomicBool,
    midi_learn: MidiLearn,
    lightning: MidiLightning,
    plugins: PluginStack,
    scratch: Mutex<ChannelScratch>,
    kind: ChannelKind,
}

impl Channel {
    pub fn new(channel_type: ChannelType, index: usize, column: usize, block_size: usize) -> Self {
        let (kind, status) = match channel_type {
            ChannelType::Sample => (
                ChannelKind::Sample(SampleChannel::default()),
                ChannelStatus::Empty,
            ),
            ChannelType::Midi => (ChannelKind::Midi(MidiChannel::default()), ChannelStatus::Off),
        };
        Self {
            id: next_channel_id(),
            index,
            column,
            name: String::new(),
            block_size,
            status: AtomicStatus::new(status),
            rec_status: AtomicStatus::new(ChannelStatus::Off),
            volume: AtomicF32::new(DEFAULT_VOL),
            pan: AtomicF32::new(DEFAULT_PAN),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            read_actions: AtomicBool::new(false),
            midi_learn: MidiLearn::default(),
            lightning: MidiLightning::default(),
            plugins: PluginStack::new(),
            scratch: Mutex::new(ChannelScratch::new(block_size)),
            kind,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Give a duplicated channel its own identity.
    pub(crate) fn renew_id(&mut self) {
        self.id = next_channel_id();
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn set_column(&mut self, column: usize) {
        self.column = column;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn channel_type(&self) -> ChannelType {
        match self.kind {
            ChannelKind::Sample(_) => ChannelType::Sample,
            ChannelKind::Midi(_) => ChannelType::Midi,
        }
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn as_sample(&self) -> Option<&SampleChannel> {
        match &self.kind {
            ChannelKind::Sample(s) => Some(s),
            ChannelKind::Midi(_) => None,
        }
    }

    pub fn as_sample_mut(&mut self) -> Option<&mut SampleChannel> {
        match &mut self.kind {
            ChannelKind::Sample(s) => Some(s),
            ChannelKind::Midi(_) => None,
        }
    }

    pub fn as_midi(&self) -> Option<&MidiChannel> {
        match &self.kind {
            ChannelKind::Midi(m) => Some(m),
            ChannelKind::Sample(_) => None,
        }
    }

    pub fn as_midi_mut(&mut self) -> Option<&mut MidiChannel> {
        match &mut self.kind {
            ChannelKind::Midi(m) => Some(m),
            ChannelKind::Sample(_) => None,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.load()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.status.store(status);
    }

    pub fn rec_status(&self) -> ChannelStatus {
        self.rec_status.load()
    }

    pub fn set_rec_status(&self, status: ChannelStatus) {
        self.rec_status.store(status);
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.status(), ChannelStatus::Play | ChannelStatus::Ending)
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, max_boost()));
    }

    pub fn pan(&self) -> f32 {
        self.pan.load()
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(0.0, 1.0));
    }

    pub fn calc_panning(&self, channel: usize) -> f32 {
        calc_panning(self.pan(), channel)
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Relaxed);
    }

    pub fn is_reading_actions(&self) -> bool {
        self.read_actions.load(Ordering::Acquire)
    }

    pub fn set_reading_actions(&self, reading: bool) {
        self.read_actions.store(reading, Ordering::Release);
    }

    /// A soloed mix silences every channel that is not soloed, whatever
    /// its own mute flag says.
    pub fn is_audible(&self, has_solos: bool) -> bool {
        !self.is_muted() && (!has_solos || self.is_soloed())
    }

    pub fn midi_learn(&self) -> &MidiLearn {
        &self.midi_learn
    }

    pub fn set_midi_learn(&mut self, learn: MidiLearn) {
        self.midi_learn = learn;
    }

    pub fn lightning(&self) -> &MidiLightning {
        &self.lightning
    }

    pub fn set_lightning(&mut self, lightning: MidiLightning) {
        self.lightning = lightning;
    }

    pub fn plugins(&self) -> &PluginStack {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginStack {
        &mut self.plugins
    }

    /// Channel with audio (or an instrument) to play.
    pub fn has_data(&self) -> bool {
        match &self.kind {
            ChannelKind::Sample(s) => s.has_wave(),
            ChannelKind::Midi(_) => true,
        }
    }

    pub(crate) fn runtime(&self) -> ChannelRuntime {
        ChannelRuntime {
            status: self.status(),
            rec_status: self.rec_status(),
            volume: self.volume(),
            pan: self.pan(),
            mute: self.is_muted(),
            solo: self.is_soloed(),
            armed: self.is_armed(),
            read_actions: self.is_reading_actions(),
            sample: self.as_sample().map(SampleChannel::runtime),
        }
    }

    /// Carry over what changed on the published copy of this channel since
    /// `origin` was taken, keeping the values this copy changed itself.
    pub(crate) fn merge_runtime(&self, origin: &ChannelRuntime, live: &ChannelRuntime) {
        let mine = self.runtime();
        self.status.store(pick(mine.status, origin.status, live.status));
        self.rec_status
            .store(pick(mine.rec_status, origin.rec_status, live.rec_status));
        self.volume.store(pick(mine.volume, origin.volume, live.volume));
        self.pan.store(pick(mine.pan, origin.pan, live.pan));
        self.set_mute(pick(mine.mute, origin.mute, live.mute));
        self.set_solo(pick(mine.solo, origin.solo, live.solo));
        self.set_armed(pick(mine.armed, origin.armed, live.armed));
        self.set_reading_actions(pick(mine.read_actions, origin.read_actions, live.read_actions));
        if let (Some(s), Some(origin), Some(live)) =
            (self.as_sample(), &origin.sample, &live.sample)
        {
            s.merge_runtime(origin, live);
        }
    }

    pub(crate) fn notify_status(&self, status: ChannelStatus, fb: &mut Feedback) {
        self.set_status(status);
        fb.send_status(&self.lightning, status, self.is_audible(fb.has_solos));
    }

    pub fn send_lightning(&self, fb: &mut Feedback) {
        fb.send_status(&self.lightning, self.status(), self.is_audible(fb.has_solos));
        fb.send_mute(&self.lightning, self.is_muted());
        fb.send_solo(&self.lightning, self.is_soloed());
    }

    /// Key press (or recorded note on when called from the renderer).
    pub fn start(&self, do_quantize: bool, velocity: u8, clock: &dyn Clock, fb: &mut Feedback) {
        match &self.kind {
            ChannelKind::Sample(s) => {
                sample::start(self, s, do_quantize, velocity, clock, fb);
            }
            ChannelKind::Midi(m) => midi::start(self, m, fb),
        }
    }

    /// Key release. Only single-press sample channels react to it.
    pub fn stop(&self, fb: &mut Feedback) {
        if let ChannelKind::Sample(s) = &self.kind {
            sample::stop(self, s, fb);
        }
    }

    pub fn kill(&self, fb: &mut Feedback) {
        match &self.kind {
            ChannelKind::Sample(s) => {
                sample::kill(self, s, fb);
            }
            ChannelKind::Midi(m) => midi::kill(self, m, fb),
        }
    }

    /// The sequencer stopped.
    pub fn stop_by_seq(&self, chans_stop_on_seq_halt: bool, fb: &mut Feedback) {
        match &self.kind {
            ChannelKind::Sample(s) => {
                sample::stop_by_seq(self, s, chans_stop_on_seq_halt, fb);
            }
            ChannelKind::Midi(m) => midi::kill(self, m, fb),
        }
    }

    /// The sequencer jumped back to frame 0.
    pub fn rewind_by_seq(&self, fb: &mut Feedback) {
        match &self.kind {
            ChannelKind::Sample(s) => {
                sample::rewind_by_seq(self, s);
            }
            ChannelKind::Midi(m) => midi::rewind_by_seq(self, m, fb),
        }
    }

    /// Recorded actions are read at once, or from the next first beat when
    /// they are treated as loops.
    pub fn start_reading_actions(&self, treat_recs_as_loops: bool) {
        if treat_recs_as_loops {
            self.set_rec_status(ChannelStatus::Wait);
        } else {
            self.set_rec_status(ChannelStatus::Off);
            self.set_reading_actions(true);
        }
    }

    pub fn stop_reading_actions(
        &self,
        running: bool,
        treat_recs_as_loops: bool,
        recs_stop_on_chan_halt: bool,
        fb: &mut Feedback,
    ) {
        if running && treat_recs_as_loops {
            self.set_rec_status(ChannelStatus::Ending);
        } else {
            self.set_rec_status(ChannelStatus::Off);
            self.set_reading_actions(false);
            if recs_stop_on_chan_halt {
                self.kill(fb);
            }
        }
    }

    /// MIDI input thread: queue an event for this channel's plugins.
    pub fn receive_midi(&self, event: MidiEvent) -> bool {
        match &self.kind {
            ChannelKind::Midi(m) if self.is_armed() && !self.plugins.is_empty() => {
                m.receive(event)
            }
            _ => false,
        }
    }

    // Audio thread below.

    pub(crate) fn prepare_buffer(&self, frames: usize, fb: &mut Feedback) {
        let Ok(mut scratch) = self.scratch.try_lock() else {
            return;
        };
        scratch.buffer.clear();
        if let ChannelKind::Sample(s) = &self.kind
            && self.is_playing()
        {
            sample::render(self, s, &mut scratch.buffer, 0, frames, fb);
        }
    }

    pub(crate) fn apply_fill(&self, fill: Fill, offset: usize, frames: usize, fb: &mut Feedback) {
        let Ok(mut scratch) = self.scratch.try_lock() else {
            return;
        };
        match (fill, &self.kind) {
            (Fill::Render, ChannelKind::Sample(s)) => {
                sample::render(self, s, &mut scratch.buffer, offset, frames, fb)
            }
            (Fill::Render, ChannelKind::Midi(_)) => {}
            (Fill::Silence, _) => scratch.buffer.clear_from(offset),
        }
    }

    pub(crate) fn parse_events(
        &self,
        fe: &FrameEvents,
        frames: usize,
        clock: &dyn Clock,
        fb: &mut Feedback,
    ) {
        match &self.kind {
            ChannelKind::Sample(s) => sample::parse_events(self, s, fe, frames, clock, fb),
            ChannelKind::Midi(m) => midi::parse_events(self, m, fe, fb),
        }
    }

    /// Quantized rewind fired at `offset` inside the block.
    pub(crate) fn rewind_in_block(&self, offset: usize, frames: usize, fb: &mut Feedback) {
        match &self.kind {
            ChannelKind::Sample(s) => {
                if let Some(fill) = sample::rewind_by_seq(self, s) {
                    self.apply_fill(fill, offset, frames, fb);
                }
            }
            ChannelKind::Midi(m) => midi::rewind_by_seq(self, m, fb),
        }
    }

    /// Mix this channel into `out`.
    pub(crate) fn process(
        &self,
        out: &mut AudioBuffer,
        input: &AudioBuffer,
        frames: usize,
        audible: bool,
        scratch: &mut RenderScratch,
    ) {
        let Ok(mut local) = self.scratch.try_lock() else {
            return;
        };
        let local = &mut *local;

        match &self.kind {
            ChannelKind::Sample(s) => {
                if s.input_monitor() && self.is_armed() {
                    for f in 0..frames.min(input.frames()) {
                        for c in 0..local.buffer.channels() {
                            local.buffer[f][c] += input[f][c % input.channels()];
                        }
                    }
                }
                self.plugins
                    .process(&mut local.buffer, frames, &mut scratch.host, &scratch.empty_midi);
                if audible {
                    let gain = self.volume() * s.boost() * s.volume_i();
                    mix(out, &local.buffer, frames, gain, self.pan());
                }
                if s.preview_mode() != PreviewMode::None {
                    sample::render_preview(s, &mut local.preview, frames);
                    mix(out, &local.preview, frames, 1.0, DEFAULT_PAN);
                }
            }
            ChannelKind::Midi(m) => {
                scratch.midi.clear();
                m.drain_into(&mut scratch.midi);
                self.plugins
                    .process(&mut local.buffer, frames, &mut scratch.host, &scratch.midi);
                if audible {
                    mix(out, &local.buffer, frames, self.volume(), self.pan());
                }
            }
        }
    }
}

fn mix(out: &mut AudioBuffer, buffer: &AudioBuffer, frames: usize, gain: f32, pan: f32) {
    let frames = frames.min(out.frames()).min(buffer.frames());
    for f in 0..frames {
        for c in 0..out.channels() {
            out[f][c] += buffer[f][c % buffer.channels()] * gain * calc_panning(pan, c);
        }
    }
}

impl Clone for Channel {
    /// Deep copy with the current parameter and transport values. Plugins
    /// are re-instantiated; working buffers and MIDI queues start empty.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            index: self.index,
            column: self.column,
            name: self.name.clone(),
            block_size: self.block_size,
            status: AtomicStatus::new(self.status()),
            rec_status: AtomicStatus::new(self.rec_status()),
            volume: AtomicF32::new(self.volume()),
            pan: AtomicF32::new(self.pan()),
            mute: AtomicBool::new(self.is_muted()),
            solo: AtomicBool::new(self.is_soloed()),
            armed: AtomicBool::new(self.is_armed()),
            read_actions: AtomicBool::new(self.is_reading_actions()),
            midi_learn: self.midi_learn,
            lightning: self.lightning,
            plugins: self.plugins.clone(),
            scratch: Mutex::new(ChannelScratch::new(self.block_size)),
            kind: self.kind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_law() {
        assert_eq!(calc_panning(0.5, 0), 1.0);
        assert_eq!(calc_panning(0.5, 1), 1.0);
        assert_eq!(calc_panning(1.0, 0), 0.0);
        assert_eq!(calc_panning(1.0, 1), 1.0);
        assert_eq!(calc_panning(0.0, 0), 1.0);
        assert_eq!(calc_panning(0.0, 1), 0.0);
        assert!((calc_panning(0.25, 0) - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_solo_mute_law() {
        let a = Channel::new(ChannelType::Sample, 0, 0, 16);
        let b = Channel::new(ChannelType::Sample, 1, 0, 16);
        let c = Channel::new(ChannelType::Sample, 2, 0, 16);
        b.set_solo(true);
        c.set_mute(true);

        let has_solos = [&a, &b, &c].iter().any(|ch| ch.is_soloed());
        let audible: Vec<bool> = [&a, &b, &c]
            .iter()
            .map(|ch| ch.is_audible(has_solos))
            .collect();
        assert_eq!(audible, vec![false, true, false]);

        // Without solos only the mute flag counts.
        assert!(a.is_audible(false));
        assert!(!c.is_audible(false));
    }

    #[test]
    fn test_parameters_are_clamped() {
        let ch = Channel::new(ChannelType::Midi, 0, 0, 16);
        ch.set_pan(1.5);
        assert_eq!(ch.pan(), 1.0);
        ch.set_volume(-1.0);
        assert_eq!(ch.volume(), 0.0);
        ch.set_volume(100.0);
        assert_eq!(ch.volume(), max_boost());
    }

    #[test]
    fn test_new_channel_states() {
        let sample = Channel::new(ChannelType::Sample, 0, 0, 16);
        let midi = Channel::new(ChannelType::Midi, 1, 0, 16);
        assert_eq!(sample.status(), ChannelStatus::Empty);
        assert!(!sample.has_data());
        assert_eq!(midi.status(), ChannelStatus::Off);
        assert_eq!(midi.channel_type(), ChannelType::Midi);
    }

    #[test]
    fn test_clone_copies_state_and_isolates_it() {
        let ch = Channel::new(ChannelType::Midi, 3, 1, 16);
        ch.set_volume(0.3);
        ch.set_mute(true);
        ch.set_status(ChannelStatus::Play);

        let copy = ch.clone();
        assert_eq!(copy.index(), 3);
        assert_eq!(copy.volume(), 0.3);
        assert!(copy.is_muted());
        assert_eq!(copy.status(), ChannelStatus::Play);

        copy.set_volume(0.9);
        assert_eq!(ch.volume(), 0.3);
    }

    #[test]
    fn test_reading_actions_as_loops_waits() {
        let ch = Channel::new(ChannelType::Sample, 0, 0, 16);
        ch.start_reading_actions(true);
        assert_eq!(ch.rec_status(), ChannelStatus::Wait);
        assert!(!ch.is_reading_actions());

        ch.start_reading_actions(false);
        assert!(ch.is_reading_actions());
    }
}
