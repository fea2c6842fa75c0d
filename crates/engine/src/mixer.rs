use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use looper_transport::{AudioBuffer, MAX_IO_CHANS, MidiEvent};

use crate::atomic::AtomicF32;
use crate::clock::{Clock, Sequencer};
use crate::data::{RenderContext, RenderScratch};
use crate::midi::RingSink;
use crate::model::Model;

/// Master-bus switches and meters shared between control and audio threads.
#[derive(Debug)]
pub struct MixerState {
    out_vol: AtomicF32,
    in_vol: AtomicF32,
    in_to_out: AtomicBool,
    limit_output: AtomicBool,
    metronome: AtomicBool,
    recording_input: AtomicBool,
    recording_actions: AtomicBool,
    peak_out: AtomicF32,
    peak_in: AtomicF32,
    midi_out_dropped: AtomicUsize,
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            out_vol: AtomicF32::new(1.0),
            in_vol: AtomicF32::new(1.0),
            in_to_out: AtomicBool::new(false),
            limit_output: AtomicBool::new(false),
            metronome: AtomicBool::new(false),
            recording_input: AtomicBool::new(false),
            recording_actions: AtomicBool::new(false),
            peak_out: AtomicF32::new(0.0),
            peak_in: AtomicF32::new(0.0),
            midi_out_dropped: AtomicUsize::new(0),
        }
    }
}

impl MixerState {
    pub fn out_vol(&self) -> f32 {
        self.out_vol.load()
    }

    pub fn set_out_vol(&self, vol: f32) {
        self.out_vol.store(vol.clamp(0.0, 1.0));
    }

    pub fn in_vol(&self) -> f32 {
        self.in_vol.load()
    }

    pub fn set_in_vol(&self, vol: f32) {
        self.in_vol.store(vol.clamp(0.0, 1.0));
    }

    pub fn in_to_out(&self) -> bool {
        self.in_to_out.load(Ordering::Relaxed)
    }

    pub fn set_in_to_out(&self, enabled: bool) {
        self.in_to_out.store(enabled, Ordering::Relaxed);
    }

    pub fn limit_output(&self) -> bool {
        self.limit_output.load(Ordering::Relaxed)
    }

    pub fn set_limit_output(&self, enabled: bool) {
        self.limit_output.store(enabled, Ordering::Relaxed);
    }

    pub fn metronome(&self) -> bool {
        self.metronome.load(Ordering::Relaxed)
    }

    pub fn set_metronome(&self, enabled: bool) {
        self.metronome.store(enabled, Ordering::Relaxed);
    }

    pub fn is_recording_input(&self) -> bool {
        self.recording_input.load(Ordering::Acquire)
    }

    pub(crate) fn set_recording_input(&self, recording: bool) {
        self.recording_input.store(recording, Ordering::Release);
    }

    pub fn is_recording_actions(&self) -> bool {
        self.recording_actions.load(Ordering::Acquire)
    }

    pub(crate) fn set_recording_actions(&self, recording: bool) {
        self.recording_actions.store(recording, Ordering::Release);
    }

    /// Output peak of the last block, after master volume.
    pub fn peak_out(&self) -> f32 {
        self.peak_out.load()
    }

    pub fn peak_in(&self) -> f32 {
        self.peak_in.load()
    }

    /// Outgoing MIDI events lost to a full ring since the last call.
    pub fn take_midi_out_dropped(&self) -> usize {
        self.midi_out_dropped.swap(0, Ordering::Relaxed)
    }
}

const CLICK_SECS: f32 = 0.03;
const CLICK_GAIN: f32 = 0.4;
const TICK_HZ: f32 = 880.0;
const TOCK_HZ: f32 = 1760.0;

/// Short sine clicks on every beat, higher-pitched on bars.
#[derive(Debug, Default)]
pub struct Metronome {
    remaining: usize,
    length: usize,
    phase: f32,
    freq: f32,
}

impl Metronome {
    pub(crate) fn tick(&mut self, clock: &dyn Clock, out: &mut AudioBuffer, frame: usize) {
        let sample_rate = clock.sample_rate().max(1) as f32;
        if clock.is_on_beat() {
            self.length = (sample_rate * CLICK_SECS) as usize;
            self.remaining = self.length;
            self.phase = 0.0;
            self.freq = if clock.is_on_bar() { TOCK_HZ } else { TICK_HZ };
        }
        if self.remaining == 0 || frame >= out.frames() {
            return;
        }
        let env = self.remaining as f32 / self.length as f32;
        let value = (self.phase * TAU).sin() * CLICK_GAIN * env;
        for sample in &mut out[frame] {
            *sample += value;
        }
        self.phase = (self.phase + self.freq / sample_rate).fract();
        self.remaining -= 1;
    }
}

/// Audio-thread side of the mixer. Owns every buffer the callback needs;
/// `render` allocates nothing.
pub struct Renderer {
    model: Arc<Model>,
    clock: Arc<Sequencer>,
    state: Arc<MixerState>,
    block_size: usize,
    scratch: RenderScratch,
    out: AudioBuffer,
    input: AudioBuffer,
    in_to_out: AudioBuffer,
    midi_out: rtrb::Producer<MidiEvent>,
    input_rx: Option<rtrb::Consumer<f32>>,
    takes_rx: rtrb::Consumer<Box<AudioBuffer>>,
    takes_tx: rtrb::Producer<Box<AudioBuffer>>,
    take: Option<Box<AudioBuffer>>,
}

impl Renderer {
    pub(crate) fn new(
        model: Arc<Model>,
        clock: Arc<Sequencer>,
        state: Arc<MixerState>,
        block_size: usize,
        midi_out: rtrb::Producer<MidiEvent>,
        takes_rx: rtrb::Consumer<Box<AudioBuffer>>,
        takes_tx: rtrb::Producer<Box<AudioBuffer>>,
    ) -> Self {
        Self {
            model,
            clock,
            state,
            block_size,
            scratch: RenderScratch::new(block_size),
            out: AudioBuffer::new(block_size, MAX_IO_CHANS),
            input: AudioBuffer::new(block_size, MAX_IO_CHANS),
            in_to_out: AudioBuffer::new(block_size, MAX_IO_CHANS),
            midi_out,
            input_rx: None,
            takes_rx,
            takes_tx,
            take: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Interleaved stereo input samples, filled by the input stream.
    pub fn set_input(&mut self, input_rx: rtrb::Consumer<f32>) {
        self.input_rx = Some(input_rx);
    }

    /// Render `frames` frames (at most the block size). The result stays in
    /// [`Renderer::output`] until the next call.
    pub fn render(&mut self, frames: usize) -> &AudioBuffer {
        let frames = frames.min(self.block_size);
        self.out.clear();
        self.in_to_out.clear();
        self.pull_input(frames);
        self.exchange_take();

        let in_vol = self.state.in_vol();
        if in_vol != 1.0 {
            self.input.apply_gain(in_vol);
        }
        self.state.peak_in.store(self.input.peak());
        let monitor = self.state.in_to_out();
        if monitor {
            self.in_to_out.copy_from(&self.input);
        }

        let data = self.model.get();
        let mut midi_out = RingSink::new(&mut self.midi_out, &self.state.midi_out_dropped);
        data.render(
            &mut self.out,
            &self.input,
            &mut self.in_to_out,
            frames,
            RenderContext {
                clock: self.clock.as_ref(),
                state: &self.state,
                scratch: &mut self.scratch,
                midi_out: &mut midi_out,
                take: self.take.as_deref_mut(),
            },
        );

        if monitor {
            self.out.add_from(&self.in_to_out, 1.0);
        }
        self.out.apply_gain(self.state.out_vol());
        if self.state.limit_output() {
            for sample in self.out.as_mut_slice() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
        self.state.peak_out.store(self.out.peak());
        &self.out
    }

    pub fn output(&self) -> &AudioBuffer {
        &self.out
    }

    fn pull_input(&mut self, frames: usize) {
        self.input.clear();
        let Some(rx) = self.input_rx.as_mut() else {
            return;
        };
        let channels = self.input.channels();
        for f in 0..frames {
            for c in 0..channels {
                match rx.pop() {
                    Ok(sample) => self.input[f][c] = sample,
                    Err(_) => return,
                }
            }
        }
    }

    /// Pick up a fresh take when recording starts, hand it back once
    /// recording stopped. A take the control side has no room for is kept
    /// and offered again next block.
    fn exchange_take(&mut self) {
        if self.take.is_none()
            && let Ok(take) = self.takes_rx.pop()
        {
            self.take = Some(take);
        }
        if !self.state.is_recording_input()
            && let Some(take) = self.take.take()
            && let Err(rtrb::PushError::Full(take)) = self.takes_tx.push(take)
        {
            self.take = Some(take);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(block: usize) -> (Renderer, Arc<MixerState>, basedrop::Collector) {
        let collector = basedrop::Collector::new();
        let model = Arc::new(Model::new(&collector.handle(), crate::data::Data::new(block)));
        let state = Arc::new(MixerState::default());
        let (midi_tx, _midi_rx) = rtrb::RingBuffer::new(16);
        let (_takes_in_tx, takes_in_rx) = rtrb::RingBuffer::new(1);
        let (takes_out_tx, _takes_out_rx) = rtrb::RingBuffer::new(1);
        let renderer = Renderer::new(
            model,
            Arc::new(Sequencer::new(44100)),
            state.clone(),
            block,
            midi_tx,
            takes_in_rx,
            takes_out_tx,
        );
        (renderer, state, collector)
    }

    #[test]
    fn test_input_monitor_and_limiter() {
        let (mut renderer, state, _collector) = renderer(8);
        let (mut tx, rx) = rtrb::RingBuffer::new(64);
        for _ in 0..16 {
            tx.push(2.0).unwrap();
        }
        renderer.set_input(rx);
        state.set_in_to_out(true);
        state.set_limit_output(true);

        let out = renderer.render(8);
        assert_eq!(out[0], [1.0, 1.0]);
        assert_eq!(state.peak_out(), 1.0);
        assert_eq!(state.peak_in(), 2.0);
    }

    #[test]
    fn test_metronome_clicks_on_beats() {
        let (mut renderer, state, _collector) = renderer(64);
        state.set_metronome(true);
        renderer.clock.start();
        let out = renderer.render(64);
        // Phase 0 at the beat itself, then the sine rises.
        assert_eq!(out[0][0], 0.0);
        assert!(out[1][0] > 0.0);

        state.set_metronome(false);
        renderer.clock.seek(100);
        assert_eq!(renderer.render(64).peak(), 0.0);
    }

    #[test]
    fn test_full_midi_out_ring_is_counted() {
        use crate::channel::{ChannelStatus, ChannelType};

        let (mut renderer, state, _collector) = renderer(8);
        renderer.model.update(|data| {
            for _ in 0..20 {
                let index = data.add_channel(ChannelType::Midi, 0);
                let channel = data.channel_mut(index).unwrap();
                channel.as_midi_mut().unwrap().set_midi_out(true, 0);
                channel.set_status(ChannelStatus::Ending);
            }
        });
        renderer.clock.start();

        // Every channel sends all-notes-off on the first beat; the ring
        // holds 16.
        renderer.render(8);
        assert_eq!(state.take_midi_out_dropped(), 4);
        assert_eq!(state.take_midi_out_dropped(), 0);
    }
}
