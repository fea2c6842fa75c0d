use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use looper_decode::WaveError;
use looper_transport::{AudioArc, AudioBuffer, MAX_IO_CHANS, MidiEvent, Wave};

use crate::channel::{Channel, ChannelStatus, ChannelType, PreviewMode, SampleMode};
use crate::clock::{Clock, Sequencer};
use crate::data::Data;
use crate::midi::{Feedback, MidiLearn, MidiLightning, MidiMap, MidiSink, NullSink};
use crate::mixer::{MixerState, Renderer};
use crate::model::{Model, SwapError};
use crate::plugin::{Direction, PluginError, PluginFactory, PluginSlot, StackType};
use crate::recorder::Action;

/// Capacity of the audio thread's outgoing MIDI ring.
pub const MIDI_OUT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("channel {0} not found")]
    ChannelNotFound(usize),

    #[error("channel {0} is not a sample channel")]
    NotASampleChannel(usize),

    #[error("plugin {index} not found in {stack:?}")]
    PluginNotFound { stack: StackType, index: usize },

    #[error(transparent)]
    Wave(#[from] WaveError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("no armed sample channel to record into")]
    NoArmedChannels,

    #[error("input recording is not available without a running renderer")]
    InputRecUnavailable,
}

/// Playback preferences that change how channels follow the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behaviors {
    pub chans_stop_on_seq_halt: bool,
    pub treat_recs_as_loops: bool,
    pub recs_stop_on_chan_halt: bool,
    pub input_monitor_default_on: bool,
}

impl Default for Behaviors {
    fn default() -> Self {
        Self {
            chans_stop_on_seq_halt: true,
            treat_recs_as_loops: false,
            recs_stop_on_chan_halt: false,
            input_monitor_default_on: false,
        }
    }
}

/// Control-side operations on the session.
///
/// Structural edits go through [`Model::draft`] and [`Model::swap`];
/// scalar parameters are written straight into the published snapshot's
/// atomics. Safe to share between the UI and MIDI input threads.
pub struct MixerHandler {
    model: Arc<Model>,
    clock: Arc<Sequencer>,
    state: Arc<MixerState>,
    behaviors: Behaviors,
    factory: Arc<dyn PluginFactory>,
    sample_rate: u32,
    block_size: usize,
    feedback: Mutex<Box<dyn MidiSink + Send>>,
    takes_tx: Mutex<Option<rtrb::Producer<Box<AudioBuffer>>>>,
    takes_rx: Mutex<Option<rtrb::Consumer<Box<AudioBuffer>>>>,
    last_take_id: AtomicU32,
}

impl MixerHandler {
    pub fn new(
        model: Arc<Model>,
        clock: Arc<Sequencer>,
        factory: Arc<dyn PluginFactory>,
        behaviors: Behaviors,
        block_size: usize,
    ) -> Self {
        Self {
            sample_rate: clock.sample_rate(),
            model,
            clock,
            state: Arc::new(MixerState::default()),
            behaviors,
            factory,
            block_size,
            feedback: Mutex::new(Box::new(NullSink)),
            takes_tx: Mutex::new(None),
            takes_rx: Mutex::new(None),
            last_take_id: AtomicU32::new(0),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn clock(&self) -> &Arc<Sequencer> {
        &self.clock
    }

    pub fn state(&self) -> &Arc<MixerState> {
        &self.state
    }

    pub fn behaviors(&self) -> Behaviors {
        self.behaviors
    }

    pub fn factory(&self) -> &Arc<dyn PluginFactory> {
        &self.factory
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn last_take_id(&self) -> u32 {
        self.last_take_id.load(Ordering::Relaxed)
    }

    pub fn set_last_take_id(&self, id: u32) {
        self.last_take_id.store(id, Ordering::Relaxed);
    }

    /// Where lightning feedback from control-thread transitions goes.
    pub fn set_feedback_sink(&self, sink: Box<dyn MidiSink + Send>) {
        *self.feedback.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Build the audio-thread half. The returned consumer yields MIDI the
    /// renderer sends (MIDI-out channels and lightning). Calling it again
    /// replaces the input-recording link of the previous renderer.
    pub fn create_renderer(&self) -> (Renderer, rtrb::Consumer<MidiEvent>) {
        let (midi_tx, midi_rx) = rtrb::RingBuffer::new(MIDI_OUT_CAPACITY);
        let (to_audio_tx, to_audio_rx) = rtrb::RingBuffer::new(1);
        let (to_ctrl_tx, to_ctrl_rx) = rtrb::RingBuffer::new(1);
        *self.takes_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(to_audio_tx);
        *self.takes_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(to_ctrl_rx);
        let renderer = Renderer::new(
            Arc::clone(&self.model),
            Arc::clone(&self.clock),
            Arc::clone(&self.state),
            self.block_size,
            midi_tx,
            to_audio_rx,
            to_ctrl_tx,
        );
        (renderer, midi_rx)
    }

    fn try_update<R>(
        &self,
        mut edit: impl FnMut(&mut Data) -> Result<R, HandlerError>,
    ) -> Result<R, HandlerError> {
        loop {
            let mut draft = self.model.draft();
            let result = edit(&mut draft)?;
            match self.model.swap(draft) {
                Ok(()) => return Ok(result),
                Err(SwapError::Stale { current, .. }) => {
                    log::warn!("model changed while editing (now version {current}), retrying");
                }
            }
        }
    }

    fn with_feedback<R>(&self, f: impl FnOnce(&Data, &mut Feedback) -> R) -> R {
        let data = self.model.get();
        let mut sink = self.feedback.lock().unwrap_or_else(PoisonError::into_inner);
        let mut fb = Feedback {
            midimap: data.midimap(),
            out: &mut **sink,
            has_solos: data.has_solos(),
        };
        f(&data, &mut fb)
    }

    fn with_channel<R>(
        &self,
        index: usize,
        f: impl FnOnce(&Channel, &mut Feedback) -> R,
    ) -> Result<R, HandlerError> {
        self.with_feedback(|data, fb| {
            let channel = data
                .channel(index)
                .ok_or(HandlerError::ChannelNotFound(index))?;
            Ok(f(channel, fb))
        })
    }

    fn sample_channel_mut(data: &mut Data, index: usize) -> Result<&mut Channel, HandlerError> {
        let channel = data
            .channel_mut(index)
            .ok_or(HandlerError::ChannelNotFound(index))?;
        if channel.channel_type() != ChannelType::Sample {
            return Err(HandlerError::NotASampleChannel(index));
        }
        Ok(channel)
    }

    // Channel structure

    pub fn add_channel(&self, channel_type: ChannelType, column: usize) -> usize {
        let monitor = self.behaviors.input_monitor_default_on;
        let index = self.model.update(|data| {
            let index = data.add_channel(channel_type, column);
            if let Some(sample) = data.channel(index).and_then(Channel::as_sample) {
                sample.set_input_monitor(monitor);
            }
            index
        });
        log::info!("added {channel_type:?} channel {index}");
        index
    }

    /// Decode `path` and install it in a sample channel.
    pub fn load_channel(&self, index: usize, path: impl AsRef<Path>) -> Result<(), HandlerError> {
        let wave = looper_decode::load_wave(path.as_ref(), self.sample_rate)?;
        self.set_wave(index, wave)
    }

    /// Install an already decoded wave.
    pub fn set_wave(&self, index: usize, wave: Wave) -> Result<(), HandlerError> {
        let name = wave.basename();
        self.try_update(|data| {
            let channel = Self::sample_channel_mut(data, index)?;
            channel.set_name(name.clone());
            channel.set_status(ChannelStatus::Off);
            if let Some(sample) = channel.as_sample_mut() {
                sample.set_wave(Some(wave.clone()));
            }
            Ok(())
        })?;
        log::info!("loaded '{name}' into channel {index}");
        Ok(())
    }

    /// Duplicate a channel (recorded actions included) at the end.
    pub fn clone_channel(&self, index: usize) -> Result<usize, HandlerError> {
        let new_index = self.try_update(|data| {
            data.clone_channel(index)
                .ok_or(HandlerError::ChannelNotFound(index))
        })?;
        log::info!("cloned channel {index} into {new_index}");
        Ok(new_index)
    }

    /// Unload the wave and actions of a sample channel.
    pub fn free_channel(&self, index: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            let channel = Self::sample_channel_mut(data, index)?;
            channel.set_status(ChannelStatus::Empty);
            channel.set_rec_status(ChannelStatus::Off);
            channel.set_reading_actions(false);
            channel.set_name("");
            if let Some(sample) = channel.as_sample_mut() {
                sample.set_wave(None);
            }
            data.actions_mut().clear_channel(index);
            Ok(())
        })?;
        log::info!("freed channel {index}");
        Ok(())
    }

    pub fn delete_channel(&self, index: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.remove_channel(index)
                .map(drop)
                .ok_or(HandlerError::ChannelNotFound(index))
        })?;
        log::info!("deleted channel {index}");
        Ok(())
    }

    pub fn rename(&self, index: usize, name: &str) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.channel_mut(index)
                .ok_or(HandlerError::ChannelNotFound(index))?
                .set_name(name);
            Ok(())
        })
    }

    pub fn set_begin_end(&self, index: usize, begin: usize, end: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            if let Some(sample) = Self::sample_channel_mut(data, index)?.as_sample_mut() {
                sample.set_begin_end(begin, end);
            }
            Ok(())
        })
    }

    pub fn set_mode(&self, index: usize, mode: SampleMode) -> Result<(), HandlerError> {
        self.try_update(|data| {
            if let Some(sample) = Self::sample_channel_mut(data, index)?.as_sample_mut() {
                sample.set_mode(mode);
            }
            Ok(())
        })
    }

    pub fn set_velo_as_vol(&self, index: usize, enabled: bool) -> Result<(), HandlerError> {
        self.try_update(|data| {
            if let Some(sample) = Self::sample_channel_mut(data, index)?.as_sample_mut() {
                sample.set_velo_as_vol(enabled);
            }
            Ok(())
        })
    }

    // Channel parameters: atomics on the published snapshot

    pub fn set_volume(&self, index: usize, volume: f32) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.set_volume(volume))
    }

    pub fn set_pan(&self, index: usize, pan: f32) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.set_pan(pan))
    }

    pub fn set_pitch(&self, index: usize, pitch: f32) -> Result<(), HandlerError> {
        self.with_sample(index, |s| s.set_pitch(pitch))
    }

    pub fn set_boost(&self, index: usize, boost: f32) -> Result<(), HandlerError> {
        self.with_sample(index, |s| s.set_boost(boost))
    }

    fn with_sample(
        &self,
        index: usize,
        f: impl FnOnce(&crate::channel::SampleChannel),
    ) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.as_sample().map(f))?
            .ok_or(HandlerError::NotASampleChannel(index))
    }

    pub fn set_mute(&self, index: usize, mute: bool) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, fb| {
            ch.set_mute(mute);
            ch.send_lightning(fb);
        })
    }

    pub fn toggle_mute(&self, index: usize) -> Result<(), HandlerError> {
        let mute = self.with_channel(index, |ch, _| !ch.is_muted())?;
        self.set_mute(index, mute)
    }

    /// Soloing changes every channel's audibility, so all of them refresh
    /// their lightning.
    pub fn set_solo(&self, index: usize, solo: bool) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.set_solo(solo))?;
        self.send_all_lightning();
        Ok(())
    }

    pub fn toggle_solo(&self, index: usize) -> Result<(), HandlerError> {
        let solo = self.with_channel(index, |ch, _| !ch.is_soloed())?;
        self.set_solo(index, solo)
    }

    pub fn set_armed(&self, index: usize, armed: bool) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.set_armed(armed))
    }

    pub fn toggle_arm(&self, index: usize) -> Result<(), HandlerError> {
        self.with_channel(index, |ch, _| ch.set_armed(!ch.is_armed()))
    }

    pub fn set_input_monitor(&self, index: usize, monitor: bool) -> Result<(), HandlerError> {
        self.with_sample(index, |s| s.set_input_monitor(monitor))
    }

    pub fn toggle_input_monitor(&self, index: usize) -> Result<(), HandlerError> {
        self.with_sample(index, |s| s.set_input_monitor(!s.input_monitor()))
    }

    pub fn send_all_lightning(&self) {
        self.with_feedback(|data, fb| {
            for channel in data.channels() {
                channel.send_lightning(fb);
            }
        });
    }

    // Bindings and routing

    pub fn set_midi_learn(&self, index: usize, learn: MidiLearn) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.channel_mut(index)
                .ok_or(HandlerError::ChannelNotFound(index))?
                .set_midi_learn(learn);
            Ok(())
        })
    }

    pub fn set_lightning(&self, index: usize, lightning: MidiLightning) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.channel_mut(index)
                .ok_or(HandlerError::ChannelNotFound(index))?
                .set_lightning(lightning);
            Ok(())
        })
    }

    pub fn set_midi_out(&self, index: usize, enabled: bool, channel: u8) -> Result<(), HandlerError> {
        self.try_update(|data| {
            let ch = data
                .channel_mut(index)
                .ok_or(HandlerError::ChannelNotFound(index))?;
            if let Some(midi) = ch.as_midi_mut() {
                midi.set_midi_out(enabled, channel);
            }
            Ok(())
        })
    }

    /// Install a controller map and send its init commands.
    pub fn set_midimap(&self, midimap: MidiMap) {
        let init = midimap.init_commands.clone();
        self.model.update(|data| data.set_midimap(midimap.clone()));
        let mut sink = self.feedback.lock().unwrap_or_else(PoisonError::into_inner);
        for message in init.iter().filter(|m| m.is_defined()) {
            sink.send(MidiEvent::from_raw(message.value).with_channel(message.channel));
        }
    }

    // Playback

    /// Record `event` for a single-mode sample channel when action
    /// recording is on and the sequencer runs.
    fn record_if_active(&self, index: usize, event: MidiEvent) -> Result<(), HandlerError> {
        if !self.state.is_recording_actions() || !self.clock.is_running() {
            return Ok(());
        }
        let recordable = self
            .model
            .get()
            .channel(index)
            .and_then(Channel::as_sample)
            .is_some_and(|s| s.has_wave() && s.mode().is_single());
        if !recordable {
            return Ok(());
        }
        self.record_action(Action {
            channel: index,
            frame: self.clock.current_frame(),
            event,
        })
    }

    pub fn key_press(&self, index: usize, velocity: u8) -> Result<(), HandlerError> {
        self.record_if_active(index, MidiEvent::note_on(0, 0, velocity))?;
        self.with_channel(index, |ch, fb| {
            ch.start(true, velocity, self.clock.as_ref(), fb)
        })
    }

    pub fn key_release(&self, index: usize) -> Result<(), HandlerError> {
        let press_mode = self
            .model
            .get()
            .channel(index)
            .and_then(Channel::as_sample)
            .is_some_and(|s| s.mode() == SampleMode::SinglePress);
        if press_mode {
            self.record_if_active(index, MidiEvent::note_off(0, 0, 0))?;
        }
        self.with_channel(index, |ch, fb| ch.stop(fb))
    }

    pub fn kill(&self, index: usize) -> Result<(), HandlerError> {
        self.record_if_active(index, MidiEvent::kill())?;
        self.with_channel(index, |ch, fb| ch.kill(fb))
    }

    pub fn start_reading_actions(&self, index: usize) -> Result<(), HandlerError> {
        let treat = self.behaviors.treat_recs_as_loops;
        self.with_channel(index, |ch, _| ch.start_reading_actions(treat))
    }

    pub fn stop_reading_actions(&self, index: usize) -> Result<(), HandlerError> {
        let running = self.clock.is_running();
        let b = self.behaviors;
        self.with_channel(index, |ch, fb| {
            ch.stop_reading_actions(running, b.treat_recs_as_loops, b.recs_stop_on_chan_halt, fb)
        })
    }

    pub fn toggle_reading_actions(&self, index: usize) -> Result<(), HandlerError> {
        let reading = self.with_channel(index, |ch, _| {
            ch.is_reading_actions() || ch.rec_status() == ChannelStatus::Wait
        })?;
        if reading {
            self.stop_reading_actions(index)
        } else {
            self.start_reading_actions(index)
        }
    }

    /// Queue a MIDI event for an armed MIDI channel's plugins.
    pub fn receive_midi(&self, index: usize, event: MidiEvent) -> bool {
        self.model
            .get()
            .channel(index)
            .is_some_and(|ch| ch.receive_midi(event))
    }

    pub fn set_preview(&self, index: usize, mode: PreviewMode) -> Result<(), HandlerError> {
        self.with_sample(index, |s| s.set_preview_mode(mode))
    }

    // Sequencer

    pub fn start_sequencer(&self) {
        self.clock.start();
        log::info!("sequencer started");
    }

    /// Stop the transport. Channels follow according to the behaviors;
    /// action and input recording end too.
    pub fn stop_sequencer(&self) {
        self.clock.stop();
        let stop_all = self.behaviors.chans_stop_on_seq_halt;
        self.with_feedback(|data, fb| {
            for channel in data.channels() {
                channel.stop_by_seq(stop_all, fb);
            }
        });
        self.stop_action_rec();
        if self.state.is_recording_input() {
            self.stop_input_rec();
        }
        log::info!("sequencer stopped");
    }

    pub fn toggle_sequencer(&self) {
        if self.clock.is_running() {
            self.stop_sequencer();
        } else {
            self.start_sequencer();
        }
    }

    /// Rewind now, or at the next quanto when quantizing.
    pub fn rewind_sequencer(&self) {
        if self.clock.request_rewind() {
            self.with_feedback(|data, fb| {
                for channel in data.channels() {
                    channel.rewind_by_seq(fb);
                }
            });
        }
    }

    /// Change tempo and stretch recorded actions to the new loop length.
    pub fn set_bpm(&self, bpm: f32) {
        let old = self.clock.frames_in_loop();
        self.clock.set_bpm(bpm);
        let new = self.clock.frames_in_loop();
        if old != new && old > 0 {
            let ratio = new as f64 / old as f64;
            self.model.update(|data| data.actions_mut().rescale(ratio, new));
        }
    }

    /// Change the meter. Actions past the new loop end are dropped.
    pub fn set_beats(&self, beats: u32, bars: u32) {
        self.clock.set_beats(beats, bars);
        let frames = self.clock.frames_in_loop();
        self.model.update(|data| data.actions_mut().rescale(1.0, frames));
    }

    pub fn set_quantize(&self, quantize: u32) {
        self.clock.set_quantize(quantize);
    }

    pub fn beat_double(&self) {
        self.set_bpm(self.clock.bpm() * 2.0);
    }

    pub fn beat_half(&self) {
        self.set_bpm(self.clock.bpm() / 2.0);
    }

    // Plugins

    fn plugin_not_found(stack: StackType, index: usize) -> HandlerError {
        match stack {
            StackType::Channel(channel) => HandlerError::ChannelNotFound(channel),
            _ => HandlerError::PluginNotFound { stack, index },
        }
    }

    fn edit_plugin(
        &self,
        stack: StackType,
        index: usize,
        mut edit: impl FnMut(&mut PluginSlot),
    ) -> Result<(), HandlerError> {
        self.try_update(|data| {
            let slot = data
                .stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, index))?
                .get_mut(index)
                .ok_or(HandlerError::PluginNotFound { stack, index })?;
            edit(slot);
            Ok(())
        })
    }

    /// Instantiate plugin `id` at the end of `stack`.
    pub fn add_plugin(&self, stack: StackType, id: &str) -> Result<usize, HandlerError> {
        let index = self.try_update(|data| {
            let slot = PluginSlot::new(
                Arc::clone(&self.factory),
                id,
                self.sample_rate,
                self.block_size,
            )?;
            Ok(data
                .stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, 0))?
                .push(slot))
        })?;
        log::info!("added plugin '{id}' to {stack:?}");
        Ok(index)
    }

    pub fn free_plugin(&self, stack: StackType, index: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, index))?
                .remove(index)
                .map(drop)
                .ok_or(HandlerError::PluginNotFound { stack, index })
        })
    }

    /// Exchange two plugins. Same or invalid positions leave the stack
    /// unchanged.
    pub fn swap_plugin(&self, stack: StackType, a: usize, b: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, a))?
                .swap(a, b);
            Ok(())
        })
    }

    pub fn move_plugin(
        &self,
        stack: StackType,
        index: usize,
        direction: Direction,
    ) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, index))?
                .shift(index, direction);
            Ok(())
        })
    }

    pub fn set_parameter(
        &self,
        stack: StackType,
        index: usize,
        param: usize,
        value: f32,
    ) -> Result<(), HandlerError> {
        self.edit_plugin(stack, index, |slot| {
            slot.set_parameter(param, value);
        })
    }

    pub fn set_program(&self, stack: StackType, index: usize, program: usize) -> Result<(), HandlerError> {
        self.edit_plugin(stack, index, |slot| slot.set_program(program))
    }

    pub fn set_bypass(&self, stack: StackType, index: usize, bypass: bool) -> Result<(), HandlerError> {
        self.edit_plugin(stack, index, |slot| slot.set_bypass(bypass))
    }

    pub fn set_plugin_midi_learn(
        &self,
        stack: StackType,
        index: usize,
        param: usize,
        learnt: u32,
    ) -> Result<(), HandlerError> {
        self.edit_plugin(stack, index, |slot| {
            slot.set_midi_in_param(param, learnt);
        })
    }

    pub fn free_stack(&self, stack: StackType) -> Result<(), HandlerError> {
        self.try_update(|data| {
            data.stack_mut(stack)
                .ok_or(Self::plugin_not_found(stack, 0))?
                .clear();
            Ok(())
        })
    }

    pub fn free_all_stacks(&self) {
        self.model.update(|data| {
            for stack in [StackType::MasterIn, StackType::MasterOut] {
                if let Some(stack) = data.stack_mut(stack) {
                    stack.clear();
                }
            }
            for channel in data.channels_mut() {
                channel.plugins_mut().clear();
            }
        });
    }

    // Action recording

    pub fn start_action_rec(&self) {
        self.state.set_recording_actions(true);
    }

    pub fn stop_action_rec(&self) {
        self.state.set_recording_actions(false);
    }

    pub fn toggle_action_rec(&self) {
        if self.state.is_recording_actions() {
            self.stop_action_rec();
        } else {
            self.start_action_rec();
        }
    }

    /// Store an action and make its channel read it back.
    pub fn record_action(&self, action: Action) -> Result<(), HandlerError> {
        self.try_update(|data| {
            let channel = data
                .channel(action.channel)
                .ok_or(HandlerError::ChannelNotFound(action.channel))?;
            channel.set_reading_actions(true);
            data.actions_mut().record(action);
            Ok(())
        })
    }

    pub fn clear_actions(&self, index: usize) -> Result<(), HandlerError> {
        self.try_update(|data| {
            let channel = data
                .channel(index)
                .ok_or(HandlerError::ChannelNotFound(index))?;
            channel.set_reading_actions(false);
            channel.set_rec_status(ChannelStatus::Off);
            data.actions_mut().clear_channel(index);
            Ok(())
        })
    }

    pub fn clear_all_actions(&self) {
        self.model.update(|data| {
            for channel in data.channels() {
                channel.set_reading_actions(false);
                channel.set_rec_status(ChannelStatus::Off);
            }
            data.actions_mut().clear_all();
        });
    }

    // Input recording

    /// Hand a loop-long take buffer to the renderer and start recording.
    /// Starts the sequencer if needed.
    pub fn start_input_rec(&self) -> Result<(), HandlerError> {
        if !self.has_armed_sample_channels() {
            return Err(HandlerError::NoArmedChannels);
        }
        let mut takes_tx = self.takes_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = takes_tx.as_mut() else {
            return Err(HandlerError::InputRecUnavailable);
        };
        let take = Box::new(AudioBuffer::new(
            self.clock.frames_in_loop().max(1),
            MAX_IO_CHANS,
        ));
        self.state.set_recording_input(true);
        if tx.push(take).is_err() {
            self.state.set_recording_input(false);
            return Err(HandlerError::InputRecUnavailable);
        }
        if !self.clock.is_running() {
            self.start_sequencer();
        }
        log::info!("input recording started");
        Ok(())
    }

    /// The renderer returns the take on its next block; pick it up with
    /// [`MixerHandler::collect_takes`].
    pub fn stop_input_rec(&self) {
        self.state.set_recording_input(false);
        log::info!("input recording stopped");
    }

    pub fn toggle_input_rec(&self) -> Result<(), HandlerError> {
        if self.state.is_recording_input() {
            self.stop_input_rec();
            Ok(())
        } else {
            self.start_input_rec()
        }
    }

    /// Install a returned take into every armed sample channel as a
    /// logical wave. Returns the channels that received it.
    pub fn collect_takes(&self) -> Vec<usize> {
        let take = {
            let mut takes_rx = self.takes_rx.lock().unwrap_or_else(PoisonError::into_inner);
            match takes_rx.as_mut().map(rtrb::Consumer::pop) {
                Some(Ok(take)) => take,
                _ => return Vec::new(),
            }
        };
        let id = self.last_take_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("TAKE-{id}");
        let audio = AudioArc::from_audio_buffer(*take, self.sample_rate);
        let filled = self.model.update(|data| {
            let mut filled = Vec::new();
            for channel in data.channels_mut() {
                if !channel.is_armed() {
                    continue;
                }
                let index = channel.index();
                let Some(sample) = channel.as_sample_mut() else {
                    continue;
                };
                sample.set_wave(Some(Wave::logical(audio.clone(), &name)));
                channel.set_name(name.as_str());
                channel.set_status(ChannelStatus::Off);
                filled.push(index);
            }
            filled
        });
        log::info!("{name} installed in {} channel(s)", filled.len());
        filled
    }

    // Queries

    pub fn has_armed_sample_channels(&self) -> bool {
        self.model
            .get()
            .channels()
            .iter()
            .any(|ch| ch.is_armed() && ch.channel_type() == ChannelType::Sample)
    }

    /// Any wave that exists only in memory (an input take).
    pub fn has_logical_samples(&self) -> bool {
        self.model
            .get()
            .channels()
            .iter()
            .filter_map(|ch| ch.as_sample()?.wave())
            .any(Wave::is_logical)
    }

    pub fn has_edited_samples(&self) -> bool {
        self.model
            .get()
            .channels()
            .iter()
            .filter_map(|ch| ch.as_sample()?.wave())
            .any(Wave::is_edited)
    }

    pub fn has_solos(&self) -> bool {
        self.model.get().has_solos()
    }

    /// `name`, or `name-N` with the first N no loaded wave uses.
    pub fn unique_sample_name(&self, name: &str) -> String {
        let data = self.model.get();
        let taken: Vec<String> = data
            .channels()
            .iter()
            .filter_map(|ch| ch.as_sample()?.wave())
            .map(Wave::basename)
            .collect();
        if !taken.iter().any(|t| t == name) {
            return name.to_owned();
        }
        (1..)
            .map(|n| format!("{name}-{n}"))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| name.to_owned())
    }
}

impl std::fmt::Debug for MixerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerHandler")
            .field("model", &self.model)
            .field("behaviors", &self.behaviors)
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}
