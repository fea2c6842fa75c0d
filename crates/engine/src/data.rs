use looper_transport::{AudioBuffer, MAX_IO_CHANS};

use crate::channel::{Channel, ChannelType};
use crate::clock::Clock;
use crate::midi::{Feedback, MidiBuffer, MidiMap, MidiSink};
use crate::mixer::{Metronome, MixerState};
use crate::plugin::{PluginBuffer, PluginStack, StackType};
use crate::recorder::{Action, ActionMap};

/// What happens on one frame of a running sequencer.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvents<'a> {
    /// Offset inside the block.
    pub frame_local: usize,
    /// Position in the loop.
    pub frame_global: usize,
    pub on_bar: bool,
    pub on_first_beat: bool,
    pub quanto_passed: bool,
    /// Start commands on this frame may still wait for a quanto.
    pub do_quantize: bool,
    pub actions: &'a [Action],
}

/// Buffers the renderer reuses for every block.
#[derive(Debug)]
pub struct RenderScratch {
    pub(crate) host: PluginBuffer,
    pub(crate) midi: MidiBuffer,
    pub(crate) empty_midi: MidiBuffer,
    pub(crate) metronome: Metronome,
}

impl RenderScratch {
    pub fn new(block_size: usize) -> Self {
        Self {
            host: PluginBuffer::new(MAX_IO_CHANS, block_size),
            midi: MidiBuffer::default(),
            empty_midi: MidiBuffer::with_capacity(0),
            metronome: Metronome::default(),
        }
    }
}

/// Everything a block render needs besides the snapshot itself.
pub struct RenderContext<'a> {
    pub clock: &'a dyn Clock,
    pub state: &'a MixerState,
    pub scratch: &'a mut RenderScratch,
    pub midi_out: &'a mut dyn MidiSink,
    /// Input recording target, written at the loop position.
    pub take: Option<&'a mut AudioBuffer>,
}

/// One immutable snapshot of the session as the audio thread sees it.
///
/// Structural edits happen on a deep copy (see `Model::draft`) which then
/// replaces the published one. Channel `index` always equals the channel's
/// position in `channels`.
#[derive(Debug, Clone)]
pub struct Data {
    channels: Vec<Channel>,
    master_in: PluginStack,
    master_out: PluginStack,
    actions: ActionMap,
    midimap: MidiMap,
    block_size: usize,
}

impl Data {
    pub fn new(block_size: usize) -> Self {
        Self {
            channels: Vec::new(),
            master_in: PluginStack::new(),
            master_out: PluginStack::new(),
            actions: ActionMap::new(),
            midimap: MidiMap::default(),
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn channel_by_id(&self, id: u64) -> Option<&Channel> {
        self.channels.iter().find(|ch| ch.id() == id)
    }

    /// Append an empty channel and return its index.
    pub fn add_channel(&mut self, channel_type: ChannelType, column: usize) -> usize {
        let index = self.channels.len();
        self.channels
            .push(Channel::new(channel_type, index, column, self.block_size));
        index
    }

    /// Append an already built channel (used when loading a patch).
    pub fn push_channel(&mut self, mut channel: Channel) -> usize {
        let index = self.channels.len();
        channel.set_index(index);
        self.channels.push(channel);
        index
    }

    /// Remove a channel and its actions. Later channels move down one slot.
    pub fn remove_channel(&mut self, index: usize) -> Option<Channel> {
        if index >= self.channels.len() {
            return None;
        }
        let channel = self.channels.remove(index);
        self.actions.remove_channel(index);
        self.reindex();
        Some(channel)
    }

    /// Duplicate a channel (with its actions) at the end of the list.
    pub fn clone_channel(&mut self, index: usize) -> Option<usize> {
        let mut copy = self.channels.get(index)?.clone();
        copy.renew_id();
        let new_index = self.push_channel(copy);
        self.actions.clone_channel(index, new_index);
        Some(new_index)
    }

    pub fn clear_channels(&mut self) {
        self.channels.clear();
        self.actions.clear_all();
    }

    fn reindex(&mut self) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.set_index(i);
        }
    }

    pub fn stack(&self, stack: StackType) -> Option<&PluginStack> {
        match stack {
            StackType::MasterIn => Some(&self.master_in),
            StackType::MasterOut => Some(&self.master_out),
            StackType::Channel(i) => self.channels.get(i).map(Channel::plugins),
        }
    }

    pub fn stack_mut(&mut self, stack: StackType) -> Option<&mut PluginStack> {
        match stack {
            StackType::MasterIn => Some(&mut self.master_in),
            StackType::MasterOut => Some(&mut self.master_out),
            StackType::Channel(i) => self.channels.get_mut(i).map(Channel::plugins_mut),
        }
    }

    pub fn has_solos(&self) -> bool {
        self.channels.iter().any(Channel::is_soloed)
    }

    pub fn actions(&self) -> &ActionMap {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionMap {
        &mut self.actions
    }

    pub fn midimap(&self) -> &MidiMap {
        &self.midimap
    }

    pub fn set_midimap(&mut self, midimap: MidiMap) {
        self.midimap = midimap;
    }

    /// Render one block of `frames` frames into `out` (cleared by the
    /// caller) and `in_to_out`.
    pub fn render(
        &self,
        out: &mut AudioBuffer,
        input: &AudioBuffer,
        in_to_out: &mut AudioBuffer,
        frames: usize,
        ctx: RenderContext,
    ) {
        let RenderContext {
            clock,
            state,
            scratch,
            midi_out,
            mut take,
        } = ctx;
        let frames = frames.min(self.block_size).min(out.frames());
        let has_solos = self.has_solos();
        let mut fb = Feedback {
            midimap: &self.midimap,
            out: midi_out,
            has_solos,
        };

        for channel in &self.channels {
            channel.prepare_buffer(frames, &mut fb);
        }

        if clock.is_running() {
            for f in 0..frames {
                self.parse_frame(f, frames, clock, &mut fb);

                let global = clock.current_frame();
                if state.is_recording_input()
                    && let Some(take) = take.as_deref_mut()
                    && take.frames() > 0
                    && f < input.frames()
                {
                    let pos = global % take.frames();
                    for c in 0..take.channels() {
                        take[pos][c] = input[f][c % input.channels()];
                    }
                }
                if state.metronome() {
                    scratch.metronome.tick(clock, out, f);
                }
                clock.advance();
            }
        }

        for channel in &self.channels {
            let audible = channel.is_audible(has_solos);
            channel.process(out, input, frames, audible, scratch);
        }

        self.master_in
            .process(in_to_out, frames, &mut scratch.host, &scratch.empty_midi);
        self.master_out
            .process(out, frames, &mut scratch.host, &scratch.empty_midi);
    }

    fn parse_frame(
        &self,
        f: usize,
        frames: usize,
        clock: &dyn Clock,
        fb: &mut Feedback,
    ) {
        if clock.is_rewind_pending() && (clock.quantize() == 0 || clock.quanto_has_passed()) {
            clock.rewind();
            for channel in &self.channels {
                channel.rewind_in_block(f, frames, fb);
            }
        }

        let frame_global = clock.current_frame();
        let quanto_passed = clock.quanto_has_passed();
        let fe = FrameEvents {
            frame_local: f,
            frame_global,
            on_bar: clock.is_on_bar(),
            on_first_beat: clock.is_on_first_beat(),
            quanto_passed,
            do_quantize: clock.quantize() == 0 || !quanto_passed,
            actions: self.actions.actions_on_frame(frame_global),
        };
        for channel in &self.channels {
            channel.parse_events(&fe, frames, clock, fb);
        }
    }
}

#[cfg(test)]
mod tests {
    use looper_transport::{AudioArc, MidiEvent, Wave};

    use super::*;
    use crate::channel::{ChannelStatus, SampleMode};
    use crate::clock::Sequencer;
    use crate::midi::NullSink;

    const BLOCK: usize = 64;

    fn ramp_wave(frames: usize) -> Wave {
        let samples: Vec<f32> = (0..frames).map(|i| (i + 1) as f32).collect();
        Wave::new(AudioArc::new(samples, 44100, 1), "ramp.wav")
    }

    fn data_with_sample(mode: SampleMode, frames: usize) -> Data {
        let mut data = Data::new(BLOCK);
        let index = data.add_channel(ChannelType::Sample, 0);
        let channel = data.channel_mut(index).unwrap();
        let sample = channel.as_sample_mut().unwrap();
        sample.set_wave(Some(ramp_wave(frames)));
        sample.set_mode(mode);
        channel.set_status(ChannelStatus::Off);
        data
    }

    fn render(data: &Data, clock: &Sequencer, state: &MixerState, frames: usize) -> AudioBuffer {
        let mut out = AudioBuffer::new(BLOCK, 2);
        let input = AudioBuffer::new(BLOCK, 2);
        let mut in_to_out = AudioBuffer::new(BLOCK, 2);
        let mut scratch = RenderScratch::new(BLOCK);
        let mut sink = NullSink;
        data.render(
            &mut out,
            &input,
            &mut in_to_out,
            frames,
            RenderContext {
                clock,
                state,
                scratch: &mut scratch,
                midi_out: &mut sink,
                take: None,
            },
        );
        out
    }

    fn start(data: &Data, index: usize, clock: &Sequencer) {
        let map = MidiMap::default();
        let mut sink = NullSink;
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        data.channel(index)
            .unwrap()
            .start(true, 127, clock, &mut fb);
    }

    #[test]
    fn test_single_shot_plays_to_the_end_and_stops() {
        let data = data_with_sample(SampleMode::SingleBasic, 10);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        start(&data, 0, &clock);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Play);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[0][0], 1.0);
        assert_eq!(out[9][1], 10.0);
        assert_eq!(out[10][0], 0.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Off);
    }

    #[test]
    fn test_loop_waits_for_first_beat() {
        let data = data_with_sample(SampleMode::LoopBasic, 1000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        clock.seek(88200 - 16);
        clock.start();
        start(&data, 0, &clock);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Wait);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Play);
        assert_eq!(out[15][0], 0.0);
        assert_eq!(out[16][0], 1.0);
        assert_eq!(out[17][0], 2.0);
    }

    #[test]
    fn test_loop_cycles_through_every_status() {
        let data = data_with_sample(SampleMode::LoopBasic, 1000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        clock.seek(88200 - 16);
        clock.start();
        let channel = data.channel(0).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Off);

        start(&data, 0, &clock);
        assert_eq!(channel.status(), ChannelStatus::Wait);

        render(&data, &clock, &state, BLOCK);
        assert_eq!(channel.status(), ChannelStatus::Play);
        assert_eq!(channel.as_sample().unwrap().tracker(), BLOCK - 16);

        start(&data, 0, &clock);
        assert_eq!(channel.status(), ChannelStatus::Ending);

        // Keeps playing until the next first beat, then stops there.
        clock.seek(88200 - 8);
        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[0][0], (BLOCK - 16 + 1) as f32);
        assert_eq!(out[7][0], (BLOCK - 16 + 8) as f32);
        assert_eq!(out[8][0], 0.0);
        assert_eq!(channel.status(), ChannelStatus::Off);
        assert_eq!(channel.as_sample().unwrap().tracker(), 0);
    }

    #[test]
    fn test_ending_stops_at_end_of_wave() {
        let data = data_with_sample(SampleMode::LoopBasic, 10);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        data.channel(0).unwrap().set_status(ChannelStatus::Ending);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[9][0], 10.0);
        assert_eq!(out[10][0], 0.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Off);
    }

    #[test]
    fn test_loop_once_waits_after_each_pass() {
        let data = data_with_sample(SampleMode::LoopOnce, 10);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        clock.seek(88200 - 16);
        clock.start();
        start(&data, 0, &clock);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[16][0], 1.0);
        assert_eq!(out[25][0], 10.0);
        assert_eq!(out[26][0], 0.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Wait);

        // Plays again from the next first beat.
        clock.seek(88200 - 4);
        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[3][0], 0.0);
        assert_eq!(out[4][0], 1.0);
        assert_eq!(out[13][0], 10.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Wait);
    }

    #[test]
    fn test_loop_repeat_restarts_on_bar() {
        let data = data_with_sample(SampleMode::LoopRepeat, 1000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        data.channel(0).unwrap().set_status(ChannelStatus::Play);
        clock.seek(88200 - 8);
        clock.start();

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[7][0], 8.0);
        assert_eq!(out[8][0], 1.0);
        assert_eq!(out[9][0], 2.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Play);
    }

    #[test]
    fn test_single_retrigger_restarts_next_block() {
        let data = data_with_sample(SampleMode::SingleRetrig, 1000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        start(&data, 0, &clock);
        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[BLOCK - 1][0], BLOCK as f32);

        start(&data, 0, &clock);
        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[0][0], 1.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Play);
    }

    #[test]
    fn test_muted_channel_is_silent_but_advances() {
        let data = data_with_sample(SampleMode::SingleBasic, 1000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        start(&data, 0, &clock);
        data.channel(0).unwrap().set_mute(true);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(
            data.channel(0).unwrap().as_sample().unwrap().tracker(),
            BLOCK
        );
    }

    #[test]
    fn test_quantized_rewind_waits_for_quanto() {
        let data = data_with_sample(SampleMode::LoopBasic, 100_000);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        clock.set_quantize(4);
        clock.start();
        // 5512 frames per quanto; the rewind lands 8 frames into the block.
        clock.seek(5512 - 8);
        data.channel(0).unwrap().set_status(ChannelStatus::Play);

        assert!(!clock.request_rewind());
        render(&data, &clock, &state, BLOCK);

        assert!(!clock.is_rewind_pending());
        assert_eq!(clock.current_frame(), BLOCK - 8);
        assert_eq!(
            data.channel(0).unwrap().as_sample().unwrap().tracker(),
            BLOCK - 8
        );
    }

    #[test]
    fn test_unquantized_rewind_is_immediate() {
        let clock = Sequencer::new(44100);
        clock.start();
        clock.seek(3000);
        assert!(clock.request_rewind());
        assert_eq!(clock.current_frame(), 0);
    }

    #[test]
    fn test_recorded_actions_start_channel() {
        let mut data = data_with_sample(SampleMode::SingleBasic, 1000);
        data.actions_mut().record(Action {
            channel: 0,
            frame: 8,
            event: MidiEvent::note_on(0, 0, 127),
        });
        data.channel(0).unwrap().set_reading_actions(true);
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        clock.start();

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[7][0], 0.0);
        assert_eq!(out[8][0], 1.0);
        assert_eq!(data.channel(0).unwrap().status(), ChannelStatus::Play);
    }

    #[test]
    fn test_remove_channel_keeps_indices_dense() {
        let mut data = Data::new(BLOCK);
        for _ in 0..4 {
            data.add_channel(ChannelType::Sample, 0);
        }
        data.actions_mut().record(Action {
            channel: 3,
            frame: 0,
            event: MidiEvent::note_on(0, 0, 1),
        });
        data.remove_channel(1);

        let indices: Vec<usize> = data.channels().iter().map(Channel::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(data.actions().has_actions(2));

        let copy = data.clone_channel(0).unwrap();
        assert_eq!(copy, 3);
        assert_eq!(data.channel(3).unwrap().index(), 3);
    }

    #[test]
    fn test_master_out_stack_runs_last() {
        use crate::plugin::testing::gain_slot;

        let mut data = data_with_sample(SampleMode::SingleBasic, 1000);
        data.stack_mut(StackType::MasterOut)
            .unwrap()
            .push(gain_slot(0.5));
        let clock = Sequencer::new(44100);
        let state = MixerState::default();
        start(&data, 0, &clock);

        let out = render(&data, &clock, &state, BLOCK);
        assert_eq!(out[1][0], 1.0);
    }
}
