use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use looper_engine::channel::{ChannelKind, SampleChannel, SampleMode};
use looper_engine::midi::{MidiLearn, MidiLightning};
use looper_engine::plugin::{PluginSlot, PluginStack, StackType};
use looper_engine::recorder::Action;
use looper_engine::{Channel, ChannelStatus, ChannelType, Clock, Data, MixerHandler};
use looper_project::{
    ActionData, ChannelData, ChannelKindData, LightningData, MidiLearnData, MidiOutData, Patch,
    PluginData, SampleData, SampleModeData,
};
use looper_transport::{MidiEvent, Wave};

/// What could not be restored from a patch. The session still loads;
/// channels with missing waves are marked `Missing`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    pub missing_waves: Vec<PathBuf>,
    pub unavailable_plugins: Vec<String>,
    pub dropped_actions: usize,
}

impl PatchReport {
    pub fn is_clean(&self) -> bool {
        self.missing_waves.is_empty() && self.unavailable_plugins.is_empty() && self.dropped_actions == 0
    }
}

enum WaveSlot {
    None,
    Loaded(Wave),
    Missing,
}

/// Replace the whole session with `patch` in a single publish. Wave paths
/// are resolved against `base_dir`.
pub fn read_patch(handler: &MixerHandler, patch: &Patch, base_dir: &Path) -> PatchReport {
    let mut report = PatchReport::default();

    let mut channels: Vec<&ChannelData> = patch.channels.iter().collect();
    channels.sort_by_key(|c| c.index);
    let dense: HashMap<usize, usize> = channels
        .iter()
        .enumerate()
        .map(|(i, c)| (c.index, i))
        .collect();

    // Decoding happens once, outside the retryable edit.
    let waves: Vec<WaveSlot> = channels
        .iter()
        .map(|c| match &c.kind {
            ChannelKindData::Sample(SampleData {
                wave: Some(path), ..
            }) => load_wave(path, base_dir, handler.sample_rate(), &mut report),
            _ => WaveSlot::None,
        })
        .collect();

    handler.stop_sequencer();
    let clock = handler.clock();
    clock.rewind();
    clock.set_bpm(patch.bpm);
    clock.set_beats(patch.beats, patch.bars);
    clock.set_quantize(patch.quantize);

    let state = handler.state();
    state.set_metronome(patch.metronome);
    state.set_out_vol(patch.out_vol);
    state.set_in_vol(patch.in_vol);
    state.set_in_to_out(patch.in_to_out);
    handler.set_last_take_id(patch.last_take_id);

    let actions: Vec<Action> = patch
        .actions
        .iter()
        .filter_map(|a| {
            dense.get(&a.channel).map(|&channel| Action {
                channel,
                frame: a.frame,
                event: MidiEvent::from_raw(a.event),
            })
        })
        .collect();
    report.dropped_actions = patch.actions.len() - actions.len();
    if report.dropped_actions > 0 {
        log::warn!(
            "dropped {} action(s) pointing at unknown channels",
            report.dropped_actions
        );
    }

    let mut unavailable = Vec::new();
    handler.model().update(|data| {
        unavailable.clear();
        data.clear_channels();

        for (channel_data, wave) in channels.iter().zip(&waves) {
            let channel = build_channel(handler, data, channel_data, wave, &mut unavailable);
            data.push_channel(channel);
        }
        for (stack, plugins) in [
            (StackType::MasterIn, &patch.master_in),
            (StackType::MasterOut, &patch.master_out),
        ] {
            if let Some(target) = data.stack_mut(stack) {
                *target = build_stack(handler, plugins, &mut unavailable);
            }
        }
        for action in &actions {
            data.actions_mut().record(*action);
        }
    });
    report.unavailable_plugins = unavailable;

    log::info!(
        "session '{}' restored: {} channel(s), {} action(s)",
        patch.name,
        channels.len(),
        actions.len()
    );
    report
}

fn load_wave(path: &Path, base_dir: &Path, sample_rate: u32, report: &mut PatchReport) -> WaveSlot {
    let resolved = looper_decode::resolve_wave_path(path, base_dir).unwrap_or_else(|| base_dir.join(path));
    match looper_decode::load_wave(&resolved, sample_rate) {
        Ok(wave) => WaveSlot::Loaded(wave),
        Err(err) => {
            log::warn!("channel wave unavailable: {err}");
            report.missing_waves.push(path.to_path_buf());
            WaveSlot::Missing
        }
    }
}

fn build_channel(
    handler: &MixerHandler,
    data: &Data,
    channel_data: &ChannelData,
    wave: &WaveSlot,
    unavailable: &mut Vec<String>,
) -> Channel {
    let channel_type = match channel_data.kind {
        ChannelKindData::Sample(_) => ChannelType::Sample,
        ChannelKindData::Midi(_) => ChannelType::Midi,
    };
    let mut channel = Channel::new(
        channel_type,
        data.channels().len(),
        channel_data.column,
        handler.block_size(),
    );
    channel.set_name(channel_data.name.clone());
    channel.set_volume(channel_data.volume);
    channel.set_pan(channel_data.pan);
    channel.set_mute(channel_data.mute);
    channel.set_solo(channel_data.solo);
    channel.set_armed(channel_data.armed);
    channel.set_reading_actions(channel_data.reading_actions);
    channel.set_midi_learn(midi_learn_from(&channel_data.midi_learn));
    channel.set_lightning(lightning_from(&channel_data.lightning));
    *channel.plugins_mut() = build_stack(handler, &channel_data.plugins, unavailable);

    match &channel_data.kind {
        ChannelKindData::Sample(sample_data) => {
            let status = match wave {
                WaveSlot::Loaded(_) => ChannelStatus::Off,
                WaveSlot::Missing => ChannelStatus::Missing,
                WaveSlot::None => ChannelStatus::Empty,
            };
            channel.set_status(status);
            if let Some(sample) = channel.as_sample_mut() {
                if let WaveSlot::Loaded(wave) = wave {
                    sample.set_wave(Some(wave.clone()));
                    if sample_data.end > 0 {
                        sample.set_begin_end(sample_data.begin, sample_data.end);
                    }
                }
                apply_sample(sample, sample_data);
            }
        }
        ChannelKindData::Midi(out) => {
            if let Some(midi) = channel.as_midi_mut() {
                midi.set_midi_out(out.enabled, out.channel);
            }
        }
    }
    channel
}

fn apply_sample(sample: &mut SampleChannel, data: &SampleData) {
    sample.set_mode(mode_from(data.mode));
    sample.set_pitch(data.pitch);
    sample.set_boost(data.boost);
    sample.set_velo_as_vol(data.velo_as_vol);
    sample.set_input_monitor(data.input_monitor);
}

fn build_stack(
    handler: &MixerHandler,
    plugins: &[PluginData],
    unavailable: &mut Vec<String>,
) -> PluginStack {
    let mut stack = PluginStack::new();
    for plugin in plugins {
        stack.push(build_slot(handler, plugin, unavailable));
    }
    stack
}

fn build_slot(handler: &MixerHandler, plugin: &PluginData, unavailable: &mut Vec<String>) -> PluginSlot {
    let factory = Arc::clone(handler.factory());
    let mut slot = match PluginSlot::new(
        Arc::clone(&factory),
        &plugin.id,
        handler.sample_rate(),
        handler.block_size(),
    ) {
        Ok(mut slot) => {
            slot.set_program(plugin.program);
            for (i, value) in plugin.params.iter().enumerate() {
                slot.set_parameter(i, *value);
            }
            slot
        }
        Err(err) => {
            log::warn!("plugin '{}' unavailable: {err}", plugin.id);
            unavailable.push(plugin.id.clone());
            PluginSlot::unavailable(
                factory,
                &plugin.id,
                handler.sample_rate(),
                handler.block_size(),
                plugin.params.clone(),
                plugin.program,
            )
        }
    };
    slot.set_bypass(plugin.bypass);
    for (i, learnt) in plugin.midi_in_params.iter().enumerate() {
        slot.set_midi_in_param(i, *learnt);
    }
    slot
}

/// Flatten the current session. Wave paths inside `base_dir` are stored
/// relative to it.
pub fn write_patch(handler: &MixerHandler, name: &str, base_dir: &Path) -> Patch {
    let data = handler.model().get();
    let clock = handler.clock();
    let state = handler.state();

    Patch {
        name: name.to_string(),
        bpm: clock.bpm(),
        beats: clock.beats(),
        bars: clock.bars(),
        quantize: clock.quantize(),
        metronome: state.metronome(),
        last_take_id: handler.last_take_id(),
        out_vol: state.out_vol(),
        in_vol: state.in_vol(),
        in_to_out: state.in_to_out(),
        channels: data
            .channels()
            .iter()
            .map(|channel| channel_data(channel, base_dir))
            .collect(),
        master_in: data
            .stack(StackType::MasterIn)
            .map(stack_data)
            .unwrap_or_default(),
        master_out: data
            .stack(StackType::MasterOut)
            .map(stack_data)
            .unwrap_or_default(),
        actions: data
            .actions()
            .iter()
            .map(|a| ActionData {
                channel: a.channel,
                frame: a.frame,
                event: a.event.raw(),
            })
            .collect(),
        ..Patch::default()
    }
}

fn channel_data(channel: &Channel, base_dir: &Path) -> ChannelData {
    let kind = match channel.kind() {
        ChannelKind::Sample(sample) => ChannelKindData::Sample(SampleData {
            wave: sample.wave().map(|w| {
                w.path()
                    .strip_prefix(base_dir)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| w.path().to_path_buf())
            }),
            mode: mode_data(sample.mode()),
            begin: sample.begin(),
            end: sample.end(),
            pitch: sample.pitch(),
            boost: sample.boost(),
            velo_as_vol: sample.velo_as_vol(),
            input_monitor: sample.input_monitor(),
        }),
        ChannelKind::Midi(midi) => ChannelKindData::Midi(MidiOutData {
            enabled: midi.midi_out(),
            channel: midi.midi_out_chan(),
        }),
    };

    let mut data = ChannelData::new(channel.index(), kind);
    data.column = channel.column();
    data.name = channel.name().to_string();
    data.volume = channel.volume();
    data.pan = channel.pan();
    data.mute = channel.is_muted();
    data.solo = channel.is_soloed();
    data.armed = channel.is_armed();
    data.reading_actions = channel.is_reading_actions();
    data.midi_learn = midi_learn_data(channel.midi_learn());
    data.lightning = lightning_data(channel.lightning());
    data.plugins = stack_data(channel.plugins());
    data
}

fn stack_data(stack: &PluginStack) -> Vec<PluginData> {
    stack
        .iter()
        .map(|slot| PluginData {
            id: slot.id().to_string(),
            bypass: slot.is_bypassed(),
            params: slot.params().to_vec(),
            program: slot.program(),
            midi_in_params: slot.midi_in_params().to_vec(),
        })
        .collect()
}

fn mode_data(mode: SampleMode) -> SampleModeData {
    match mode {
        SampleMode::SingleBasic => SampleModeData::SingleBasic,
        SampleMode::SinglePress => SampleModeData::SinglePress,
        SampleMode::SingleRetrig => SampleModeData::SingleRetrig,
        SampleMode::SingleEndless => SampleModeData::SingleEndless,
        SampleMode::LoopBasic => SampleModeData::LoopBasic,
        SampleMode::LoopOnce => SampleModeData::LoopOnce,
        SampleMode::LoopRepeat => SampleModeData::LoopRepeat,
        SampleMode::LoopOnceBar => SampleModeData::LoopOnceBar,
    }
}

fn mode_from(mode: SampleModeData) -> SampleMode {
    match mode {
        SampleModeData::SingleBasic => SampleMode::SingleBasic,
        SampleModeData::SinglePress => SampleMode::SinglePress,
        SampleModeData::SingleRetrig => SampleMode::SingleRetrig,
        SampleModeData::SingleEndless => SampleMode::SingleEndless,
        SampleModeData::LoopBasic => SampleMode::LoopBasic,
        SampleModeData::LoopOnce => SampleMode::LoopOnce,
        SampleModeData::LoopRepeat => SampleMode::LoopRepeat,
        SampleModeData::LoopOnceBar => SampleMode::LoopOnceBar,
    }
}

fn midi_learn_data(learn: &MidiLearn) -> MidiLearnData {
    MidiLearnData {
        enabled: learn.enabled,
        filter: learn.filter,
        key_press: learn.key_press,
        key_release: learn.key_release,
        kill: learn.kill,
        arm: learn.arm,
        volume: learn.volume,
        mute: learn.mute,
        solo: learn.solo,
        read_actions: learn.read_actions,
        pitch: learn.pitch,
    }
}

fn midi_learn_from(data: &MidiLearnData) -> MidiLearn {
    MidiLearn {
        enabled: data.enabled,
        filter: data.filter,
        key_press: data.key_press,
        key_release: data.key_release,
        kill: data.kill,
        arm: data.arm,
        volume: data.volume,
        mute: data.mute,
        solo: data.solo,
        read_actions: data.read_actions,
        pitch: data.pitch,
    }
}

fn lightning_data(lightning: &MidiLightning) -> LightningData {
    LightningData {
        enabled: lightning.enabled,
        playing: lightning.playing,
        mute: lightning.mute,
        solo: lightning.solo,
    }
}

fn lightning_from(data: &LightningData) -> MidiLightning {
    MidiLightning {
        enabled: data.enabled,
        playing: data.playing,
        mute: data.mute,
        solo: data.solo,
    }
}
