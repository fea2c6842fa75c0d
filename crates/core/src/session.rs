use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use basedrop::Collector;
use looper_engine::midi::{MidiMap, MidiMapMessage, MidiSink};
use looper_engine::plugin::PluginFactory;
use looper_engine::{
    AudioEngineHandle, Clock, HandlerError, MidiDispatcher, MixerHandler, new_session,
};
use looper_project::{MidimapFile, MidimapMessage, ProjectError, load_patch, patch_file, save_patch};
use looper_transport::MidiEvent;

use crate::config::Config;
use crate::patch::{PatchReport, read_patch, write_patch};
use crate::time::{MusicalPosition, TimeContext};

/// Outgoing MIDI from the control thread (lightning on edits) and the
/// audio thread (forwarded by [`Session::poll`]), drained by the caller.
#[derive(Clone, Default)]
struct MidiOutQueue(Arc<Mutex<Vec<MidiEvent>>>);

impl MidiOutQueue {
    fn take(&self) -> Vec<MidiEvent> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MidiSink for MidiOutQueue {
    fn send(&mut self, event: MidiEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// A running loop-machine session: the shared handler, the MIDI input
/// dispatcher, and optionally the audio device.
pub struct Session {
    name: String,
    config: Config,
    collector: Collector,
    handler: Arc<MixerHandler>,
    dispatcher: MidiDispatcher,
    engine: Option<AudioEngineHandle>,
    midi_out: MidiOutQueue,
}

impl Session {
    pub fn new(config: Config, factory: Arc<dyn PluginFactory>) -> Self {
        let collector = Collector::new();
        let handler = Arc::new(new_session(
            &collector,
            config.sample_rate,
            config.block_size(),
            factory,
            config.behaviors(),
        ));
        handler.set_bpm(config.bpm);
        handler.set_beats(config.beats, config.bars);
        handler.set_quantize(config.quantize);
        handler.state().set_limit_output(config.limit_output);

        let midi_out = MidiOutQueue::default();
        handler.set_feedback_sink(Box::new(midi_out.clone()));

        let session = Self {
            name: String::new(),
            dispatcher: MidiDispatcher::new(config.master_bindings(), config.midi_in_filter),
            config,
            collector,
            handler,
            engine: None,
            midi_out,
        };
        if let Some(path) = session.config.midimap_path.clone()
            && let Err(err) = session.load_midimap(&path)
        {
            log::warn!("MIDI map {} not loaded: {err}", path.display());
        }
        session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> &Arc<MixerHandler> {
        &self.handler
    }

    pub fn dispatcher(&self) -> &MidiDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut MidiDispatcher {
        &mut self.dispatcher
    }

    /// Open the audio device and start rendering.
    pub fn start_audio(&mut self, with_input: bool) -> anyhow::Result<()> {
        if self.engine.is_none() {
            self.engine = Some(looper_engine::start(&self.handler, with_input)?);
        }
        Ok(())
    }

    pub fn stop_audio(&mut self) {
        if self.engine.take().is_some() {
            log::info!("audio engine stopped");
        }
    }

    pub fn is_audio_running(&self) -> bool {
        self.engine.is_some()
    }

    /// One raw message from a MIDI input port.
    pub fn receive_midi(&mut self, bytes: &[u8]) -> Result<(), HandlerError> {
        self.dispatcher.dispatch(&self.handler, bytes)
    }

    /// Control-thread housekeeping, to be called regularly (e.g. every UI
    /// frame): frees retired snapshots, installs finished takes and
    /// forwards MIDI the renderer produced. Returns true when the session
    /// structure changed since the last call.
    pub fn poll(&mut self) -> bool {
        self.collector.collect();

        let installed = self.handler.collect_takes();
        if !installed.is_empty() {
            log::info!("take installed in channel(s) {installed:?}");
        }

        if let Some(engine) = self.engine.as_mut() {
            let mut queue = self.midi_out.clone();
            while let Ok(event) = engine.midi_out.pop() {
                queue.send(event);
            }
        }
        let dropped = self.handler.state().take_midi_out_dropped();
        if dropped > 0 {
            log::warn!("dropped {dropped} outgoing MIDI event(s): output ring full");
        }

        self.handler.model().take_changed()
    }

    /// MIDI waiting to be sent to the output port.
    pub fn take_midi_out(&self) -> Vec<MidiEvent> {
        self.midi_out.take()
    }

    pub fn position(&self) -> MusicalPosition {
        let clock = self.handler.clock();
        TimeContext::from_sequencer(clock).format_position(clock.current_frame())
    }

    pub fn load_midimap(&self, path: &Path) -> Result<(), ProjectError> {
        let file = looper_project::load_midimap(path)?;
        self.handler.set_midimap(midimap_from(&file)?);
        Ok(())
    }

    /// Load a patch file, or the patch inside a patch directory.
    pub fn open(&mut self, path: &Path) -> Result<PatchReport, ProjectError> {
        let file = if path.is_dir() {
            patch_file(path)
        } else {
            path.to_path_buf()
        };
        let base_dir = file.parent().unwrap_or(Path::new(".")).to_path_buf();

        let patch = load_patch(&file)?;
        let report = read_patch(&self.handler, &patch, &base_dir);
        self.name = patch.name;
        Ok(report)
    }

    /// Save into patch directory `dir`, writing every wave that does not
    /// live there yet (takes included) next to the patch file.
    pub fn save(&mut self, dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        self.store_waves(dir)?;

        let patch = write_patch(&self.handler, name, dir);
        let file = patch_file(dir);
        save_patch(&file, &patch)?;
        self.name = name.to_string();
        Ok(file)
    }

    fn store_waves(&self, dir: &Path) -> anyhow::Result<()> {
        let data = self.handler.model().get();
        let mut used: HashSet<String> = HashSet::new();
        let mut moved = Vec::new();

        for channel in data.channels() {
            let Some(wave) = channel.as_sample().and_then(|s| s.wave()) else {
                continue;
            };
            let inside = wave.path().starts_with(dir) && !wave.is_logical() && !wave.is_edited();
            if inside {
                used.insert(wave.basename());
                continue;
            }
            let mut stem = wave.basename();
            let mut n = 1;
            while used.contains(&stem) || dir.join(format!("{stem}.wav")).exists() {
                stem = format!("{}-{n}", wave.basename());
                n += 1;
            }
            let target = dir.join(format!("{stem}.wav"));
            looper_render::write_wav(wave.audio(), &target)?;
            log::info!("wrote wave {}", target.display());
            used.insert(stem);
            moved.push((channel.index(), target));
        }

        if !moved.is_empty() {
            self.handler.model().update(|data| {
                for (index, target) in &moved {
                    if let Some(wave) = data
                        .channel_mut(*index)
                        .and_then(|c| c.as_sample_mut())
                        .and_then(|s| s.wave_mut())
                    {
                        wave.set_path(target.clone());
                        wave.set_edited(false);
                    }
                }
            });
        }
        Ok(())
    }

    /// Render `loops` loops to a WAV file. The audio device must be
    /// stopped.
    pub fn bounce(&self, path: &Path, loops: usize) -> anyhow::Result<()> {
        if self.engine.is_some() {
            anyhow::bail!("stop the audio engine before bouncing");
        }
        let audio = looper_render::bounce_loops(&self.handler, loops);
        looper_render::write_wav(&audio, path)?;
        log::info!("bounced {loops} loop(s) to {}", path.display());
        Ok(())
    }

    /// Empty session with the configured tempo and meter.
    pub fn reset(&mut self) {
        read_patch(
            &self.handler,
            &looper_project::Patch {
                bpm: self.config.bpm,
                beats: self.config.beats,
                bars: self.config.bars,
                quantize: self.config.quantize,
                ..Default::default()
            },
            Path::new("."),
        );
        self.handler.set_last_take_id(0);
        self.name.clear();
    }
}

fn message_from(message: &MidimapMessage) -> Result<MidiMapMessage, ProjectError> {
    Ok(MidiMapMessage {
        channel: message.channel,
        value: message.value()?,
    })
}

fn midimap_from(file: &MidimapFile) -> Result<MidiMap, ProjectError> {
    Ok(MidiMap {
        brand: file.brand.clone(),
        device: file.device.clone(),
        init_commands: file
            .init_commands
            .iter()
            .map(message_from)
            .collect::<Result<_, _>>()?,
        mute_on: message_from(&file.mute_on)?,
        mute_off: message_from(&file.mute_off)?,
        solo_on: message_from(&file.solo_on)?,
        solo_off: message_from(&file.solo_off)?,
        waiting: message_from(&file.waiting)?,
        playing: message_from(&file.playing)?,
        playing_inaudible: message_from(&file.playing_inaudible)?,
        stopping: message_from(&file.stopping)?,
        stopped: message_from(&file.stopped)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_engine::plugin::BuiltinPlugins;
    use looper_engine::{ChannelStatus, ChannelType};
    use looper_transport::{AudioArc, Wave};
    use tempfile::tempdir;

    fn session() -> Session {
        let config = Config {
            buffer_size: 64,
            ..Default::default()
        };
        Session::new(config, Arc::new(BuiltinPlugins))
    }

    #[test]
    fn test_save_writes_takes_and_reopens() {
        let dir = tempdir().unwrap();
        let patch_dir = dir.path().join("jam");
        let mut source = session();
        let index = source.handler().add_channel(ChannelType::Sample, 0);
        let take = Wave::logical(AudioArc::new(vec![0.25; 200], 44100, 2), "TAKE-1");
        source.handler().set_wave(index, take).unwrap();

        let file = source.save(&patch_dir, "jam").unwrap();

        assert_eq!(file, patch_dir.join("jam.lpatch"));
        assert!(patch_dir.join("TAKE-1.wav").exists());
        assert!(!source.handler().has_logical_samples());
        assert_eq!(source.name(), "jam");

        let mut target = session();
        let report = target.open(&patch_dir).unwrap();
        assert!(report.is_clean());
        assert_eq!(target.name(), "jam");
        let data = target.handler().model().get();
        let channel = &data.channels()[0];
        assert_eq!(channel.status(), ChannelStatus::Off);
        assert_eq!(channel.name(), "TAKE-1");
        assert_eq!(channel.as_sample().unwrap().wave().unwrap().frames(), 100);
    }

    #[test]
    fn test_poll_reports_structural_changes() {
        let mut session = session();
        // Applying the configured tempo may already have published.
        session.poll();
        assert!(!session.poll());

        session.handler().add_channel(ChannelType::Midi, 0);
        assert!(session.poll());
        assert!(!session.poll());
    }

    #[test]
    fn test_midimap_init_commands_are_queued() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pad.json");
        std::fs::write(
            &path,
            br#"{ "init_commands": [{ "channel": 2, "message": "0xB0000000" }] }"#,
        )
        .unwrap();
        let session = session();

        session.load_midimap(&path).unwrap();

        assert_eq!(
            session.take_midi_out(),
            [MidiEvent::from_raw(0xB000_0000).with_channel(2)]
        );
        assert!(session.take_midi_out().is_empty());
    }

    #[test]
    fn test_reset_empties_session() {
        let mut session = session();
        session.handler().add_channel(ChannelType::Sample, 0);
        session.handler().set_last_take_id(4);

        session.reset();

        assert!(session.handler().model().get().channels().is_empty());
        assert_eq!(session.handler().last_take_id(), 0);
        assert_eq!(session.position().to_string(), "1.1.000");
    }

    #[test]
    fn test_bounce_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let session = session();
        session.handler().state().set_metronome(true);

        session.bounce(&path, 1).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(
            reader.duration() as usize,
            session.handler().clock().frames_in_loop()
        );
    }
}
