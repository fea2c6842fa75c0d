use looper_engine::{Behaviors, MasterBindings};
use looper_transport::{
    DEFAULT_BARS, DEFAULT_BEATS, DEFAULT_BPM, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE,
    MAX_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Learnt master MIDI messages, as stored in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiBindingsConfig {
    pub rewind: u32,
    pub start_stop: u32,
    pub action_rec: u32,
    pub input_rec: u32,
    pub metronome: u32,
    pub volume_in: u32,
    pub volume_out: u32,
    pub beat_double: u32,
    pub beat_half: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub limit_output: bool,
    pub chans_stop_on_seq_halt: bool,
    pub treat_recs_as_loops: bool,
    pub recs_stop_on_chan_halt: bool,
    pub input_monitor_default_on: bool,
    pub midi_in_filter: Option<u8>,
    pub midimap_path: Option<PathBuf>,
    pub bpm: f32,
    pub beats: u32,
    pub bars: u32,
    pub quantize: u32,
    pub midi_bindings: MidiBindingsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            limit_output: false,
            chans_stop_on_seq_halt: true,
            treat_recs_as_loops: false,
            recs_stop_on_chan_halt: false,
            input_monitor_default_on: false,
            midi_in_filter: None,
            midimap_path: None,
            bpm: DEFAULT_BPM,
            beats: DEFAULT_BEATS,
            bars: DEFAULT_BARS,
            quantize: 0,
            midi_bindings: MidiBindingsConfig::default(),
        }
    }
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("looper").join("config.toml"))
    }

    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Defaults when the file is missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid config {}: {err}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        match toml::to_string_pretty(self) {
            Ok(contents) => {
                if let Err(err) = fs::write(path, contents) {
                    log::warn!("failed to write config {}: {err}", path.display());
                }
            }
            Err(err) => log::warn!("failed to serialize config: {err}"),
        }
    }

    pub fn block_size(&self) -> usize {
        self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }

    pub fn behaviors(&self) -> Behaviors {
        Behaviors {
            chans_stop_on_seq_halt: self.chans_stop_on_seq_halt,
            treat_recs_as_loops: self.treat_recs_as_loops,
            recs_stop_on_chan_halt: self.recs_stop_on_chan_halt,
            input_monitor_default_on: self.input_monitor_default_on,
        }
    }

    pub fn master_bindings(&self) -> MasterBindings {
        let b = &self.midi_bindings;
        MasterBindings {
            rewind: b.rewind,
            start_stop: b.start_stop,
            action_rec: b.action_rec,
            input_rec: b.input_rec,
            metronome: b.metronome,
            volume_in: b.volume_in,
            volume_out: b.volume_out,
            beat_double: b.beat_double,
            beat_half: b.beat_half,
        }
    }
}
