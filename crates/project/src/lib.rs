mod load;
mod midimap;
mod save;

use looper_transport::{DEFAULT_BARS, DEFAULT_BEATS, DEFAULT_BPM, DEFAULT_PAN, DEFAULT_PITCH, DEFAULT_VOL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use load::{PatchMetadata, load_patch, load_patch_metadata};
pub use midimap::{MidimapFile, MidimapMessage, list_midimaps, load_midimap, parse_message};
pub use save::{patch_file, save_patch};

/// Format revision written into every patch. Older patches load fine,
/// newer ones are rejected.
pub const PATCH_VERSION: u32 = 1;

/// File extension of a patch inside its directory.
pub const PATCH_EXTENSION: &str = "lpatch";

/// Flattened, serializable view of a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    pub version: u32,
    pub name: String,
    pub bpm: f32,
    pub beats: u32,
    pub bars: u32,
    pub quantize: u32,
    pub metronome: bool,
    pub last_take_id: u32,
    pub out_vol: f32,
    pub in_vol: f32,
    pub in_to_out: bool,
    pub channels: Vec<ChannelData>,
    pub master_in: Vec<PluginData>,
    pub master_out: Vec<PluginData>,
    pub actions: Vec<ActionData>,
}

impl Default for Patch {
    fn default() -> Self {
        Self {
            version: PATCH_VERSION,
            name: String::new(),
            bpm: DEFAULT_BPM,
            beats: DEFAULT_BEATS,
            bars: DEFAULT_BARS,
            quantize: 0,
            metronome: false,
            last_take_id: 0,
            out_vol: DEFAULT_VOL,
            in_vol: DEFAULT_VOL,
            in_to_out: false,
            channels: Vec::new(),
            master_in: Vec::new(),
            master_out: Vec::new(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub index: usize,
    pub column: usize,
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    pub armed: bool,
    pub reading_actions: bool,
    #[serde(default)]
    pub midi_learn: MidiLearnData,
    #[serde(default)]
    pub lightning: LightningData,
    #[serde(default)]
    pub plugins: Vec<PluginData>,
    pub kind: ChannelKindData,
}

impl ChannelData {
    pub fn new(index: usize, kind: ChannelKindData) -> Self {
        Self {
            index,
            column: 0,
            name: String::new(),
            volume: DEFAULT_VOL,
            pan: DEFAULT_PAN,
            mute: false,
            solo: false,
            armed: false,
            reading_actions: false,
            midi_learn: MidiLearnData::default(),
            lightning: LightningData::default(),
            plugins: Vec::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKindData {
    Sample(SampleData),
    Midi(MidiOutData),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleModeData {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// Wave file, relative to the patch directory when it lives there.
    pub wave: Option<PathBuf>,
    pub mode: SampleModeData,
    pub begin: usize,
    pub end: usize,
    pub pitch: f32,
    pub boost: f32,
    pub velo_as_vol: bool,
    pub input_monitor: bool,
}

impl Default for SampleData {
    fn default() -> Self {
        Self {
            wave: None,
            mode: SampleModeData::default(),
            begin: 0,
            end: 0,
            pitch: DEFAULT_PITCH,
            boost: DEFAULT_VOL,
            velo_as_vol: false,
            input_monitor: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiOutData {
    pub enabled: bool,
    pub channel: u8,
}

/// Learnt MIDI messages (velocity stripped). `0` is unbound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiLearnData {
    pub enabled: bool,
    pub filter: Option<u8>,
    pub key_press: u32,
    pub key_release: u32,
    pub kill: u32,
    pub arm: u32,
    pub volume: u32,
    pub mute: u32,
    pub solo: u32,
    pub read_actions: u32,
    pub pitch: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightningData {
    pub enabled: bool,
    pub playing: u32,
    pub mute: u32,
    pub solo: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    pub id: String,
    pub bypass: bool,
    pub params: Vec<f32>,
    #[serde(default)]
    pub program: usize,
    #[serde(default)]
    pub midi_in_params: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    pub channel: usize,
    pub frame: usize,
    /// Packed MIDI message.
    pub event: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("patch version {found} is newer than supported version {PATCH_VERSION}")]
    UnsupportedVersion { found: u32 },

    #[error("invalid MIDI map message '{0}'")]
    InvalidMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_patch() -> Patch {
        let mut kick = ChannelData::new(
            0,
            ChannelKindData::Sample(SampleData {
                wave: Some(PathBuf::from("kick.wav")),
                mode: SampleModeData::LoopBasic,
                end: 22050,
                ..Default::default()
            }),
        );
        kick.name = "kick".to_string();
        kick.volume = 0.8;
        kick.midi_learn = MidiLearnData {
            enabled: true,
            key_press: 0x903C_0000,
            ..Default::default()
        };
        kick.plugins.push(PluginData {
            id: "gain".to_string(),
            bypass: false,
            params: vec![0.5],
            program: 0,
            midi_in_params: vec![0],
        });

        let mut synth = ChannelData::new(
            1,
            ChannelKindData::Midi(MidiOutData {
                enabled: true,
                channel: 3,
            }),
        );
        synth.column = 1;
        synth.name = "synth".to_string();

        Patch {
            name: "Test Patch".to_string(),
            bpm: 98.0,
            quantize: 4,
            last_take_id: 2,
            channels: vec![kick, synth],
            actions: vec![
                ActionData {
                    channel: 0,
                    frame: 0,
                    event: 0x9000_0000,
                },
                ActionData {
                    channel: 0,
                    frame: 11025,
                    event: 0x8000_0000,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_patch_messagepack_roundtrip() {
        let patch = sample_patch();

        let bytes = rmp_serde::encode::to_vec(&patch).expect("serialize");
        let decoded: Patch = rmp_serde::decode::from_slice(&bytes).expect("deserialize");

        assert_eq!(decoded, patch);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let patch: Patch = serde_json::from_str(r#"{ "name": "old", "bpm": 90.0 }"#).expect("parse");

        assert_eq!(patch.name, "old");
        assert_eq!(patch.bpm, 90.0);
        assert_eq!(patch.beats, DEFAULT_BEATS);
        assert_eq!(patch.out_vol, DEFAULT_VOL);
        assert!(patch.channels.is_empty());
    }

    #[test]
    fn test_channel_kind_is_tagged() {
        let json = serde_json::to_value(&sample_patch().channels[1]).expect("serialize");

        assert_eq!(json["kind"]["midi"]["channel"], 3);
        assert_eq!(json["midi_learn"]["key_press"], 0);
    }
}
