use crate::ProjectError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// One feedback message of a MIDI map file. `message` is a hex string
/// such as `"0x90nn7F00"`; `nn` marks the byte filled with the learnt
/// note at send time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidimapMessage {
    pub channel: u8,
    pub message: String,
}

impl MidimapMessage {
    pub fn value(&self) -> Result<u32, ProjectError> {
        parse_message(&self.message)
    }
}

/// Controller description loaded from a MIDI map file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidimapFile {
    pub brand: String,
    pub device: String,
    pub init_commands: Vec<MidimapMessage>,
    pub mute_on: MidimapMessage,
    pub mute_off: MidimapMessage,
    pub solo_on: MidimapMessage,
    pub solo_off: MidimapMessage,
    pub waiting: MidimapMessage,
    pub playing: MidimapMessage,
    pub playing_inaudible: MidimapMessage,
    pub stopping: MidimapMessage,
    pub stopped: MidimapMessage,
}

/// Parse a map message into a packed MIDI value. Empty strings are
/// undefined messages (`0`).
pub fn parse_message(message: &str) -> Result<u32, ProjectError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex.len() != 8 {
        return Err(ProjectError::InvalidMessage(message.to_string()));
    }
    let hex = hex.replace(['n', 'N'], "0");
    u32::from_str_radix(&hex, 16).map_err(|_| ProjectError::InvalidMessage(message.to_string()))
}

pub fn load_midimap(path: &Path) -> Result<MidimapFile, ProjectError> {
    let file = File::open(path)?;
    let midimap: MidimapFile = serde_json::from_reader(BufReader::new(file))?;
    // Reject malformed messages here, not on first send.
    for message in midimap.messages() {
        message.value()?;
    }
    log::info!(
        "loaded MIDI map '{} {}' from {}",
        midimap.brand,
        midimap.device,
        path.display()
    );
    Ok(midimap)
}

impl MidimapFile {
    fn messages(&self) -> impl Iterator<Item = &MidimapMessage> {
        self.init_commands.iter().chain([
            &self.mute_on,
            &self.mute_off,
            &self.solo_on,
            &self.solo_off,
            &self.waiting,
            &self.playing,
            &self.playing_inaudible,
            &self.stopping,
            &self.stopped,
        ])
    }
}

/// MIDI map files (`*.json`) in `dir`, sorted by name. A missing directory
/// has no maps.
pub fn list_midimaps(dir: &Path) -> Result<Vec<PathBuf>, ProjectError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut maps = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            maps.push(path);
        }
    }
    maps.sort();
    Ok(maps)
}
