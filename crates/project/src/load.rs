use crate::{PATCH_VERSION, Patch, ProjectError};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PatchMetadata {
    pub name: String,
    pub bpm: f32,
    pub beats: u32,
    pub bars: u32,
    pub channel_count: usize,
    pub action_count: usize,
}

fn load_patch_data(path: &Path) -> Result<Patch, ProjectError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    // Try JSON first, fall back to MessagePack
    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(ProjectError::from)
    })
}

/// Read a patch file. Wave paths are returned as stored; resolving them
/// against the patch directory is up to the caller.
pub fn load_patch(path: &Path) -> Result<Patch, ProjectError> {
    let patch = load_patch_data(path)?;
    if patch.version > PATCH_VERSION {
        return Err(ProjectError::UnsupportedVersion {
            found: patch.version,
        });
    }

    log::info!(
        "loaded patch '{}' from {} ({} channel(s), {} action(s))",
        patch.name,
        path.display(),
        patch.channels.len(),
        patch.actions.len()
    );
    Ok(patch)
}

pub fn load_patch_metadata(path: &Path) -> Result<PatchMetadata, ProjectError> {
    let patch = load_patch_data(path)?;

    Ok(PatchMetadata {
        name: patch.name,
        bpm: patch.bpm,
        beats: patch.beats,
        bars: patch.bars,
        channel_count: patch.channels.len(),
        action_count: patch.actions.len(),
    })
}
