use crate::{PATCH_EXTENSION, PATCH_VERSION, Patch, ProjectError};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Patch file inside a patch directory: `<dir>/<dir name>.lpatch`. Waves
/// saved with the patch live next to it.
pub fn patch_file(dir: &Path) -> PathBuf {
    let stem = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "patch".to_string());
    dir.join(format!("{stem}.{PATCH_EXTENSION}"))
}

pub fn save_patch(path: &Path, patch: &Patch) -> Result<(), ProjectError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    if patch.version == PATCH_VERSION {
        serde_json::to_writer_pretty(writer, patch)?;
    } else {
        let patch = Patch {
            version: PATCH_VERSION,
            ..patch.clone()
        };
        serde_json::to_writer_pretty(writer, &patch)?;
    }

    log::info!("saved patch '{}' to {}", patch.name, path.display());
    Ok(())
}
