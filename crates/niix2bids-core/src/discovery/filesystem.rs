//! Filesystem scanning helpers: find NIfTI volumes and pair them with sidecars.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::{NiixError, NiixResult};
use crate::models::split_volume_name;

const VOLUME_EXTENSIONS: &[&str] = &[".nii", ".nii.gz"];

/// A volume and the sidecar that describes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumePair {
    pub volume: PathBuf,
    pub sidecar: PathBuf,
}

/// Every regular file below `in_dirs`, sorted by path.
pub fn fetch_all_files(in_dirs: &[PathBuf]) -> NiixResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in in_dirs {
        if !dir.is_dir() {
            return Err(NiixError::NoInput(format!(
                "input directory does not exist: {}",
                dir.display()
            )));
        }
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry below {}: {e}", dir.display());
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }

    if files.is_empty() {
        return Err(NiixError::NoInput(format!("no file found in {in_dirs:?}")));
    }
    files.sort();
    Ok(files)
}

pub fn is_volume_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|f| f.to_string_lossy())
        .unwrap_or_default();
    VOLUME_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Keep only `.nii` / `.nii.gz` files.
pub fn isolate_volume_files(files: &[PathBuf]) -> NiixResult<Vec<PathBuf>> {
    let volumes: Vec<PathBuf> = files.iter().filter(|p| is_volume_file(p)).cloned().collect();
    info!("found {} nifti files", volumes.len());
    if volumes.is_empty() {
        return Err(NiixError::NoInput("no .nii file found".to_string()));
    }
    Ok(volumes)
}

/// `<dir>/<basename>.json` for a volume path.
pub fn sidecar_for(volume: &Path) -> PathBuf {
    let name = volume
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, _) = split_volume_name(&name);
    volume.with_file_name(format!("{stem}.json"))
}

/// Drop volumes without a sidecar, keeping discovery order.
pub fn pair_with_sidecars(volumes: Vec<PathBuf>) -> Vec<VolumePair> {
    let mut pairs = Vec::with_capacity(volumes.len());
    for volume in volumes {
        let sidecar = sidecar_for(&volume);
        if sidecar.is_file() {
            pairs.push(VolumePair { volume, sidecar });
        } else {
            warn!("this file has no .json associated : {}", volume.display());
        }
    }
    info!("remaining {} nifti files", pairs.len());
    pairs
}

/// Walk, isolate and pair in one pass.
pub fn discover_volumes(in_dirs: &[PathBuf]) -> NiixResult<Vec<VolumePair>> {
    let files = fetch_all_files(in_dirs)?;
    let volumes = isolate_volume_files(&files)?;
    Ok(pair_with_sidecars(volumes))
}
