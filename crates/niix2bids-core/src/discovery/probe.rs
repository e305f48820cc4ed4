//! Narrow filesystem queries the classification engine is allowed to make.

use nifti::NiftiHeader;
use tracing::debug;

use crate::models::VolumeRecord;

/// Gradient-table extension written by dcm2niix next to a diffusion volume.
pub const GRADIENT_TABLE_EXT: &str = ".bval";
/// Gradient-direction extension written by dcm2niix next to a diffusion volume.
pub const GRADIENT_DIRECTION_EXT: &str = ".bvec";

/// Side-file and header lookups for one volume.
///
/// Absence is a normal outcome, never an error.
pub trait VolumeProbe {
    fn gradient_table_exists(&self, record: &VolumeRecord) -> bool;

    fn gradient_direction_exists(&self, record: &VolumeRecord) -> bool;

    /// Number of dimensions declared by the NIfTI header (`dim[0]`), if readable.
    fn volume_dimensions(&self, record: &VolumeRecord) -> Option<usize>;
}

/// Probe backed by the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsProbe;

impl VolumeProbe for FsProbe {
    fn gradient_table_exists(&self, record: &VolumeRecord) -> bool {
        record.sibling(GRADIENT_TABLE_EXT).is_file()
    }

    fn gradient_direction_exists(&self, record: &VolumeRecord) -> bool {
        record.sibling(GRADIENT_DIRECTION_EXT).is_file()
    }

    fn volume_dimensions(&self, record: &VolumeRecord) -> Option<usize> {
        match NiftiHeader::from_file(record.volume_path()) {
            Ok(header) => Some(usize::from(header.dim[0])),
            Err(e) => {
                debug!(
                    "Cannot read NIfTI header of {}: {e}",
                    record.volume_path().display()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, RecordId};
    use std::path::PathBuf;

    #[test]
    fn test_fs_probe_finds_gradient_files() {
        let dir = tempfile::tempdir().unwrap();
        let volume = dir.path().join("dwi.nii.gz");
        std::fs::write(dir.path().join("dwi.bval"), "0 1000\n").unwrap();
        let record = VolumeRecord::new(RecordId(0), volume, Metadata::new());

        assert!(FsProbe.gradient_table_exists(&record));
        assert!(!FsProbe.gradient_direction_exists(&record));
    }

    #[test]
    fn test_fs_probe_unreadable_header() {
        let record = VolumeRecord::new(
            RecordId(0),
            PathBuf::from("/nowhere/missing.nii"),
            Metadata::new(),
        );
        assert_eq!(FsProbe.volume_dimensions(&record), None);
    }
}
