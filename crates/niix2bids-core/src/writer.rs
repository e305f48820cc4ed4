//! BIDS output: name assembly, file placement, sidecar rewriting,
//! dataset-level files and the end-of-run rejection report.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::classify::driver::ClassificationSummary;
use crate::config::WriteMode;
use crate::discovery::probe::{GRADIENT_DIRECTION_EXT, GRADIENT_TABLE_EXT};
use crate::errors::NiixResult;
use crate::models::{Category, Metadata, RecordId, RecordSet, VolumeRecord, ECHO_TIME};

pub const BIDS_VERSION: &str = "1.6.0";

/// EchoTime2 - EchoTime1 of the Siemens `gre_field_mapping`, in seconds.
pub const PHASEDIFF_ECHO_SPACING: f64 = 0.00246;

/// Entity order of a BIDS filename; other keys follow in insertion order.
const ENTITY_ORDER: &[&str] = &[
    "task", "acq", "ce", "rec", "dir", "run", "mod", "echo", "flip", "inv", "mt", "part",
];

// ---------------------------------------------------------------------------
// Names and locations
// ---------------------------------------------------------------------------

/// `sub-<s>_ses-<ss>[_<key>-<value>...][_<suffix>]`, without extension.
pub fn assemble_bids_name(record: &VolumeRecord) -> String {
    let mut name = format!("sub-{}_ses-{}", record.subject_label, record.session_label);

    let ordered = ENTITY_ORDER.iter().copied().chain(
        record
            .attribute_fields
            .keys()
            .map(String::as_str)
            .filter(|key| !ENTITY_ORDER.contains(key)),
    );
    for key in ordered {
        if let Some(value) = record.attr(key).filter(|v| !v.is_empty()) {
            name.push_str(&format!("_{key}-{value}"));
        }
    }

    if !record.suffix.is_empty() {
        name.push('_');
        name.push_str(&record.suffix);
    }
    name
}

/// `<out>/sub-<s>/ses-<ss>/<category dir>`, `None` for unclassified records.
pub fn output_dir(out_dir: &Path, record: &VolumeRecord) -> Option<PathBuf> {
    let category_dir = record.category.dir_name()?;
    Some(
        out_dir
            .join(format!("sub-{}", record.subject_label))
            .join(format!("ses-{}", record.session_label))
            .join(category_dir),
    )
}

/// Classified records, plus quarantined ones which carry a reason by construction.
pub fn is_placeable(record: &VolumeRecord) -> bool {
    match record.category {
        Category::Unset => false,
        category if category.is_quarantine() => true,
        _ => record.rejection_reason.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Counters returned by [`apply_bids_architecture`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlacementStats {
    pub volumes_placed: usize,
    pub files_written: usize,
    pub files_skipped: usize,
}

fn target_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(unix)]
fn link_file(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn link_file(source: &Path, target: &Path) -> io::Result<()> {
    fs::copy(source, target).map(|_| ())
}

/// Link or copy `source` to `target`; an existing target is left untouched.
fn place_file(source: &Path, target: &Path, mode: WriteMode) -> NiixResult<bool> {
    if target_exists(target) {
        return Ok(false);
    }
    match mode {
        WriteMode::Symlink => link_file(source, target)?,
        WriteMode::Copy => {
            fs::copy(source, target)?;
        }
    }
    Ok(true)
}

/// Serialize `value` with a 4-space indent and a trailing newline.
pub fn write_pretty_json<T: Serialize>(path: &Path, value: &T) -> NiixResult<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    fs::write(path, buf)?;
    Ok(())
}

/// Sidecar content for records whose JSON must differ from the source.
///
/// `func` gains `TaskName`; an `fmap` phasediff gains `EchoTime1`/`EchoTime2`.
pub fn rewritten_sidecar(record: &VolumeRecord) -> Option<Metadata> {
    match (record.category, record.suffix.as_str()) {
        (Category::Func, _) => {
            let task = record.attr("task").map(|v| v.to_string()).unwrap_or_default();
            let mut metadata = record.raw_metadata.clone();
            metadata.insert("TaskName".to_string(), Value::from(task));
            Some(metadata)
        }
        (Category::Fmap, "phasediff") => {
            let Some(echo_time) = record.get(ECHO_TIME).and_then(Value::as_f64) else {
                warn!(
                    "phasediff without numeric EchoTime, sidecar kept as is : {}",
                    record.volume_path().display()
                );
                return None;
            };
            let mut metadata = record.raw_metadata.clone();
            metadata.insert(
                "EchoTime1".to_string(),
                Value::from(echo_time - PHASEDIFF_ECHO_SPACING),
            );
            metadata.insert("EchoTime2".to_string(), Value::from(echo_time));
            Some(metadata)
        }
        _ => None,
    }
}

fn place_record(record: &VolumeRecord, out_dir: &Path, mode: WriteMode, stats: &mut PlacementStats) -> NiixResult<()> {
    let Some(dir_path) = output_dir(out_dir, record) else {
        return Ok(());
    };
    fs::create_dir_all(&dir_path)?;
    let out_name = assemble_bids_name(record);

    let mut count = |written: bool| {
        if written {
            stats.files_written += 1;
        } else {
            stats.files_skipped += 1;
        }
    };

    // volume
    let target = dir_path.join(format!("{out_name}{}", record.extension()));
    count(place_file(record.volume_path(), &target, mode)?);

    // sidecar
    let target = dir_path.join(format!("{out_name}.json"));
    match rewritten_sidecar(record) {
        Some(metadata) if !target_exists(&target) => {
            write_pretty_json(&target, &metadata)?;
            count(true);
        }
        Some(_) => count(false),
        None => count(place_file(&record.sidecar_path(), &target, mode)?),
    }

    // gradient files
    for ext in [GRADIENT_TABLE_EXT, GRADIENT_DIRECTION_EXT] {
        let source = record.sibling(ext);
        if source.is_file() {
            let target = dir_path.join(format!("{out_name}{ext}"));
            count(place_file(&source, &target, mode)?);
        }
    }

    stats.volumes_placed += 1;
    Ok(())
}

/// Materialize every placeable record under `out_dir`.
pub fn apply_bids_architecture(
    out_dir: &Path,
    records: &RecordSet,
    mode: WriteMode,
) -> NiixResult<PlacementStats> {
    let mut stats = PlacementStats::default();
    for record in records.iter().filter(|r| is_placeable(r)) {
        place_record(record, out_dir, mode, &mut stats)?;
    }
    info!(
        "Placed {} volumes ({} files written, {} already present)",
        stats.volumes_placed, stats.files_written, stats.files_skipped
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Dataset-level files
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GeneratedBy {
    #[serde(rename = "Name")]
    name: &'static str,
    #[serde(rename = "Version")]
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DatasetDescription {
    name: String,
    #[serde(rename = "BIDSVersion")]
    bids_version: &'static str,
    #[serde(rename = "HEDVersion")]
    hed_version: String,
    dataset_type: &'static str,
    license: &'static str,
    authors: Vec<String>,
    acknowledgements: String,
    how_to_acknowledge: String,
    funding: Vec<String>,
    ethics_approvals: Vec<String>,
    references_and_links: Vec<String>,
    #[serde(rename = "DatasetDOI")]
    dataset_doi: String,
    generated_by: Vec<GeneratedBy>,
}

pub fn write_dataset_description(out_dir: &Path) -> NiixResult<()> {
    let description = DatasetDescription {
        name: String::new(),
        bids_version: BIDS_VERSION,
        hed_version: String::new(),
        dataset_type: "raw",
        license: "PDDL",
        authors: vec![String::new()],
        acknowledgements: String::new(),
        how_to_acknowledge: String::new(),
        funding: vec![String::new()],
        ethics_approvals: vec![String::new()],
        references_and_links: vec![String::new()],
        dataset_doi: String::new(),
        generated_by: vec![GeneratedBy {
            name: "niix2bids",
            version: env!("CARGO_PKG_VERSION"),
        }],
    };
    write_pretty_json(&out_dir.join("dataset_description.json"), &description)
}

/// README, CHANGES, LICENSE and .bidsignore.
pub fn write_other_files(out_dir: &Path) -> NiixResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    fs::write(
        out_dir.join("README"),
        format!("GeneratedBy : niix2bids=={version}\nBIDSVersion : {BIDS_VERSION}\n"),
    )?;

    let today = chrono::Local::now().format("%Y-%m-%d");
    fs::write(
        out_dir.join("CHANGES"),
        format!("1.0.0 {today}\n  - Initial release\n"),
    )?;

    fs::write(out_dir.join("LICENSE"), "PDDL\n")?;

    let mut ignore = String::from("log_*\n");
    for category in [Category::Discard, Category::Unknown] {
        if let Some(dir) = category.dir_name() {
            ignore.push_str(&format!("**/{dir}/\n"));
        }
    }
    fs::write(out_dir.join(".bidsignore"), ignore)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rejection report
// ---------------------------------------------------------------------------

/// Records that need an operator's attention, by decreasing severity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RejectionReport {
    pub errors: Vec<RecordId>,
    pub unknown: Vec<RecordId>,
    pub warnings: Vec<RecordId>,
    pub discarded: Vec<RecordId>,
}

impl RejectionReport {
    pub fn build(records: &RecordSet, summary: &ClassificationSummary) -> Self {
        let sanity: HashSet<RecordId> = summary.sanity_rejected.iter().copied().collect();
        let mut report = Self::default();
        for record in records.iter() {
            let id = record.id;
            if sanity.contains(&id) {
                report.errors.push(id);
                continue;
            }
            match record.category {
                Category::Unknown => report.unknown.push(id),
                Category::Discard => report.discarded.push(id),
                Category::Unset => report.warnings.push(id),
                _ if !record.rejection_reason.is_empty() => report.warnings.push(id),
                _ => {}
            }
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
            && self.unknown.is_empty()
            && self.warnings.is_empty()
            && self.discarded.is_empty()
    }

    /// Emit one line per record: errors, then unknown, then warnings, then discards.
    pub fn log(&self, records: &RecordSet) {
        let line = |id: RecordId| {
            let record = &records[id];
            let reason = if record.rejection_reason.is_empty() {
                "Nifti file not interpreted"
            } else {
                record.rejection_reason.as_str()
            };
            format!("{reason} : {}", record.volume_path().display())
        };
        for &id in &self.errors {
            error!("{}", line(id));
        }
        for &id in &self.unknown {
            warn!("{}", line(id));
        }
        for &id in &self.warnings {
            warn!("{}", line(id));
        }
        for &id in &self.discarded {
            info!("{}", line(id));
        }
    }
}
