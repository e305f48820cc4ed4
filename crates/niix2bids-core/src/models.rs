//! Shared typed models used by discovery, classification and the BIDS writer.

use std::cell::OnceCell;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Sidecar content, verbatim as loaded from the `.json` file.
pub type Metadata = Map<String, Value>;

/// Ordered BIDS entity map (`acq`, `run`, `dir`, ...) accumulated by a classifier.
pub type AttributeFields = IndexMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Sidecar field names (dcm2niix, Siemens vocabulary)
// ---------------------------------------------------------------------------

pub const CONVERSION_SOFTWARE: &str = "ConversionSoftware";
pub const PATIENT_NAME: &str = "PatientName";
pub const MODALITY: &str = "Modality";
pub const MANUFACTURER: &str = "Manufacturer";
pub const PULSE_SEQUENCE_DETAILS: &str = "PulseSequenceDetails";
pub const SEQUENCE_NAME: &str = "SequenceName";
pub const MR_ACQUISITION_TYPE: &str = "MRAcquisitionType";
pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
pub const SERIES_NUMBER: &str = "SeriesNumber";
pub const PROTOCOL_NAME: &str = "ProtocolName";
pub const IMAGE_TYPE: &str = "ImageType";
pub const PHASE_ENCODING_DIRECTION: &str = "PhaseEncodingDirection";
pub const ECHO_NUMBER: &str = "EchoNumber";
pub const ECHO_TIME: &str = "EchoTime";
pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";

// ---------------------------------------------------------------------------
// 1. RecordId
// ---------------------------------------------------------------------------

/// Stable join key of a record inside its [`RecordSet`] (discovery index).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub usize);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// 2. Category
// ---------------------------------------------------------------------------

/// Top-level BIDS grouping a classifier assigns to a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Category {
    #[default]
    Unset,
    Anat,
    Func,
    Dwi,
    Fmap,
    Discard,
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Unset => "unset",
            Category::Anat => "anat",
            Category::Func => "func",
            Category::Dwi => "dwi",
            Category::Fmap => "fmap",
            Category::Discard => "discard",
            Category::Unknown => "unknown",
        }
    }

    /// Output sub-directory, `None` while the record is unclassified.
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            Category::Unset => None,
            Category::Discard => Some("DISCARD"),
            Category::Unknown => Some("UNKNOWN"),
            other => Some(other.as_str()),
        }
    }

    pub fn is_quarantine(self) -> bool {
        matches!(self, Category::Discard | Category::Unknown)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 3. AttrValue
// ---------------------------------------------------------------------------

/// Value of one BIDS entity in a filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Number(i64),
}

impl AttrValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, AttrValue::Text(s) if s.is_empty())
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Number(value as i64)
    }
}

// ---------------------------------------------------------------------------
// 4. VolumeRecord
// ---------------------------------------------------------------------------

/// Where a record stands in the classification state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingState {
    Unrouted,
    Claimed,
    Rejected,
    Unknown,
}

/// One NIfTI volume, its sidecar metadata and its classification result.
#[derive(Clone, Debug)]
pub struct VolumeRecord {
    pub id: RecordId,
    volume_path: PathBuf,
    basename: String,
    extension: String,
    pub raw_metadata: Metadata,
    gradient_table: OnceCell<bool>,
    gradient_direction: OnceCell<bool>,
    pub category: Category,
    pub suffix: String,
    pub subject_label: String,
    pub session_label: String,
    pub attribute_fields: AttributeFields,
    pub rejection_reason: String,
}

/// Split `sub01_t1.nii.gz` into (`sub01_t1`, `.nii.gz`).
pub fn split_volume_name(file_name: &str) -> (&str, &str) {
    for ext in [".nii.gz", ".nii"] {
        if let Some(stem) = file_name.strip_suffix(ext) {
            return (stem, ext);
        }
    }
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
        _ => (file_name, ""),
    }
}

impl VolumeRecord {
    pub fn new(id: RecordId, volume_path: PathBuf, raw_metadata: Metadata) -> Self {
        let file_name = volume_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let (basename, extension) = split_volume_name(&file_name);
        let (basename, extension) = (basename.to_string(), extension.to_string());
        Self {
            id,
            volume_path,
            basename,
            extension,
            raw_metadata,
            gradient_table: OnceCell::new(),
            gradient_direction: OnceCell::new(),
            category: Category::Unset,
            suffix: String::new(),
            subject_label: String::new(),
            session_label: String::new(),
            attribute_fields: IndexMap::new(),
            rejection_reason: String::new(),
        }
    }

    pub fn volume_path(&self) -> &Path {
        &self.volume_path
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Path of a file next to the volume sharing its basename (`.json`, `.bval`, ...).
    pub fn sibling(&self, extension: &str) -> PathBuf {
        let parent = self.volume_path.parent().unwrap_or(Path::new(""));
        parent.join(format!("{}{}", self.basename, extension))
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.sibling(".json")
    }

    // -- metadata access ----------------------------------------------------

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw_metadata.get(field).filter(|v| !v.is_null())
    }

    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        let value = self.get(field)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// Printable grouping key for a field; missing fields all share `""`.
    pub fn field_key(&self, field: &str) -> String {
        match self.get(field) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("_"),
            Some(other) => other.to_string(),
        }
    }

    /// Pulse sequence name: `%CustomerSeq%_cmrr_mbep2d_bold` -> `cmrr_mbep2d_bold`.
    pub fn sequence_name(&self) -> Option<&str> {
        let details = self.get_str(PULSE_SEQUENCE_DETAILS)?;
        Some(
            details
                .rsplit_once("%_")
                .map(|(_, name)| name)
                .unwrap_or(details),
        )
    }

    /// String elements of `ImageType`, e.g. `["ORIGINAL", "PRIMARY", "M", "ND"]`.
    pub fn image_type(&self) -> Vec<&str> {
        match self.get(IMAGE_TYPE) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// `ImageType` joined with `_`: `ORIGINAL_PRIMARY_M_ND_MOSAIC`.
    pub fn image_type_joined(&self) -> String {
        self.image_type().join("_")
    }

    // -- gradient side files -------------------------------------------------

    /// Cached `.bval` presence, computed by `check` on first call only.
    pub fn gradient_table_present(&self, check: impl FnOnce(&Self) -> bool) -> bool {
        *self.gradient_table.get_or_init(|| check(self))
    }

    /// Cached `.bvec` presence, computed by `check` on first call only.
    pub fn gradient_direction_present(&self, check: impl FnOnce(&Self) -> bool) -> bool {
        *self.gradient_direction.get_or_init(|| check(self))
    }

    pub fn gradient_files_checked(&self) -> Option<(bool, bool)> {
        Some((*self.gradient_table.get()?, *self.gradient_direction.get()?))
    }

    // -- classification state --------------------------------------------------

    pub fn state(&self) -> RoutingState {
        match self.category {
            Category::Unknown => RoutingState::Unknown,
            Category::Unset if self.rejection_reason.is_empty() => RoutingState::Unrouted,
            Category::Unset => RoutingState::Rejected,
            _ => RoutingState::Claimed,
        }
    }

    pub fn is_unrouted(&self) -> bool {
        self.state() == RoutingState::Unrouted
    }

    /// Assign the final category and suffix. A record is claimed at most once.
    pub fn claim(&mut self, category: Category, suffix: impl Into<String>) {
        debug_assert!(
            self.category == Category::Unset,
            "record {} claimed twice",
            self.id
        );
        self.category = category;
        self.suffix = suffix.into();
    }

    /// Record why this volume is excluded; reasons accumulate.
    pub fn reject(&mut self, reason: impl AsRef<str>) {
        if !self.rejection_reason.is_empty() {
            self.rejection_reason.push(' ');
        }
        self.rejection_reason.push_str(reason.as_ref());
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attribute_fields.insert(key.to_string(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attribute_fields.get(key)
    }
}

// ---------------------------------------------------------------------------
// 5. RecordSet
// ---------------------------------------------------------------------------

/// The explicit record collection owned by the workflow and passed to every stage.
#[derive(Clone, Debug, Default)]
pub struct RecordSet {
    records: Vec<VolumeRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a volume; its id is its position in discovery order.
    pub fn push(&mut self, volume_path: PathBuf, raw_metadata: Metadata) -> RecordId {
        let id = RecordId(self.records.len());
        self.records
            .push(VolumeRecord::new(id, volume_path, raw_metadata));
        id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        (0..self.records.len()).map(RecordId).collect()
    }

    pub fn get(&self, id: RecordId) -> Option<&VolumeRecord> {
        self.records.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumeRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VolumeRecord> {
        self.records.iter_mut()
    }
}

impl Index<RecordId> for RecordSet {
    type Output = VolumeRecord;

    fn index(&self, id: RecordId) -> &VolumeRecord {
        &self.records[id.0]
    }
}

impl IndexMut<RecordId> for RecordSet {
    fn index_mut(&mut self, id: RecordId) -> &mut VolumeRecord {
        &mut self.records[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(metadata: Value) -> VolumeRecord {
        VolumeRecord::new(
            RecordId(0),
            PathBuf::from("/data/in/s01_bold.nii.gz"),
            metadata.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn test_split_volume_name() {
        assert_eq!(split_volume_name("a_b.nii.gz"), ("a_b", ".nii.gz"));
        assert_eq!(split_volume_name("a_b.nii"), ("a_b", ".nii"));
        assert_eq!(split_volume_name("noext"), ("noext", ""));
    }

    #[test]
    fn test_basename_and_siblings() {
        let rec = record(json!({}));
        assert_eq!(rec.basename(), "s01_bold");
        assert_eq!(rec.extension(), ".nii.gz");
        assert_eq!(rec.sidecar_path(), PathBuf::from("/data/in/s01_bold.json"));
        assert_eq!(rec.sibling(".bval"), PathBuf::from("/data/in/s01_bold.bval"));
    }

    #[test]
    fn test_sequence_name_takes_text_after_last_marker() {
        let rec = record(json!({"PulseSequenceDetails": "%CustomerSeq%_cmrr_mbep2d_bold"}));
        assert_eq!(rec.sequence_name(), Some("cmrr_mbep2d_bold"));
        let rec = record(json!({"PulseSequenceDetails": "tfl"}));
        assert_eq!(rec.sequence_name(), Some("tfl"));
        assert_eq!(record(json!({})).sequence_name(), None);
    }

    #[test]
    fn test_image_type_join_and_field_key() {
        let rec = record(json!({
            "ImageType": ["ORIGINAL", "PRIMARY", "M", "ND"],
            "EchoNumber": 2,
            "EchoTime": null
        }));
        assert_eq!(rec.image_type_joined(), "ORIGINAL_PRIMARY_M_ND");
        assert_eq!(rec.field_key("ImageType"), "ORIGINAL_PRIMARY_M_ND");
        assert_eq!(rec.field_key("EchoNumber"), "2");
        assert_eq!(rec.field_key("Missing"), "");
        assert!(!rec.has("EchoTime"));
    }

    #[test]
    fn test_gradient_checks_run_once() {
        let rec = record(json!({}));
        let mut calls = 0;
        assert!(rec.gradient_table_present(|_| {
            calls += 1;
            true
        }));
        assert!(rec.gradient_table_present(|_| {
            calls += 1;
            false
        }));
        assert_eq!(calls, 1);
        assert_eq!(rec.gradient_files_checked(), None);
        rec.gradient_direction_present(|_| false);
        assert_eq!(rec.gradient_files_checked(), Some((true, false)));
    }

    #[test]
    fn test_state_transitions() {
        let mut rec = record(json!({}));
        assert_eq!(rec.state(), RoutingState::Unrouted);
        rec.reject("non-4D bold volume");
        assert_eq!(rec.state(), RoutingState::Rejected);

        let mut rec = record(json!({}));
        rec.claim(Category::Func, "bold");
        assert_eq!(rec.state(), RoutingState::Claimed);

        let mut rec = record(json!({}));
        rec.claim(Category::Unknown, "");
        assert_eq!(rec.state(), RoutingState::Unknown);
    }

    #[test]
    fn test_reject_accumulates_reasons() {
        let mut rec = record(json!({}));
        rec.reject("[ no .bval file ]");
        rec.reject("[ no .bvec file ]");
        assert_eq!(rec.rejection_reason, "[ no .bval file ] [ no .bvec file ]");
    }

    #[test]
    fn test_record_set_ids_follow_discovery_order() {
        let mut set = RecordSet::new();
        let a = set.push(PathBuf::from("/in/a.nii"), Metadata::new());
        let b = set.push(PathBuf::from("/in/b.nii"), Metadata::new());
        assert_eq!((a, b), (RecordId(0), RecordId(1)));
        assert_eq!(set.ids(), vec![a, b]);
        assert_eq!(set[b].basename(), "b");
    }

    #[test]
    fn test_category_dirs() {
        assert_eq!(Category::Anat.dir_name(), Some("anat"));
        assert_eq!(Category::Discard.dir_name(), Some("DISCARD"));
        assert_eq!(Category::Unset.dir_name(), None);
        assert!(Category::Unknown.is_quarantine());
        assert!(!Category::Dwi.is_quarantine());
    }
}
