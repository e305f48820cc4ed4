//! Stateless selection and extraction helpers over a [`RecordSet`].
//!
//! Every selector takes the collection plus a subset of ids and returns a new
//! subset, preserving the input order (discovery order).

use std::hash::Hash;

use indexmap::IndexMap;
use regex::Regex;

use crate::models::{
    RecordId, RecordSet, VolumeRecord, ECHO_NUMBER, MR_ACQUISITION_TYPE,
};

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// True when `re` matches `text` starting at position 0 (not necessarily the
/// whole string), the same contract as a prefix `match`.
pub fn matches_from_start(re: &Regex, text: &str) -> bool {
    re.find(text).is_some_and(|m| m.start() == 0)
}

/// Records whose string value at `field` matches `re` from its first character.
pub fn filter_by_field_pattern(
    records: &RecordSet,
    ids: &[RecordId],
    field: &str,
    re: &Regex,
) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .filter(|&id| {
            records[id]
                .get_str(field)
                .is_some_and(|value| matches_from_start(re, value))
        })
        .collect()
}

/// Records whose pulse sequence name matches `re` from its first character.
pub fn filter_by_sequence_name(records: &RecordSet, ids: &[RecordId], re: &Regex) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .filter(|&id| {
            records[id]
                .sequence_name()
                .is_some_and(|name| matches_from_start(re, name))
        })
        .collect()
}

/// Records whose `ImageType[2]` equals `tag` (`"M"`, `"P"`, `"T1 MAP"`, ...).
pub fn filter_by_image_type_tag(records: &RecordSet, ids: &[RecordId], tag: &str) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .filter(|&id| records[id].image_type().get(2) == Some(&tag))
        .collect()
}

/// Records whose `ImageType[0]` is `ORIGINAL` (drops ADC, FA and other derived maps).
pub fn filter_original_only(records: &RecordSet, ids: &[RecordId]) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .filter(|&id| records[id].image_type().first() == Some(&"ORIGINAL"))
        .collect()
}

/// Split `ids` into (`MRAcquisitionType == dimensionality`, the rest).
///
/// The caller owns the complement and must tag it.
pub fn filter_by_acquisition_dimensionality(
    records: &RecordSet,
    ids: &[RecordId],
    dimensionality: &str,
) -> (Vec<RecordId>, Vec<RecordId>) {
    ids.iter()
        .copied()
        .partition(|&id| records[id].get_str(MR_ACQUISITION_TYPE) == Some(dimensionality))
}

/// Ids that no classifier has claimed or rejected yet.
pub fn still_unrouted(records: &RecordSet, ids: &[RecordId]) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .filter(|&id| records[id].is_unrouted())
        .collect()
}

pub fn any_has_field(records: &RecordSet, ids: &[RecordId], field: &str) -> bool {
    ids.iter().any(|&id| records[id].has(field))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Keep ASCII letters and digits only.
pub fn clean_identifier(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// `j` -> `PA`, `j-` -> `AP`, `i` -> `LR`, `i-` -> `RL`.
pub fn phase_encoding_label(code: &str) -> Option<&'static str> {
    match code {
        "j" => Some("PA"),
        "j-" => Some("AP"),
        "i" => Some("LR"),
        "i-" => Some("RL"),
        _ => None,
    }
}

/// `mag` / `phase` from the third `_`-token of the joined `ImageType`, else `""`.
pub fn magnitude_or_phase(record: &VolumeRecord) -> &'static str {
    let joined = record.image_type_joined();
    match joined.split('_').nth(2) {
        Some("M") => "mag",
        Some("P") => "phase",
        _ => "",
    }
}

/// Echo index when the group carries an `EchoNumber` axis, `-1` otherwise.
pub fn echo_number(record: &VolumeRecord, has_echo_field: bool) -> i64 {
    if !has_echo_field {
        return -1;
    }
    record.get_i64(ECHO_NUMBER).unwrap_or(-1)
}

/// `ImageType` tokens past the third, concatenated (`["..","..","M","ND","NORM"]` -> `NDNORM`).
pub fn image_type_residual(record: &VolumeRecord) -> String {
    record.image_type().iter().skip(3).copied().collect()
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Stable group-by: groups appear in first-encounter order, members keep input order.
pub fn group_by<K, F>(records: &RecordSet, ids: &[RecordId], key: F) -> IndexMap<K, Vec<RecordId>>
where
    K: Eq + Hash,
    F: Fn(&VolumeRecord) -> K,
{
    let mut groups: IndexMap<K, Vec<RecordId>> = IndexMap::new();
    for &id in ids {
        groups.entry(key(&records[id])).or_default().push(id);
    }
    groups
}

/// [`group_by`] on the printable values of several metadata fields.
pub fn group_by_fields(
    records: &RecordSet,
    ids: &[RecordId],
    fields: &[&str],
) -> IndexMap<Vec<String>, Vec<RecordId>> {
    group_by(records, ids, |record| {
        fields.iter().map(|f| record.field_key(f)).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    fn set_of(rows: &[Value]) -> RecordSet {
        let mut set = RecordSet::new();
        for (i, row) in rows.iter().enumerate() {
            set.push(
                PathBuf::from(format!("/in/{i:03}.nii")),
                row.as_object().cloned().unwrap_or_else(Metadata::new),
            );
        }
        set
    }

    #[test]
    fn test_match_is_anchored_at_start_only() {
        let set = set_of(&[
            json!({"PulseSequenceDetails": "%CustomerSeq%_cmrr_mbep2d_bold_foo"}),
            json!({"PulseSequenceDetails": "%SiemensSeq%_bold"}),
        ]);
        let ids = set.ids();
        let contains = Regex::new(".*bold.*").unwrap();
        let exact = Regex::new("^bold$").unwrap();
        let infix = Regex::new("bold").unwrap();
        assert_eq!(filter_by_sequence_name(&set, &ids, &contains).len(), 2);
        assert_eq!(filter_by_sequence_name(&set, &ids, &exact), vec![RecordId(1)]);
        assert_eq!(filter_by_sequence_name(&set, &ids, &infix), vec![RecordId(1)]);
    }

    #[test]
    fn test_field_pattern_skips_missing_and_non_string() {
        let set = set_of(&[
            json!({"SeriesDescription": "mp2rage_INV1"}),
            json!({"SeriesDescription": 12}),
            json!({}),
        ]);
        let re = Regex::new(".*_INV1$").unwrap();
        assert_eq!(
            filter_by_field_pattern(&set, &set.ids(), "SeriesDescription", &re),
            vec![RecordId(0)]
        );
    }

    #[test]
    fn test_image_type_filters() {
        let set = set_of(&[
            json!({"ImageType": ["ORIGINAL", "PRIMARY", "M", "ND"]}),
            json!({"ImageType": ["DERIVED", "PRIMARY", "T1 MAP", "ND"]}),
            json!({"ImageType": ["ORIGINAL", "PRIMARY", "P", "ND"]}),
            json!({"ImageType": ["DERIVED", "PRIMARY", "ADC"]}),
            json!({}),
        ]);
        let ids = set.ids();
        assert_eq!(filter_by_image_type_tag(&set, &ids, "M"), vec![RecordId(0)]);
        assert_eq!(filter_by_image_type_tag(&set, &ids, "T1 MAP"), vec![RecordId(1)]);
        assert_eq!(filter_original_only(&set, &ids), vec![RecordId(0), RecordId(2)]);
    }

    #[test]
    fn test_dimensionality_split() {
        let set = set_of(&[
            json!({"MRAcquisitionType": "3D"}),
            json!({"MRAcquisitionType": "2D"}),
            json!({}),
        ]);
        let (kept, rest) = filter_by_acquisition_dimensionality(&set, &set.ids(), "2D");
        assert_eq!(kept, vec![RecordId(1)]);
        assert_eq!(rest, vec![RecordId(0), RecordId(2)]);
    }

    #[test]
    fn test_clean_identifier_is_idempotent_and_alphanumeric() {
        for raw in ["Sub_01^Doe", "t1_mprage sag p2", "", "___", "élan-42", "AB12"] {
            let once = clean_identifier(raw);
            assert_eq!(clean_identifier(&once), once);
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        assert_eq!(clean_identifier("Sub_01^Doe"), "Sub01Doe");
        assert_eq!(clean_identifier("élan-42"), "lan42");
    }

    #[test]
    fn test_phase_encoding_labels() {
        assert_eq!(phase_encoding_label("j"), Some("PA"));
        assert_eq!(phase_encoding_label("j-"), Some("AP"));
        assert_eq!(phase_encoding_label("i"), Some("LR"));
        assert_eq!(phase_encoding_label("i-"), Some("RL"));
    }

    #[test]
    fn test_magnitude_or_phase_and_residual() {
        let set = set_of(&[
            json!({"ImageType": ["ORIGINAL", "PRIMARY", "M", "MB", "TE1", "ND", "MOSAIC"]}),
            json!({"ImageType": ["ORIGINAL", "PRIMARY", "P", "ND"]}),
            json!({"ImageType": ["DERIVED", "PRIMARY", "T1 MAP", "ND"]}),
        ]);
        assert_eq!(magnitude_or_phase(&set[RecordId(0)]), "mag");
        assert_eq!(magnitude_or_phase(&set[RecordId(1)]), "phase");
        assert_eq!(magnitude_or_phase(&set[RecordId(2)]), "");
        assert_eq!(image_type_residual(&set[RecordId(0)]), "MBTE1NDMOSAIC");
        assert_eq!(image_type_residual(&set[RecordId(2)]), "ND");
    }

    #[test]
    fn test_echo_number_sentinel() {
        let set = set_of(&[json!({"EchoNumber": 2}), json!({})]);
        assert_eq!(echo_number(&set[RecordId(0)], true), 2);
        assert_eq!(echo_number(&set[RecordId(0)], false), -1);
        assert_eq!(echo_number(&set[RecordId(1)], true), -1);
        assert!(any_has_field(&set, &set.ids(), "EchoNumber"));
        assert!(!any_has_field(&set, &[RecordId(1)], "EchoNumber"));
    }

    #[test]
    fn test_group_by_preserves_first_encounter_order() {
        let set = set_of(&[
            json!({"SeriesDescription": "zeta", "PhaseEncodingDirection": "j"}),
            json!({"SeriesDescription": "alpha", "PhaseEncodingDirection": "j"}),
            json!({"SeriesDescription": "zeta", "PhaseEncodingDirection": "j"}),
            json!({"SeriesDescription": "zeta", "PhaseEncodingDirection": "j-"}),
        ]);
        let groups = group_by_fields(
            &set,
            &set.ids(),
            &["SeriesDescription", "PhaseEncodingDirection"],
        );
        let keys: Vec<String> = groups.keys().map(|k| k.join("|")).collect();
        assert_eq!(keys, vec!["zeta|j", "alpha|j", "zeta|j-"]);
        assert_eq!(groups[0], vec![RecordId(0), RecordId(2)]);
    }
}
