//! Per-sequence-family classifiers.
//!
//! Each classifier receives the unrouted records of one (subject, session)
//! partition whose pulse sequence matched its routing entry, narrows them with
//! family-specific predicates, groups parameter-identical acquisitions and
//! claims every member with a 1-based `run` in discovery order.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::classify::predicates::{
    any_has_field, clean_identifier, echo_number, filter_by_acquisition_dimensionality,
    filter_by_field_pattern, filter_by_image_type_tag, filter_original_only, group_by,
    group_by_fields, image_type_residual, magnitude_or_phase, phase_encoding_label,
    still_unrouted,
};
use crate::discovery::probe::VolumeProbe;
use crate::models::{
    Category, RecordId, RecordSet, VolumeRecord, ECHO_NUMBER, IMAGE_TYPE, MR_ACQUISITION_TYPE,
    PATIENT_NAME, PHASE_ENCODING_DIRECTION, PROTOCOL_NAME, SEQUENCE_NAME, SERIES_DESCRIPTION,
    SERIES_NUMBER,
};

// ---------------------------------------------------------------------------
// Shared state handed to every classifier
// ---------------------------------------------------------------------------

/// Signature every routing-table entry resolves to.
pub type ClassifierFn = fn(&mut ClassifyContext<'_>, Vec<RecordId>);

/// Mutable view of one (subject, session) partition during routing.
pub struct ClassifyContext<'a> {
    pub records: &'a mut RecordSet,
    pub probe: &'a dyn VolumeProbe,
    pub subject_label: &'a str,
    pub session_label: &'a str,
    /// Routing pattern that selected the current candidates.
    pub trigger: &'a str,
}

impl ClassifyContext<'_> {
    /// Claim a record for this partition and hand it back for attribute filling.
    fn claim(&mut self, id: RecordId, category: Category, suffix: &str) -> &mut VolumeRecord {
        let record = &mut self.records[id];
        record.claim(category, suffix);
        record.subject_label = self.subject_label.to_string();
        record.session_label = self.session_label.to_string();
        record
    }

    /// Keep records acquired in `dimensionality`; tag the others.
    fn keep_dimensionality(&mut self, ids: &[RecordId], dimensionality: &str) -> Vec<RecordId> {
        let (kept, excluded) = filter_by_acquisition_dimensionality(self.records, ids, dimensionality);
        for id in excluded {
            let record = &mut self.records[id];
            let reason = format!(
                "non-{dimensionality} acquisition ({}) for PulseSequenceDetails = {}",
                record.field_key(MR_ACQUISITION_TYPE),
                record.sequence_name().unwrap_or(self.trigger)
            );
            record.reject(reason);
        }
        kept
    }

    /// Keep 4D volumes; a single volume is a position check, not a time series.
    fn keep_time_series(&mut self, ids: &[RecordId], label: &str) -> Vec<RecordId> {
        let mut kept = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.probe.volume_dimensions(&self.records[id]) {
                Some(ndim) if ndim >= 4 => kept.push(id),
                Some(_) => self.records[id].reject(format!("non-4D {label} volume")),
                None => self.records[id].reject(format!(
                    "unreadable NIfTI header, cannot confirm 4D {label} volume"
                )),
            }
        }
        kept
    }
}

// ---------------------------------------------------------------------------
// Group-level labels
// ---------------------------------------------------------------------------

static SBREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*_SBRef$").unwrap());

static SPACE_T2_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".spcR?_").unwrap());
static SPACE_FLAIR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".spcirR?_").unwrap());

static TSE_T2_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*tse").unwrap());
static TSE_FLAIR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*tir").unwrap());

/// MP2RAGE outputs, identified by the suffix the scanner appends to the series description.
struct Mp2rageVariant {
    pattern: Regex,
    suffix: &'static str,
    inversion: Option<i64>,
}

static MP2RAGE_VARIANTS: LazyLock<Vec<Mp2rageVariant>> = LazyLock::new(|| {
    [
        (r".*_INV1$", "MP2RAGE", Some(1)),
        (r".*_INV2$", "MP2RAGE", Some(2)),
        (r".*_T1_Images$", "T1map", None),
        (r".*_UNI_Images$", "UNIT1", None),
    ]
    .into_iter()
    .map(|(pattern, suffix, inversion)| Mp2rageVariant {
        pattern: Regex::new(pattern).unwrap(),
        suffix,
        inversion,
    })
    .collect()
});

fn protocol_label(record: &VolumeRecord) -> String {
    clean_identifier(record.get_str(PROTOCOL_NAME).unwrap_or_default())
}

fn direction_label(record: &VolumeRecord) -> Option<&'static str> {
    record
        .get_str(PHASE_ENCODING_DIRECTION)
        .and_then(phase_encoding_label)
}

/// Values shared by every member of a BOLD or GRE group.
struct EchoGroupLabels {
    name: String,
    dir: Option<&'static str>,
    echo: i64,
    part: &'static str,
}

impl EchoGroupLabels {
    fn from_first(record: &VolumeRecord, has_echo: bool) -> Self {
        Self {
            name: protocol_label(record),
            dir: direction_label(record),
            echo: echo_number(record, has_echo),
            part: magnitude_or_phase(record),
        }
    }
}

fn echo_group_columns(has_echo: bool, base: &[&'static str]) -> Vec<&'static str> {
    let mut columns = base.to_vec();
    if has_echo {
        columns.push(ECHO_NUMBER);
    }
    columns
}

/// Claim every group as `category`/`suffix` with `acq`, `rec` and `run`.
fn claim_with_reconstruction(
    ctx: &mut ClassifyContext<'_>,
    ids: &[RecordId],
    category: Category,
    suffix: &str,
) {
    let groups = group_by_fields(ctx.records, ids, &[SERIES_DESCRIPTION, IMAGE_TYPE]);
    for members in groups.into_values() {
        let first = &ctx.records[members[0]];
        let acq = protocol_label(first);
        let rec = image_type_residual(first);
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, category, suffix);
            record.set_attr("acq", acq.as_str());
            record.set_attr("rec", rec.as_str());
            record.set_attr("run", run);
        }
    }
}

/// Quarantine every record as `discard`.
///
/// Runs are counted per series description in series-number order, one per
/// record, so files from a multi-file series never share a name.
fn claim_as_discard(ctx: &mut ClassifyContext<'_>, ids: &[RecordId], reason: &str) {
    for mut members in group_by_fields(ctx.records, ids, &[SERIES_DESCRIPTION]).into_values() {
        members.sort_by_key(|&id| ctx.records[id].get_i64(SERIES_NUMBER).unwrap_or(i64::MAX));
        for (id, run) in members.into_iter().zip(1_i64..) {
            let acq = protocol_label(&ctx.records[id]);
            let record = ctx.claim(id, Category::Discard, "");
            record.set_attr("acq", acq);
            record.set_attr("run", run);
            record.reject(reason);
        }
    }
}

// ---------------------------------------------------------------------------
// anat: MPRAGE / MP2RAGE
// ---------------------------------------------------------------------------

pub fn classify_mprage(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "3D");

    // ["ORIGINAL", "PRIMARY", "M", "ND", "NORM"]  inv1 / inv2
    // ["DERIVED", "PRIMARY", "T1 MAP", "ND"]      T1map
    // ["DERIVED", "PRIMARY", "M", "ND", "UNI"]    UNIT1
    let phase = filter_by_image_type_tag(ctx.records, &ids, "P");
    if !phase.is_empty() {
        warn!(
            "mp(2)rage part-phase not supported yet, {} volume(s) left out",
            phase.len()
        );
        for id in phase {
            ctx.records[id].reject("mp(2)rage part-phase not supported yet");
        }
    }
    let mut working = filter_by_image_type_tag(ctx.records, &ids, "M");
    working.extend(filter_by_image_type_tag(ctx.records, &ids, "T1 MAP"));
    working.sort();

    for variant in MP2RAGE_VARIANTS.iter() {
        let subset = filter_by_field_pattern(ctx.records, &working, SERIES_DESCRIPTION, &variant.pattern);
        for members in group_by_fields(ctx.records, &subset, &[SERIES_DESCRIPTION]).into_values() {
            let acq = protocol_label(&ctx.records[members[0]]);
            for (id, run) in members.into_iter().zip(1_i64..) {
                let record = ctx.claim(id, Category::Anat, variant.suffix);
                record.set_attr("acq", acq.as_str());
                record.set_attr("run", run);
                if let Some(inv) = variant.inversion {
                    record.set_attr("inv", inv);
                }
            }
        }
        working = still_unrouted(ctx.records, &working);
    }

    claim_with_reconstruction(ctx, &working, Category::Anat, "T1w");
}

// ---------------------------------------------------------------------------
// anat: 3D SPACE T2 / FLAIR
// ---------------------------------------------------------------------------

pub fn classify_tse_vfl(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "3D");

    let t2w = filter_by_field_pattern(ctx.records, &ids, SEQUENCE_NAME, &SPACE_T2_RE);
    claim_with_reconstruction(ctx, &t2w, Category::Anat, "T2w");

    let remaining = still_unrouted(ctx.records, &ids);
    let flair = filter_by_field_pattern(ctx.records, &remaining, SEQUENCE_NAME, &SPACE_FLAIR_RE);
    claim_with_reconstruction(ctx, &flair, Category::Anat, "FLAIR");
}

// ---------------------------------------------------------------------------
// dwi
// ---------------------------------------------------------------------------

pub fn classify_diffusion(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "2D");

    // ADC, FA, ColFA, TRACEW ... are scanner-derived maps
    let original = filter_original_only(ctx.records, &ids);
    for &id in &ids {
        if !original.contains(&id) {
            let reason = format!("dwi non-ORIGINAL {:?}", ctx.records[id].image_type());
            ctx.records[id].reject(reason);
        }
    }

    // multiband reference volumes first
    let sbref = filter_by_field_pattern(ctx.records, &original, SERIES_DESCRIPTION, &SBREF_RE);
    let groups = group_by_fields(ctx.records, &sbref, &[SERIES_DESCRIPTION, PHASE_ENCODING_DIRECTION]);
    for members in groups.into_values() {
        let first = &ctx.records[members[0]];
        let acq = protocol_label(first);
        let dir = direction_label(first);
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Dwi, "sbref");
            record.set_attr("acq", acq.as_str());
            if let Some(dir) = dir {
                record.set_attr("dir", dir);
            }
            record.set_attr("run", run);
        }
    }

    let remaining = still_unrouted(ctx.records, &original);
    let remaining = ctx.keep_time_series(&remaining, "dwi");

    let probe = ctx.probe;
    let groups = group_by_fields(ctx.records, &remaining, &[SERIES_DESCRIPTION, PHASE_ENCODING_DIRECTION]);
    for members in groups.into_values() {
        let first = &ctx.records[members[0]];
        let acq = protocol_label(first);
        let dir = direction_label(first);

        let mut valid = Vec::with_capacity(members.len());
        for id in members {
            let record = &mut ctx.records[id];
            let has_bval = record.gradient_table_present(|r| probe.gradient_table_exists(r));
            let has_bvec = record.gradient_direction_present(|r| probe.gradient_direction_exists(r));
            if !has_bval {
                record.reject("[ no .bval file ]");
            }
            if !has_bvec {
                record.reject("[ no .bvec file ]");
            }
            if has_bval && has_bvec {
                valid.push(id);
            } else {
                debug!("dwi demoted, missing gradient files : {}", record.volume_path().display());
            }
        }

        for (id, run) in valid.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Dwi, "dwi");
            record.set_attr("acq", acq.as_str());
            if let Some(dir) = dir {
                record.set_attr("dir", dir);
            }
            record.set_attr("run", run);
        }
    }
}

// ---------------------------------------------------------------------------
// func: BOLD
// ---------------------------------------------------------------------------

fn claim_func_groups(ctx: &mut ClassifyContext<'_>, ids: &[RecordId], reference: bool) {
    let has_echo = any_has_field(ctx.records, ids, ECHO_NUMBER);
    let columns = echo_group_columns(
        has_echo,
        &[SERIES_DESCRIPTION, PHASE_ENCODING_DIRECTION, IMAGE_TYPE],
    );
    for members in group_by_fields(ctx.records, ids, &columns).into_values() {
        let labels = EchoGroupLabels::from_first(&ctx.records[members[0]], has_echo);
        let suffix = match (reference, labels.part) {
            (true, _) => "sbref",
            (false, "phase") => "phase",
            (false, _) => "bold",
        };
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Func, suffix);
            record.set_attr("task", labels.name.as_str());
            if let Some(dir) = labels.dir {
                record.set_attr("dir", dir);
            }
            record.set_attr("run", run);
            if labels.echo > 0 {
                record.set_attr("echo", labels.echo);
            }
            if !labels.part.is_empty() {
                record.set_attr("part", labels.part);
            }
        }
    }
}

pub fn classify_bold(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "2D");

    let sbref = filter_by_field_pattern(ctx.records, &ids, SERIES_DESCRIPTION, &SBREF_RE);
    claim_func_groups(ctx, &sbref, true);

    let remaining = still_unrouted(ctx.records, &ids);
    let remaining = ctx.keep_time_series(&remaining, "bold");
    claim_func_groups(ctx, &remaining, false);
}

// ---------------------------------------------------------------------------
// fmap: dual echo GRE field map
// ---------------------------------------------------------------------------

pub fn classify_fieldmap(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "2D");

    let magnitude = filter_by_image_type_tag(ctx.records, &ids, "M");
    for members in group_by_fields(ctx.records, &magnitude, &[SERIES_DESCRIPTION, ECHO_NUMBER]).into_values() {
        let acq = protocol_label(&ctx.records[members[0]]);
        for (id, run) in members.into_iter().zip(1_i64..) {
            let suffix = match ctx.records[id].get_i64(ECHO_NUMBER) {
                Some(echo) => format!("magnitude{echo}"),
                None => "magnitude".to_string(),
            };
            let record = ctx.claim(id, Category::Fmap, &suffix);
            record.set_attr("acq", acq.as_str());
            record.set_attr("run", run);
        }
    }

    let phase = filter_by_image_type_tag(ctx.records, &ids, "P");
    for members in group_by_fields(ctx.records, &phase, &[SERIES_DESCRIPTION]).into_values() {
        let acq = protocol_label(&ctx.records[members[0]]);
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Fmap, "phasediff");
            record.set_attr("acq", acq.as_str());
            record.set_attr("run", run);
        }
    }
}

// ---------------------------------------------------------------------------
// anat: GRE (FLASH), single or multi echo
// ---------------------------------------------------------------------------

pub fn classify_gre(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let has_echo = any_has_field(ctx.records, &candidates, ECHO_NUMBER);
    let columns = echo_group_columns(has_echo, &[SERIES_DESCRIPTION, IMAGE_TYPE]);

    for members in group_by_fields(ctx.records, &candidates, &columns).into_values() {
        let labels = EchoGroupLabels::from_first(&ctx.records[members[0]], has_echo);
        let suffix = if labels.echo > 0 { "MEGRE" } else { "T2starw" };
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Anat, suffix);
            record.set_attr("acq", labels.name.as_str());
            record.set_attr("run", run);
            if labels.echo > 0 {
                record.set_attr("echo", labels.echo);
            }
            if !labels.part.is_empty() {
                record.set_attr("part", labels.part);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// anat: 2D turbo spin echo
// ---------------------------------------------------------------------------

pub fn classify_tse(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let t2w = filter_by_field_pattern(ctx.records, &candidates, SEQUENCE_NAME, &TSE_T2_RE);
    claim_with_reconstruction(ctx, &t2w, Category::Anat, "T2w");

    let remaining = still_unrouted(ctx.records, &candidates);
    let flair = filter_by_field_pattern(ctx.records, &remaining, SEQUENCE_NAME, &TSE_FLAIR_RE);
    claim_with_reconstruction(ctx, &flair, Category::Anat, "FLAIR");
}

// ---------------------------------------------------------------------------
// fmap: spin echo EPI
// ---------------------------------------------------------------------------

pub fn classify_ep2d_se(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let ids = ctx.keep_dimensionality(&candidates, "2D");

    let phase = filter_by_image_type_tag(ctx.records, &ids, "P");
    let reason = format!("discard part-phase PulseSequenceDetails = {}", ctx.trigger);
    claim_as_discard(ctx, &phase, &reason);

    let magnitude = filter_by_image_type_tag(ctx.records, &ids, "M");
    let groups = group_by_fields(ctx.records, &magnitude, &[SERIES_DESCRIPTION, PHASE_ENCODING_DIRECTION]);
    for members in groups.into_values() {
        let first = &ctx.records[members[0]];
        let acq = protocol_label(first);
        let dir = direction_label(first);
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = ctx.claim(id, Category::Fmap, "epi");
            record.set_attr("acq", acq.as_str());
            if let Some(dir) = dir {
                record.set_attr("dir", dir);
            }
            record.set_attr("run", run);
        }
    }
}

// ---------------------------------------------------------------------------
// discard: sequences without diagnostic value (localizers, scouts)
// ---------------------------------------------------------------------------

pub fn classify_discard(ctx: &mut ClassifyContext<'_>, candidates: Vec<RecordId>) {
    if candidates.is_empty() {
        return;
    }
    let reason = format!("discard PulseSequenceDetails = {}", ctx.trigger);
    claim_as_discard(ctx, &candidates, &reason);
}

// ---------------------------------------------------------------------------
// unknown: final sweep over the whole collection
// ---------------------------------------------------------------------------

/// Tag every record nobody claimed or rejected as `unknown`.
///
/// Runs are counted per (subject, session, series description), ordered by
/// series number. Returns the ids tagged.
pub fn sweep_unknown(records: &mut RecordSet) -> Vec<RecordId> {
    let leftovers: Vec<RecordId> = records
        .ids()
        .into_iter()
        .filter(|&id| records[id].is_unrouted())
        .collect();

    let groups = group_by(records, &leftovers, |r| {
        (
            r.subject_label.clone(),
            r.session_label.clone(),
            r.field_key(SERIES_DESCRIPTION),
        )
    });

    let mut tagged = Vec::with_capacity(leftovers.len());
    for mut members in groups.into_values() {
        members.sort_by_key(|&id| records[id].get_i64(SERIES_NUMBER).unwrap_or(i64::MAX));
        for (id, run) in members.into_iter().zip(1_i64..) {
            let record = &mut records[id];
            let acq = protocol_label(record);
            let reason = format!(
                "unknown PulseSequenceDetails = {}",
                record.sequence_name().unwrap_or_default()
            );
            if record.subject_label.is_empty() {
                record.subject_label = clean_identifier(record.get_str(PATIENT_NAME).unwrap_or_default());
            }
            record.claim(Category::Unknown, "");
            record.set_attr("acq", acq);
            record.set_attr("run", run);
            record.reject(reason);
            tagged.push(id);
        }
    }
    tagged
}
