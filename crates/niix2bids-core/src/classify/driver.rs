//! Classification driver: sanity checks, (subject, session) partitioning,
//! routing-table walk and the final unknown sweep.

use tracing::{debug, info};

use crate::classify::classifiers::{sweep_unknown, ClassifyContext};
use crate::classify::predicates::{clean_identifier, filter_by_sequence_name, group_by, still_unrouted};
use crate::classify::routing::RoutingTable;
use crate::classify::sanity::{run_sanity_checks, FieldCheck};
use crate::discovery::probe::VolumeProbe;
use crate::errors::NiixResult;
use crate::models::{RecordId, RecordSet, PATIENT_NAME, STUDY_INSTANCE_UID};

/// What the driver did, for reporting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassificationSummary {
    /// Records ejected by the sanity checks.
    pub sanity_rejected: Vec<RecordId>,
    /// Records tagged by the final sweep.
    pub unknown: Vec<RecordId>,
    pub subjects: usize,
    pub sessions: usize,
}

/// One (subject, session) partition with its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub subject_label: String,
    pub session_label: String,
    pub members: Vec<RecordId>,
}

/// Two-level stable grouping: subject (cleaned `PatientName`), then session
/// (`StudyInstanceUID`) numbered from 1 per subject in encounter order.
pub fn partition_by_session(records: &RecordSet, ids: &[RecordId]) -> Vec<Partition> {
    let mut partitions = Vec::new();
    let subjects = group_by(records, ids, |r| clean_identifier(&r.field_key(PATIENT_NAME)));
    for (subject_label, subject_ids) in subjects {
        let sessions = group_by(records, &subject_ids, |r| r.field_key(STUDY_INSTANCE_UID));
        for (index, members) in sessions.into_values().enumerate() {
            partitions.push(Partition {
                subject_label: subject_label.clone(),
                session_label: (index + 1).to_string(),
                members,
            });
        }
    }
    partitions
}

/// Run the whole classification over `records`.
///
/// The only error is a pre-flight failure; every other problem ends up in the
/// affected record's `rejection_reason`.
pub fn classify_records(
    records: &mut RecordSet,
    table: &RoutingTable,
    checks: &[FieldCheck],
    probe: &dyn VolumeProbe,
) -> NiixResult<ClassificationSummary> {
    let sanity_rejected = run_sanity_checks(records, checks)?;

    let working = still_unrouted(records, &records.ids());
    let partitions = partition_by_session(records, &working);

    let mut summary = ClassificationSummary {
        sanity_rejected,
        ..Default::default()
    };
    let mut last_subject: Option<&str> = None;

    for partition in &partitions {
        if last_subject != Some(partition.subject_label.as_str()) {
            summary.subjects += 1;
            last_subject = Some(partition.subject_label.as_str());
        }
        summary.sessions += 1;
        debug!(
            "Classifying sub-{} ses-{} ({} volumes)",
            partition.subject_label,
            partition.session_label,
            partition.members.len()
        );

        for &id in &partition.members {
            let record = &mut records[id];
            record.subject_label = partition.subject_label.clone();
            record.session_label = partition.session_label.clone();
        }

        for route in table.routes() {
            let pending = still_unrouted(records, &partition.members);
            if pending.is_empty() {
                break;
            }
            let candidates = filter_by_sequence_name(records, &pending, &route.pattern);
            if candidates.is_empty() {
                continue;
            }
            debug!(
                "{} volume(s) routed by \"{}\" to {}",
                candidates.len(),
                route.source(),
                route.kind
            );
            let mut ctx = ClassifyContext {
                records: &mut *records,
                probe,
                subject_label: &partition.subject_label,
                session_label: &partition.session_label,
                trigger: route.source(),
            };
            (route.classify)(&mut ctx, candidates);
        }
    }

    summary.unknown = sweep_unknown(records);
    info!(
        "Classified {} volumes from {} subject(s), {} session(s)",
        records.len(),
        summary.subjects,
        summary.sessions
    );
    Ok(summary)
}
