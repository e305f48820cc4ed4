//! Pre-flight assertions on required sidecar fields.

use tracing::{debug, error, warn};

use crate::errors::{NiixError, NiixResult};
use crate::models::{
    RecordId, RecordSet, CONVERSION_SOFTWARE, MANUFACTURER, MODALITY, MR_ACQUISITION_TYPE,
    PATIENT_NAME, PULSE_SEQUENCE_DETAILS, SEQUENCE_NAME,
};

/// A required field, optionally with the only value it may carry.
#[derive(Clone, Copy, Debug)]
pub struct FieldCheck {
    pub field: &'static str,
    pub expected: Option<&'static str>,
}

impl FieldCheck {
    pub const fn present(field: &'static str) -> Self {
        Self {
            field,
            expected: None,
        }
    }

    pub const fn equals(field: &'static str, expected: &'static str) -> Self {
        Self {
            field,
            expected: Some(expected),
        }
    }
}

/// Checks applied to dcm2niix output from Siemens scanners, in order.
pub const SIEMENS_CHECKS: &[FieldCheck] = &[
    FieldCheck::equals(CONVERSION_SOFTWARE, "dcm2niix"),
    FieldCheck::present(PATIENT_NAME),
    FieldCheck::equals(MODALITY, "MR"),
    FieldCheck::equals(MANUFACTURER, "Siemens"),
    FieldCheck::present(PULSE_SEQUENCE_DETAILS),
    FieldCheck::present(SEQUENCE_NAME),
    FieldCheck::present(MR_ACQUISITION_TYPE),
];

/// Eject every record failing a check; returns the ejected ids in order.
///
/// A field that no readable sidecar carries at all is a dataset-level error
/// and aborts the run. Records ejected by an earlier check still count as
/// carriers.
pub fn run_sanity_checks(records: &mut RecordSet, checks: &[FieldCheck]) -> NiixResult<Vec<RecordId>> {
    let mut ejected = Vec::new();
    let readable: Vec<RecordId> = records
        .ids()
        .into_iter()
        .filter(|&id| records[id].is_unrouted())
        .collect();

    for check in checks {
        let working: Vec<RecordId> = records
            .ids()
            .into_iter()
            .filter(|&id| records[id].is_unrouted())
            .collect();
        if working.is_empty() {
            break;
        }

        if !readable.iter().any(|&id| records[id].has(check.field)) {
            let msg = format!("no .json file has \"{}\" field", check.field);
            error!("{msg}");
            return Err(NiixError::Preflight(msg));
        }

        for id in working {
            let record = &mut records[id];
            let reason = match (record.get(check.field), check.expected) {
                (None, _) => Some(format!("\"{}\" entry is missing", check.field)),
                (Some(_), Some(expected)) if record.get_str(check.field) != Some(expected) => {
                    Some(format!(
                        "\"{}\" is {}, expected \"{expected}\"",
                        check.field,
                        record.field_key(check.field)
                    ))
                }
                _ => None,
            };
            if let Some(reason) = reason {
                warn!("{reason} : {}", record.volume_path().display());
                record.reject(reason);
                ejected.push(id);
            }
        }
        debug!("checking in all .json \"{}\" done", check.field);
    }

    Ok(ejected)
}
