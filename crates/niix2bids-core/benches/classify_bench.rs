//! Criterion benchmarks for niix2bids-core.
//!
//! Everything runs in memory: records are synthesized directly into a
//! `RecordSet` and a fixed probe answers side-file and header queries.
//!
//! ## Benchmark groups
//!
//! 1. **predicates**: identifier cleaning, prefix matching, stable group-by.
//! 2. **classification**: the full driver over multi-subject datasets.
//! 3. **naming**: BIDS filename assembly.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/niix2bids-core/Cargo.toml
//! # Run only the classification group:
//! cargo bench --manifest-path crates/niix2bids-core/Cargo.toml -- classification
//! ```

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use niix2bids_core::classify::driver::classify_records;
use niix2bids_core::classify::predicates::{
    clean_identifier, filter_by_sequence_name, group_by_fields,
};
use niix2bids_core::classify::routing::RoutingTable;
use niix2bids_core::classify::sanity::SIEMENS_CHECKS;
use niix2bids_core::discovery::probe::VolumeProbe;
use niix2bids_core::models::{RecordSet, VolumeRecord};
use niix2bids_core::writer::assemble_bids_name;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every side file exists and every volume is a time series.
struct StaticProbe;

impl VolumeProbe for StaticProbe {
    fn gradient_table_exists(&self, _record: &VolumeRecord) -> bool {
        true
    }

    fn gradient_direction_exists(&self, _record: &VolumeRecord) -> bool {
        true
    }

    fn volume_dimensions(&self, _record: &VolumeRecord) -> Option<usize> {
        Some(4)
    }
}

/// (sequence, series description, acquisition type, image-type tag, echo)
const SESSION_LAYOUT: &[(&str, &str, &str, &str, Option<i64>)] = &[
    ("AALScout", "AAHead_Scout", "2D", "M", None),
    ("tfl", "t1_mprage_sag", "3D", "M", None),
    ("tse_vfl", "t2_space_sag", "3D", "M", None),
    ("cmrr_mbep2d_bold", "rest_SBRef", "2D", "M", None),
    ("cmrr_mbep2d_bold", "rest", "2D", "M", None),
    ("cmrr_mbep2d_bold", "rest", "2D", "P", None),
    ("ep2d_diff", "dwi_b1000", "2D", "M", None),
    ("gre_field_mapping", "gre_field_mapping", "2D", "M", Some(1)),
    ("gre_field_mapping", "gre_field_mapping", "2D", "M", Some(2)),
    ("gre_field_mapping", "gre_field_mapping", "2D", "P", Some(2)),
    ("gre", "swi", "3D", "M", None),
    ("svs_se", "svs_se", "2D", "M", None),
];

fn synthetic_records(subjects: usize, sessions: usize) -> RecordSet {
    let mut set = RecordSet::new();
    for subject in 0..subjects {
        for session in 0..sessions {
            for (i, &(sequence, description, acquisition, tag, echo)) in SESSION_LAYOUT.iter().enumerate() {
                let mut row = json!({
                    "ConversionSoftware": "dcm2niix",
                    "PatientName": format!("SUBJ_{subject:03}"),
                    "StudyInstanceUID": format!("1.3.12.{subject}.{session}"),
                    "Modality": "MR",
                    "Manufacturer": "Siemens",
                    "PulseSequenceDetails": format!("%SiemensSeq%_{sequence}"),
                    "SequenceName": "*spc_314ns",
                    "MRAcquisitionType": acquisition,
                    "SeriesDescription": description,
                    "SeriesNumber": i + 1,
                    "ProtocolName": description,
                    "PhaseEncodingDirection": "j-",
                    "ImageType": ["ORIGINAL", "PRIMARY", tag, "ND", "NORM"]
                });
                if let Some(echo) = echo {
                    row["EchoNumber"] = Value::from(echo);
                }
                set.push(
                    PathBuf::from(format!("/in/{subject:03}/{session}/{i:02}.nii.gz")),
                    row.as_object().cloned().unwrap_or_default(),
                );
            }
        }
    }
    set
}

// ---------------------------------------------------------------------------
// Benchmark: predicates
// ---------------------------------------------------------------------------

fn bench_predicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicates");
    let set = synthetic_records(10, 2);
    let ids = set.ids();
    let table = RoutingTable::siemens_default();

    group.bench_function("clean_identifier", |b| {
        b.iter(|| clean_identifier(black_box("t1_mprage sag p2 iso^0.8mm")))
    });

    group.bench_function("filter_by_sequence_name", |b| {
        let pattern = &table.routes()[3].pattern;
        b.iter(|| filter_by_sequence_name(black_box(&set), black_box(&ids), pattern))
    });

    group.bench_function("group_by_three_fields", |b| {
        b.iter(|| {
            group_by_fields(
                black_box(&set),
                black_box(&ids),
                &["SeriesDescription", "PhaseEncodingDirection", "ImageType"],
            )
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: full classification
// ---------------------------------------------------------------------------

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let table = RoutingTable::siemens_default();

    for &subjects in &[1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("classify_records", subjects),
            &subjects,
            |b, &n| {
                b.iter_with_setup(
                    || synthetic_records(n, 2),
                    |mut set| {
                        classify_records(&mut set, &table, SIEMENS_CHECKS, &StaticProbe).unwrap();
                        black_box(&set);
                    },
                );
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: naming
// ---------------------------------------------------------------------------

fn bench_naming(c: &mut Criterion) {
    let mut set = synthetic_records(1, 1);
    let table = RoutingTable::siemens_default();
    classify_records(&mut set, &table, SIEMENS_CHECKS, &StaticProbe).unwrap();

    c.bench_function("assemble_bids_name_all", |b| {
        b.iter(|| {
            for record in set.iter() {
                black_box(assemble_bids_name(record));
            }
        })
    });
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_predicates, bench_classification, bench_naming);
criterion_main!(benches);
