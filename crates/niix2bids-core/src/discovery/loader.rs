//! Sidecar loading with Rayon-based parallelism.

use std::path::Path;

use rayon::prelude::*;
use serde_json::Value;
use tracing::warn;

use crate::discovery::filesystem::VolumePair;
use crate::models::{Metadata, RecordSet};

/// Outcome of reading one sidecar.
pub struct LoadResult {
    pub metadata: Metadata,
    pub error_message: Option<String>,
}

fn load_sidecar_worker(path: &Path) -> LoadResult {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(Value::Object(metadata)) => LoadResult {
            metadata,
            error_message: None,
        },
        Ok(_) => LoadResult {
            metadata: Metadata::new(),
            error_message: Some("top-level value is not an object".to_string()),
        },
        Err(e) => LoadResult {
            metadata: Metadata::new(),
            error_message: Some(e),
        },
    }
}

/// Read every sidecar, `workers` at a time, preserving input order.
pub fn parallel_load(pairs: &[VolumePair], workers: usize) -> Vec<LoadResult> {
    if pairs.is_empty() {
        return vec![];
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            pairs
                .par_iter()
                .map(|pair| load_sidecar_worker(&pair.sidecar))
                .collect()
        }),
        Err(_) => {
            // Fallback to sequential
            pairs
                .iter()
                .map(|pair| load_sidecar_worker(&pair.sidecar))
                .collect()
        }
    }
}

/// Build the record collection; unreadable sidecars become pre-rejected records.
pub fn load_records(pairs: &[VolumePair], workers: usize) -> RecordSet {
    let results = parallel_load(pairs, workers);
    let mut records = RecordSet::new();
    for (pair, result) in pairs.iter().zip(results) {
        let id = records.push(pair.volume.clone(), result.metadata);
        if let Some(message) = result.error_message {
            warn!("unreadable sidecar {}: {message}", pair.sidecar.display());
            records[id].reject(format!("unreadable sidecar: {message}"));
        }
    }
    records
}
