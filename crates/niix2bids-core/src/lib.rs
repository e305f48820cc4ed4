//! niix2bids core library: classify dcm2niix output (NIfTI volumes with JSON
//! sidecars) from Siemens scanners into a BIDS directory layout.
//!
//! The classification engine lives in [`classify`] and only touches the
//! filesystem through [`discovery::probe::VolumeProbe`]. Discovery, the BIDS
//! writer, configuration and logging surround it, and [`pipeline::run`] ties
//! them together for the `niix2bids` binary.

pub mod classify;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod writer;
