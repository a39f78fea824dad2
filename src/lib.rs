//! upsplot - UPS monitoring library.
//!
//! This library provides the core functionality shared between:
//! - `upsplotd` - background daemon sampling the UPS into SQLite
//! - `upsplot` - trend graph renderer reading the stored history
//!
//! Modules:
//! - `client` - NUT (Network UPS Tools) query client
//! - `sample` - sample model and report-window aggregation
//! - `schedule` - wall-clock cadence for the poll/report loop
//! - `daemon` - the poll/report loop itself
//! - `storage` - SQLite persistence
//! - `trend` - series resampling and chart rendering

pub mod client;
pub mod daemon;
pub mod sample;
pub mod schedule;
pub mod storage;
pub mod trend;
