//! Server-side counterpart of the sync engine: accepted samples, rollups
//! and alerts.

pub mod aggregator;
pub mod alerts;
pub mod schema;
pub mod store;
