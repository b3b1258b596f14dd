pub mod alerts;
pub mod classifier;
pub mod geo;
pub mod payload;
pub mod retention;
pub mod sampler;
pub mod sync;
pub mod tracker;
pub mod workers;
