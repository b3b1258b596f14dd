pub mod initialize;
pub mod log;
pub mod migrate;
pub mod pool;
pub mod queue;
pub mod sessions;
pub mod stats;
pub mod timeline;
