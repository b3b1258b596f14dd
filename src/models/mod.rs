pub mod alert;
pub mod rollup;
pub mod sample;
pub mod session;
pub mod timeline;
