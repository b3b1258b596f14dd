pub mod config;
pub mod db;
pub mod ingest;
pub mod init;
pub mod log;
pub mod purge;
pub mod recover;
pub mod remote;
pub mod session;
pub mod status;
pub mod sync;
pub mod timeline;
