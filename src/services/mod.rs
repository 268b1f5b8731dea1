pub mod cleanup;
pub mod merger;
pub mod orchestrator;
pub mod spool;
pub mod streaming;
