//! DevResume Forge: queue-driven resume processing.
//!
//! Resume updates and PDF requests arrive as work items on SQS queues. The
//! workers in [`pipeline`] apply them to the [`store`], render PDFs through
//! [`render`], and announce results on the notifications queue.

pub mod config;
pub mod db;
pub mod errors;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod service;
pub mod store;
