//! Tandem - Batch Document Translation Service
//!
//! Translates every text file in a container twice, once with a neural machine
//! translation model and once with an LLM deployment, and writes both results
//! side by side for comparison. Work is spread over a durable queue and tracked
//! in a shared job table.

pub mod annotate;
pub mod app;
pub mod batch;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod ratings;
pub mod storage;
pub mod translate;
pub mod worker;
