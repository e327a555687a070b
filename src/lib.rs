//! # vigil-rs
//!
//! Clinical follow-up engine. Tracks patients through bounded check-in
//! periods, schedules daily questions into a delayed, deduplicated job
//! queue, matches asynchronous replies back to their questions, runs
//! risk analysis on each answer, and drives an alert/task workflow with
//! escalation to human staff.
//!
//! Storage is SQLite (rusqlite); collaborator seams (message transport,
//! AI analyzer) are async traits with production and test implementations.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
pub mod storage;
pub mod telemetry;
pub mod transport;
