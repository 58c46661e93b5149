//! Librarian ingest - media discovery and import pipeline
//!
//! Discovers video and image files under the configured library roots,
//! either by watching them or by periodic manual scans, imports new files one
//! at a time per category and hands videos to an isolated processing worker.

pub mod cli;
pub mod config;
pub mod db;
pub mod media;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
