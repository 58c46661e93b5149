//! Minimal CLI parsing for run mode overrides.

use std::env;

/// Runs the processing worker instead of the importer
pub const PROCESS_QUEUE_FLAG: &str = "--process-queue";

/// Starts with a manual scan even when watching is configured
pub const MANUAL_SCAN_FLAG: &str = "--manual-scan";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub process_queue: bool,
    pub force_manual_scan: bool,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        for arg in args {
            match arg.as_ref() {
                PROCESS_QUEUE_FLAG => options.process_queue = true,
                MANUAL_SCAN_FLAG => options.force_manual_scan = true,
                _ => {}
            }
        }
        options
    }
}
