// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for process spawning, supervision and exit evaluation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from spawning, supervising and evaluating external processes.
///
/// Stream read errors are deliberately absent: any OS read error other than
/// an orderly pipe closure is logged as a diagnostic and the affected stream
/// is treated as closed while the process keeps running.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Neither a binary nor a raw command line was configured.
    #[error("process: nothing to run")]
    NothingToRun,

    /// The working directory could not be created.
    #[error("failed to create working directory {}: {source}", path.display())]
    Workdir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The child process could not be started.
    #[error("failed to start {name}: {source}")]
    Spawn {
        /// Display name of the process.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A piped stream was requested but the spawned child offered no handle
    /// for it.
    #[error("{name}: no {stream} pipe available")]
    Wire {
        /// Display name of the process.
        name: String,
        /// Which stream was missing.
        stream: &'static str,
    },

    /// Waiting on the child failed at the OS level.
    #[error("failed to wait on {name}: {source}")]
    Wait {
        /// Display name of the process.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The process exited with a code outside the configured success set.
    #[error("{name} returned {code}")]
    Failed {
        /// Display name of the process.
        name: String,
        /// The offending exit code.
        code: i32,
    },

    /// The process exceeded its deadline and was terminated.
    #[error("{name} timed out and was terminated")]
    TimedOut {
        /// Display name of the process.
        name: String,
    },
}
