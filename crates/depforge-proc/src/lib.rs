// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod args;
pub mod error;
pub mod interrupt;
pub mod pipe;
pub mod pipeline;
pub mod process;
pub mod stream;

pub use args::{ArgGate, ArgOpts, ToArg, shell_quote};
pub use error::ProcessError;
pub use interrupt::InterruptToken;
pub use pipe::PipeReader;
pub use pipeline::pipeline;
pub use process::{Process, ProcessState};
pub use stream::{Disposition, Level, LineFilter, LineRecord, Reason};

pub use depforge_lines::{Encoding, LineBuffer};
