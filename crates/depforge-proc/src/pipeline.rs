// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composition of several processes into one shell pipeline.

use crate::error::ProcessError;
use crate::process::Process;

/// Chain processes so each stage's stdout feeds the next stage's stdin,
/// yielding a single runnable [`Process`].
///
/// The stages are rendered to one `a | b | c` command line executed through
/// `sh -c`, so all of them start inside one process group and interrupt or
/// termination reaches every stage atomically. Stream dispositions, flags
/// and the working directory of the composite come from the first stage;
/// the composite's stdout is the final stage's.
///
/// The composite exit status is the final stage's (shell semantics). An
/// intermediate stage failing is not separately surfaced — its stderr still
/// reaches the composite's stderr stream, but callers that must observe
/// per-stage exit codes should run the stages independently.
pub fn pipeline<I>(stages: I) -> Result<Process, ProcessError>
where
    I: IntoIterator<Item = Process>,
{
    let mut stages = stages.into_iter();
    let first = stages.next().ok_or(ProcessError::NothingToRun)?;
    if !first.has_command() {
        return Err(ProcessError::NothingToRun);
    }

    let mut cmd = first.shell_command();
    for stage in stages {
        if !stage.has_command() {
            return Err(ProcessError::NothingToRun);
        }
        cmd.push_str(" | ");
        cmd.push_str(&stage.shell_command());
    }

    Ok(first.into_raw(cmd))
}
