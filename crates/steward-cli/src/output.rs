//! Rendering of operation outcomes onto the process streams.

use std::io::Write;

use serde::Serialize;
use steward_core::{Coded, Envelope, ErrorReport};

use crate::errors::AppError;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OutputOptions {
    pub(crate) pretty: bool,
    pub(crate) envelope: bool,
}

/// Writes the outcome of `function` and reports whether it succeeded.
///
/// Successes go to stdout as JSON. Failures go to stderr as the flattened
/// `message: …, code: …` chain. In envelope mode both outcomes are written
/// to stdout as the envelope instead.
pub(crate) fn emit<T, E, W, R>(
    options: OutputOptions,
    function: &str,
    outcome: Result<T, E>,
    stdout: &mut W,
    stderr: &mut R,
) -> Result<bool, AppError>
where
    T: Serialize,
    E: Coded,
    W: Write,
    R: Write,
{
    if options.envelope {
        let envelope = Envelope::new(function, outcome);
        write_json(options, &envelope, stdout)?;
        return Ok(envelope.error().is_none());
    }
    match outcome {
        Ok(result) => {
            write_json(options, &result, stdout)?;
            Ok(true)
        }
        Err(error) => {
            writeln!(stderr, "{}", ErrorReport::from(&error))?;
            Ok(false)
        }
    }
}

fn write_json<T: Serialize, W: Write>(
    options: OutputOptions,
    value: &T,
    stdout: &mut W,
) -> Result<(), AppError> {
    if options.pretty {
        serde_json::to_writer_pretty(&mut *stdout, value)?;
    } else {
        serde_json::to_writer(&mut *stdout, value)?;
    }
    writeln!(stdout)?;
    Ok(())
}
