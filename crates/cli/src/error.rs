//! Failures of the `flowline` binary and its command interpreter.
//!
//! | code | variant       | raised by |
//! |------|---------------|-----------|
//! | 2    | (clap)        | argument parsing, before `run` |
//! | 10   | `Flow`        | core state errors: no field loaded, bad dimensions, unknown source |
//! | 11   | `Io`          | reading or writing a file, or a malformed field/image/streamline file |
//! | 12   | `Command`     | a script line or `--params` that cannot be parsed |
//! | 13   | `Parameter`   | a well-formed value the core refuses (zero radius, tiny separation) |
//! | 14   | `Output`      | serializing `--json` output |
//!
//! In a script every variant except `Output` is reported and the line is
//! skipped.

use std::fmt::Display;

use flowline_core::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Flow(FlowError),

    #[error("{0}")]
    Io(String),

    /// Unknown command, missing argument, or an argument that is not a number.
    #[error("{0}")]
    Command(String),

    #[error("invalid {name}: {reason}")]
    Parameter { name: String, reason: String },

    #[error("cannot write JSON output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Flow(_) => 10,
            CliError::Io(_) => 11,
            CliError::Command(_) => 12,
            CliError::Parameter { .. } => 13,
            CliError::Output(_) => 14,
        }
    }

    /// A malformed line attributed to `command`.
    pub fn command(command: &str, msg: impl Display) -> Self {
        CliError::Command(format!("{command}: {msg}"))
    }

    /// An I/O failure on `path`.
    pub fn io(path: impl Display, err: std::io::Error) -> Self {
        CliError::Io(format!("{path}: {err}"))
    }
}

impl From<FlowError> for CliError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Io(msg) => CliError::Io(msg),
            FlowError::Format(msg) => CliError::Io(format!("bad file: {msg}")),
            FlowError::InvalidParameter { name, reason } => CliError::Parameter { name, reason },
            other => CliError::Flow(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- core error routing --

    #[test]
    fn missing_field_is_a_state_error() {
        let err = CliError::from(FlowError::EmptyField);
        assert!(matches!(err, CliError::Flow(_)));
        assert_eq!(err.exit_code(), 10);
        assert!(err.to_string().contains("no vector field"));
    }

    #[test]
    fn refused_value_keeps_name_and_reason() {
        let err = CliError::from(FlowError::invalid("separation", "needs a 9999 pixel raster"));
        assert_eq!(err.exit_code(), 13);
        assert_eq!(err.to_string(), "invalid separation: needs a 9999 pixel raster");
    }

    #[test]
    fn bad_files_are_io_errors() {
        let err = CliError::from(FlowError::Format("VF: missing magic".into()));
        assert_eq!(err.exit_code(), 11);
        assert!(err.to_string().contains("missing magic"));
        assert_eq!(CliError::from(FlowError::Io("disk full".into())).exit_code(), 11);
    }

    // -- interpreter errors --

    #[test]
    fn command_errors_name_the_command() {
        let err = CliError::command("vscale", "bad number 'x'");
        assert_eq!(err.to_string(), "vscale: bad number 'x'");
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn io_errors_name_the_path() {
        let err = CliError::io("out.ps", std::io::Error::other("read-only"));
        assert_eq!(err.to_string(), "out.ps: read-only");
    }

    #[test]
    fn json_failures_are_output_errors() {
        let bad = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert_eq!(CliError::from(bad).exit_code(), 14);
    }
}
