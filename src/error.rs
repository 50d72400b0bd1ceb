use crate::command::{ExitCode, EXIT_CANNOT_EXECUTE, EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_USAGE};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors recovered at the command boundary.
///
/// None of these terminate the interpreter: the caller prints the message and
/// feeds [`ShellError::exit_code`] into `$?`.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A control keyword arrived in a state that does not accept it.
    #[error("unexpected '{keyword}'")]
    ControlFlowSequence { keyword: String },

    #[error("cd: {}: {source}", .path.display())]
    DirectoryChange {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The program could not be found or its image could not be loaded.
    #[error("{program}: {}", describe_launch_failure(.source))]
    ExternalLaunch {
        program: String,
        #[source]
        source: nix::Error,
    },

    /// Pipe or fork failed; the whole command is abandoned.
    #[error("{what}: {source}")]
    ResourceExhaustion {
        what: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("{}: {source}", .path.display())]
    RedirectionTarget {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Usage(String),

    #[error("!!: no previous command")]
    NoPreviousCommand,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    /// Status reported through `$?` when this error ends a command.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::ExternalLaunch { source, .. } => launch_failure_code(*source),
            ShellError::Syntax(_) | ShellError::Usage(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    pub(crate) fn unexpected(keyword: &str) -> Self {
        ShellError::ControlFlowSequence {
            keyword: keyword.to_string(),
        }
    }
}

/// 127 when nothing executable was found, 126 when it was found but could not run.
pub(crate) fn launch_failure_code(errno: nix::Error) -> ExitCode {
    match errno {
        nix::Error::ENOENT | nix::Error::ENOTDIR => EXIT_NOT_FOUND,
        _ => EXIT_CANNOT_EXECUTE,
    }
}

fn describe_launch_failure(errno: &nix::Error) -> String {
    match errno {
        nix::Error::ENOENT | nix::Error::ENOTDIR => "command not found".to_string(),
        other => other.desc().to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
