use nix::sys::wait::WaitStatus;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

pub const EXIT_SUCCESS: ExitCode = 0;
pub const EXIT_FAILURE: ExitCode = 1;
/// Malformed command line or built-in arguments.
pub const EXIT_USAGE: ExitCode = 2;
/// The program exists but could not be executed.
pub const EXIT_CANNOT_EXECUTE: ExitCode = 126;
/// The program could not be found.
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Collapse a terminal wait status into a shell exit code.
///
/// Returns `None` for statuses that do not end the process (stopped, continued,
/// still alive), so callers know to keep waiting.
pub fn exit_code_of(status: WaitStatus) -> Option<ExitCode> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}
