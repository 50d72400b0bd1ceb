//! Launching pipelines of forked processes.
//!
//! Every stage becomes one child. Children are forked left to right; stage `i`
//! gets the read end of the pipe written by stage `i - 1` as stdin and the write
//! end of a fresh pipe as stdout. A stage's own redirection is applied after the
//! pipe wiring, so it wins over the pipe for the stream it names.

use crate::builtin::Builtin;
use crate::command::{EXIT_FAILURE, EXIT_SUCCESS, ExitCode, exit_code_of};
use crate::error::{Result, ShellError};
use crate::jobs::wait_child;
use crate::parser::{Pipeline, Stage, StdStream};
use crate::signals;
use nix::fcntl::OFlag;
use nix::unistd::{ForkResult, Pid, dup2, execvp, fork, pipe2};
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use tracing::{debug, warn};

/// Runs built-in stages inside a forked child.
///
/// The child owns a copy of the interpreter state, so changes a built-in
/// makes there are not seen by the interpreter.
pub(crate) trait InProcess {
    fn run_in_child(&mut self, builtin: Builtin) -> ExitCode;
}

enum Program {
    External(Vec<CString>),
    Builtin(Builtin),
}

/// A stage with everything that can fail checked before the first fork.
struct PreparedStage {
    name: String,
    program: Program,
    redirect: Option<(StdStream, File)>,
}

fn prepare(stage: &Stage) -> Result<PreparedStage> {
    let program = match Builtin::parse(&stage.argv) {
        Some(Ok(Builtin::Rerun)) => {
            return Err(ShellError::Usage("!!: cannot be used in a pipeline".into()));
        }
        Some(builtin) => Program::Builtin(builtin?),
        None => {
            let argv = stage
                .argv
                .iter()
                .map(|arg| CString::new(arg.as_bytes()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| ShellError::Usage(format!("{}: argument contains a NUL byte", stage.name())))?;
            Program::External(argv)
        }
    };
    let redirect = match &stage.redirection {
        Some(r) => Some((r.stream, r.open()?)),
        None => None,
    };
    Ok(PreparedStage {
        name: stage.name().to_string(),
        program,
        redirect,
    })
}

/// Fork one child per stage and return their pids in stage order.
///
/// Nothing is forked unless every stage's program name, arguments and
/// redirection target check out. If a pipe or fork fails partway, the
/// children already started are waited for and the error is returned.
pub(crate) fn launch(pipeline: &Pipeline, runner: &mut dyn InProcess) -> Result<Vec<Pid>> {
    let prepared = pipeline
        .stages
        .iter()
        .map(prepare)
        .collect::<Result<Vec<_>>>()?;

    // Children inherit unflushed buffers; empty them so nothing prints twice.
    io::stdout().flush()?;
    io::stderr().flush()?;

    let last = prepared.len() - 1;
    let mut pids = Vec::with_capacity(prepared.len());
    let mut upstream: Option<OwnedFd> = None;

    for (i, stage) in prepared.into_iter().enumerate() {
        let (next_read, next_write) = if i < last {
            match pipe2(OFlag::O_CLOEXEC) {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(source) => {
                    drop(upstream);
                    wait_all(&pids);
                    return Err(ShellError::ResourceExhaustion { what: "pipe", source });
                }
            }
        } else {
            (None, None)
        };

        // SAFETY: the interpreter is single-threaded, and the child either
        // execs or runs a built-in and leaves through `_exit`.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = %child, stage = i, program = %stage.name, "forked stage");
                pids.push(child);
            }
            Ok(ForkResult::Child) => run_child(stage, upstream, next_write, runner),
            Err(source) => {
                drop(upstream);
                drop(next_read);
                drop(next_write);
                wait_all(&pids);
                return Err(ShellError::ResourceExhaustion { what: "fork", source });
            }
        }
        // Dropping here closes the parent's copies so readers see end-of-file.
        upstream = next_read;
    }

    Ok(pids)
}

/// Block until every pid has terminated; the result is the last one's status.
pub(crate) fn wait_all(pids: &[Pid]) -> ExitCode {
    let mut status = EXIT_SUCCESS;
    for &pid in pids {
        loop {
            match wait_child(pid, None) {
                Ok(ws) => {
                    if let Some(code) = exit_code_of(ws) {
                        debug!(%pid, code, "stage finished");
                        status = code;
                        break;
                    }
                }
                Err(e) => {
                    warn!(%pid, error = %e, "waiting for child failed");
                    status = EXIT_FAILURE;
                    break;
                }
            }
        }
    }
    status
}

fn place(fd: RawFd, slot: RawFd) -> Result<()> {
    if fd != slot {
        dup2(fd, slot).map_err(|source| ShellError::ResourceExhaustion { what: "dup2", source })?;
    }
    Ok(())
}

fn wire_stdio(
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    redirect: Option<&(StdStream, File)>,
) -> Result<()> {
    if let Some(fd) = &stdin {
        place(fd.as_raw_fd(), libc::STDIN_FILENO)?;
    }
    if let Some(fd) = &stdout {
        place(fd.as_raw_fd(), libc::STDOUT_FILENO)?;
    }
    if let Some((stream, file)) = redirect {
        place(file.as_raw_fd(), stream.fd())?;
    }
    Ok(())
}

fn exec(name: &str, argv: &[CString]) -> ShellError {
    let errno = match execvp(&argv[0], argv) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    ShellError::ExternalLaunch {
        program: name.to_string(),
        source: errno,
    }
}

fn run_child(
    stage: PreparedStage,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    runner: &mut dyn InProcess,
) -> ! {
    signals::restore_child_defaults();

    let code = match wire_stdio(stdin, stdout, stage.redirect.as_ref()) {
        Err(e) => {
            eprintln!("forksh: {e}");
            e.exit_code()
        }
        Ok(()) => match stage.program {
            Program::Builtin(builtin) => runner.run_in_child(builtin),
            Program::External(argv) => {
                let e = exec(&stage.name, &argv);
                eprintln!("forksh: {e}");
                e.exit_code()
            }
        },
    };

    let _ = io::stdout().flush();
    // SAFETY: `_exit` skips the atexit handlers and stream buffers that belong
    // to the interpreter process.
    unsafe { libc::_exit(code) }
}
