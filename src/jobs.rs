//! Bookkeeping for processes launched with a trailing `&`.
//!
//! Background processes are never waited on when launched. Each prompt cycle
//! calls [`JobRegistry::reap`], which polls every live pid without blocking, so
//! finished children are collected instead of lingering as zombies.

use crate::command::{ExitCode, exit_code_of};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// `waitpid` that retries when interrupted by a signal.
pub(crate) fn wait_child(pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, flags) {
            Err(nix::Error::EINTR) => continue,
            result => return result,
        }
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: usize,
    pub command: String,
    /// Processes not yet reaped, in launch order.
    live: Vec<Pid>,
    last_pid: Pid,
    status: Option<ExitCode>,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        self.live.is_empty()
    }
}

/// A job whose processes have all been reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    pub id: usize,
    pub command: String,
    /// Status of the job's last process; `None` if it was reaped elsewhere.
    pub status: Option<ExitCode>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly launched background job and return its job number.
    ///
    /// Numbers start at 1 and the smallest free number is reused.
    pub fn register(&mut self, pids: Vec<Pid>, command: impl Into<String>) -> usize {
        assert!(!pids.is_empty(), "a job needs at least one process");
        let id = (1..)
            .find(|candidate| self.jobs.iter().all(|job| job.id != *candidate))
            .unwrap_or(1);
        let last_pid = pids[pids.len() - 1];
        let command = command.into();
        debug!(id, ?pids, %command, "registered background job");
        self.jobs.push(Job {
            id,
            command,
            live: pids,
            last_pid,
            status: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Collect every background process that has terminated, without blocking.
    ///
    /// Jobs whose processes are all gone are removed and returned.
    pub fn reap(&mut self) -> Vec<FinishedJob> {
        for job in &mut self.jobs {
            let last_pid = job.last_pid;
            let mut status = job.status;
            job.live.retain(|&pid| match wait_child(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => true,
                Ok(ws) => match exit_code_of(ws) {
                    Some(code) => {
                        if pid == last_pid {
                            status = Some(code);
                        }
                        false
                    }
                    None => true,
                },
                Err(nix::Error::ECHILD) => false,
                Err(e) => {
                    warn!(%pid, error = %e, "polling background process failed");
                    false
                }
            });
            job.status = status;
        }

        let (finished, running): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut self.jobs).into_iter().partition(Job::is_finished);
        self.jobs = running;
        finished
            .into_iter()
            .map(|job| {
                debug!(id = job.id, status = ?job.status, "reaped background job");
                FinishedJob {
                    id: job.id,
                    command: job.command,
                    status: job.status,
                }
            })
            .collect()
    }
}
