//! Turning an argument vector into an executable pipeline.
//!
//! The grammar is flat: a line is one or more stages separated by
//! standalone `|` words, the last stage may end in `&`, and each stage may end
//! in exactly one redirection pair such as `> out.txt`.

use crate::error::{Result, ShellError};
use crate::lexer::{ArgumentVector, BACKGROUND, PIPE};
use std::fs::{File, OpenOptions};
use std::os::fd::RawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// Standard stream replaced by a redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn fd(self) -> RawFd {
        match self {
            StdStream::Stdin => libc::STDIN_FILENO,
            StdStream::Stdout => libc::STDOUT_FILENO,
            StdStream::Stderr => libc::STDERR_FILENO,
        }
    }
}

/// How the redirection target is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `<`: read an existing file.
    Read,
    /// `>` and `2>`: create or truncate.
    Truncate,
    /// `>>`: create or append.
    Append,
}

/// A single trailing redirection, e.g. `2> errors.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub stream: StdStream,
    pub mode: OpenMode,
    pub path: PathBuf,
}

impl Redirection {
    fn from_operator(op: &str, target: &str) -> Option<Self> {
        let (stream, mode) = match op {
            ">" => (StdStream::Stdout, OpenMode::Truncate),
            ">>" => (StdStream::Stdout, OpenMode::Append),
            "2>" => (StdStream::Stderr, OpenMode::Truncate),
            "<" => (StdStream::Stdin, OpenMode::Read),
            _ => return None,
        };
        Some(Self {
            stream,
            mode,
            path: PathBuf::from(target),
        })
    }

    /// Open the target with the access this redirection needs.
    ///
    /// Created files get mode `0644`. The descriptor is close-on-exec, so only
    /// the copy placed on the standard stream survives into a new program.
    pub fn open(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        match self.mode {
            OpenMode::Read => options.read(true),
            OpenMode::Truncate => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        options
            .mode(0o644)
            .open(&self.path)
            .map_err(|source| ShellError::RedirectionTarget {
                path: self.path.clone(),
                source,
            })
    }
}

fn is_redirection_operator(word: &str) -> bool {
    matches!(word, ">" | ">>" | "2>" | "<")
}

/// Strip a trailing `<op> <path>` pair from `argv`.
///
/// Only the last two words are examined. When they form a redirection the
/// vector is truncated by two and the parsed redirection is returned; otherwise
/// `argv` is left untouched.
pub fn resolve_redirection(argv: &mut ArgumentVector) -> Option<Redirection> {
    let n = argv.len();
    if n < 2 {
        return None;
    }
    let redirection = Redirection::from_operator(&argv[n - 2], &argv[n - 1])?;
    argv.truncate(n - 2);
    Some(redirection)
}

/// Strip a trailing `&`, reporting whether one was present.
pub fn strip_background(argv: &mut ArgumentVector) -> bool {
    if argv.last().map(String::as_str) == Some(BACKGROUND) {
        argv.pop();
        true
    } else {
        false
    }
}

/// One process worth of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: ArgumentVector,
    pub redirection: Option<Redirection>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.argv[0]
    }
}

/// Stages in left-to-right order; stage `i` writes into the pipe stage `i + 1` reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub background: bool,
}

impl Pipeline {
    pub fn is_simple(&self) -> bool {
        self.stages.len() == 1
    }
}

/// Split `argv` on `|` and resolve the per-stage markers.
///
/// Fails on empty stages, on a dangling redirection operator, and on pipelines
/// longer than `max_stages`.
pub fn construct_pipeline(argv: ArgumentVector, max_stages: usize) -> Result<Pipeline> {
    let mut segments: Vec<ArgumentVector> = vec![Vec::new()];
    for word in argv {
        if word == PIPE {
            segments.push(Vec::new());
        } else if let Some(segment) = segments.last_mut() {
            segment.push(word);
        }
    }

    if segments.len() > max_stages {
        return Err(ShellError::Syntax(format!(
            "pipeline has {} stages, the limit is {}",
            segments.len(),
            max_stages
        )));
    }

    let background = segments.last_mut().is_some_and(strip_background);

    let mut stages = Vec::with_capacity(segments.len());
    for mut segment in segments {
        let redirection = resolve_redirection(&mut segment);
        if segment.last().is_some_and(|w| is_redirection_operator(w)) {
            return Err(ShellError::Syntax(format!(
                "missing target after '{}'",
                segment[segment.len() - 1]
            )));
        }
        if segment.is_empty() {
            return Err(ShellError::Syntax(if redirection.is_some() {
                "redirection without a command".to_string()
            } else {
                format!("empty command near '{PIPE}'")
            }));
        }
        stages.push(Stage {
            argv: segment,
            redirection,
        });
    }

    Ok(Pipeline { stages, background })
}
