use anyhow::Context;
use argh::FromArgs;
use forksh::config::DEFAULT_PROMPT;
use forksh::{Config, EditorSource, Interpreter, LineSource, PipedSource, signals};
use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::os::fd::AsFd;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Interactive shell with pipelines, redirection, background jobs and if/then/else/fi.
struct Cli {
    #[argh(option, default = "DEFAULT_PROMPT.to_string()")]
    /// initial prompt text.
    prompt: String,

    #[argh(option)]
    /// tracing filter such as `debug` or `forksh=trace`; FORKSH_LOG takes precedence.
    log: Option<String>,

    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status.
    command: Option<String>,
}

fn init_tracing(cli_filter: Option<&str>) {
    let filter = EnvFilter::try_from_env("FORKSH_LOG")
        .or_else(|_| EnvFilter::try_new(cli_filter.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Terminal stdin gets the line editor; anything else is read line by line.
///
/// Piped input is read through a private duplicate of fd 0 so the process-wide
/// stdin buffer stays empty for built-ins that run in forked pipeline stages.
fn line_source() -> anyhow::Result<Box<dyn LineSource>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(Box::new(EditorSource::new().context("starting line editor")?));
    }
    let fd = stdin
        .as_fd()
        .try_clone_to_owned()
        .context("duplicating stdin")?;
    Ok(Box::new(PipedSource::new(BufReader::new(File::from(fd)))))
}

fn main() -> anyhow::Result<()> {
    let cli: Cli = argh::from_env();
    init_tracing(cli.log.as_deref());
    signals::install_interrupt_handler().context("installing SIGINT handler")?;

    let config = Config {
        prompt: cli.prompt,
        ..Config::default()
    };
    let mut sh = Interpreter::new(config, line_source()?);

    let code = match cli.command {
        Some(line) => sh.execute_line(&line),
        None => sh.repl()?,
    };
    std::process::exit(code)
}
