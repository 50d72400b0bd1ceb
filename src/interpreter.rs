use crate::builtin::{Builtin, Context};
use crate::command::{EXIT_SUCCESS, ExitCode};
use crate::config::Config;
use crate::env::VariableStore;
use crate::error::{Result, ShellError};
use crate::external::{self, InProcess};
use crate::flow::{ControlFlow, FlowState, Step};
use crate::io_adapters::{Input, LineSource, PipedSource};
use crate::jobs::JobRegistry;
use crate::lexer::{self, ArgumentVector};
use crate::parser::{self, Redirection, StdStream};
use crate::signals;
use anyhow::Context as _;
use std::io::{self, BufReader, Write};
use tracing::{debug, info};

const QUIT: &str = "quit";
const RERUN: &str = "!!";

/// How a dispatched command ended.
enum Outcome {
    /// A foreground process, pipeline or failure; becomes `$?`.
    Status(ExitCode),
    /// A built-in finished; `$?` keeps its value.
    Builtin(ExitCode),
    /// Launched with `&`; nothing to wait for.
    Background,
}

/// One interactive session: prompt, `$?`, variables, open `if` construct,
/// background jobs and the line the next `!!` repeats.
///
/// Lines go through [`Interpreter::execute_line`]: tokenized, checked against
/// the control-flow state, split into a pipeline and then run as a built-in in
/// this process or as forked children.
///
/// Example
/// ```
/// use forksh::{Config, Interpreter, MemWriter};
/// let out = MemWriter::new();
/// let mut sh = Interpreter::with_output(Config::default(), Box::new(std::io::empty()), Box::new(out.clone()));
/// sh.execute_line("$greeting = hi");
/// sh.execute_line("echo $greeting there");
/// assert_eq!(out.take_string(), "hi there\n");
/// ```
pub struct Interpreter {
    config: Config,
    prompt: String,
    last_status: ExitCode,
    flow: ControlFlow,
    vars: VariableStore,
    jobs: JobRegistry,
    previous_line: Option<String>,
    input: Box<dyn LineSource>,
    out: Box<dyn Write>,
    should_exit: bool,
}

impl Interpreter {
    /// Create a session reading lines from `input` and printing to stdout.
    pub fn new(config: Config, input: Box<dyn LineSource>) -> Self {
        Self::build(config, input, Box::new(io::stdout()))
    }

    /// Create a session whose built-ins print to `out` and whose lines (and
    /// `read` input) come from `input` text.
    pub fn with_output(config: Config, input: Box<dyn io::Read>, out: Box<dyn Write>) -> Self {
        Self::build(config, Box::new(PipedSource::new(BufReader::new(input))), out)
    }

    fn build(config: Config, input: Box<dyn LineSource>, out: Box<dyn Write>) -> Self {
        Self {
            prompt: config.prompt.clone(),
            config,
            last_status: EXIT_SUCCESS,
            flow: ControlFlow::new(),
            vars: VariableStore::new(),
            jobs: JobRegistry::new(),
            previous_line: None,
            input,
            out,
            should_exit: false,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Value `$?` currently expands to.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    pub fn flow_state(&self) -> FlowState {
        self.flow.state()
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Read-eval loop until `quit` or end of input.
    ///
    /// Each cycle first reaps finished background jobs. While an `if` construct
    /// is open the continuation prompt is shown instead of the session prompt.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        while !self.should_exit {
            self.report_finished_jobs();

            let prompt = if self.flow.is_open() {
                format!("{} ", self.config.continuation_prompt)
            } else {
                format!("{} ", self.prompt)
            };
            match self.input.read_line(&prompt).context("reading command line")? {
                Input::Line(line) => {
                    self.execute_line(&line);
                }
                Input::Interrupted => {
                    writeln!(self.out, "^C")?;
                    if self.flow.is_open() {
                        info!("interrupt abandoned open if construct");
                        self.flow.reset();
                    }
                }
                Input::Eof => break,
            }
        }
        self.report_finished_jobs();
        Ok(EXIT_SUCCESS)
    }

    /// Run one complete input line and return its status.
    ///
    /// Records the line in the input history, and for `!!` unless it contains
    /// `!!` itself. `quit` only sets [`Interpreter::should_exit`].
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let argv = lexer::split_into_tokens(line);
        let Some(first) = argv.first() else {
            return EXIT_SUCCESS;
        };

        self.input.add_history(line);
        if first == QUIT && argv.len() == 1 {
            self.should_exit = true;
            return EXIT_SUCCESS;
        }
        // A saved line never re-runs itself.
        if !argv.iter().any(|word| word == RERUN) {
            self.previous_line = Some(line.to_string());
        }

        self.process(&argv)
    }

    /// Control-flow interception, then gated dispatch.
    fn process(&mut self, argv: &[String]) -> ExitCode {
        if argv.is_empty() {
            return EXIT_SUCCESS;
        }
        match self.flow.classify(argv) {
            Err(e) => self.fail(e),
            Ok(Step::EvaluateCondition(condition)) => {
                let status = self.run_command(condition.to_vec());
                self.flow.enter_if(status);
                status
            }
            Ok(Step::Transitioned { rest }) => self.process(rest),
            Ok(Step::Execute) => self.run_command(argv.to_vec()),
            Ok(Step::Skip) => {
                debug!(command = %argv[0], "skipped by control flow");
                EXIT_SUCCESS
            }
        }
    }

    fn run_command(&mut self, argv: ArgumentVector) -> ExitCode {
        if argv.is_empty() {
            return EXIT_SUCCESS;
        }
        match self.dispatch(argv) {
            Ok(Outcome::Status(code)) => {
                self.last_status = code;
                code
            }
            Ok(Outcome::Builtin(code)) => code,
            Ok(Outcome::Background) => EXIT_SUCCESS,
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: ShellError) -> ExitCode {
        let _ = self.out.flush();
        eprintln!("forksh: {e}");
        let code = e.exit_code();
        self.last_status = code;
        code
    }

    fn dispatch(&mut self, argv: ArgumentVector) -> Result<Outcome> {
        let text = argv.join(" ");
        let pipeline = parser::construct_pipeline(argv, self.config.max_pipeline_stages)?;

        if pipeline.is_simple() {
            let stage = &pipeline.stages[0];
            if let Some(builtin) = Builtin::parse(&stage.argv) {
                if pipeline.background {
                    return Err(ShellError::Usage(format!(
                        "{}: built-ins cannot run in the background",
                        stage.name()
                    )));
                }
                return self.run_builtin(builtin?, stage.redirection.as_ref());
            }
        }

        self.out.flush()?;
        let pids = external::launch(&pipeline, self)?;
        if pipeline.background {
            let id = self.jobs.register(pids.clone(), text);
            if let Some(pid) = pids.last() {
                eprintln!("[{id}] {pid}");
            }
            return Ok(Outcome::Background);
        }

        let code = external::wait_all(&pids);
        if signals::take_interrupt() {
            writeln!(self.out)?;
        }
        Ok(Outcome::Status(code))
    }

    fn run_builtin(&mut self, builtin: Builtin, redirection: Option<&Redirection>) -> Result<Outcome> {
        if builtin == Builtin::Rerun {
            return self.rerun();
        }

        let mut stdin_file = None;
        let mut stdout_file = None;
        let mut stderr_file = None;
        if let Some(r) = redirection {
            let file = r.open()?;
            match r.stream {
                StdStream::Stdin => stdin_file = Some(PipedSource::new(BufReader::new(file))),
                StdStream::Stdout => stdout_file = Some(file),
                StdStream::Stderr => stderr_file = Some(file),
            }
        }

        let input: &mut dyn LineSource = match stdin_file.as_mut() {
            Some(source) => source,
            None => self.input.as_mut(),
        };
        let stdout: &mut dyn Write = match stdout_file.as_mut() {
            Some(file) => file,
            None => self.out.as_mut(),
        };
        let mut ctx = Context {
            vars: &mut self.vars,
            prompt: &mut self.prompt,
            last_status: self.last_status,
            input,
            stdout,
        };

        match builtin.execute(&mut ctx) {
            Ok(code) => Ok(Outcome::Builtin(code)),
            Err(e) => match stderr_file.as_mut() {
                Some(file) => {
                    writeln!(file, "forksh: {e}")?;
                    Ok(Outcome::Status(e.exit_code()))
                }
                None => Err(e),
            },
        }
    }

    /// `!!`: feed the saved line through the whole pipeline again.
    fn rerun(&mut self) -> Result<Outcome> {
        let line = self.previous_line.clone().ok_or(ShellError::NoPreviousCommand)?;
        info!(%line, "re-running previous line");
        let argv = lexer::split_into_tokens(&line);
        Ok(Outcome::Builtin(self.process(&argv)))
    }

    fn report_finished_jobs(&mut self) {
        for job in self.jobs.reap() {
            match job.status {
                Some(code) => eprintln!("[{}] Done ({}) {}", job.id, code, job.command),
                None => eprintln!("[{}] Done {}", job.id, job.command),
            }
        }
    }
}

impl InProcess for Interpreter {
    fn run_in_child(&mut self, builtin: Builtin) -> ExitCode {
        let stdin = io::stdin();
        let mut input = PipedSource::new(stdin.lock());
        let mut stdout = io::stdout();
        let mut ctx = Context {
            vars: &mut self.vars,
            prompt: &mut self.prompt,
            last_status: self.last_status,
            input: &mut input,
            stdout: &mut stdout,
        };
        match builtin.execute(&mut ctx) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("forksh: {e}");
                e.exit_code()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::MemWriter;

    fn session(input: &str) -> (Interpreter, MemWriter) {
        let out = MemWriter::new();
        let sh = Interpreter::with_output(
            Config::default(),
            Box::new(io::Cursor::new(input.as_bytes().to_vec())),
            Box::new(out.clone()),
        );
        (sh, out)
    }

    fn run_lines(sh: &mut Interpreter, lines: &[&str]) {
        for line in lines {
            sh.execute_line(line);
        }
    }

    #[test]
    fn test_then_branch_runs_when_condition_succeeds() {
        let (mut sh, out) = session("");
        run_lines(&mut sh, &["if echo cond", "then", "echo yes", "else", "echo no", "fi"]);
        assert_eq!(out.take_string(), "cond\nyes\n");
        assert_eq!(sh.flow_state(), FlowState::Neutral);
    }

    #[test]
    fn test_else_branch_runs_when_condition_fails() {
        let (mut sh, out) = session("");
        // `cd` into a missing directory is a builtin failure, no fork needed.
        run_lines(
            &mut sh,
            &["if cd /definitely/not/here/forksh", "then", "echo yes", "else", "echo no", "fi"],
        );
        assert_eq!(out.take_string(), "no\n");
    }

    #[test]
    fn test_commands_before_then_are_skipped() {
        let (mut sh, out) = session("");
        run_lines(&mut sh, &["if echo c", "echo early", "then", "fi"]);
        assert_eq!(out.take_string(), "c\n");
    }

    #[test]
    fn test_then_in_neutral_is_an_error() {
        let (mut sh, out) = session("");
        assert_eq!(sh.execute_line("then"), 1);
        assert_eq!(sh.flow_state(), FlowState::Neutral);
        assert_eq!(sh.last_status(), 1);
        sh.execute_line("echo still running");
        assert_eq!(out.take_string(), "still running\n");
    }

    #[test]
    fn test_keyword_followed_by_command() {
        let (mut sh, out) = session("");
        run_lines(&mut sh, &["if echo", "then echo inline", "fi"]);
        assert_eq!(out.take_string(), "\ninline\n");
    }

    #[test]
    fn test_failed_builtin_sets_status() {
        let (mut sh, out) = session("");
        sh.execute_line("cd /definitely/not/here/forksh");
        sh.execute_line("echo $?");
        assert_eq!(out.take_string(), "1\n");
    }

    #[test]
    fn test_successful_builtin_keeps_status() {
        let (mut sh, out) = session("");
        sh.execute_line("then");
        sh.execute_line("echo first");
        sh.execute_line("echo $?");
        assert_eq!(out.take_string(), "first\n1\n");
    }

    #[test]
    fn test_read_takes_next_input_line() {
        let (mut sh, out) = session("Grace\n");
        sh.execute_line("read who");
        sh.execute_line("echo hello $who");
        assert_eq!(sh.vars().get("$who"), Some("Grace"));
        assert_eq!(out.take_string(), "hello Grace\n");
    }

    #[test]
    fn test_prompt_builtin_changes_prompt() {
        let (mut sh, _out) = session("");
        assert_eq!(sh.prompt(), "hello:");
        sh.execute_line("prompt = >>>");
        assert_eq!(sh.prompt(), ">>>");
    }

    #[test]
    fn test_rerun_repeats_previous_line() {
        let (mut sh, out) = session("");
        sh.execute_line("echo again");
        sh.execute_line("!!");
        sh.execute_line("!!");
        assert_eq!(out.take_string(), "again\nagain\nagain\n");
    }

    #[test]
    fn test_rerun_without_history_fails() {
        let (mut sh, out) = session("");
        assert_eq!(sh.execute_line("!!"), 1);
        assert_eq!(out.take_string(), "");
    }

    #[test]
    fn test_rerun_as_condition_uses_earlier_line() {
        let (mut sh, out) = session("");
        run_lines(&mut sh, &["echo a", "if !!", "then", "echo yes", "fi"]);
        assert_eq!(out.take_string(), "a\na\nyes\n");
        assert_eq!(sh.flow_state(), FlowState::Neutral);
    }

    #[test]
    fn test_rerun_as_condition_without_history_takes_else() {
        let (mut sh, out) = session("");
        run_lines(&mut sh, &["if !!", "then", "echo yes", "else", "echo no", "fi"]);
        assert_eq!(out.take_string(), "no\n");
    }

    #[test]
    fn test_background_builtin_is_rejected() {
        let (mut sh, out) = session("");
        assert_eq!(sh.execute_line("echo hi &"), 2);
        assert_eq!(sh.last_status(), 2);
        assert_eq!(out.take_string(), "");
    }

    #[test]
    fn test_quit_requests_exit() {
        let (mut sh, _out) = session("");
        assert!(!sh.should_exit());
        assert_eq!(sh.execute_line("quit"), 0);
        assert!(sh.should_exit());
    }

    #[test]
    fn test_repl_stops_at_quit() {
        let (mut sh, out) = session("echo one\nquit\necho two\n");
        assert_eq!(sh.repl().unwrap(), 0);
        assert_eq!(out.take_string(), "one\n");
    }

    #[test]
    fn test_builtin_output_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let (mut sh, out) = session("");
        sh.execute_line(&format!("echo first > {}", path.display()));
        sh.execute_line(&format!("echo second >> {}", path.display()));
        assert_eq!(out.take_string(), "");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_read_from_redirected_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "from file\nsecond\n").unwrap();
        let (mut sh, _out) = session("from stdin\n");
        sh.execute_line(&format!("read line < {}", path.display()));
        assert_eq!(sh.vars().get("$line"), Some("from file"));
    }

    #[test]
    fn test_missing_redirection_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sh, _out) = session("");
        let code = sh.execute_line(&format!("read x < {}", dir.path().join("nope").display()));
        assert_eq!(code, 1);
        assert_eq!(sh.last_status(), 1);
        assert_eq!(sh.vars().get("$x"), None);
    }

    #[test]
    fn test_syntax_error_sets_usage_status() {
        let (mut sh, _out) = session("");
        assert_eq!(sh.execute_line("echo a |"), 2);
        assert_eq!(sh.last_status(), 2);
    }
}
