use crate::command::{EXIT_FAILURE, EXIT_SUCCESS, ExitCode};
use crate::env::VariableStore;
use crate::error::{Result, ShellError};
use crate::io_adapters::{Input, LineSource};
use argh::{EarlyExit, FromArgs};
use regex::Regex;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

/// `$name`: a variable reference or assignment target.
static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// `$name=value` written as a single word.
static INLINE_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\$[A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap());

/// Interpreter state a built-in may read or change.
pub(crate) struct Context<'a> {
    pub vars: &'a mut VariableStore,
    pub prompt: &'a mut String,
    /// Value `$?` expands to.
    pub last_status: ExitCode,
    /// Where `read` takes its line from.
    pub input: &'a mut dyn LineSource,
    pub stdout: &'a mut dyn Write,
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins run inside the interpreter process without spawning a child, so
/// they can change its working directory, variables and prompt.
pub(crate) trait BuiltinCommand {
    /// Executes the command against the interpreter state.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

#[derive(FromArgs, Debug, PartialEq)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub(crate) struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn execute(self, _ctx: &mut Context<'_>) -> Result<ExitCode> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(ShellError::Usage("cd: no target and HOME not set".into())),
            },
        };

        env::set_current_dir(&target)
            .map_err(|source| ShellError::DirectoryChange { path: target, source })?;
        Ok(EXIT_SUCCESS)
    }
}

#[derive(FromArgs, Debug, PartialEq)]
/// Read one line of input into the variable $NAME.
pub(crate) struct Read {
    #[argh(positional)]
    /// variable to store the line in, without the leading '$'.
    pub name: String,
}

impl BuiltinCommand for Read {
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let key = format!("${}", self.name);
        if !VARIABLE_NAME.is_match(&key) {
            return Err(ShellError::Usage(format!("read: invalid variable name '{}'", self.name)));
        }
        ctx.stdout.flush()?;
        match ctx.input.read_line(&format!("{}: ", self.name))? {
            Input::Line(line) => {
                ctx.vars.set(key, line);
                Ok(EXIT_SUCCESS)
            }
            Input::Interrupted | Input::Eof => Ok(EXIT_FAILURE),
        }
    }
}

#[derive(FromArgs, Debug, PartialEq)]
/// Replace the interactive prompt, e.g. `prompt = my-shell>`.
pub(crate) struct Prompt {
    #[argh(positional)]
    /// ignored separator word.
    pub _separator: String,

    #[argh(positional)]
    /// the new prompt text.
    pub text: String,
}

impl BuiltinCommand for Prompt {
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        *ctx.prompt = self.text;
        Ok(EXIT_SUCCESS)
    }
}

/// Write the arguments to standard output, separated by spaces, with a trailing newline.
///
/// `$?` expands to the last status and `$name` to the variable's value; an
/// unset variable contributes nothing. Arguments are never parsed as flags.
#[derive(Debug, PartialEq)]
pub(crate) struct Echo {
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let mut words: Vec<String> = Vec::with_capacity(self.args.len());
        for arg in self.args {
            if arg == "$?" {
                words.push(ctx.last_status.to_string());
            } else if arg.len() > 1 && arg.starts_with('$') {
                if let Some(value) = ctx.vars.get(&arg) {
                    words.push(value.to_string());
                }
            } else {
                words.push(arg);
            }
        }
        writeln!(ctx.stdout, "{}", words.join(" "))?;
        ctx.stdout.flush()?;
        Ok(EXIT_SUCCESS)
    }
}

/// `$name = value` or `$name=value`.
#[derive(Debug, PartialEq)]
pub(crate) struct Assign {
    pub key: String,
    pub value: String,
}

impl BuiltinCommand for Assign {
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        ctx.vars.set(self.key, self.value);
        Ok(EXIT_SUCCESS)
    }
}

/// A recognized built-in, ready to run.
#[derive(Debug, PartialEq)]
pub(crate) enum Builtin {
    Cd(Cd),
    Read(Read),
    Prompt(Prompt),
    Echo(Echo),
    Assign(Assign),
    /// `!!`: run the previous line again. Executed by the interpreter, which owns the history.
    Rerun,
    /// `--help` output or similar early exit that is not an error.
    Help(String),
}

impl Builtin {
    /// Recognize `argv` as a built-in.
    ///
    /// Returns `None` when `argv` names an external program, and an error when
    /// it is a built-in with unusable arguments.
    pub fn parse(argv: &[String]) -> Option<Result<Self>> {
        let name = argv.first()?.as_str();
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        let parsed = match name {
            "cd" => from_argh(name, &args, Builtin::Cd),
            "read" => from_argh(name, &args, Builtin::Read),
            "prompt" => from_argh(name, &args, Builtin::Prompt),
            "echo" => Ok(Builtin::Echo(Echo {
                args: argv[1..].to_vec(),
            })),
            "!!" => Ok(Builtin::Rerun),
            _ => return parse_assignment(argv),
        };
        Some(parsed)
    }

    pub fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        match self {
            Builtin::Cd(cmd) => cmd.execute(ctx),
            Builtin::Read(cmd) => cmd.execute(ctx),
            Builtin::Prompt(cmd) => cmd.execute(ctx),
            Builtin::Echo(cmd) => cmd.execute(ctx),
            Builtin::Assign(cmd) => cmd.execute(ctx),
            Builtin::Help(text) => {
                writeln!(ctx.stdout, "{}", text.trim_end())?;
                Ok(EXIT_SUCCESS)
            }
            Builtin::Rerun => Err(ShellError::Usage("!!: cannot be used here".into())),
        }
    }
}

fn from_argh<T: FromArgs>(name: &str, args: &[&str], wrap: fn(T) -> Builtin) -> Result<Builtin> {
    match T::from_args(&[name], args) {
        Ok(cmd) => Ok(wrap(cmd)),
        Err(EarlyExit { output, status }) => match status {
            Ok(()) => Ok(Builtin::Help(output)),
            Err(()) => Err(ShellError::Usage(output.trim_end().to_string())),
        },
    }
}

fn parse_assignment(argv: &[String]) -> Option<Result<Builtin>> {
    let first = argv.first()?;
    if argv.len() >= 3 && first.starts_with('$') {
        if !VARIABLE_NAME.is_match(first) {
            return Some(Err(ShellError::Usage(format!("invalid variable name '{first}'"))));
        }
        return Some(Ok(Builtin::Assign(Assign {
            key: first.clone(),
            value: argv[2].clone(),
        })));
    }
    if argv.len() == 1 {
        let caps = INLINE_ASSIGNMENT.captures(first)?;
        return Some(Ok(Builtin::Assign(Assign {
            key: caps[1].to_string(),
            value: caps[2].to_string(),
        })));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::PipedSource;
    use crate::lexer::split_into_tokens;
    use std::fs;
    use std::io::Cursor;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    struct Fixture {
        vars: VariableStore,
        prompt: String,
        last_status: ExitCode,
        input: PipedSource<Cursor<Vec<u8>>>,
        out: Vec<u8>,
    }

    impl Fixture {
        fn new(input: &str) -> Self {
            Self {
                vars: VariableStore::new(),
                prompt: "hello:".to_string(),
                last_status: 0,
                input: PipedSource::new(Cursor::new(input.as_bytes().to_vec())),
                out: Vec::new(),
            }
        }

        fn run(&mut self, line: &str) -> Result<ExitCode> {
            let argv = split_into_tokens(line);
            let builtin = Builtin::parse(&argv).expect("not a builtin")?;
            let mut ctx = Context {
                vars: &mut self.vars,
                prompt: &mut self.prompt,
                last_status: self.last_status,
                input: &mut self.input,
                stdout: &mut self.out,
            };
            builtin.execute(&mut ctx)
        }

        fn output(&mut self) -> String {
            String::from_utf8(std::mem::take(&mut self.out)).unwrap()
        }
    }

    #[test]
    fn test_external_names_are_not_builtins() {
        assert!(Builtin::parse(&split_into_tokens("ls -l")).is_none());
        assert!(Builtin::parse(&split_into_tokens("$x")).is_none());
        assert!(Builtin::parse(&[]).is_none());
        assert_eq!(Builtin::parse(&split_into_tokens("!!")).unwrap().unwrap(), Builtin::Rerun);
    }

    #[test]
    fn test_echo_joins_arguments() {
        let mut fx = Fixture::new("");
        assert_eq!(fx.run("echo hello   world").unwrap(), 0);
        assert_eq!(fx.output(), "hello world\n");

        fx.run("echo").unwrap();
        assert_eq!(fx.output(), "\n");
    }

    #[test]
    fn test_echo_does_not_parse_flags() {
        let mut fx = Fixture::new("");
        fx.run("echo -n --help").unwrap();
        assert_eq!(fx.output(), "-n --help\n");
    }

    #[test]
    fn test_echo_expands_status_and_variables() {
        let mut fx = Fixture::new("");
        fx.last_status = 3;
        fx.vars.set("$who", "world");
        fx.run("echo $? hello $who $missing !").unwrap();
        assert_eq!(fx.output(), "3 hello world !\n");
    }

    #[test]
    fn test_assignment_forms() {
        let mut fx = Fixture::new("");
        fx.run("$x = 42").unwrap();
        fx.run("$y=abc").unwrap();
        assert_eq!(fx.vars.get("$x"), Some("42"));
        assert_eq!(fx.vars.get("$y"), Some("abc"));

        fx.run("echo $x $y").unwrap();
        assert_eq!(fx.output(), "42 abc\n");
    }

    #[test]
    fn test_invalid_assignment_name_is_usage_error() {
        let argv = split_into_tokens("$1x = 3");
        let err = Builtin::parse(&argv).unwrap().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_read_stores_line_under_dollar_name() {
        let mut fx = Fixture::new("Ada Lovelace\nignored\n");
        assert_eq!(fx.run("read name").unwrap(), 0);
        assert_eq!(fx.vars.get("$name"), Some("Ada Lovelace"));
    }

    #[test]
    fn test_read_at_end_of_input_fails() {
        let mut fx = Fixture::new("");
        assert_eq!(fx.run("read name").unwrap(), 1);
        assert_eq!(fx.vars.get("$name"), None);
    }

    #[test]
    fn test_read_requires_a_name() {
        let argv = split_into_tokens("read");
        let err = Builtin::parse(&argv).unwrap().unwrap_err();
        assert!(matches!(err, ShellError::Usage(_)));
    }

    #[test]
    fn test_prompt_uses_second_argument() {
        let mut fx = Fixture::new("");
        fx.run("prompt = my-shell>").unwrap();
        assert_eq!(fx.prompt, "my-shell>");
    }

    #[test]
    fn test_builtin_help_is_not_an_error() {
        let mut fx = Fixture::new("");
        assert_eq!(fx.run("cd --help").unwrap(), 0);
        assert!(fx.output().contains("Usage: cd"));
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let mut fx = Fixture::new("");
        let res = fx.run(&format!("cd {}", canonical_temp.display()));
        let new_cwd = fs::canonicalize(env::current_dir().unwrap()).unwrap();
        env::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(res.unwrap(), 0);
        assert_eq!(new_cwd, canonical_temp);
        assert_eq!(fx.output(), "", "success is silent");
    }

    #[test]
    fn test_cd_dot_is_idempotent() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let mut fx = Fixture::new("");
        for _ in 0..3 {
            assert_eq!(fx.run("cd .").unwrap(), 0);
        }
        assert_eq!(env::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();

        let name = format!("nonexistent_dir_for_forksh_test_{}", std::process::id());
        let mut fx = Fixture::new("");
        let err = fx.run(&format!("cd {name}")).unwrap_err();

        assert!(matches!(err, ShellError::DirectoryChange { .. }));
        assert!(err.to_string().starts_with(&format!("cd: {name}: ")));
        assert_eq!(env::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_rerun_is_handled_by_the_interpreter() {
        let mut fx = Fixture::new("");
        assert!(matches!(fx.run("!!"), Err(ShellError::Usage(_))));
    }
}
