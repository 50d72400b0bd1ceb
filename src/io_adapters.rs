use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

/// One read from a [`LineSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A complete line without its terminator. May be empty.
    Line(String),
    /// Control-C at the prompt.
    Interrupted,
    /// No more input.
    Eof,
}

/// The channel complete lines arrive through.
///
/// Cursor editing and history recall are the source's business; the
/// interpreter only ever sees finished lines.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input>;

    /// Remember a submitted line for later recall. No-op by default.
    fn add_history(&mut self, _line: &str) {}
}

/// Terminal input through `rustyline`, with history navigation.
pub struct EditorSource {
    editor: DefaultEditor,
}

impl EditorSource {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Input::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }
}

/// Lines from any buffered reader: piped stdin, a redirected file, a pipe end.
///
/// Prompts are not printed.
pub struct PipedSource<R> {
    reader: R,
}

impl<R: BufRead> PipedSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for PipedSource<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Input> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(Input::Eof);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Input::Line(line))
    }
}

/// Memory-backed writer for capturing what built-ins print.
///
/// Clones share one buffer, so a caller can keep a handle while the
/// interpreter owns the writer.
#[derive(Clone, Default)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything written so far, as text.
    pub fn take_string(&self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut *self.buf.borrow_mut())).into_owned()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
