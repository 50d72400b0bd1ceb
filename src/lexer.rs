//! Splitting of a raw input line into an argument vector.
//!
//! There is no quoting or escaping: every run of blanks separates two words and
//! the operator tokens (`|`, `>`, `>>`, `2>`, `<`, `&`) are only recognized when
//! they stand alone as whole words.

/// Ordered words of one command line; the first word, if any, names the command.
pub type ArgumentVector = Vec<String>;

/// Tokens with a reserved meaning when they appear as whole words.
pub const PIPE: &str = "|";
pub const BACKGROUND: &str = "&";

fn is_blank(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

/// The main entry point function to perform lexical analysis.
///
/// Blank runs collapse, so the result never contains empty words and an
/// all-blank line yields an empty vector.
pub fn split_into_tokens(line: &str) -> ArgumentVector {
    line.split(is_blank)
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect()
}
