//! The single-level `if`/`then`/`else`/`fi` state machine.
//!
//! Every line passes through [`ControlFlow::classify`] before dispatch. Keyword
//! lines drive transitions; all other lines are run or skipped depending on
//! [`ControlFlow::allows_execution`].

use crate::command::ExitCode;
use crate::error::{Result, ShellError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Neutral,
    /// The condition ran; waiting for `then`.
    WantThen,
    ThenBlock,
    ElseBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionResult {
    Success,
    Fail,
}

impl From<ExitCode> for ConditionResult {
    fn from(code: ExitCode) -> Self {
        if code == 0 {
            ConditionResult::Success
        } else {
            ConditionResult::Fail
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Then,
    Else,
    Fi,
}

impl Keyword {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "if" => Some(Keyword::If),
            "then" => Some(Keyword::Then),
            "else" => Some(Keyword::Else),
            "fi" => Some(Keyword::Fi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Then => "then",
            Keyword::Else => "else",
            Keyword::Fi => "fi",
        }
    }
}

/// What the caller should do with a line after classification.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<'a> {
    /// Run the condition command, then report its status via [`ControlFlow::enter_if`].
    EvaluateCondition(&'a [String]),
    /// A transition happened; `rest` holds any words that followed the keyword.
    Transitioned { rest: &'a [String] },
    /// Not a keyword: dispatch it.
    Execute,
    /// Not a keyword, but the current branch is not taken.
    Skip,
}

#[derive(Debug, Default)]
pub struct ControlFlow {
    state: FlowState,
    result: Option<ConditionResult>,
}

impl ControlFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Outcome of the open construct's condition; `None` while `Neutral`.
    pub fn condition(&self) -> Option<ConditionResult> {
        self.result
    }

    pub fn is_open(&self) -> bool {
        self.state != FlowState::Neutral
    }

    /// Gate for non-keyword commands.
    pub fn allows_execution(&self) -> bool {
        !matches!(
            (self.state, self.result),
            (FlowState::WantThen, _)
                | (FlowState::ThenBlock, Some(ConditionResult::Fail))
                | (FlowState::ElseBlock, Some(ConditionResult::Success))
        )
    }

    /// Decide how `argv` is handled, performing `then`/`else`/`fi` transitions.
    ///
    /// On a sequence error the state is left exactly as it was.
    pub fn classify<'a>(&mut self, argv: &'a [String]) -> Result<Step<'a>> {
        let Some(keyword) = argv.first().and_then(|w| Keyword::parse(w)) else {
            return Ok(if self.allows_execution() {
                Step::Execute
            } else {
                Step::Skip
            });
        };
        let rest = &argv[1..];

        let next = match (keyword, self.state) {
            (Keyword::If, FlowState::Neutral) => return Ok(Step::EvaluateCondition(rest)),
            (Keyword::Then, FlowState::WantThen) => FlowState::ThenBlock,
            (Keyword::Else, FlowState::ThenBlock) => FlowState::ElseBlock,
            (Keyword::Fi, FlowState::ThenBlock | FlowState::ElseBlock) => FlowState::Neutral,
            (keyword, state) => {
                debug!(keyword = keyword.as_str(), ?state, "rejected control keyword");
                return Err(ShellError::unexpected(keyword.as_str()));
            }
        };
        self.transition(next);
        Ok(Step::Transitioned { rest })
    }

    /// Record the condition status of an `if` and wait for `then`.
    pub fn enter_if(&mut self, status: ExitCode) {
        self.result = Some(ConditionResult::from(status));
        self.transition(FlowState::WantThen);
    }

    /// Abandon any open construct.
    pub fn reset(&mut self) {
        self.transition(FlowState::Neutral);
    }

    fn transition(&mut self, next: FlowState) {
        debug!(from = ?self.state, to = ?next, "control flow transition");
        self.state = next;
        if next == FlowState::Neutral {
            self.result = None;
        }
    }
}
