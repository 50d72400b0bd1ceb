/// Settings fixed for the lifetime of an interpreter session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Initial prompt; the `prompt` built-in replaces it at runtime.
    pub prompt: String,
    /// Prompt shown while an `if` construct is still open.
    pub continuation_prompt: String,
    /// Longest pipeline accepted, counted in stages.
    pub max_pipeline_stages: usize,
}

pub const DEFAULT_PROMPT: &str = "hello:";
pub const DEFAULT_CONTINUATION_PROMPT: &str = "scripting:";
pub const DEFAULT_MAX_PIPELINE_STAGES: usize = 64;

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            continuation_prompt: DEFAULT_CONTINUATION_PROMPT.to_string(),
            max_pipeline_stages: DEFAULT_MAX_PIPELINE_STAGES,
        }
    }
}
